//! The debuggee-side tracer state machine (`SPEC_FULL.md` §4.3): per-thread
//! stepping, breakpoint matching, exception-break policy and the
//! block/resume protocol. Driven by an [`crate::interp::InterpreterAdapter`]
//! through call/line/return/exception callbacks; never touches the wire
//! itself, only emits [`Event`]s through an [`EventSink`] the way
//! `crate::dispatcher` emits commands' replies.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use log::debug;

use crate::command::{BreakType, Condition, Event, HandlerRange, WireFrame};
use crate::interp::{FrameId, FrameSnapshot, ThreadId, Value};

/// Where a thread currently is with respect to single-stepping.
#[derive(Debug, Clone, PartialEq)]
pub enum Stepping {
    None,
    Into,
    Over { depth: usize },
    Out { depth: usize },
    Break,
    LaunchBreak,
    AttachBreak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionMode {
    Never,
    Always,
    Unhandled,
}

/// Exception-break policy: a default mode plus per-name overrides. Seeded
/// per `SPEC_FULL.md` §4.3 with the five built-ins the original agent always
/// treats as "never break" regardless of what the host configures, because
/// they are part of normal control flow in the scripting runtime this
/// protocol targets.
#[derive(Debug, Clone)]
pub struct ExceptionPolicy {
    pub default_mode: ExceptionMode,
    pub modes: HashMap<String, ExceptionMode>,
}

impl Default for ExceptionPolicy {
    fn default() -> Self {
        let mut modes = HashMap::new();
        for name in [
            "IndexError",
            "KeyError",
            "AttributeError",
            "StopIteration",
            "GeneratorExit",
        ] {
            modes.insert(name.to_string(), ExceptionMode::Never);
        }
        ExceptionPolicy {
            default_mode: ExceptionMode::Unhandled,
            modes,
        }
    }
}

impl ExceptionPolicy {
    fn mode_for(&self, name: &str) -> ExceptionMode {
        self.modes.get(name).copied().unwrap_or(self.default_mode)
    }
}

#[derive(Debug, Clone)]
struct BreakpointDef {
    id: u32,
    file: String,
    line: u32,
    condition: Option<Condition>,
}

/// A breakpoint set for a file whose module hasn't loaded yet. Held here
/// instead of in `breakpoints` until a matching `on_module_load` arrives;
/// `SPEC_FULL.md` §3's `PendingBreakpoint` entity.
#[derive(Debug, Clone)]
struct PendingBreakpoint {
    id: u32,
    file: String,
    line: u32,
    condition: Option<Condition>,
}

struct ThreadState {
    name: String,
    stepping: Stepping,
    frames: Vec<FrameSnapshot>,
    block: Arc<(Mutex<bool>, Condvar)>,
}

impl ThreadState {
    fn new(name: String, stepping: Stepping) -> Self {
        ThreadState {
            name,
            stepping,
            frames: Vec::new(),
            block: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Emits events produced by the tracer. Decouples the state machine (and
/// its tests) from any particular transport; `crate::dispatcher` wires the
/// real implementation to an outbound socket writer.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

impl<F: Fn(Event) + Send + Sync> EventSink for F {
    fn emit(&self, event: Event) {
        self(event)
    }
}

/// All tracer state shared across a debuggee's threads. One instance per
/// attached process.
pub struct Tracer<S: EventSink> {
    sink: S,
    breakpoints: Mutex<HashMap<(String, u32), BreakpointDef>>,
    breakpoints_by_id: Mutex<HashMap<u32, (String, u32)>>,
    pending_breakpoints: Mutex<Vec<PendingBreakpoint>>,
    loaded_modules: Mutex<HashMap<String, u32>>,
    next_module_id: Mutex<u32>,
    last_values: Mutex<HashMap<u32, Value>>,
    exception_policy: Mutex<ExceptionPolicy>,
    handler_cache: Mutex<HashMap<String, Vec<HandlerRange>>>,
    handler_cv: Condvar,
    threads: Mutex<HashMap<ThreadId, ThreadState>>,
    break_on_systemexit_zero: Mutex<bool>,
    /// Gates `Stepping::LaunchBreak`: the launch-break stop is suppressed
    /// until the debuggee's first module has loaded, per `SPEC_FULL.md`
    /// §4.3.
    first_module_loaded: Mutex<bool>,
    /// One-shot guard for `Stepping::AttachBreak`: only the first thread to
    /// observe it actually reports; later threads resume silently.
    attach_break_reported: Mutex<bool>,
}

impl<S: EventSink> Tracer<S> {
    pub fn new(sink: S) -> Self {
        // The frozen import machinery always wraps user code in its own
        // try/except, so exceptions seen there never need a round trip to
        // the host to learn they are handled.
        let mut handler_cache = HashMap::new();
        handler_cache.insert(
            "<frozen importlib._bootstrap>".to_string(),
            vec![HandlerRange {
                start: None,
                end: None,
                expressions: vec!["*".to_string()],
            }],
        );

        Tracer {
            sink,
            breakpoints: Mutex::new(HashMap::new()),
            breakpoints_by_id: Mutex::new(HashMap::new()),
            pending_breakpoints: Mutex::new(Vec::new()),
            loaded_modules: Mutex::new(HashMap::new()),
            next_module_id: Mutex::new(1),
            last_values: Mutex::new(HashMap::new()),
            exception_policy: Mutex::new(ExceptionPolicy::default()),
            handler_cache: Mutex::new(handler_cache),
            handler_cv: Condvar::new(),
            threads: Mutex::new(HashMap::new()),
            break_on_systemexit_zero: Mutex::new(false),
            first_module_loaded: Mutex::new(false),
            attach_break_reported: Mutex::new(false),
        }
    }

    /// By default a `SystemExit(0)` never breaks regardless of policy. A
    /// host can opt back into seeing it (e.g. to diagnose an unexpectedly
    /// early exit) by setting this to `true`.
    pub fn set_break_on_system_exit_zero(&self, value: bool) {
        *self.break_on_systemexit_zero.lock().unwrap() = value;
    }

    fn emit(&self, event: Event) {
        self.sink.emit(event);
    }

    /// Lets `crate::dispatcher` emit reply events (`EXCE`/`EXCR`/`CHLD`/
    /// `SETL`) that are not themselves part of the stepping/breakpoint state
    /// machine.
    pub fn emit_external(&self, event: Event) {
        self.emit(event);
    }

    // -- thread bookkeeping -------------------------------------------------

    pub fn register_thread(&self, tid: ThreadId, name: String, launch_break: Option<Stepping>) {
        {
            let mut threads = self.threads.lock().unwrap();
            threads.insert(tid, ThreadState::new(name, launch_break.unwrap_or(Stepping::None)));
        }
        self.emit(Event::ThreadCreated { tid });
    }

    pub fn unregister_thread(&self, tid: ThreadId) {
        self.threads.lock().unwrap().remove(&tid);
        self.emit(Event::ThreadExited { tid });
    }

    pub fn frame(&self, tid: ThreadId, frame_id: FrameId) -> Option<FrameSnapshot> {
        self.threads
            .lock()
            .unwrap()
            .get(&tid)?
            .frames
            .get(frame_id as usize)
            .cloned()
    }

    pub fn set_frame(&self, tid: ThreadId, frame_id: FrameId, frame: FrameSnapshot) {
        if let Some(state) = self.threads.lock().unwrap().get_mut(&tid) {
            if let Some(slot) = state.frames.get_mut(frame_id as usize) {
                *slot = frame;
            }
        }
    }

    fn wire_frames(&self, tid: ThreadId) -> Vec<WireFrame> {
        self.threads
            .lock()
            .unwrap()
            .get(&tid)
            .map(|s| {
                s.frames
                    .iter()
                    .rev()
                    .map(|f| WireFrame {
                        first_line: f.first_line,
                        last_line: f.last_line,
                        current_line: f.line,
                        function_name: f.function_name.clone(),
                        file: f.file.clone(),
                        arg_count: f.arg_names.len() as u32,
                        variables: f
                            .locals
                            .iter()
                            .map(|(n, v)| {
                                (
                                    n.clone(),
                                    crate::codec::ObjectSnapshot {
                                        repr: v.to_string(),
                                        hex_repr: None,
                                        type_name: v.type_name().to_string(),
                                        expandable: false,
                                    },
                                )
                            })
                            .collect(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    // -- module loading ---------------------------------------------------

    /// Records a file as loaded, emits `MODL` the first time it's seen, and
    /// binds any breakpoints that were waiting on it.
    pub fn on_module_load(&self, file: &str) {
        if self.module_loaded(file) {
            return;
        }
        let module_id = {
            let mut loaded = self.loaded_modules.lock().unwrap();
            let mut next = self.next_module_id.lock().unwrap();
            let id = *next;
            *next += 1;
            loaded.insert(file.to_string(), id);
            id
        };
        *self.first_module_loaded.lock().unwrap() = true;
        self.emit(Event::ModuleLoaded {
            module_id,
            file: file.to_string(),
        });

        let ready: Vec<PendingBreakpoint> = {
            let mut pending = self.pending_breakpoints.lock().unwrap();
            let (ready, still_pending): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|p| p.file == file || basename(&p.file) == basename(file));
            *pending = still_pending;
            ready
        };
        for p in ready {
            self.bind_breakpoint(p.id, p.file, p.line, p.condition);
        }
    }

    fn module_loaded(&self, file: &str) -> bool {
        let loaded = self.loaded_modules.lock().unwrap();
        loaded.contains_key(file) || loaded.keys().any(|f| basename(f) == basename(file))
    }

    // -- breakpoints ----------------------------------------------------

    fn bind_breakpoint(&self, id: u32, file: String, line: u32, condition: Option<Condition>) {
        self.breakpoints_by_id.lock().unwrap().insert(id, (file.clone(), line));
        self.breakpoints.lock().unwrap().insert(
            (file.clone(), line),
            BreakpointDef {
                id,
                file,
                line,
                condition,
            },
        );
        self.emit(Event::BreakpointBound { id });
    }

    /// Binds immediately if the target file's module has already loaded;
    /// otherwise holds the breakpoint pending until `on_module_load` sees a
    /// matching file, per `SPEC_FULL.md` §3/§4.3's `PendingBreakpoint`
    /// fallback. A breakpoint that never binds by process exit is reported
    /// with `BRKF` by the caller driving process teardown.
    pub fn set_breakpoint(&self, id: u32, file: String, line: u32, condition: Option<Condition>) {
        if self.module_loaded(&file) {
            self.bind_breakpoint(id, file, line, condition);
        } else {
            self.pending_breakpoints.lock().unwrap().push(PendingBreakpoint {
                id,
                file,
                line,
                condition,
            });
        }
    }

    /// Fails every still-pending breakpoint with `BRKF`. Called when the
    /// debuggee process exits without ever loading the module a breakpoint
    /// targeted.
    pub fn fail_pending_breakpoints(&self) {
        let pending: Vec<PendingBreakpoint> = self.pending_breakpoints.lock().unwrap().drain(..).collect();
        for p in pending {
            self.emit(Event::BreakpointFailed { id: p.id });
        }
    }

    /// Removes by id. `line` from `Command::RemoveBreakpoint` is kept only
    /// for the wire shape's sake; the id index is authoritative, matching
    /// `SPEC_FULL.md` §8's idempotent-removal requirement.
    pub fn remove_breakpoint_by_id(&self, id: u32) {
        if let Some(key) = self.breakpoints_by_id.lock().unwrap().remove(&id) {
            self.breakpoints.lock().unwrap().remove(&key);
        }
        self.pending_breakpoints.lock().unwrap().retain(|p| p.id != id);
    }

    pub fn update_condition(&self, id: u32, condition: Option<Condition>) {
        let key = self.breakpoints_by_id.lock().unwrap().get(&id).cloned();
        if let Some(key) = key {
            if let Some(def) = self.breakpoints.lock().unwrap().get_mut(&key) {
                def.condition = condition;
            }
        }
    }

    /// Matches by absolute path first; falls back to basename comparison so
    /// a breakpoint bound against a path reported slightly differently by
    /// the embedder (e.g. a relative vs. absolute form) still fires, per
    /// spec.md:89.
    fn matching_breakpoint(&self, file: &str, line: u32) -> Option<BreakpointDef> {
        let breakpoints = self.breakpoints.lock().unwrap();
        if let Some(def) = breakpoints.get(&(file.to_string(), line)) {
            return Some(def.clone());
        }
        let base = basename(file);
        breakpoints
            .values()
            .find(|def| def.line == line && basename(&def.file) == base)
            .cloned()
    }

    /// Evaluates a breakpoint's condition (if any) and its break-on-change
    /// gate against `frame`. Returns whether the breakpoint should fire.
    fn should_fire(&self, def: &BreakpointDef, frame: &FrameSnapshot) -> bool {
        let Some(condition) = &def.condition else {
            return true;
        };
        let value = match crate::interp::parse_and_eval(&condition.expr, &mut frame.clone()) {
            Ok(v) => v,
            // A condition that fails to evaluate is treated as "break":
            // the user would rather see a spurious stop than silently miss
            // one because their expression had a typo.
            Err(_) => return true,
        };
        if !condition.break_on_change {
            return matches!(value, Value::Bool(true)) || !matches!(value, Value::Bool(_));
        }
        let mut last = self.last_values.lock().unwrap();
        let changed = last.get(&def.id) != Some(&value);
        last.insert(def.id, value);
        changed
    }

    // -- exception policy -------------------------------------------------

    pub fn set_exception_info(&self, default_mode: u32, modes: Vec<(u32, String)>) {
        let mut policy = self.exception_policy.lock().unwrap();
        policy.default_mode = mode_from_wire(default_mode);
        for (mode, name) in modes {
            policy.modes.insert(name, mode_from_wire(mode));
        }
    }

    pub fn set_handler_info(&self, file: String, ranges: Vec<HandlerRange>) {
        self.handler_cache.lock().unwrap().insert(file, ranges);
        self.handler_cv.notify_all();
    }

    /// Blocks the calling thread until handler ranges for `file` are known,
    /// requesting them from the host with `REQH` if they are not cached yet.
    /// Grounded on the `REQH`/`sehi` round trip in `SPEC_FULL.md` §4.3.
    fn handler_ranges(&self, file: &str) -> Vec<HandlerRange> {
        let mut cache = self.handler_cache.lock().unwrap();
        if let Some(ranges) = cache.get(file) {
            return ranges.clone();
        }
        drop(cache);
        self.emit(Event::RequestHandlers { file: file.to_string() });
        cache = self.handler_cache.lock().unwrap();
        while !cache.contains_key(file) {
            cache = self.handler_cv.wait(cache).unwrap();
        }
        cache.get(file).cloned().unwrap_or_default()
    }

    fn is_handled(&self, file: &str, line: u32, exception_name: &str) -> bool {
        self.handler_ranges(file).iter().any(|range| {
            let in_range = range.start.map_or(true, |s| line >= s) && range.end.map_or(true, |e| line < e);
            in_range
                && range
                    .expressions
                    .iter()
                    .any(|e| e == "*" || e == exception_name)
        })
    }

    // -- stepping commands --------------------------------------------------

    pub fn step_into(&self, tid: ThreadId) {
        self.set_stepping(tid, Stepping::Into);
    }

    pub fn step_over(&self, tid: ThreadId) {
        let depth = self.depth(tid);
        self.set_stepping(tid, Stepping::Over { depth });
    }

    pub fn step_out(&self, tid: ThreadId) {
        let depth = self.depth(tid).saturating_sub(1);
        self.set_stepping(tid, Stepping::Out { depth });
    }

    pub fn clear_stepping(&self, tid: ThreadId) {
        self.set_stepping(tid, Stepping::None);
    }

    pub fn break_all(&self) {
        let mut threads = self.threads.lock().unwrap();
        for state in threads.values_mut() {
            state.stepping = Stepping::Break;
        }
    }

    pub fn resume_all(&self) {
        let blocks: Vec<_> = {
            let threads = self.threads.lock().unwrap();
            threads.values().map(|s| Arc::clone(&s.block)).collect()
        };
        for block in blocks {
            release(&block);
        }
    }

    pub fn resume_thread(&self, tid: ThreadId) {
        let block = self.threads.lock().unwrap().get(&tid).map(|s| Arc::clone(&s.block));
        if let Some(block) = block {
            release(&block);
        }
    }

    fn set_stepping(&self, tid: ThreadId, stepping: Stepping) {
        if let Some(state) = self.threads.lock().unwrap().get_mut(&tid) {
            state.stepping = stepping;
        }
        self.resume_thread(tid);
    }

    fn depth(&self, tid: ThreadId) -> usize {
        self.threads.lock().unwrap().get(&tid).map(|s| s.frames.len()).unwrap_or(0)
    }

    // -- trace callbacks, invoked by the interpreter adapter -----------------

    pub fn on_call(&self, tid: ThreadId, frame: FrameSnapshot) {
        self.on_module_load(&frame.file);
        let mut threads = self.threads.lock().unwrap();
        let state = threads
            .entry(tid)
            .or_insert_with(|| ThreadState::new(String::new(), Stepping::None));
        state.frames.push(frame);
    }

    pub fn on_return(&self, tid: ThreadId) {
        let mut threads = self.threads.lock().unwrap();
        if let Some(state) = threads.get_mut(&tid) {
            state.frames.pop();
        }
    }

    /// Called at each line boundary. `frame` is the current top frame's
    /// fresh snapshot (locals as of this line).
    pub fn on_line(&self, tid: ThreadId, frame: FrameSnapshot) {
        self.on_module_load(&frame.file);
        {
            let mut threads = self.threads.lock().unwrap();
            if let Some(state) = threads.get_mut(&tid) {
                if let Some(top) = state.frames.last_mut() {
                    *top = frame.clone();
                } else {
                    state.frames.push(frame.clone());
                }
            }
        }

        let depth = self.depth(tid);
        let stepping = self.threads.lock().unwrap().get(&tid).map(|s| s.stepping.clone());

        let step_stop = match stepping {
            Some(Stepping::Into) | Some(Stepping::Break) => true,
            // Suppressed until the debuggee's first module has loaded, so a
            // launch-break never fires before there's any code to show.
            Some(Stepping::LaunchBreak) => *self.first_module_loaded.lock().unwrap(),
            // One-shot per process: only the first thread to observe it
            // reports; later threads just continue.
            Some(Stepping::AttachBreak) => {
                let mut reported = self.attach_break_reported.lock().unwrap();
                if *reported {
                    false
                } else {
                    *reported = true;
                    true
                }
            }
            Some(Stepping::Over { depth: d }) | Some(Stepping::Out { depth: d }) => depth <= d,
            _ => false,
        };

        if step_stop {
            if !probe_stack_headroom(STACK_PROBE_DEPTH) {
                debug!("thread {} skipped step stop: insufficient stack headroom", tid);
                return;
            }
            self.clear_stepping(tid);
            debug!("thread {} stopped by step/pause", tid);
            self.stop_and_report(tid, Event::StepDone { tid });
            return;
        }
        if matches!(stepping, Some(Stepping::AttachBreak)) {
            self.clear_stepping(tid);
        }

        if let Some(def) = self.matching_breakpoint(&frame.file, frame.line) {
            if self.should_fire(&def, &frame) {
                if !probe_stack_headroom(STACK_PROBE_DEPTH) {
                    debug!("thread {} skipped breakpoint {}: insufficient stack headroom", tid, def.id);
                    return;
                }
                debug!("thread {} hit breakpoint {}", tid, def.id);
                self.stop_and_report(tid, Event::BreakpointHit { id: def.id, tid });
            }
        }
    }

    /// Called when an exception propagates through `frame`. `is_top` is
    /// `true` only for the innermost frame that saw it, matching
    /// `SPEC_FULL.md` §9's "top of traceback" rule for handled/unhandled
    /// classification.
    pub fn on_exception(&self, tid: ThreadId, frame: FrameSnapshot, type_name: &str, message: &str, is_top: bool) {
        let is_systemexit_zero = type_name == "SystemExit" && (message == "0" || message.is_empty());
        if is_systemexit_zero && !*self.break_on_systemexit_zero.lock().unwrap() {
            return;
        }

        let mode = self.exception_policy.lock().unwrap().mode_for(type_name);
        if mode == ExceptionMode::Never {
            return;
        }

        let break_type = if self.is_handled(&frame.file, frame.line, type_name) {
            BreakType::Handled
        } else {
            BreakType::Unhandled
        };

        if mode == ExceptionMode::Unhandled && break_type == BreakType::Handled {
            return;
        }
        if !is_top {
            return;
        }
        if !probe_stack_headroom(STACK_PROBE_DEPTH) {
            debug!("thread {} skipped exception stop: insufficient stack headroom", tid);
            return;
        }

        self.stop_and_report(
            tid,
            Event::Exception {
                name: type_name.to_string(),
                tid,
                break_type,
                text: message.to_string(),
            },
        );
    }

    fn stop_and_report(&self, tid: ThreadId, reason: Event) {
        let name = self
            .threads
            .lock()
            .unwrap()
            .get(&tid)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        self.emit(Event::ThreadFrames {
            tid,
            name,
            frames: self.wire_frames(tid),
        });

        let block = match self.threads.lock().unwrap().get(&tid) {
            Some(state) => Arc::clone(&state.block),
            None => return,
        };
        {
            let mut blocked = block.0.lock().unwrap();
            *blocked = true;
        }
        self.emit(reason);
        block_until_released(&block);
    }
}

/// Number of frames the stack probe recurses before reporting headroom as
/// sufficient.
const STACK_PROBE_DEPTH: u32 = 512;

/// Recurses `remaining` frames to make sure there's headroom left on the
/// call stack before reporting a stop to the host, per `spec.md`:89. Safe
/// Rust has no portable way to detect an imminent stack overflow (that
/// needs a guard page and a signal handler); this is a best-effort analogue
/// that at least forces the recursion to actually happen, each frame
/// holding a local the caller reads back, so a genuinely exhausted stack
/// still traps here instead of inside deeper frame-snapshot machinery.
fn probe_stack_headroom(remaining: u32) -> bool {
    if remaining == 0 {
        return true;
    }
    let frame_marker = remaining;
    let deeper = probe_stack_headroom(remaining - 1);
    deeper && frame_marker == remaining
}

fn mode_from_wire(v: u32) -> ExceptionMode {
    match v {
        1 => ExceptionMode::Always,
        2 => ExceptionMode::Unhandled,
        _ => ExceptionMode::Never,
    }
}

fn block_until_released(block: &Arc<(Mutex<bool>, Condvar)>) {
    let (lock, cv) = &**block;
    let mut blocked = lock.lock().unwrap();
    while *blocked {
        blocked = cv.wait(blocked).unwrap();
    }
}

fn release(block: &Arc<(Mutex<bool>, Condvar)>) {
    let (lock, cv) = &**block;
    let mut blocked = lock.lock().unwrap();
    *blocked = false;
    cv.notify_all();
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn sink() -> (impl EventSink, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (move |e: Event| tx.send(e).unwrap(), rx)
    }

    fn frame(file: &str, line: u32, locals: Vec<(&str, Value)>) -> FrameSnapshot {
        FrameSnapshot {
            id: 0,
            file: file.to_string(),
            function_name: "<module>".to_string(),
            first_line: 1,
            last_line: 10,
            line,
            arg_names: vec![],
            locals: locals.into_iter().map(|(n, v)| (n.to_string(), v)).collect(),
        }
    }

    #[test]
    fn breakpoint_hit_emits_frames_then_reason_and_blocks() {
        let (sink, rx) = sink();
        let tracer = Arc::new(Tracer::new(sink));
        tracer.register_thread(1, "MainThread".to_string(), None);
        assert_eq!(rx.recv().unwrap(), Event::ThreadCreated { tid: 1 });
        tracer.on_module_load("s.py");
        assert_eq!(
            rx.recv().unwrap(),
            Event::ModuleLoaded {
                module_id: 1,
                file: "s.py".to_string()
            }
        );
        tracer.set_breakpoint(7, "s.py".to_string(), 2, None);
        assert_eq!(rx.recv().unwrap(), Event::BreakpointBound { id: 7 });

        let t = Arc::clone(&tracer);
        let handle = thread::spawn(move || {
            t.on_line(1, frame("s.py", 2, vec![]));
        });

        assert!(matches!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Event::ThreadFrames { tid: 1, .. }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Event::BreakpointHit { id: 7, tid: 1 });

        tracer.resume_thread(1);
        handle.join().unwrap();
    }

    #[test]
    fn step_over_does_not_stop_inside_called_frame() {
        let (sink, rx) = sink();
        let tracer = Tracer::new(sink);
        tracer.register_thread(1, "MainThread".to_string(), None);
        assert_eq!(rx.recv().unwrap(), Event::ThreadCreated { tid: 1 });
        tracer.on_line(1, frame("s.py", 1, vec![]));
        assert_eq!(
            rx.recv().unwrap(),
            Event::ModuleLoaded {
                module_id: 1,
                file: "s.py".to_string()
            }
        );
        tracer.step_over(1);

        tracer.on_call(1, frame("s.py", 5, vec![]));
        tracer.on_line(1, frame("s.py", 5, vec![]));
        assert!(rx.try_recv().is_err(), "must not stop at deeper depth");

        tracer.on_return(1);
    }

    #[test]
    fn conditional_break_on_change_fires_only_on_transitions() {
        let (sink, rx) = sink();
        let tracer = Arc::new(Tracer::new(sink));
        tracer.register_thread(1, "MainThread".to_string(), None);
        assert_eq!(rx.recv().unwrap(), Event::ThreadCreated { tid: 1 });
        tracer.on_module_load("loop.py");
        let _ = rx.recv().unwrap(); // ModuleLoaded
        tracer.set_breakpoint(
            9,
            "loop.py".to_string(),
            3,
            Some(Condition {
                expr: "i".to_string(),
                break_on_change: true,
            }),
        );
        let _ = rx.recv().unwrap(); // BreakpointBound

        let values = [0, 0, 1, 1, 2];
        let mut hits = 0;
        for v in values {
            let t = Arc::clone(&tracer);
            let handle = thread::spawn(move || {
                t.on_line(1, frame("loop.py", 3, vec![("i", Value::Int(v))]));
            });
            if matches!(rx.recv_timeout(Duration::from_millis(200)), Ok(Event::ThreadFrames { .. })) {
                assert_eq!(rx.recv_timeout(Duration::from_millis(200)).unwrap(), Event::BreakpointHit { id: 9, tid: 1 });
                hits += 1;
                tracer.resume_thread(1);
            }
            handle.join().unwrap();
        }
        assert_eq!(hits, 3);
    }

    #[test]
    fn never_mode_exception_does_not_stop() {
        let (sink, rx) = sink();
        let tracer = Tracer::new(sink);
        tracer.register_thread(1, "MainThread".to_string(), None);
        assert_eq!(rx.recv().unwrap(), Event::ThreadCreated { tid: 1 });
        tracer.on_exception(1, frame("s.py", 4, vec![]), "KeyError", "'x'", true);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unhandled_exception_stops_when_no_handler_registered() {
        let (sink, rx) = sink();
        let tracer = Arc::new(Tracer::new(sink));
        tracer.register_thread(1, "MainThread".to_string(), None);
        assert_eq!(rx.recv().unwrap(), Event::ThreadCreated { tid: 1 });
        tracer.set_handler_info("s.py".to_string(), vec![]);
        let t = Arc::clone(&tracer);
        let handle = thread::spawn(move || {
            t.on_exception(1, frame("s.py", 4, vec![]), "ValueError", "x", true);
        });
        assert!(matches!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Event::ThreadFrames { .. }));
        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Event::Exception { break_type, .. } => assert_eq!(break_type, BreakType::Unhandled),
            other => panic!("unexpected event {:?}", other),
        }
        tracer.resume_thread(1);
        handle.join().unwrap();
    }

    #[test]
    fn handler_discovery_suppresses_second_raise_in_covered_range() {
        let (sink, rx) = sink();
        let tracer = Arc::new(Tracer::new(sink));
        tracer.register_thread(1, "MainThread".to_string(), None);
        assert_eq!(rx.recv().unwrap(), Event::ThreadCreated { tid: 1 });

        let t = Arc::clone(&tracer);
        let handle = thread::spawn(move || {
            t.on_exception(1, frame("s.py", 4, vec![]), "ValueError", "x", true);
        });
        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Event::RequestHandlers { file } => assert_eq!(file, "s.py"),
            other => panic!("expected REQH, got {:?}", other),
        }
        tracer.set_handler_info(
            "s.py".to_string(),
            vec![HandlerRange {
                start: Some(1),
                end: Some(10),
                expressions: vec!["ValueError".to_string()],
            }],
        );
        handle.join().unwrap();
        assert!(rx.try_recv().is_err(), "handled exception must not stop the thread");

        tracer.on_exception(1, frame("s.py", 4, vec![]), "ValueError", "x", true);
        assert!(rx.try_recv().is_err(), "second raise reuses the cached handler ranges");
    }

    #[test]
    fn system_exit_zero_is_suppressed() {
        let (sink, rx) = sink();
        let tracer = Tracer::new(sink);
        tracer.register_thread(1, "MainThread".to_string(), None);
        assert_eq!(rx.recv().unwrap(), Event::ThreadCreated { tid: 1 });
        tracer.on_exception(1, frame("s.py", 4, vec![]), "SystemExit", "0", true);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn breakpoint_set_before_module_load_binds_once_module_loads() {
        let (sink, rx) = sink();
        let tracer = Tracer::new(sink);

        tracer.set_breakpoint(5, "pending.py".to_string(), 2, None);
        assert!(rx.try_recv().is_err(), "must not bind before its module has loaded");

        tracer.on_module_load("pending.py");
        assert_eq!(
            rx.recv().unwrap(),
            Event::ModuleLoaded {
                module_id: 1,
                file: "pending.py".to_string()
            }
        );
        assert_eq!(rx.recv().unwrap(), Event::BreakpointBound { id: 5 });
    }

    #[test]
    fn breakpoint_that_never_binds_is_failed_on_request() {
        let (sink, rx) = sink();
        let tracer = Tracer::new(sink);

        tracer.set_breakpoint(6, "never.py".to_string(), 2, None);
        tracer.fail_pending_breakpoints();
        assert_eq!(rx.recv().unwrap(), Event::BreakpointFailed { id: 6 });
    }

    #[test]
    fn breakpoint_matches_by_basename_when_path_differs() {
        let (sink, rx) = sink();
        let tracer = Arc::new(Tracer::new(sink));

        tracer.on_module_load("/abs/path/s.py");
        assert_eq!(
            rx.recv().unwrap(),
            Event::ModuleLoaded {
                module_id: 1,
                file: "/abs/path/s.py".to_string()
            }
        );
        tracer.set_breakpoint(8, "/abs/path/s.py".to_string(), 3, None);
        assert_eq!(rx.recv().unwrap(), Event::BreakpointBound { id: 8 });

        tracer.register_thread(1, "MainThread".to_string(), None);
        assert_eq!(rx.recv().unwrap(), Event::ThreadCreated { tid: 1 });

        let t = Arc::clone(&tracer);
        let handle = thread::spawn(move || {
            t.on_line(1, frame("s.py", 3, vec![]));
        });
        assert!(matches!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Event::ThreadFrames { .. }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Event::BreakpointHit { id: 8, tid: 1 });
        tracer.resume_thread(1);
        handle.join().unwrap();
    }

    #[test]
    fn always_mode_reports_handled_break_type_for_caught_exceptions() {
        let (sink, rx) = sink();
        let tracer = Arc::new(Tracer::new(sink));
        tracer.register_thread(1, "MainThread".to_string(), None);
        assert_eq!(rx.recv().unwrap(), Event::ThreadCreated { tid: 1 });
        tracer.set_exception_info(1, vec![]); // default mode -> Always
        tracer.set_handler_info(
            "s.py".to_string(),
            vec![HandlerRange {
                start: Some(1),
                end: Some(10),
                expressions: vec!["ValueError".to_string()],
            }],
        );

        let t = Arc::clone(&tracer);
        let handle = thread::spawn(move || {
            t.on_exception(1, frame("s.py", 4, vec![]), "ValueError", "x", true);
        });
        assert!(matches!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Event::ThreadFrames { .. }));
        match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Event::Exception { break_type, .. } => assert_eq!(break_type, BreakType::Handled),
            other => panic!("unexpected event {:?}", other),
        }
        tracer.resume_thread(1);
        handle.join().unwrap();
    }

    #[test]
    fn launch_break_is_suppressed_until_first_module_loads() {
        let (sink, rx) = sink();
        let tracer = Arc::new(Tracer::new(sink));
        tracer.register_thread(1, "MainThread".to_string(), Some(Stepping::LaunchBreak));
        assert_eq!(rx.recv().unwrap(), Event::ThreadCreated { tid: 1 });

        let t = Arc::clone(&tracer);
        let handle = thread::spawn(move || {
            t.on_line(1, frame("s.py", 1, vec![]));
        });
        // The first line also loads the module, so launch-break becomes
        // eligible on this very call and the thread stops.
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            Event::ModuleLoaded {
                module_id: 1,
                file: "s.py".to_string()
            }
        );
        assert!(matches!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Event::ThreadFrames { .. }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Event::StepDone { tid: 1 });
        tracer.resume_thread(1);
        handle.join().unwrap();
    }

    #[test]
    fn attach_break_reports_only_for_the_first_thread() {
        let (sink, rx) = sink();
        let tracer = Arc::new(Tracer::new(sink));
        tracer.register_thread(1, "MainThread".to_string(), Some(Stepping::AttachBreak));
        assert_eq!(rx.recv().unwrap(), Event::ThreadCreated { tid: 1 });
        tracer.register_thread(2, "worker".to_string(), Some(Stepping::AttachBreak));
        assert_eq!(rx.recv().unwrap(), Event::ThreadCreated { tid: 2 });
        tracer.on_module_load("s.py");
        assert_eq!(
            rx.recv().unwrap(),
            Event::ModuleLoaded {
                module_id: 1,
                file: "s.py".to_string()
            }
        );

        let t = Arc::clone(&tracer);
        let handle = thread::spawn(move || {
            t.on_line(1, frame("s.py", 1, vec![]));
        });
        assert!(matches!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Event::ThreadFrames { .. }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Event::StepDone { tid: 1 });
        tracer.resume_thread(1);
        handle.join().unwrap();

        // second thread observes the same attach-break but must not report.
        tracer.on_line(2, frame("s.py", 1, vec![]));
        assert!(rx.try_recv().is_err());
    }
}
