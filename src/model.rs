//! The host-side object model: the stateful objects the UI observes and
//! commands (`SPEC_FULL.md` §4.7). These types only mutate in response to
//! decoded [`crate::command::Event`]s or direct UI calls; they never touch
//! the wire themselves except by handing encoded [`crate::command::Command`]s
//! to a [`crate::protocol::Endpoint`].

use std::collections::HashMap;
use std::process::Child;

use crate::codec::ObjectSnapshot;
use crate::command::{Command, Condition, Event, WireFrame};
use crate::protocol::Endpoint;
use crate::Error;

/// Opaque 128-bit value chosen per launch, used to pair a spawned debuggee
/// with the right pending [`Process`].
pub type CorrelationId = [u8; 16];

/// Immutable snapshot of an evaluated expression or variable.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub repr: String,
    pub hex_repr: Option<String>,
    pub type_name: String,
    pub expandable: bool,
}

impl From<ObjectSnapshot> for EvaluationResult {
    fn from(obj: ObjectSnapshot) -> Self {
        EvaluationResult {
            repr: obj.repr,
            hex_repr: obj.hex_repr,
            type_name: obj.type_name,
            expandable: obj.expandable,
        }
    }
}

/// Immutable stack frame snapshot. `current_line` is always within
/// `[first_line, last_line]` by construction from a well-formed
/// [`WireFrame`].
#[derive(Debug, Clone, PartialEq)]
pub struct StackFrame {
    pub thread_id: i64,
    pub first_line: u32,
    pub last_line: u32,
    pub current_line: u32,
    pub function_name: String,
    pub file: String,
    pub arg_count: u32,
    pub variables: Vec<(String, EvaluationResult)>,
}

impl StackFrame {
    fn from_wire(thread_id: i64, frame: WireFrame) -> Self {
        StackFrame {
            thread_id,
            first_line: frame.first_line,
            last_line: frame.last_line,
            current_line: frame.current_line.clamp(frame.first_line, frame.last_line),
            function_name: frame.function_name,
            file: frame.file,
            arg_count: frame.arg_count,
            variables: frame
                .variables
                .into_iter()
                .map(|(name, value)| (name, value.into()))
                .collect(),
        }
    }

    /// Argument slots precede local slots; this is the index that
    /// partitions them.
    pub fn arguments(&self) -> &[(String, EvaluationResult)] {
        &self.variables[..self.arg_count as usize]
    }

    pub fn locals(&self) -> &[(String, EvaluationResult)] {
        &self.variables[self.arg_count as usize..]
    }
}

/// Whether a thread is currently running or blocked on the debuggee side.
#[derive(Debug, Clone, PartialEq)]
pub enum ThreadRunState {
    Running,
    Blocked { line: u32 },
}

#[derive(Debug, Clone)]
pub struct Thread {
    pub id: i64,
    pub name: String,
    pub is_worker: bool,
    pub frames: Vec<StackFrame>,
    pub state: ThreadRunState,
}

/// A breakpoint the host has asked the debuggee to install.
#[derive(Debug, Clone, PartialEq)]
pub struct Breakpoint {
    pub id: u32,
    pub file: String,
    pub line: u32,
    pub condition: Option<Condition>,
    pub bound: bool,
}

/// One debuggee launch. Attributes match `SPEC_FULL.md` §3 exactly.
pub struct Process {
    pub correlation_id: CorrelationId,
    pub child: Option<Child>,
    pub threads: HashMap<i64, Thread>,
    pub breakpoints: HashMap<u32, Breakpoint>,
    next_breakpoint_id: u32,
    pub ready_to_debug: bool,
    pub endpoint: Option<Endpoint>,
    pub detached: bool,
}

impl Process {
    pub fn new(correlation_id: CorrelationId, child: Option<Child>) -> Self {
        Process {
            correlation_id,
            child,
            threads: HashMap::new(),
            breakpoints: HashMap::new(),
            next_breakpoint_id: 1,
            ready_to_debug: false,
            endpoint: None,
            detached: false,
        }
    }

    /// Allocates a new id from this process's monotonic counter and stores a
    /// pending (unbound, not-yet-sent) breakpoint. Call [`Process::add`] on
    /// the returned id to actually send `brkp`.
    pub fn add_breakpoint(&mut self, file: String, line: u32, condition: Option<Condition>) -> u32 {
        let id = self.next_breakpoint_id;
        self.next_breakpoint_id += 1;
        self.breakpoints.insert(
            id,
            Breakpoint {
                id,
                file,
                line,
                condition,
                bound: false,
            },
        );
        id
    }

    /// Sends `brkp` for a breakpoint previously allocated with
    /// [`Process::add_breakpoint`].
    pub fn send_add(&mut self, id: u32) -> Result<(), Error> {
        let bp = self
            .breakpoints
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownBreakpoint(id))?;
        let endpoint = self.endpoint.as_ref().ok_or(Error::BadMessage)?;
        endpoint.send(&Command::SetBreakpoint {
            id: bp.id,
            line: bp.line,
            file: bp.file,
            condition: bp.condition,
        })
    }

    /// Removes a breakpoint locally and sends `brkr`. A second call for the
    /// same id is a silent no-op, matching `SPEC_FULL.md` §8's idempotence
    /// requirement.
    pub fn remove_breakpoint(&mut self, id: u32) -> Result<(), Error> {
        let Some(bp) = self.breakpoints.remove(&id) else {
            return Ok(());
        };
        if let Some(endpoint) = &self.endpoint {
            endpoint.send(&Command::RemoveBreakpoint {
                line: bp.line,
                id: bp.id,
            })?;
        }
        Ok(())
    }

    /// `processLoaded(tid)`: marks the process ready to debug.
    pub fn process_loaded(&mut self, tid: i64) {
        self.ready_to_debug = true;
        if let Some(thread) = self.threads.get_mut(&tid) {
            thread.state = ThreadRunState::Running;
        }
    }

    /// `threadCreated(tid)`: the first thread observed is the non-worker
    /// (main) thread.
    pub fn thread_created(&mut self, tid: i64) {
        let is_worker = !self.threads.is_empty();
        self.threads.insert(
            tid,
            Thread {
                id: tid,
                name: String::new(),
                is_worker,
                frames: Vec::new(),
                state: ThreadRunState::Running,
            },
        );
    }

    /// `threadExited(tid)`: removes the thread. Exit of the non-worker
    /// thread triggers process teardown.
    pub fn thread_exited(&mut self, tid: i64) -> bool {
        let was_main = self
            .threads
            .get(&tid)
            .map(|t| !t.is_worker)
            .unwrap_or(false);
        self.threads.remove(&tid);
        if was_main {
            self.teardown();
            true
        } else {
            false
        }
    }

    fn teardown(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.wait();
        }
    }

    /// `threadFrameList(tid, name, frames)`: replaces the thread's frames
    /// wholesale.
    pub fn thread_frame_list(&mut self, tid: i64, name: String, frames: Vec<WireFrame>) {
        let frames: Vec<StackFrame> = frames
            .into_iter()
            .map(|f| StackFrame::from_wire(tid, f))
            .collect();
        let current_line = frames.first().map(|f| f.current_line).unwrap_or(0);
        let thread = self.threads.entry(tid).or_insert_with(|| Thread {
            id: tid,
            name: name.clone(),
            is_worker: true,
            frames: Vec::new(),
            state: ThreadRunState::Running,
        });
        thread.name = name;
        thread.frames = frames;
        thread.state = ThreadRunState::Blocked { line: current_line };
    }

    pub fn mark_running(&mut self, tid: i64) {
        if let Some(thread) = self.threads.get_mut(&tid) {
            thread.state = ThreadRunState::Running;
        }
    }

    /// Sends `resa`. There is no wire acknowledgement for a resume, so the
    /// local run state is updated optimistically.
    pub fn resume_all(&mut self) -> Result<(), Error> {
        let endpoint = self.endpoint.as_ref().ok_or(Error::BadMessage)?;
        endpoint.send(&Command::ResumeAll)?;
        for tid in self.threads.keys().copied().collect::<Vec<_>>() {
            self.mark_running(tid);
        }
        Ok(())
    }

    /// Sends `rest` for a single thread, same optimistic-update rationale as
    /// [`Process::resume_all`].
    pub fn resume_thread(&mut self, tid: i64) -> Result<(), Error> {
        let endpoint = self.endpoint.as_ref().ok_or(Error::BadMessage)?;
        endpoint.send(&Command::ResumeThread { tid })?;
        self.mark_running(tid);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::Reader;

    #[test]
    fn first_thread_is_not_a_worker() {
        let mut p = Process::new([0; 16], None);
        p.thread_created(1);
        p.thread_created(2);
        assert!(!p.threads[&1].is_worker);
        assert!(p.threads[&2].is_worker);
    }

    #[test]
    fn main_thread_exit_tears_down_process() {
        let mut p = Process::new([0; 16], None);
        p.thread_created(1);
        p.thread_created(2);
        assert!(!p.thread_exited(2));
        assert!(p.thread_exited(1));
    }

    #[test]
    fn add_breakpoint_allocates_monotonic_ids() {
        let mut p = Process::new([0; 16], None);
        let a = p.add_breakpoint("s.py".to_string(), 2, None);
        let b = p.add_breakpoint("s.py".to_string(), 3, None);
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn resume_all_sends_command_and_marks_threads_running() {
        use std::net::{TcpListener, TcpStream};

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let (server, _) = listener.accept().unwrap();

        let mut p = Process::new([0; 16], None);
        p.thread_created(1);
        p.thread_frame_list(1, "MainThread".to_string(), vec![]);
        assert_eq!(p.threads[&1].state, ThreadRunState::Blocked { line: 0 });

        p.endpoint = Some(Endpoint::new(client, [0; 16]).unwrap());
        p.resume_all().unwrap();
        assert_eq!(p.threads[&1].state, ThreadRunState::Running);

        let mut reader = Reader::new(server);
        let tag = reader.read_tag().unwrap();
        assert_eq!(&tag, b"resa");
    }

    #[test]
    fn frame_current_line_is_clamped_into_range() {
        let mut p = Process::new([0; 16], None);
        p.thread_created(1);
        p.thread_frame_list(
            1,
            "MainThread".to_string(),
            vec![WireFrame {
                first_line: 1,
                last_line: 2,
                current_line: 2,
                function_name: "<module>".to_string(),
                file: "s.py".to_string(),
                arg_count: 0,
                variables: vec![],
            }],
        );
        let frame = &p.threads[&1].frames[0];
        assert_eq!(frame.current_line, 2);
        assert_eq!(p.threads[&1].state, ThreadRunState::Blocked { line: 2 });
    }
}
