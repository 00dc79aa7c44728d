//! Ties the host object model ([`crate::model`]) to decoded events, and
//! produces the typed notifications a UI (or, here, a test) observes.
//! Mutation only ever happens from [`Session::apply_event`], called on the
//! single thread that owns the connection manager's event loop.

use std::collections::HashMap;

use log::warn;

use crate::command::{BreakType, Event};
use crate::model::{CorrelationId, EvaluationResult, Process};
use crate::protocol::Endpoint;
use crate::Error;

/// A typed, UI-facing notification derived from one decoded event. Unlike
/// [`Event`] this already reflects the object-model mutation that happened
/// (e.g. `ThreadFramesUpdated` carries no frames — callers read them off
/// `Session::process(..).threads[..].frames`).
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Connected { ok: bool },
    ProcessLoaded { tid: i64 },
    ThreadCreated { tid: i64 },
    ThreadExited { tid: i64, process_terminated: bool },
    ModuleLoaded { module_id: u32, file: String },
    BreakpointBound { id: u32 },
    BreakpointFailed { id: u32 },
    BreakpointHit { id: u32, tid: i64 },
    StepComplete { tid: i64 },
    AsyncBreakComplete { tid: i64 },
    ExceptionRaised {
        name: String,
        tid: i64,
        break_type: BreakType,
        text: String,
    },
    SetLineResult { succeeded: bool, tid: i64, new_line: u32 },
    ThreadFramesUpdated { tid: i64 },
    Detached,
    EvalError { eval_id: u32, text: String },
    EvalResult { eval_id: u32, result: EvaluationResult },
    Children {
        eval_id: u32,
        attributes: Vec<(String, EvaluationResult)>,
        indices: Vec<(String, EvaluationResult)>,
        is_index: bool,
        is_enum: bool,
    },
    Output { tid: i64, text: String },
    RequestHandlers { file: String },
}

/// All processes the host currently knows about, keyed by correlation id.
#[derive(Default)]
pub struct Session {
    processes: HashMap<CorrelationId, Process>,
}

impl Session {
    pub fn new() -> Self {
        Session {
            processes: HashMap::new(),
        }
    }

    /// Registers a `Process` before its debuggee has connected, per
    /// `SPEC_FULL.md` §4.5: "processes present before their connection
    /// arrives are kept with a null protocol slot."
    pub fn register_pending(&mut self, process: Process) {
        self.processes.insert(process.correlation_id, process);
    }

    pub fn process(&self, id: &CorrelationId) -> Option<&Process> {
        self.processes.get(id)
    }

    pub fn process_mut(&mut self, id: &CorrelationId) -> Option<&mut Process> {
        self.processes.get_mut(id)
    }

    /// Attaches a freshly-accepted connection's endpoint to the process with
    /// a matching correlation id. Returns `false` (and logs) if the id is
    /// unknown, per §4.5/§7: the connection is dropped, no state mutated.
    pub fn attach_endpoint(&mut self, id: CorrelationId, endpoint: Endpoint) -> bool {
        match self.processes.get_mut(&id) {
            Some(process) => {
                process.endpoint = Some(endpoint);
                true
            }
            None => {
                warn!("{}", Error::UnknownCorrelationId);
                false
            }
        }
    }

    /// Applies a decoded event to the process's object-model state and
    /// returns the notification(s) it produces. Mirrors the dispatch table
    /// in `SPEC_FULL.md` §4.7.
    pub fn apply_event(&mut self, id: CorrelationId, event: Event) -> Vec<Notification> {
        let Some(process) = self.processes.get_mut(&id) else {
            warn!("event for unknown process dropped");
            return Vec::new();
        };

        match event {
            Event::Connected { ok, .. } => vec![Notification::Connected { ok }],
            Event::ThreadCreated { tid } => {
                process.thread_created(tid);
                vec![Notification::ThreadCreated { tid }]
            }
            Event::ThreadExited { tid } => {
                let terminated = process.thread_exited(tid);
                vec![Notification::ThreadExited {
                    tid,
                    process_terminated: terminated,
                }]
            }
            Event::ModuleLoaded { module_id, file } => {
                vec![Notification::ModuleLoaded { module_id, file }]
            }
            Event::ProcessLoaded { tid } => {
                process.process_loaded(tid);
                vec![Notification::ProcessLoaded { tid }]
            }
            Event::BreakpointBound { id } => {
                if let Some(bp) = process.breakpoints.get_mut(&id) {
                    bp.bound = true;
                }
                vec![Notification::BreakpointBound { id }]
            }
            Event::BreakpointFailed { id } => vec![Notification::BreakpointFailed { id }],
            Event::BreakpointHit { id, tid } => {
                vec![Notification::BreakpointHit { id, tid }]
            }
            Event::StepDone { tid } => {
                vec![Notification::StepComplete { tid }]
            }
            Event::AsyncBreakComplete { tid } => {
                vec![Notification::AsyncBreakComplete { tid }]
            }
            Event::Exception {
                name,
                tid,
                break_type,
                text,
            } => {
                vec![Notification::ExceptionRaised {
                    name,
                    tid,
                    break_type,
                    text,
                }]
            }
            Event::SetLineResult {
                succeeded,
                tid,
                new_line,
            } => vec![Notification::SetLineResult {
                succeeded,
                tid,
                new_line,
            }],
            Event::ThreadFrames { tid, name, frames } => {
                process.thread_frame_list(tid, name, frames);
                vec![Notification::ThreadFramesUpdated { tid }]
            }
            Event::Detached => {
                process.detached = true;
                vec![Notification::Detached]
            }
            Event::EvalError { eval_id, text } => vec![Notification::EvalError { eval_id, text }],
            Event::EvalResult { eval_id, result } => vec![Notification::EvalResult {
                eval_id,
                result: result.into(),
            }],
            Event::Children {
                eval_id,
                attributes,
                indices,
                is_index,
                is_enum,
            } => vec![Notification::Children {
                eval_id,
                attributes: attributes.into_iter().map(|(n, v)| (n, v.into())).collect(),
                indices: indices.into_iter().map(|(n, v)| (n, v.into())).collect(),
                is_index,
                is_enum,
            }],
            Event::Output { tid, text } => vec![Notification::Output { tid, text }],
            Event::RequestHandlers { file } => vec![Notification::RequestHandlers { file }],
        }
    }
}
