//! The closed command (host -> debuggee) and event (debuggee -> host) tag
//! vocabulary. Tags are bit-exact 4-byte ASCII, case-sensitive, per
//! `SPEC_FULL.md` §4.2.

use crate::codec::{ObjectSnapshot, Reader, Tag, Writer};
use crate::Error;
use std::io::Read;

/// One source line's worth of a breakpoint condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub expr: String,
    pub break_on_change: bool,
}

/// Frame kind carried by `exec`/`chld`; decoded-and-discarded on the host
/// per the open question in spec.md §9, but still round-tripped because the
/// debuggee side needs it to pick a locals view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    None,
    Plain,
    Template,
}

impl FrameKind {
    fn from_i32(v: i32) -> Self {
        match v {
            1 => FrameKind::Plain,
            2 => FrameKind::Template,
            _ => FrameKind::None,
        }
    }

    fn as_i32(self) -> i32 {
        match self {
            FrameKind::None => 0,
            FrameKind::Plain => 1,
            FrameKind::Template => 2,
        }
    }
}

/// A handler range discovered in one file: `[start, end)` lines and the set
/// of exception-name expressions that range handles (`"*"` handles
/// everything).
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerRange {
    pub start: Option<u32>,
    pub end: Option<u32>,
    pub expressions: Vec<String>,
}

/// Commands sent from the host to the debuggee. Raw framing: no outer
/// length prefix, see `crate::codec`.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StepInto { tid: i64 },
    StepOut { tid: i64 },
    StepOver { tid: i64 },
    BreakAll,
    ResumeAll,
    ResumeThread { tid: i64 },
    SetBreakpoint {
        id: u32,
        line: u32,
        file: String,
        condition: Option<Condition>,
    },
    UpdateCondition {
        id: u32,
        condition: Option<Condition>,
    },
    RemoveBreakpoint { line: u32, id: u32 },
    Evaluate {
        code: String,
        tid: i64,
        frame_id: u32,
        eval_id: u32,
        frame_kind: FrameKind,
    },
    EnumerateChildren {
        code: String,
        tid: i64,
        frame_id: u32,
        eval_id: u32,
        frame_kind: FrameKind,
        is_enum: bool,
    },
    SetLine { tid: i64, frame_id: u32, line: u32 },
    Detach,
    ClearStepping { tid: i64 },
    SetExceptionInfo {
        default_mode: u32,
        modes: Vec<(u32, String)>,
    },
    SetHandlerInfo {
        file: String,
        ranges: Vec<HandlerRange>,
    },
    AddTemplateBreakpoint { id: u32, line: u32, file: String },
    RemoveTemplateBreakpoint { id: u32 },
    AttachEvalBackend,
    DetachEvalBackend,
}

const TAG_STPI: Tag = *b"stpi";
const TAG_STPO: Tag = *b"stpo";
const TAG_STPV: Tag = *b"stpv";
const TAG_BRKA: Tag = *b"brka";
const TAG_RESA: Tag = *b"resa";
const TAG_REST: Tag = *b"rest";
const TAG_BRKP: Tag = *b"brkp";
const TAG_BRKC: Tag = *b"brkc";
const TAG_BRKR: Tag = *b"brkr";
const TAG_EXEC: Tag = *b"exec";
const TAG_CHLD: Tag = *b"chld";
const TAG_SETL: Tag = *b"setl";
const TAG_DETC: Tag = *b"detc";
const TAG_CLST: Tag = *b"clst";
const TAG_SEXI: Tag = *b"sexi";
const TAG_SEHI: Tag = *b"sehi";
const TAG_BKDA: Tag = *b"bkda";
const TAG_BKDR: Tag = *b"bkdr";
const TAG_CREP: Tag = *b"crep";
const TAG_DREP: Tag = *b"drep";

impl Command {
    pub fn tag(&self) -> Tag {
        match self {
            Command::StepInto { .. } => TAG_STPI,
            Command::StepOut { .. } => TAG_STPO,
            Command::StepOver { .. } => TAG_STPV,
            Command::BreakAll => TAG_BRKA,
            Command::ResumeAll => TAG_RESA,
            Command::ResumeThread { .. } => TAG_REST,
            Command::SetBreakpoint { .. } => TAG_BRKP,
            Command::UpdateCondition { .. } => TAG_BRKC,
            Command::RemoveBreakpoint { .. } => TAG_BRKR,
            Command::Evaluate { .. } => TAG_EXEC,
            Command::EnumerateChildren { .. } => TAG_CHLD,
            Command::SetLine { .. } => TAG_SETL,
            Command::Detach => TAG_DETC,
            Command::ClearStepping { .. } => TAG_CLST,
            Command::SetExceptionInfo { .. } => TAG_SEXI,
            Command::SetHandlerInfo { .. } => TAG_SEHI,
            Command::AddTemplateBreakpoint { .. } => TAG_BKDA,
            Command::RemoveTemplateBreakpoint { .. } => TAG_BKDR,
            Command::AttachEvalBackend => TAG_CREP,
            Command::DetachEvalBackend => TAG_DREP,
        }
    }

    fn write_condition(w: &mut Writer, cond: &Option<Condition>) {
        match cond {
            None => {
                w.write_string(None);
                w.write_bool32(false);
            }
            Some(c) => {
                w.write_string(Some(c.expr.as_str()));
                w.write_bool32(c.break_on_change);
            }
        }
    }

    fn read_condition<R: Read>(r: &mut Reader<R>) -> Result<Option<Condition>, Error> {
        let expr = r.read_string()?;
        let break_on_change = r.read_bool32()?;
        Ok(expr.map(|expr| Condition {
            expr,
            break_on_change,
        }))
    }

    /// Encodes this command into `w` (tag + fields, no outer length).
    pub fn encode(&self, w: &mut Writer) {
        w.write_tag(&self.tag());
        match self {
            Command::StepInto { tid }
            | Command::StepOut { tid }
            | Command::StepOver { tid }
            | Command::ResumeThread { tid }
            | Command::ClearStepping { tid } => {
                w.write_i64(*tid);
            }
            Command::BreakAll | Command::ResumeAll | Command::Detach => {}
            Command::SetBreakpoint {
                id,
                line,
                file,
                condition,
            } => {
                w.write_i32(*id as i32);
                w.write_i32(*line as i32);
                w.write_string(Some(file.as_str()));
                Self::write_condition(w, condition);
            }
            Command::UpdateCondition { id, condition } => {
                w.write_i32(*id as i32);
                Self::write_condition(w, condition);
            }
            Command::RemoveBreakpoint { line, id } => {
                w.write_i32(*line as i32);
                w.write_i32(*id as i32);
            }
            Command::Evaluate {
                code,
                tid,
                frame_id,
                eval_id,
                frame_kind,
            } => {
                w.write_string(Some(code.as_str()));
                w.write_i64(*tid);
                w.write_i32(*frame_id as i32);
                w.write_i32(*eval_id as i32);
                w.write_i32(frame_kind.as_i32());
            }
            Command::EnumerateChildren {
                code,
                tid,
                frame_id,
                eval_id,
                frame_kind,
                is_enum,
            } => {
                w.write_string(Some(code.as_str()));
                w.write_i64(*tid);
                w.write_i32(*frame_id as i32);
                w.write_i32(*eval_id as i32);
                w.write_i32(frame_kind.as_i32());
                w.write_bool32(*is_enum);
            }
            Command::SetLine { tid, frame_id, line } => {
                w.write_i64(*tid);
                w.write_i32(*frame_id as i32);
                w.write_i32(*line as i32);
            }
            Command::SetExceptionInfo {
                default_mode,
                modes,
            } => {
                w.write_i32(*default_mode as i32);
                w.write_i32(modes.len() as i32);
                for (mode, name) in modes {
                    w.write_i32(*mode as i32);
                    w.write_string(Some(name.as_str()));
                }
            }
            Command::SetHandlerInfo { file, ranges } => {
                w.write_string(Some(file.as_str()));
                w.write_i32(ranges.len() as i32);
                for range in ranges {
                    w.write_i32(range.start.map(|v| v as i32).unwrap_or(-1));
                    w.write_i32(range.end.map(|v| v as i32).unwrap_or(-1));
                    w.write_i32(range.expressions.len() as i32);
                    for expr in &range.expressions {
                        w.write_string(Some(expr.as_str()));
                    }
                }
            }
            Command::AddTemplateBreakpoint { id, line, file } => {
                w.write_i32(*id as i32);
                w.write_i32(*line as i32);
                w.write_string(Some(file.as_str()));
            }
            Command::RemoveTemplateBreakpoint { id } => {
                w.write_i32(*id as i32);
            }
            Command::AttachEvalBackend | Command::DetachEvalBackend => {}
        }
    }

    /// Decodes a command's payload given its already-consumed tag. Used by
    /// `crate::dispatcher`.
    pub fn decode<R: Read>(tag: &Tag, r: &mut Reader<R>) -> Result<Command, Error> {
        Ok(match *tag {
            TAG_STPI => Command::StepInto { tid: r.read_i64()? },
            TAG_STPO => Command::StepOut { tid: r.read_i64()? },
            TAG_STPV => Command::StepOver { tid: r.read_i64()? },
            TAG_BRKA => Command::BreakAll,
            TAG_RESA => Command::ResumeAll,
            TAG_REST => Command::ResumeThread { tid: r.read_i64()? },
            TAG_BRKP => {
                let id = r.read_i32()? as u32;
                let line = r.read_i32()? as u32;
                let file = r.read_required_string()?;
                let condition = Self::read_condition(r)?;
                Command::SetBreakpoint {
                    id,
                    line,
                    file,
                    condition,
                }
            }
            TAG_BRKC => {
                let id = r.read_i32()? as u32;
                let condition = Self::read_condition(r)?;
                Command::UpdateCondition { id, condition }
            }
            TAG_BRKR => {
                let line = r.read_i32()? as u32;
                let id = r.read_i32()? as u32;
                Command::RemoveBreakpoint { line, id }
            }
            TAG_EXEC => {
                let code = r.read_required_string()?;
                let tid = r.read_i64()?;
                let frame_id = r.read_i32()? as u32;
                let eval_id = r.read_i32()? as u32;
                let frame_kind = FrameKind::from_i32(r.read_i32()?);
                Command::Evaluate {
                    code,
                    tid,
                    frame_id,
                    eval_id,
                    frame_kind,
                }
            }
            TAG_CHLD => {
                let code = r.read_required_string()?;
                let tid = r.read_i64()?;
                let frame_id = r.read_i32()? as u32;
                let eval_id = r.read_i32()? as u32;
                let frame_kind = FrameKind::from_i32(r.read_i32()?);
                let is_enum = r.read_bool32()?;
                Command::EnumerateChildren {
                    code,
                    tid,
                    frame_id,
                    eval_id,
                    frame_kind,
                    is_enum,
                }
            }
            TAG_SETL => {
                let tid = r.read_i64()?;
                let frame_id = r.read_i32()? as u32;
                let line = r.read_i32()? as u32;
                Command::SetLine { tid, frame_id, line }
            }
            TAG_DETC => Command::Detach,
            TAG_CLST => Command::ClearStepping { tid: r.read_i64()? },
            TAG_SEXI => {
                let default_mode = r.read_i32()? as u32;
                let count = r.read_i32()?;
                let mut modes = Vec::with_capacity(count.max(0) as usize);
                for _ in 0..count {
                    let mode = r.read_i32()? as u32;
                    let name = r.read_required_string()?;
                    modes.push((mode, name));
                }
                Command::SetExceptionInfo {
                    default_mode,
                    modes,
                }
            }
            TAG_SEHI => {
                let file = r.read_required_string()?;
                let count = r.read_i32()?;
                let mut ranges = Vec::with_capacity(count.max(0) as usize);
                for _ in 0..count {
                    let start = match r.read_i32()? {
                        -1 => None,
                        v => Some(v as u32),
                    };
                    let end = match r.read_i32()? {
                        -1 => None,
                        v => Some(v as u32),
                    };
                    let expr_count = r.read_i32()?;
                    let mut expressions = Vec::with_capacity(expr_count.max(0) as usize);
                    for _ in 0..expr_count {
                        expressions.push(r.read_required_string()?);
                    }
                    ranges.push(HandlerRange {
                        start,
                        end,
                        expressions,
                    });
                }
                Command::SetHandlerInfo { file, ranges }
            }
            TAG_BKDA => {
                let id = r.read_i32()? as u32;
                let line = r.read_i32()? as u32;
                let file = r.read_required_string()?;
                Command::AddTemplateBreakpoint { id, line, file }
            }
            TAG_BKDR => Command::RemoveTemplateBreakpoint {
                id: r.read_i32()? as u32,
            },
            TAG_CREP => Command::AttachEvalBackend,
            TAG_DREP => Command::DetachEvalBackend,
            other => return Err(Error::UnknownTag(other)),
        })
    }
}

/// Events sent from the debuggee to the host. Length-prefixed framing, see
/// `crate::codec`.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected { correlation_id: [u8; 16], ok: bool },
    ThreadCreated { tid: i64 },
    ThreadExited { tid: i64 },
    ModuleLoaded { module_id: u32, file: String },
    ProcessLoaded { tid: i64 },
    BreakpointBound { id: u32 },
    BreakpointFailed { id: u32 },
    BreakpointHit { id: u32, tid: i64 },
    StepDone { tid: i64 },
    AsyncBreakComplete { tid: i64 },
    Exception {
        name: String,
        tid: i64,
        break_type: BreakType,
        text: String,
    },
    SetLineResult { succeeded: bool, tid: i64, new_line: u32 },
    ThreadFrames {
        tid: i64,
        name: String,
        frames: Vec<WireFrame>,
    },
    Detached,
    EvalError { eval_id: u32, text: String },
    EvalResult { eval_id: u32, result: ObjectSnapshot },
    Children {
        eval_id: u32,
        attributes: Vec<(String, ObjectSnapshot)>,
        indices: Vec<(String, ObjectSnapshot)>,
        is_index: bool,
        is_enum: bool,
    },
    Output { tid: i64, text: String },
    RequestHandlers { file: String },
}

/// A single stack frame as it travels over the wire (see
/// `crate::model::StackFrame` for the host-side richer type).
#[derive(Debug, Clone, PartialEq)]
pub struct WireFrame {
    pub first_line: u32,
    pub last_line: u32,
    pub current_line: u32,
    pub function_name: String,
    pub file: String,
    pub arg_count: u32,
    pub variables: Vec<(String, ObjectSnapshot)>,
}

/// Classifies an exception event with respect to user policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakType {
    None,
    Handled,
    Unhandled,
}

impl BreakType {
    fn from_i32(v: i32) -> Self {
        match v {
            1 => BreakType::Unhandled,
            2 => BreakType::Handled,
            _ => BreakType::None,
        }
    }

    fn as_i32(self) -> i32 {
        match self {
            BreakType::None => 0,
            BreakType::Unhandled => 1,
            BreakType::Handled => 2,
        }
    }
}

const TAG_CONN: Tag = *b"CONN";
const TAG_NEWT: Tag = *b"NEWT";
const TAG_EXTT: Tag = *b"EXTT";
const TAG_MODL: Tag = *b"MODL";
const TAG_LOAD: Tag = *b"LOAD";
const TAG_BRKS: Tag = *b"BRKS";
const TAG_BRKF: Tag = *b"BRKF";
const TAG_BRKH: Tag = *b"BRKH";
const TAG_STPD: Tag = *b"STPD";
const TAG_ASBR: Tag = *b"ASBR";
const TAG_EXCP: Tag = *b"EXCP";
const TAG_SETL_EVT: Tag = *b"SETL";
const TAG_THRF: Tag = *b"THRF";
const TAG_DETC_EVT: Tag = *b"DETC";
const TAG_EXCE: Tag = *b"EXCE";
const TAG_EXCR: Tag = *b"EXCR";
const TAG_CHLD_EVT: Tag = *b"CHLD";
const TAG_OUTP: Tag = *b"OUTP";
const TAG_REQH: Tag = *b"REQH";

impl Event {
    pub fn tag(&self) -> Tag {
        match self {
            Event::Connected { .. } => TAG_CONN,
            Event::ThreadCreated { .. } => TAG_NEWT,
            Event::ThreadExited { .. } => TAG_EXTT,
            Event::ModuleLoaded { .. } => TAG_MODL,
            Event::ProcessLoaded { .. } => TAG_LOAD,
            Event::BreakpointBound { .. } => TAG_BRKS,
            Event::BreakpointFailed { .. } => TAG_BRKF,
            Event::BreakpointHit { .. } => TAG_BRKH,
            Event::StepDone { .. } => TAG_STPD,
            Event::AsyncBreakComplete { .. } => TAG_ASBR,
            Event::Exception { .. } => TAG_EXCP,
            Event::SetLineResult { .. } => TAG_SETL_EVT,
            Event::ThreadFrames { .. } => TAG_THRF,
            Event::Detached => TAG_DETC_EVT,
            Event::EvalError { .. } => TAG_EXCE,
            Event::EvalResult { .. } => TAG_EXCR,
            Event::Children { .. } => TAG_CHLD_EVT,
            Event::Output { .. } => TAG_OUTP,
            Event::RequestHandlers { .. } => TAG_REQH,
        }
    }

    pub fn encode(&self, w: &mut Writer) {
        w.write_tag(&self.tag());
        match self {
            Event::Connected { correlation_id, ok } => {
                w.write_bytes(correlation_id);
                w.write_bool32(*ok);
            }
            Event::ThreadCreated { tid }
            | Event::ThreadExited { tid }
            | Event::ProcessLoaded { tid }
            | Event::StepDone { tid }
            | Event::AsyncBreakComplete { tid } => {
                w.write_i64(*tid);
            }
            Event::ModuleLoaded { module_id, file } => {
                w.write_i32(*module_id as i32);
                w.write_string(Some(file.as_str()));
            }
            Event::BreakpointBound { id } | Event::BreakpointFailed { id } => {
                w.write_i32(*id as i32);
            }
            Event::BreakpointHit { id, tid } => {
                w.write_i32(*id as i32);
                w.write_i64(*tid);
            }
            Event::Exception {
                name,
                tid,
                break_type,
                text,
            } => {
                w.write_string(Some(name.as_str()));
                w.write_i64(*tid);
                w.write_i32(break_type.as_i32());
                w.write_string(Some(text.as_str()));
            }
            Event::SetLineResult {
                succeeded,
                tid,
                new_line,
            } => {
                w.write_bool32(*succeeded);
                w.write_i64(*tid);
                w.write_i32(*new_line as i32);
            }
            Event::ThreadFrames { tid, name, frames } => {
                w.write_i64(*tid);
                w.write_string(Some(name.as_str()));
                w.write_i32(frames.len() as i32);
                for frame in frames {
                    w.write_i32(frame.first_line as i32);
                    w.write_i32(frame.last_line as i32);
                    w.write_i32(frame.current_line as i32);
                    w.write_string(Some(frame.function_name.as_str()));
                    w.write_string(Some(frame.file.as_str()));
                    w.write_i32(frame.arg_count as i32);
                    w.write_i32(frame.variables.len() as i32);
                    for (name, value) in &frame.variables {
                        w.write_string(Some(name.as_str()));
                        w.write_object(value);
                    }
                }
            }
            Event::Detached => {}
            Event::EvalError { eval_id, text } => {
                w.write_i32(*eval_id as i32);
                w.write_string(Some(text.as_str()));
            }
            Event::EvalResult { eval_id, result } => {
                w.write_i32(*eval_id as i32);
                w.write_object(result);
            }
            Event::Children {
                eval_id,
                attributes,
                indices,
                is_index,
                is_enum,
            } => {
                w.write_i32(*eval_id as i32);
                w.write_i32(attributes.len() as i32);
                for (name, value) in attributes {
                    w.write_string(Some(name.as_str()));
                    w.write_object(value);
                }
                w.write_i32(indices.len() as i32);
                for (name, value) in indices {
                    w.write_string(Some(name.as_str()));
                    w.write_object(value);
                }
                w.write_bool32(*is_index);
                w.write_bool32(*is_enum);
            }
            Event::Output { tid, text } => {
                w.write_i64(*tid);
                w.write_string(Some(text.as_str()));
            }
            Event::RequestHandlers { file } => {
                w.write_string(Some(file.as_str()));
            }
        }
    }

    /// Decodes an event's payload given its already-consumed tag. Used by
    /// `crate::protocol::Endpoint`.
    pub fn decode<R: Read>(tag: &Tag, r: &mut Reader<R>) -> Result<Event, Error> {
        Ok(match *tag {
            TAG_CONN => {
                let correlation_id = r.read_bytes::<16>()?;
                let ok = r.read_bool32()?;
                Event::Connected { correlation_id, ok }
            }
            TAG_NEWT => Event::ThreadCreated { tid: r.read_i64()? },
            TAG_EXTT => Event::ThreadExited { tid: r.read_i64()? },
            TAG_MODL => {
                let module_id = r.read_i32()? as u32;
                let file = r.read_required_string()?;
                Event::ModuleLoaded { module_id, file }
            }
            TAG_LOAD => Event::ProcessLoaded { tid: r.read_i64()? },
            TAG_BRKS => Event::BreakpointBound {
                id: r.read_i32()? as u32,
            },
            TAG_BRKF => Event::BreakpointFailed {
                id: r.read_i32()? as u32,
            },
            TAG_BRKH => {
                let id = r.read_i32()? as u32;
                let tid = r.read_i64()?;
                Event::BreakpointHit { id, tid }
            }
            TAG_STPD => Event::StepDone { tid: r.read_i64()? },
            TAG_ASBR => Event::AsyncBreakComplete { tid: r.read_i64()? },
            TAG_EXCP => {
                let name = r.read_required_string()?;
                let tid = r.read_i64()?;
                let break_type = BreakType::from_i32(r.read_i32()?);
                let text = r.read_required_string()?;
                Event::Exception {
                    name,
                    tid,
                    break_type,
                    text,
                }
            }
            TAG_SETL_EVT => {
                let succeeded = r.read_bool32()?;
                let tid = r.read_i64()?;
                let new_line = r.read_i32()? as u32;
                Event::SetLineResult {
                    succeeded,
                    tid,
                    new_line,
                }
            }
            TAG_THRF => {
                let tid = r.read_i64()?;
                let name = r.read_required_string()?;
                let count = r.read_i32()?;
                let mut frames = Vec::with_capacity(count.max(0) as usize);
                for _ in 0..count {
                    let first_line = r.read_i32()? as u32;
                    let last_line = r.read_i32()? as u32;
                    let current_line = r.read_i32()? as u32;
                    let function_name = r.read_required_string()?;
                    let file = r.read_required_string()?;
                    let arg_count = r.read_i32()? as u32;
                    let var_count = r.read_i32()?;
                    let mut variables = Vec::with_capacity(var_count.max(0) as usize);
                    for _ in 0..var_count {
                        let name = r.read_required_string()?;
                        let value = r.read_object()?;
                        variables.push((name, value));
                    }
                    frames.push(WireFrame {
                        first_line,
                        last_line,
                        current_line,
                        function_name,
                        file,
                        arg_count,
                        variables,
                    });
                }
                Event::ThreadFrames { tid, name, frames }
            }
            TAG_DETC_EVT => Event::Detached,
            TAG_EXCE => {
                let eval_id = r.read_i32()? as u32;
                let text = r.read_required_string()?;
                Event::EvalError { eval_id, text }
            }
            TAG_EXCR => {
                let eval_id = r.read_i32()? as u32;
                let result = r.read_object()?;
                Event::EvalResult { eval_id, result }
            }
            TAG_CHLD_EVT => {
                let eval_id = r.read_i32()? as u32;
                let attr_count = r.read_i32()?;
                let mut attributes = Vec::with_capacity(attr_count.max(0) as usize);
                for _ in 0..attr_count {
                    let name = r.read_required_string()?;
                    let value = r.read_object()?;
                    attributes.push((name, value));
                }
                let idx_count = r.read_i32()?;
                let mut indices = Vec::with_capacity(idx_count.max(0) as usize);
                for _ in 0..idx_count {
                    let name = r.read_required_string()?;
                    let value = r.read_object()?;
                    indices.push((name, value));
                }
                let is_index = r.read_bool32()?;
                let is_enum = r.read_bool32()?;
                Event::Children {
                    eval_id,
                    attributes,
                    indices,
                    is_index,
                    is_enum,
                }
            }
            TAG_OUTP => {
                let tid = r.read_i64()?;
                let text = r.read_required_string()?;
                Event::Output { tid, text }
            }
            TAG_REQH => Event::RequestHandlers {
                file: r.read_required_string()?,
            },
            other => return Err(Error::UnknownTag(other)),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::convert::TryInto;

    fn round_trip_command(cmd: Command) {
        let mut w = Writer::new();
        cmd.encode(&mut w);
        let mut bytes = w.send_raw_to_vec();
        let tag: Tag = bytes[0..4].try_into().unwrap();
        bytes.drain(0..4);
        let mut r = Reader::new(bytes.as_slice());
        let decoded = Command::decode(&tag, &mut r).unwrap();
        assert_eq!(decoded, cmd);
    }

    impl Writer {
        fn send_raw_to_vec(&self) -> Vec<u8> {
            let mut out = Vec::new();
            self.send_raw(&mut out).unwrap();
            out
        }
    }

    #[test]
    fn step_into_round_trips() {
        round_trip_command(Command::StepInto { tid: 7 });
    }

    #[test]
    fn set_breakpoint_with_condition_round_trips() {
        round_trip_command(Command::SetBreakpoint {
            id: 7,
            line: 2,
            file: "/abs/s.py".to_string(),
            condition: Some(Condition {
                expr: "i".to_string(),
                break_on_change: true,
            }),
        });
    }

    #[test]
    fn evaluate_round_trips() {
        round_trip_command(Command::Evaluate {
            code: "a+1".to_string(),
            tid: 1,
            frame_id: 0,
            eval_id: 42,
            frame_kind: FrameKind::None,
        });
    }

    fn round_trip_event(evt: Event) {
        let mut w = Writer::new();
        evt.encode(&mut w);
        let mut wire = Vec::new();
        w.send_length_prefixed(&mut wire).unwrap();

        let mut cursor = std::io::Cursor::new(wire);
        let (tag, mut r) = crate::codec::read_length_prefixed_frame(&mut cursor).unwrap();
        let decoded = Event::decode(&tag, &mut r).unwrap();
        assert_eq!(decoded, evt);
    }

    #[test]
    fn breakpoint_hit_round_trips() {
        round_trip_event(Event::BreakpointHit { id: 7, tid: 1 });
    }

    #[test]
    fn eval_result_round_trips() {
        round_trip_event(Event::EvalResult {
            eval_id: 42,
            result: ObjectSnapshot {
                repr: "2".to_string(),
                hex_repr: None,
                type_name: "int".to_string(),
                expandable: false,
            },
        });
    }

    #[test]
    fn thread_frames_round_trips() {
        round_trip_event(Event::ThreadFrames {
            tid: 1,
            name: "MainThread".to_string(),
            frames: vec![WireFrame {
                first_line: 1,
                last_line: 2,
                current_line: 2,
                function_name: "<module>".to_string(),
                file: "/abs/s.py".to_string(),
                arg_count: 0,
                variables: vec![],
            }],
        });
    }

    #[test]
    fn connected_round_trips() {
        round_trip_event(Event::Connected {
            correlation_id: [7u8; 16],
            ok: true,
        });
    }

    #[test]
    fn unknown_command_tag_is_rejected() {
        let mut r = Reader::new(&[][..]);
        assert!(matches!(
            Command::decode(b"zzzz", &mut r),
            Err(Error::UnknownTag(_))
        ));
    }
}
