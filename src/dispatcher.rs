//! Debuggee-side command dispatcher (`SPEC_FULL.md` §4.4): the single
//! reader loop that reads raw (non length-prefixed) command frames off the
//! host connection and applies them to a [`Tracer`], mirroring the way
//! `crate::protocol::read_events` reads length-prefixed event frames on the
//! host side but without an outer length, per the wire asymmetry in
//! `crate::codec`.

use std::io::Read;

use log::warn;

use crate::codec::{Reader, Tag};
use crate::command::{Command, Event, FrameKind};
use crate::interp::InterpreterAdapter;
use crate::tracer::{EventSink, Tracer};
use crate::Error;

/// Reads one command's 4-byte tag plus payload from an unframed stream.
fn read_command<R: Read>(input: &mut R) -> Result<Command, Error> {
    let mut reader = Reader::new(input);
    let tag: Tag = reader.read_tag()?;
    Command::decode(&tag, &mut reader)
}

/// Runs the dispatch loop until the connection closes or `detc` is
/// received. `adapter` resolves `exec`/`chld` against whatever frame the
/// tracer has cached for the named thread/frame id.
pub fn run<R: Read, S: EventSink, A: InterpreterAdapter>(mut input: R, tracer: &Tracer<S>, adapter: &A) {
    loop {
        let command = match read_command(&mut input) {
            Ok(cmd) => cmd,
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => return,
            Err(err) => {
                warn!("dispatcher decode error: {}", err);
                return;
            }
        };

        if dispatch(command, tracer, adapter) == Disposition::Stop {
            return;
        }
    }
}

#[derive(PartialEq)]
enum Disposition {
    Continue,
    Stop,
}

fn dispatch<S: EventSink, A: InterpreterAdapter>(command: Command, tracer: &Tracer<S>, adapter: &A) -> Disposition {
    match command {
        Command::StepInto { tid } => tracer.step_into(tid),
        Command::StepOut { tid } => tracer.step_out(tid),
        Command::StepOver { tid } => tracer.step_over(tid),
        Command::BreakAll => tracer.break_all(),
        Command::ResumeAll => tracer.resume_all(),
        Command::ResumeThread { tid } => tracer.resume_thread(tid),
        Command::ClearStepping { tid } => tracer.clear_stepping(tid),
        Command::SetBreakpoint { id, line, file, condition } => {
            tracer.set_breakpoint(id, file, line, condition);
        }
        Command::UpdateCondition { id, condition } => {
            tracer.update_condition(id, condition);
        }
        Command::RemoveBreakpoint { line: _, id } => {
            tracer.remove_breakpoint_by_id(id);
        }
        Command::Evaluate {
            code,
            tid,
            frame_id,
            eval_id,
            frame_kind,
        } => evaluate(tracer, adapter, tid, frame_id, eval_id, code, frame_kind, false),
        Command::EnumerateChildren {
            code,
            tid,
            frame_id,
            eval_id,
            frame_kind,
            is_enum,
        } => evaluate_children(tracer, adapter, tid, frame_id, eval_id, code, frame_kind, is_enum),
        Command::SetLine { tid, frame_id, line } => set_line(tracer, adapter, tid, frame_id, line),
        Command::SetExceptionInfo { default_mode, modes } => {
            tracer.set_exception_info(default_mode, modes);
        }
        Command::SetHandlerInfo { file, ranges } => {
            tracer.set_handler_info(file, ranges);
        }
        Command::Detach => return Disposition::Stop,
        Command::AddTemplateBreakpoint { .. }
        | Command::RemoveTemplateBreakpoint { .. }
        | Command::AttachEvalBackend
        | Command::DetachEvalBackend => {}
    }
    Disposition::Continue
}

fn evaluate<S: EventSink, A: InterpreterAdapter>(
    tracer: &Tracer<S>,
    adapter: &A,
    tid: i64,
    frame_id: u32,
    eval_id: u32,
    code: String,
    _frame_kind: FrameKind,
    _is_children: bool,
) {
    let Some(mut frame) = tracer.frame(tid, frame_id) else {
        tracer_emit(tracer, Event::EvalError { eval_id, text: "no such frame".to_string() });
        return;
    };
    match adapter.evaluate_in_frame(&mut frame, &code) {
        Ok(value) => {
            tracer.set_frame(tid, frame_id, frame);
            tracer_emit(
                tracer,
                Event::EvalResult {
                    eval_id,
                    result: crate::codec::ObjectSnapshot {
                        repr: value.to_string(),
                        hex_repr: None,
                        type_name: value.type_name().to_string(),
                        expandable: false,
                    },
                },
            );
        }
        Err(err) => tracer_emit(tracer, Event::EvalError { eval_id, text: err.0 }),
    }
}

fn evaluate_children<S: EventSink, A: InterpreterAdapter>(
    tracer: &Tracer<S>,
    adapter: &A,
    tid: i64,
    frame_id: u32,
    eval_id: u32,
    code: String,
    frame_kind: FrameKind,
    is_enum: bool,
) {
    let Some(mut frame) = tracer.frame(tid, frame_id) else {
        tracer_emit(tracer, Event::EvalError { eval_id, text: "no such frame".to_string() });
        return;
    };
    match adapter.evaluate_in_frame(&mut frame, &code) {
        Ok(value) => {
            let (attributes, indices) = value.children();
            let to_snapshot = |v: crate::interp::Value| crate::codec::ObjectSnapshot {
                expandable: matches!(v, crate::interp::Value::List(_) | crate::interp::Value::Object(_)),
                repr: v.to_string(),
                hex_repr: None,
                type_name: v.type_name().to_string(),
            };
            tracer_emit(
                tracer,
                Event::Children {
                    eval_id,
                    attributes: attributes.into_iter().map(|(n, v)| (n, to_snapshot(v))).collect(),
                    indices: indices.into_iter().map(|(n, v)| (n, to_snapshot(v))).collect(),
                    is_index: matches!(frame_kind, FrameKind::Template),
                    is_enum,
                },
            );
        }
        Err(err) => tracer_emit(tracer, Event::EvalError { eval_id, text: err.0 }),
    }
}

fn set_line<S: EventSink, A: InterpreterAdapter>(tracer: &Tracer<S>, adapter: &A, tid: i64, frame_id: u32, line: u32) {
    let Some(mut frame) = tracer.frame(tid, frame_id) else {
        tracer_emit(
            tracer,
            Event::SetLineResult {
                succeeded: false,
                tid,
                new_line: line,
            },
        );
        return;
    };
    match adapter.set_frame_line(&mut frame, line) {
        Ok(new_line) => {
            tracer.set_frame(tid, frame_id, frame);
            tracer_emit(
                tracer,
                Event::SetLineResult {
                    succeeded: true,
                    tid,
                    new_line,
                },
            );
        }
        Err(_) => tracer_emit(
            tracer,
            Event::SetLineResult {
                succeeded: false,
                tid,
                new_line: line,
            },
        ),
    }
}

fn tracer_emit<S: EventSink>(tracer: &Tracer<S>, event: Event) {
    tracer.emit_external(event);
}
