//! End-to-end exercise of the protocol over a real loopback socket: a
//! "debuggee" half (tracer + dispatcher) and a "host" half (raw frame
//! reader/writer) talk to each other the way `crate::connection` and a real
//! agent process would, without spawning a second OS process.

use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use bstr::ByteSlice;

use headcrab::codec::{read_length_prefixed_frame, Writer};
use headcrab::command::{Command, Event};
use headcrab::dispatcher;
use headcrab::interp::{FrameSnapshot, Program, ScriptAdapter};
use headcrab::protocol;
use headcrab::tracer::{EventSink, Tracer};

struct SocketSink(Mutex<TcpStream>);

impl EventSink for SocketSink {
    fn emit(&self, event: Event) {
        let mut stream = self.0.lock().unwrap();
        protocol::send_event(&mut *stream, &event).unwrap();
    }
}

fn frame(file: &str, line: u32) -> FrameSnapshot {
    FrameSnapshot {
        id: 0,
        file: file.to_string(),
        function_name: "<module>".to_string(),
        first_line: 1,
        last_line: 10,
        line,
        arg_names: vec![],
        locals: vec![],
    }
}

fn send_command(stream: &TcpStream, cmd: &Command) {
    let mut w = Writer::new();
    cmd.encode(&mut w);
    let mut clone = stream.try_clone().unwrap();
    w.send_raw(&mut clone).unwrap();
}

#[test]
fn breakpoint_hit_round_trips_over_a_real_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let (events_tx, events_rx) = mpsc::channel();
    let (accepted_tx, accepted_rx) = mpsc::channel();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        accepted_tx.send(stream.try_clone().unwrap()).unwrap();
        protocol::read_events(stream, move |event| {
            let _ = events_tx.send(event);
        });
    });

    let debuggee_stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let writer_half = debuggee_stream.try_clone().unwrap();
    let reader_half = debuggee_stream.try_clone().unwrap();

    let sink = SocketSink(Mutex::new(writer_half));
    let tracer = std::sync::Arc::new(Tracer::new(sink));
    tracer.emit_external(Event::Connected {
        correlation_id: [9u8; 16],
        ok: true,
    });

    let adapter = ScriptAdapter::new(Program::default());
    let dispatcher_tracer = std::sync::Arc::clone(&tracer);
    let dispatcher_handle = thread::spawn(move || {
        dispatcher::run(reader_half, &dispatcher_tracer, &adapter);
    });

    let host_stream = accepted_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    assert_eq!(
        events_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        Event::Connected {
            correlation_id: [9u8; 16],
            ok: true
        }
    );

    tracer.on_module_load("s.py");
    assert_eq!(
        events_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        Event::ModuleLoaded {
            module_id: 1,
            file: "s.py".to_string()
        }
    );

    send_command(
        &host_stream,
        &Command::SetBreakpoint {
            id: 7,
            line: 2,
            file: "s.py".to_string(),
            condition: None,
        },
    );
    assert_eq!(
        events_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        Event::BreakpointBound { id: 7 }
    );

    let line_tracer = std::sync::Arc::clone(&tracer);
    let line_handle = thread::spawn(move || {
        line_tracer.register_thread(1, "MainThread".to_string(), None);
        line_tracer.on_line(1, frame("s.py", 2));
    });

    assert_eq!(
        events_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        Event::ThreadCreated { tid: 1 }
    );
    assert!(matches!(
        events_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        Event::ThreadFrames { tid: 1, .. }
    ));
    assert_eq!(
        events_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        Event::BreakpointHit { id: 7, tid: 1 }
    );

    send_command(&host_stream, &Command::ResumeAll);
    line_handle.join().unwrap();

    send_command(&host_stream, &Command::Detach);
    dispatcher_handle.join().unwrap();
}

#[test]
fn connected_handshake_frame_round_trips_byte_for_byte() {
    let mut w = Writer::new();
    let event = Event::Connected {
        correlation_id: [0xAB; 16],
        ok: true,
    };
    event.encode(&mut w);

    let mut wire = Vec::new();
    w.send_length_prefixed(&mut wire).unwrap();

    // sanity: the tag is the first four bytes after the length prefix, and
    // bstr gives a readable failure message if that ever drifts.
    assert_eq!(wire[4..8].as_bstr(), b"CONN".as_bstr());

    let mut cursor = std::io::Cursor::new(wire);
    let (tag, mut reader) = read_length_prefixed_frame(&mut cursor).unwrap();
    let decoded = Event::decode(&tag, &mut reader).unwrap();
    assert_eq!(decoded, event);
}
