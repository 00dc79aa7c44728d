//! Debuggee agent CLI: the process a [`headcrab::launcher`] spawns. Connects
//! back to the host on `port`, announces `correlation_id` with `CONN`, then
//! runs the dispatcher loop against an empty [`headcrab::interp::ScriptAdapter`]
//! until the host detaches. Driving a real interpreter's call/line/return
//! events into the tracer is the embedder's job; this binary only proves the
//! connection/handshake/dispatch plumbing end to end.

use std::env;
use std::net::TcpStream;
use std::process::exit;
use std::sync::Mutex;

use headcrab::command::Event;
use headcrab::interp::{Program, ScriptAdapter};
use headcrab::protocol;
use headcrab::tracer::{EventSink, Tracer};
use log::{error, info};

fn init_logger() {
    use log4rs::append::file::FileAppender;
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} {l} - {m}\n")))
        .build("agent.log")
        .unwrap();

    let config = Config::builder()
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .build(Root::builder().appender("logfile").build(log::LevelFilter::Info))
        .unwrap();

    log4rs::init_config(config).unwrap();
}

struct SocketSink(Mutex<TcpStream>);

impl EventSink for SocketSink {
    fn emit(&self, event: Event) {
        let mut stream = self.0.lock().unwrap();
        if let Err(err) = protocol::send_event(&mut *stream, &event) {
            error!("failed to send event: {}", err);
        }
    }
}

fn decode_correlation_id(hex: &str) -> Option<[u8; 16]> {
    if hex.len() != 32 {
        return None;
    }
    let mut id = [0u8; 16];
    for (i, byte) in id.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(id)
}

fn main() {
    init_logger();

    let mut args = env::args().skip(1);
    let _cwd = args.next();
    let port: u16 = match args.next().and_then(|p| p.parse().ok()) {
        Some(p) => p,
        None => {
            eprintln!("usage: agent <cwd> <port> <correlation-id> [flags...] <target> [target-args...]");
            exit(2);
        }
    };
    let correlation_id = match args.next().and_then(|s| decode_correlation_id(&s)) {
        Some(id) => id,
        None => {
            eprintln!("invalid correlation id");
            exit(2);
        }
    };

    let stream = match TcpStream::connect(("127.0.0.1", port)) {
        Ok(s) => s,
        Err(err) => {
            error!("failed to connect to host on port {}: {}", port, err);
            exit(1);
        }
    };
    info!("connected to host, correlation_id={:02x?}", correlation_id);

    let writer = stream.try_clone().expect("clone connection for writer");
    let sink = SocketSink(Mutex::new(writer));
    let tracer = Tracer::new(sink);
    tracer.emit_external(Event::Connected { correlation_id, ok: true });

    let adapter = ScriptAdapter::new(Program::default());
    headcrab::dispatcher::run(stream, &tracer, &adapter);
    info!("detached, exiting");
}
