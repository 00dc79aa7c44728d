//! Host-side connection manager (`SPEC_FULL.md` §4.5). Listens on a single
//! TCP port, correlates incoming debuggee connections to launched processes
//! by their correlation id, and hands each matched connection's
//! [`crate::protocol::Endpoint`] to its [`crate::model::Process`].
//!
//! Shaped after the teacher's `Adapter::single_session_mode`: a background
//! thread feeds decoded items through an `mpsc` channel that the caller
//! drains with a blocking `Iterator`, generalized here from "one stdin" to
//! "N accepted sockets", each with its own reader thread.

use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use log::{info, warn};

use crate::codec::read_length_prefixed_frame;
use crate::command::Event;
use crate::model::{CorrelationId, Process};
use crate::protocol::Endpoint;
use crate::session::{Notification, Session};
use crate::Error;

/// A notification tagged with the process it came from.
pub struct SessionUpdate {
    pub process_id: CorrelationId,
    pub notification: Notification,
}

/// Owns the shared [`Session`] and the TCP listener. Yields
/// [`SessionUpdate`]s in the order their underlying frames were decoded
/// across all connections; within one connection this is the frame order on
/// the wire, per `SPEC_FULL.md` §5.
pub struct ConnectionManager {
    session: Arc<Mutex<Session>>,
    receiver: mpsc::Receiver<SessionUpdate>,
}

impl ConnectionManager {
    /// Binds `port` on loopback and starts accepting connections in the
    /// background. Default port per `SPEC_FULL.md` §6 is 8000.
    pub fn listen(port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        let session = Arc::new(Mutex::new(Session::new()));
        let (sender, receiver) = mpsc::channel();

        let accept_session = Arc::clone(&session);
        thread::spawn(move || accept_loop(listener, accept_session, sender));

        Ok(ConnectionManager { session, receiver })
    }

    /// Registers a process before its debuggee has connected.
    pub fn register_pending(&self, process: Process) {
        self.session.lock().unwrap().register_pending(process);
    }

    /// Runs `f` with shared read access to a process's current state.
    pub fn with_process<T>(&self, id: &CorrelationId, f: impl FnOnce(&Process) -> T) -> Option<T> {
        self.session.lock().unwrap().process(id).map(f)
    }

    pub fn with_process_mut<T>(
        &self,
        id: &CorrelationId,
        f: impl FnOnce(&mut Process) -> T,
    ) -> Option<T> {
        self.session.lock().unwrap().process_mut(id).map(f)
    }

    /// Blocks for the next notification from any connection.
    pub fn recv(&self) -> Option<SessionUpdate> {
        self.receiver.recv().ok()
    }

    /// Waits up to `timeout` for the next notification, useful for asserting
    /// that a dropped or unmatched connection produced nothing at all.
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<SessionUpdate> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

impl Iterator for ConnectionManager {
    type Item = SessionUpdate;

    fn next(&mut self) -> Option<SessionUpdate> {
        self.receiver.recv().ok()
    }
}

fn accept_loop(
    listener: TcpListener,
    session: Arc<Mutex<Session>>,
    sender: mpsc::Sender<SessionUpdate>,
) {
    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(stream) => stream,
            Err(err) => {
                warn!("accept failed: {}", err);
                continue;
            }
        };

        let session = Arc::clone(&session);
        let sender = sender.clone();
        thread::spawn(move || handle_connection(stream, session, sender));
    }
}

/// A connection begins `disconnected`; the first frame must be `CONN` and
/// carries the correlation id that transitions it to `debugging`. Anything
/// else, or an unknown id, drops the connection silently per `SPEC_FULL.md`
/// §4.5/§7.
fn handle_connection(
    mut stream: TcpStream,
    session: Arc<Mutex<Session>>,
    sender: mpsc::Sender<SessionUpdate>,
) {
    let reader_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(err) => {
            warn!("failed to clone connection socket: {}", err);
            return;
        }
    };
    let mut reader = reader_stream;

    let (correlation_id, ok) = match read_handshake(&mut reader) {
        Ok(pair) => pair,
        Err(err) => {
            warn!("dropping connection: bad handshake: {}", err);
            return;
        }
    };

    let endpoint = match Endpoint::new(stream.try_clone().unwrap_or_else(|_| stream), correlation_id) {
        Ok(e) => e,
        Err(err) => {
            warn!("failed to build protocol endpoint: {}", err);
            return;
        }
    };

    let notifications = {
        let mut guard = session.lock().unwrap();
        if !guard.attach_endpoint(correlation_id, endpoint) {
            return;
        }
        guard.apply_event(correlation_id, Event::Connected { correlation_id, ok })
    };

    info!("debuggee connected, ok={}", ok);
    for notification in notifications {
        let _ = sender.send(SessionUpdate {
            process_id: correlation_id,
            notification,
        });
    }

    crate::protocol::read_events(reader, |event| {
        let notifications = session.lock().unwrap().apply_event(correlation_id, event);
        for notification in notifications {
            let _ = sender.send(SessionUpdate {
                process_id: correlation_id,
                notification,
            });
        }
    });
}

fn read_handshake<R: Read>(input: &mut R) -> Result<(CorrelationId, bool), Error> {
    let (tag, mut payload) = read_length_prefixed_frame(input)?;
    match Event::decode(&tag, &mut payload)? {
        Event::Connected { correlation_id, ok } => Ok((correlation_id, ok)),
        _ => Err(Error::BadMessage),
    }
}
