//! Per-connection protocol endpoint (`SPEC_FULL.md` §4.6): decodes
//! length-prefixed event frames off a socket and encodes outbound commands
//! in the asymmetric raw form. Generalizes the teacher's
//! `Message`/`GenericMessage` decode pipeline from a single JSON body per
//! frame to the binary tag vocabulary in [`crate::command`].

use std::io::{BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;

use log::{debug, warn};

use crate::codec::{read_length_prefixed_frame, Writer};
use crate::command::{Command, Event};
use crate::Error;

/// One connected debuggee's protocol instance. Cloning the underlying
/// socket for read/write halves mirrors the standard `TcpStream::try_clone`
/// idiom; the write half is guarded by a mutex so that concurrent debuggee
/// threads writing event frames (on the debuggee side) or concurrent host
/// callers sending commands never interleave a frame's bytes.
pub struct Endpoint {
    writer: Mutex<TcpStream>,
    correlation_id: [u8; 16],
}

impl Endpoint {
    pub fn new(stream: TcpStream, correlation_id: [u8; 16]) -> std::io::Result<Self> {
        Ok(Endpoint {
            writer: Mutex::new(stream),
            correlation_id,
        })
    }

    pub fn correlation_id(&self) -> [u8; 16] {
        self.correlation_id
    }

    /// Encodes and sends a command using the raw (non length-prefixed)
    /// framing.
    pub fn send(&self, cmd: &Command) -> Result<(), Error> {
        let mut w = Writer::new();
        cmd.encode(&mut w);
        let mut stream = self.writer.lock().unwrap();
        w.send_raw(&mut *stream)?;
        debug!("sent command {:?}", cmd.tag());
        Ok(())
    }
}

/// Reads length-prefixed event frames off `input` until EOF or a decode
/// error, invoking `on_event` for each one. Runs on its own reader thread
/// per connection; never blocks the caller beyond the next frame.
///
/// Mis-sized payloads are fatal for the connection, per `SPEC_FULL.md` §4.6:
/// the loop returns on the first [`Error`] it encounters instead of trying
/// to resynchronize.
pub fn read_events<R: Read, F: FnMut(Event)>(input: R, mut on_event: F) {
    let mut reader = BufReader::new(input);
    loop {
        match read_length_prefixed_frame(&mut reader) {
            Ok((tag, mut payload)) => match Event::decode(&tag, &mut payload) {
                Ok(event) => on_event(event),
                Err(err) => {
                    warn!("protocol decode error for tag {:?}: {}", tag, err);
                    return;
                }
            },
            Err(Error::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                debug!("connection closed");
                return;
            }
            Err(err) => {
                warn!("protocol framing error: {}", err);
                return;
            }
        }
    }
}

/// Writes a single event frame directly to `out`, used on the debuggee side
/// where events originate rather than being decoded.
pub fn send_event<W: Write>(out: &mut W, event: &Event) -> std::io::Result<()> {
    let mut w = Writer::new();
    event.encode(&mut w);
    w.send_length_prefixed(out)
}
