//! Primitive wire encoding shared by the debuggee agent and the host.
//!
//! Two framings are built on top of the same primitive reader/writer:
//! length-prefixed frames (debuggee -> host, decoded by [`crate::protocol`])
//! and raw frames (host -> debuggee, decoded by [`crate::dispatcher`]). See
//! the module docs on each for which one applies.
//!
//! Integer endianness follows the resolution recorded in `DESIGN.md`: the
//! outer frame-length prefix, string lengths, and the object "expandable"
//! flag are big-endian `uint32`; everything else (thread ids, breakpoint
//! ids, line numbers) is native-endian, mirroring the original's mixed
//! `struct` usage.

use std::convert::TryInto;
use std::io::{self, Read, Write};

use crate::Error;

/// A 4-byte ASCII command or event tag, e.g. `b"BRKH"`.
pub type Tag = [u8; 4];

/// Reads primitive payload fields off of an already-framed byte source.
pub struct Reader<R> {
    input: R,
}

impl<R: Read> Reader<R> {
    pub fn new(input: R) -> Self {
        Reader { input }
    }

    fn read_exact_n(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; n];
        self.input.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads a 4-byte ASCII tag (command or event name).
    pub fn read_tag(&mut self) -> Result<Tag, Error> {
        let mut tag = [0u8; 4];
        self.input.read_exact(&mut tag)?;
        Ok(tag)
    }

    /// Native-endian `i32`, used for thread ids, breakpoint ids, line
    /// numbers, and other payload integers.
    pub fn read_i32(&mut self) -> Result<i32, Error> {
        let mut buf = [0u8; 4];
        self.input.read_exact(&mut buf)?;
        Ok(i32::from_ne_bytes(buf))
    }

    /// Big-endian `u32`, used for the frame length prefix, string lengths,
    /// and the object "expandable" flag.
    pub fn read_u32_be(&mut self) -> Result<u32, Error> {
        let mut buf = [0u8; 4];
        self.input.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Native-endian `i64`, used for thread ids.
    pub fn read_i64(&mut self) -> Result<i64, Error> {
        let mut buf = [0u8; 8];
        self.input.read_exact(&mut buf)?;
        Ok(i64::from_ne_bytes(buf))
    }

    pub fn read_bool32(&mut self) -> Result<bool, Error> {
        Ok(self.read_u32_be()? != 0)
    }

    /// Reads a fixed-size raw byte array, e.g. the 128-bit correlation id.
    pub fn read_bytes<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut buf = [0u8; N];
        self.input.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// `N`/`A`/`U` prefix byte followed by a big-endian length and that many
    /// bytes. `N` means the field is absent.
    pub fn read_string(&mut self) -> Result<Option<String>, Error> {
        let mut prefix = [0u8; 1];
        self.input.read_exact(&mut prefix)?;
        match prefix[0] {
            b'N' => Ok(None),
            b'A' | b'U' => {
                let len = self.read_u32_be()? as usize;
                let bytes = self.read_exact_n(len)?;
                let s = String::from_utf8(bytes).map_err(|_| Error::BadMessage)?;
                Ok(Some(s))
            }
            _ => Err(Error::BadMessage),
        }
    }

    /// A required string field; `N` is treated as a decode error.
    pub fn read_required_string(&mut self) -> Result<String, Error> {
        self.read_string()?.ok_or(Error::BadMessage)
    }

    /// repr, hex-repr, type-name, expandable.
    pub fn read_object(&mut self) -> Result<ObjectSnapshot, Error> {
        let repr = self.read_required_string()?;
        let hex_repr = self.read_string()?;
        let type_name = self.read_required_string()?;
        let expandable = self.read_bool32()?;
        Ok(ObjectSnapshot {
            repr,
            hex_repr,
            type_name,
            expandable,
        })
    }

    pub fn into_inner(self) -> R {
        self.input
    }
}

/// The wire shape of `object`: printable repr, optional hex repr, type name,
/// expandable flag. Mirrors [`crate::model::EvaluationResult`] one-to-one,
/// but lives in `codec` because it is a primitive payload type, not a
/// host-side stateful object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSnapshot {
    pub repr: String,
    pub hex_repr: Option<String>,
    pub type_name: String,
    pub expandable: bool,
}

/// Accumulates an outgoing frame's bytes so the whole thing can be written
/// under a single lock acquisition, keeping each frame contiguous on the
/// wire even when multiple threads write concurrently (see
/// `crate::dispatcher`'s send-lock).
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    pub fn write_tag(&mut self, tag: &Tag) -> &mut Self {
        self.buf.extend_from_slice(tag);
        self
    }

    pub fn write_i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_ne_bytes());
        self
    }

    pub fn write_u32_be(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_i64(&mut self, v: i64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_ne_bytes());
        self
    }

    pub fn write_bool32(&mut self, v: bool) -> &mut Self {
        self.write_u32_be(if v { 1 } else { 0 })
    }

    /// Writes a fixed-size raw byte array, e.g. the 128-bit correlation id.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn write_string(&mut self, s: Option<&str>) -> &mut Self {
        match s {
            None => {
                self.buf.push(b'N');
            }
            Some(s) => {
                let is_ascii = s.is_ascii();
                self.buf.push(if is_ascii { b'A' } else { b'U' });
                self.write_u32_be(s.len() as u32);
                self.buf.extend_from_slice(s.as_bytes());
            }
        }
        self
    }

    pub fn write_object(&mut self, obj: &ObjectSnapshot) -> &mut Self {
        self.write_string(Some(obj.repr.as_str()));
        self.write_string(obj.hex_repr.as_deref());
        self.write_string(Some(obj.type_name.as_str()));
        self.write_bool32(obj.expandable);
        self
    }

    /// Writes this frame's accumulated bytes to `out` as a *length-prefixed*
    /// frame: a big-endian `u32` covering the tag+payload, then the bytes
    /// themselves. Used for debuggee -> host event frames.
    pub fn send_length_prefixed<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&(self.buf.len() as u32).to_be_bytes())?;
        out.write_all(&self.buf)
    }

    /// Writes this frame's accumulated bytes to `out` as a *raw* frame: no
    /// outer length, just the tag and fields. Used for host -> debuggee
    /// command frames.
    pub fn send_raw<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.buf)
    }
}

/// Reads one length-prefixed frame (tag + payload) off `input` and hands
/// back a [`Reader`] positioned at the start of the payload, along with the
/// tag. Used on the host side to decode debuggee-sent event frames.
pub fn read_length_prefixed_frame<R: Read>(
    input: &mut R,
) -> Result<(Tag, Reader<io::Cursor<Vec<u8>>>), Error> {
    let mut size_buf = [0u8; 4];
    input.read_exact(&mut size_buf)?;
    let size = u32::from_be_bytes(size_buf) as usize;
    if size < 4 {
        return Err(Error::Truncated {
            expected: 4,
            got: size,
        });
    }

    let mut body = vec![0u8; size];
    input.read_exact(&mut body)?;

    let tag: Tag = body[0..4].try_into().map_err(|_| Error::BadMessage)?;
    let payload = body[4..].to_vec();
    Ok((tag, Reader::new(io::Cursor::new(payload))))
}
