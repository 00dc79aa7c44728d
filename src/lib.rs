//! A remote debugging protocol: wire codec, tracer state machine, and
//! host-side connection manager + object model.
//!
//! A debuggee agent ([`dispatcher`], [`tracer`]) embeds in the process being
//! debugged and speaks the binary protocol in [`command`]/[`codec`] over a
//! TCP connection to a debugger host ([`connection`], [`session`],
//! [`model`]). [`launcher`] spawns the debuggee and [`interp`] decouples the
//! tracer from any one language runtime.

pub mod codec;
pub mod command;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod interp;
pub mod launcher;
pub mod model;
pub mod protocol;
pub mod session;
pub mod tracer;

pub use error::Error;
