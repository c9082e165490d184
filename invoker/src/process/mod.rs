//! Launching and supervising external processes.
//!
//! An [`Invoker`] starts one binary asynchronously per call and hands back a
//! single-value channel carrying the [`InvocationResult`]. Results own their
//! captured output until discarded; [`drain_out`] takes care of results the
//! caller does not care about.

mod drain;
mod invoker;
mod io;
mod result;

pub use drain::{drain_all, drain_out};
pub use invoker::{Invoker, InvokerConfig, DEFAULT_IO_DRAIN_TIMEOUT, DEFAULT_READ_CHUNK_SIZE};
pub use io::{BoxReader, BoxWriter, InvokeIo};
pub use result::{InvocationResult, InvokeError, ResultReceiver, StreamKind};
