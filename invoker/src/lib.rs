//! Concurrency-safe launching and supervision of external processes.
//!
//! - [`SafeBuffer`]: mutex-guarded byte buffer a process writes into while
//!   callers read from it
//! - [`WatchedBuffer`]: a `SafeBuffer` whose new bytes are tokenized and
//!   handed to a callback in the background
//! - [`Invoker`]: starts a binary per call, captures stdout/stderr, and
//!   reports through a single-value channel
//! - [`InvocationResult`]: exit error plus the captured output
//!
//! Cancellation flows through a [`CancellationToken`] passed to each run.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

pub mod buffer;
pub mod process;

pub use buffer::{
    BufferError, LineTokenizer, SafeBuffer, Token, TokenizeError, Tokenizer, WatchOptions,
    WatchedBuffer,
};
pub use process::{
    drain_all, drain_out, InvocationResult, InvokeError, InvokeIo, Invoker, InvokerConfig,
    ResultReceiver, StreamKind,
};
