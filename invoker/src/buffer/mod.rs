//! Concurrency-safe output buffers.
//!
//! - [`SafeBuffer`]: lock-guarded byte store shared by a writer and readers
//! - [`WatchedBuffer`]: a `SafeBuffer` scanned token by token in the background
//! - [`Tokenizer`]: how a watched buffer splits bytes into tokens

mod safe;
mod tokenizer;
mod watched;

pub use safe::{BufferError, SafeBuffer};
pub use tokenizer::{LineTokenizer, Token, TokenizeError, Tokenizer, DEFAULT_MAX_TOKEN_SIZE};
pub use watched::{WatchOptions, WatchedBuffer, DEFAULT_POLL_INTERVAL};
