//! A [`SafeBuffer`] with a background task that tokenizes new output.

use std::ops::Deref;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::safe::{BufferError, SafeBuffer};
use super::tokenizer::{LineTokenizer, TokenizeError, Tokenizer};

/// How long the scanner waits for a write before checking again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Options for the scanning task.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Upper bound on the wait between scans when no write wakes the scanner.
    pub poll_interval: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl WatchOptions {
    /// Set the poll interval.
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[derive(Debug, thiserror::Error)]
enum ScanError {
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),
}

/// A buffer whose contents are scanned as they arrive.
///
/// Each complete token is handed to the callback exactly once, in write
/// order. The scanner stops when the cancellation token fires, when the
/// callback returns `true`, or when reading or tokenizing fails (silently,
/// apart from a debug event). A trailing token without its terminator is
/// held back until [`finish`](Self::finish) is called.
///
/// ```rust,no_run
/// use invoker::WatchedBuffer;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo() {
/// let watched = WatchedBuffer::spawn(
///     CancellationToken::new(),
///     |line: &[u8]| {
///         println!("{}", String::from_utf8_lossy(line));
///         false
///     },
///     None,
/// );
/// watched.write(b"one\ntwo").unwrap();
/// watched.finish().await;
/// # }
/// ```
#[derive(Debug)]
pub struct WatchedBuffer {
    buffer: SafeBuffer,
    flush: CancellationToken,
    scanner: JoinHandle<()>,
}

impl WatchedBuffer {
    /// Start watching a fresh buffer with the default options.
    ///
    /// `tokenizer` defaults to [`LineTokenizer`]. Must be called from within
    /// a Tokio runtime.
    pub fn spawn<F>(
        cancel: CancellationToken,
        on_token: F,
        tokenizer: Option<Box<dyn Tokenizer>>,
    ) -> Self
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        Self::with_options(cancel, on_token, tokenizer, WatchOptions::default())
    }

    /// Start watching a fresh buffer.
    pub fn with_options<F>(
        cancel: CancellationToken,
        on_token: F,
        tokenizer: Option<Box<dyn Tokenizer>>,
        options: WatchOptions,
    ) -> Self
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        let buffer = SafeBuffer::new();
        let flush = CancellationToken::new();
        let tokenizer = tokenizer.unwrap_or_else(|| Box::new(LineTokenizer::new()));

        let scanner = tokio::spawn(scan(
            buffer.clone(),
            cancel,
            flush.clone(),
            on_token,
            tokenizer,
            options.poll_interval,
        ));

        Self {
            buffer,
            flush,
            scanner,
        }
    }

    /// Another handle to the watched buffer, e.g. to pass as an output sink.
    pub fn handle(&self) -> SafeBuffer {
        self.buffer.clone()
    }

    /// Whether the scanning task has stopped.
    pub fn is_finished(&self) -> bool {
        self.scanner.is_finished()
    }

    /// Deliver the remaining complete tokens plus any trailing partial
    /// token, then wait for the scanner to stop.
    ///
    /// Does nothing beyond waiting if the scanner already stopped.
    pub async fn finish(self) {
        self.flush.cancel();
        if let Err(err) = self.scanner.await {
            debug!(error = %err, "scanner task failed");
        }
    }
}

impl Deref for WatchedBuffer {
    type Target = SafeBuffer;

    fn deref(&self) -> &SafeBuffer {
        &self.buffer
    }
}

/// Pop the next complete token off the front of the buffer.
fn next_token(
    buffer: &SafeBuffer,
    tokenizer: &mut dyn Tokenizer,
    at_eof: bool,
) -> Result<Option<Vec<u8>>, ScanError> {
    let token = buffer.with_live(|live| {
        let Some(token) = tokenizer.next_token(live.unread(), at_eof)? else {
            return Ok(None);
        };
        if token.advance == 0 {
            return Err(TokenizeError::NoProgress);
        }
        live.consume(token.advance);
        Ok(Some(token.bytes))
    })??;
    Ok(token)
}

async fn scan<F>(
    buffer: SafeBuffer,
    cancel: CancellationToken,
    flush: CancellationToken,
    mut on_token: F,
    mut tokenizer: Box<dyn Tokenizer>,
    poll_interval: Duration,
) where
    F: FnMut(&[u8]) -> bool,
{
    loop {
        if cancel.is_cancelled() {
            trace!("scanner cancelled");
            return;
        }
        let at_eof = flush.is_cancelled();

        loop {
            match next_token(&buffer, tokenizer.as_mut(), at_eof) {
                Ok(Some(token)) => {
                    if on_token(token.as_slice()) {
                        trace!("token callback requested stop");
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(error = %err, "scanner stopped");
                    return;
                }
            }
            if cancel.is_cancelled() {
                trace!("scanner cancelled");
                return;
            }
        }

        if at_eof {
            return;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                trace!("scanner cancelled");
                return;
            }
            () = flush.cancelled() => {}
            () = buffer.changed() => {}
            () = tokio::time::sleep(poll_interval) => {}
        }
    }
}
