//! Mutex-guarded byte buffer shared between a writer and its readers.
//!
//! A running process writes into the buffer while the caller (or a
//! [`WatchedBuffer`](super::WatchedBuffer) scanner) reads from it. Every
//! operation holds the lock for its whole duration, so a reader never
//! observes half of a write.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::sync::Notify;

/// Errors raised by buffer operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// The buffer was discarded and may no longer be used.
    #[error("access to discarded buffer")]
    Discarded,
}

impl From<BufferError> for io::Error {
    fn from(err: BufferError) -> Self {
        Self::other(err)
    }
}

/// Unread bytes of a live buffer.
#[derive(Debug, Default)]
pub(super) struct Live {
    data: Vec<u8>,
    pos: usize,
}

impl Live {
    /// Bytes written but not yet consumed.
    pub(super) fn unread(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    /// Mark `n` unread bytes as consumed.
    ///
    /// The consumed prefix is reclaimed once it outweighs the unread tail,
    /// so a reader that never fully catches up keeps the store bounded.
    pub(super) fn consume(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.data.len());
        if self.pos == self.data.len() {
            self.data.clear();
            self.pos = 0;
        } else if self.pos > self.data.len() / 2 {
            self.data.drain(..self.pos);
            self.pos = 0;
        }
    }
}

#[derive(Debug)]
enum State {
    Live(Live),
    Discarded,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    written: Notify,
}

/// A concurrency-safe, growable byte buffer.
///
/// Cloning yields another handle to the same storage. Reads consume bytes
/// from the front; snapshots copy the unread bytes without consuming them.
/// Once [`discard`](Self::discard)ed, every read, write or snapshot fails
/// with [`BufferError::Discarded`].
#[derive(Debug, Clone)]
pub struct SafeBuffer {
    shared: Arc<Shared>,
}

impl Default for SafeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SafeBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Live(Live::default())),
                written: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Operations never leave the state half-updated, so a poisoned lock is still usable.
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the live contents while holding the lock.
    pub(super) fn with_live<T>(&self, f: impl FnOnce(&mut Live) -> T) -> Result<T, BufferError> {
        match &mut *self.lock() {
            State::Live(live) => Ok(f(live)),
            State::Discarded => Err(BufferError::Discarded),
        }
    }

    /// Read up to `buf.len()` unread bytes. Returns `Ok(0)` when nothing is unread.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, BufferError> {
        self.with_live(|live| {
            let unread = live.unread();
            let n = unread.len().min(buf.len());
            buf[..n].copy_from_slice(&unread[..n]);
            live.consume(n);
            n
        })
    }

    /// Append `data`, returning the number of bytes written.
    pub fn write(&self, data: &[u8]) -> Result<usize, BufferError> {
        self.with_live(|live| live.data.extend_from_slice(data))?;
        if !data.is_empty() {
            self.shared.written.notify_one();
        }
        Ok(data.len())
    }

    /// Consume and return every unread byte.
    pub fn read_to_end(&self) -> Result<Vec<u8>, BufferError> {
        self.with_live(|live| {
            let bytes = live.unread().to_vec();
            live.consume(bytes.len());
            bytes
        })
    }

    /// Copy of the unread bytes; nothing is consumed.
    pub fn snapshot_bytes(&self) -> Result<Vec<u8>, BufferError> {
        self.with_live(|live| live.unread().to_vec())
    }

    /// Unread bytes as text (invalid UTF-8 is replaced); nothing is consumed.
    pub fn snapshot_string(&self) -> Result<String, BufferError> {
        self.with_live(|live| String::from_utf8_lossy(live.unread()).into_owned())
    }

    /// Number of unread bytes.
    pub fn len(&self) -> Result<usize, BufferError> {
        self.with_live(|live| live.unread().len())
    }

    /// Whether there are no unread bytes.
    pub fn is_empty(&self) -> Result<bool, BufferError> {
        self.len().map(|len| len == 0)
    }

    /// Release the storage. Calling this again is a no-op.
    pub fn discard(&self) {
        let mut state = self.lock();
        if matches!(*state, State::Discarded) {
            return;
        }
        *state = State::Discarded;
        drop(state);
        // Wake a scanner so it observes the discard instead of sleeping.
        self.shared.written.notify_one();
    }

    /// Whether [`discard`](Self::discard) has been called on any handle.
    pub fn is_discarded(&self) -> bool {
        matches!(*self.lock(), State::Discarded)
    }

    /// Resolves after the next non-empty write (or discard).
    ///
    /// A write that happened since the last wakeup is remembered, so a write
    /// racing with the call is never missed.
    pub(super) async fn changed(&self) {
        self.shared.written.notified().await;
    }
}

impl io::Read for SafeBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(Self::read(self, buf)?)
    }
}

impl io::Write for SafeBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(Self::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncWrite for SafeBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Self::write(&self, buf).map_err(io::Error::from))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    const BLOCK: usize = 64;

    #[test]
    fn test_write_then_read() {
        let buf = SafeBuffer::new();
        assert_eq!(buf.write(b"hello world").unwrap(), 11);

        let mut out = [0u8; 5];
        assert_eq!(buf.read(&mut out).unwrap(), 5);
        assert_eq!(&out, b"hello");
        assert_eq!(buf.snapshot_string().unwrap(), " world");
        assert_eq!(buf.read_to_end().unwrap(), b" world");
        assert!(buf.is_empty().unwrap());
        assert_eq!(buf.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_snapshot_does_not_consume() {
        let buf = SafeBuffer::new();
        buf.write(b"abc").unwrap();

        assert_eq!(buf.snapshot_bytes().unwrap(), b"abc");
        assert_eq!(buf.snapshot_bytes().unwrap(), b"abc");
        assert_eq!(buf.len().unwrap(), 3);
    }

    #[test]
    fn test_clones_share_storage() {
        let writer = SafeBuffer::new();
        let reader = writer.clone();
        writer.write(b"shared").unwrap();
        assert_eq!(reader.read_to_end().unwrap(), b"shared");
    }

    #[test]
    fn test_discard_is_idempotent() {
        let buf = SafeBuffer::new();
        buf.write(b"data").unwrap();

        buf.discard();
        buf.discard();
        assert!(buf.is_discarded());
    }

    #[test]
    fn test_discarded_access_fails_every_time() {
        let buf = SafeBuffer::new();
        buf.write(b"data").unwrap();
        buf.discard();

        for _ in 0..3 {
            let mut out = [0u8; 4];
            assert_eq!(buf.read(&mut out), Err(BufferError::Discarded));
            assert_eq!(buf.write(b"more"), Err(BufferError::Discarded));
            assert_eq!(buf.snapshot_bytes(), Err(BufferError::Discarded));
            assert_eq!(buf.snapshot_string(), Err(BufferError::Discarded));
            assert_eq!(buf.read_to_end(), Err(BufferError::Discarded));
            assert_eq!(buf.len(), Err(BufferError::Discarded));
        }
    }

    #[test]
    fn test_io_traits_surface_discard() {
        use std::io::{Read, Write};

        let mut buf = SafeBuffer::new();
        buf.write_all(b"via io").unwrap();

        let mut text = String::new();
        buf.read_to_string(&mut text).unwrap();
        assert_eq!(text, "via io");

        buf.discard();
        let err = Write::write(&mut buf, b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(err.to_string(), "access to discarded buffer");
    }

    #[test]
    fn test_concurrent_writes_are_never_interleaved() {
        let buf = SafeBuffer::new();
        let writers: Vec<_> = (0..8u8)
            .map(|id| {
                let buf = buf.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        buf.write(&[id; BLOCK]).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let data = buf.snapshot_bytes().unwrap();
        assert_eq!(data.len(), 8 * 200 * BLOCK);
        for block in data.chunks(BLOCK) {
            assert!(block.iter().all(|b| *b == block[0]));
        }
    }

    #[test]
    fn test_concurrent_reader_only_sees_whole_writes() {
        let buf = SafeBuffer::new();
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let buf = buf.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for i in 0..2_000u32 {
                    let byte = u8::try_from(i % 251).unwrap();
                    buf.write(&[byte; BLOCK]).unwrap();
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let mut collected = Vec::new();
        let mut chunk = [0u8; BLOCK * 16];
        loop {
            let finished = done.load(Ordering::SeqCst);
            let n = buf.read(&mut chunk).unwrap();
            assert_eq!(n % BLOCK, 0, "read observed a partial write");
            collected.extend_from_slice(&chunk[..n]);
            if finished && n == 0 {
                break;
            }
        }
        writer.join().unwrap();

        assert_eq!(collected.len(), 2_000 * BLOCK);
        for (i, block) in collected.chunks(BLOCK).enumerate() {
            let expected = u8::try_from(i % 251).unwrap();
            assert!(block.iter().all(|b| *b == expected), "block {i} out of order");
        }
    }

    #[test]
    fn test_lagging_reader_keeps_store_bounded() {
        let buf = SafeBuffer::new();
        buf.write(&[0u8; 50]).unwrap();

        let mut out = [0u8; 100];
        for round in 0..10_000u32 {
            let byte = u8::try_from(round % 251).unwrap();
            buf.write(&[byte; 100]).unwrap();
            assert_eq!(buf.read(&mut out).unwrap(), 100);
        }

        let last = u8::try_from(9_999 % 251).unwrap();
        assert_eq!(buf.snapshot_bytes().unwrap(), vec![last; 50]);
        let stored = buf.with_live(|live| live.data.len()).unwrap();
        assert!(stored < 1_024, "backing store grew to {stored} bytes");
    }

    #[tokio::test]
    async fn test_async_write_appends() {
        use tokio::io::AsyncWriteExt;

        let mut buf = SafeBuffer::new();
        buf.write_all(b"async ").await.unwrap();
        buf.write_all(b"bytes").await.unwrap();
        buf.flush().await.unwrap();
        assert_eq!(buf.snapshot_string().unwrap(), "async bytes");
    }

    #[tokio::test]
    async fn test_changed_remembers_earlier_write() {
        let buf = SafeBuffer::new();
        buf.write(b"x").unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), buf.changed())
            .await
            .unwrap();
    }
}
