//! Caller-supplied stdio and the tasks that copy process output.

use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::ChildStdin;
use tracing::{trace, warn};

use super::result::{InvokeError, StreamKind};
use crate::buffer::SafeBuffer;

/// Boxed input stream fed to a process.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed sink receiving a copy of process output.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Optional stdin and output sinks for [`Invoker::run_with_io`](super::Invoker::run_with_io).
///
/// Output always lands in the result's own buffers; a sink gets a live copy
/// of the same bytes.
#[derive(Default)]
pub struct InvokeIo {
    stdin: Option<BoxReader>,
    stdout: Option<BoxWriter>,
    stderr: Option<BoxWriter>,
}

impl fmt::Debug for InvokeIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeIo")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

impl InvokeIo {
    /// No stdin and no sinks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the process's standard input from `reader`.
    pub fn stdin(mut self, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stdin = Some(Box::new(reader));
        self
    }

    /// Tee standard output into `writer`.
    pub fn stdout(mut self, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stdout = Some(Box::new(writer));
        self
    }

    /// Tee standard error into `writer`.
    pub fn stderr(mut self, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stderr = Some(Box::new(writer));
        self
    }

    pub(crate) fn into_parts(self) -> (Option<BoxReader>, Option<BoxWriter>, Option<BoxWriter>) {
        (self.stdin, self.stdout, self.stderr)
    }
}

/// Copy `source` into `capture` until EOF, mirroring every chunk into `sink`.
///
/// A failing sink is dropped and reported once the stream ends; capture
/// continues regardless. The sink is flushed before returning.
pub(crate) async fn pump<R>(
    mut source: R,
    capture: SafeBuffer,
    mut sink: Option<BoxWriter>,
    stream: StreamKind,
    chunk_size: usize,
) -> Result<(), InvokeError>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; chunk_size.max(1)];
    let mut failure: Option<io::Error> = None;

    loop {
        let n = match source.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                failure.get_or_insert(err);
                break;
            }
        };
        trace!(%stream, bytes = n, "captured output");

        if let Err(err) = capture.write(&chunk[..n]) {
            failure.get_or_insert(err.into());
            break;
        }

        if let Some(writer) = sink.as_mut() {
            if let Err(err) = writer.write_all(&chunk[..n]).await {
                warn!(%stream, error = %err, "output sink failed, capturing only");
                sink = None;
                failure.get_or_insert(err);
            }
        }
    }

    if let Some(mut writer) = sink {
        if let Err(err) = writer.flush().await {
            warn!(%stream, error = %err, "failed to flush output sink");
            failure.get_or_insert(err);
        }
    }

    failure.map_or(Ok(()), |source| Err(InvokeError::Stream { stream, source }))
}

/// Copy `source` into the child's stdin, closing it at EOF.
pub(crate) async fn feed(mut source: BoxReader, mut stdin: ChildStdin) -> Result<(), InvokeError> {
    let copied = tokio::io::copy(&mut source, &mut stdin).await;
    drop(stdin);

    match copied {
        Ok(bytes) => {
            trace!(bytes, "stdin closed");
            Ok(())
        }
        // The process stopped reading; not an error of the invocation.
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(source) => Err(InvokeError::Stream {
            stream: StreamKind::Stdin,
            source,
        }),
    }
}
