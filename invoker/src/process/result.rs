//! The outcome of one invocation.

use std::fmt;
use std::io;
use std::process::ExitStatus;

use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::buffer::{BufferError, SafeBuffer};

/// Receives the single [`InvocationResult`] of a run, then closes.
pub type ResultReceiver = oneshot::Receiver<InvocationResult>;

/// Which standard stream an I/O failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        })
    }
}

/// Why an invocation did not succeed.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The process could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The process exited with a non-zero code or was killed by a signal.
    #[error("process exited unsuccessfully: {0}")]
    Exit(ExitStatus),

    /// Waiting for the process failed.
    #[error("failed to wait for process: {0}")]
    Wait(#[source] io::Error),

    /// The cancellation token fired before the process finished.
    #[error("invocation cancelled")]
    Cancelled,

    /// Copying to or from one of the standard streams failed.
    #[error("failed to copy {stream}: {source}")]
    Stream {
        stream: StreamKind,
        #[source]
        source: io::Error,
    },
}

/// Exit error and captured output of a finished invocation.
///
/// The result owns its stdout and stderr buffers until
/// [`discard`](Self::discard) releases them. Reading output drains the
/// buffer: a second [`stdout`](Self::stdout) call only returns bytes that
/// arrived after the first.
#[derive(Debug)]
pub struct InvocationResult {
    id: Uuid,
    error: Option<InvokeError>,
    stdout: SafeBuffer,
    stderr: SafeBuffer,
}

impl InvocationResult {
    pub(crate) fn new(id: Uuid, stdout: SafeBuffer, stderr: SafeBuffer) -> Self {
        Self {
            id,
            error: None,
            stdout,
            stderr,
        }
    }

    pub(crate) fn finish(mut self, error: Option<InvokeError>) -> Self {
        self.error = error;
        self
    }

    /// Identifier of the invocation, also recorded on its tracing span.
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// The failure reported for the run, if any.
    pub const fn exit_error(&self) -> Option<&InvokeError> {
        self.error.as_ref()
    }

    /// Whether the process ran and exited with status zero.
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Exit code, if the process ran to completion.
    ///
    /// `None` when it was never started, was cancelled, or died from a signal.
    pub fn exit_code(&self) -> Option<i32> {
        match &self.error {
            None => Some(0),
            Some(InvokeError::Exit(status)) => status.code(),
            Some(InvokeError::Stream { .. }) => Some(0),
            Some(_) => None,
        }
    }

    /// Drain the captured standard output.
    pub fn stdout(&self) -> Result<Vec<u8>, BufferError> {
        self.stdout.read_to_end()
    }

    /// Drain the captured standard error.
    pub fn stderr(&self) -> Result<Vec<u8>, BufferError> {
        self.stderr.read_to_end()
    }

    /// Drain the captured standard output as text.
    pub fn stdout_string(&self) -> Result<String, BufferError> {
        self.stdout().map(lossy)
    }

    /// Drain the captured standard error as text.
    pub fn stderr_string(&self) -> Result<String, BufferError> {
        self.stderr().map(lossy)
    }

    /// Release both output buffers. Safe to call more than once.
    pub fn discard(&self) {
        self.stdout.discard();
        self.stderr.discard();
    }
}

fn lossy(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(stdout: &[u8], stderr: &[u8]) -> InvocationResult {
        let out = SafeBuffer::new();
        let err = SafeBuffer::new();
        out.write(stdout).unwrap();
        err.write(stderr).unwrap();
        InvocationResult::new(Uuid::now_v7(), out, err)
    }

    #[test]
    fn test_output_reads_drain() {
        let result = result_with(b"out", b"err");

        assert_eq!(result.stdout().unwrap(), b"out");
        assert!(result.stdout().unwrap().is_empty());
        assert_eq!(result.stderr_string().unwrap(), "err");
        assert_eq!(result.stderr_string().unwrap(), "");
    }

    #[test]
    fn test_success_without_error() {
        let result = result_with(b"", b"").finish(None);
        assert!(result.is_success());
        assert_eq!(result.exit_code(), Some(0));
        assert!(result.exit_error().is_none());
    }

    #[test]
    fn test_cancelled_has_no_exit_code() {
        let result = result_with(b"partial", b"").finish(Some(InvokeError::Cancelled));
        assert!(!result.is_success());
        assert_eq!(result.exit_code(), None);
        assert_eq!(result.stdout_string().unwrap(), "partial");
    }

    #[test]
    fn test_discard_releases_both_buffers() {
        let out = SafeBuffer::new();
        let err = SafeBuffer::new();
        let result = InvocationResult::new(Uuid::now_v7(), out.clone(), err.clone());

        result.discard();
        result.discard();

        assert!(out.is_discarded());
        assert!(err.is_discarded());
        assert_eq!(result.stdout(), Err(BufferError::Discarded));
        assert_eq!(result.stderr_string(), Err(BufferError::Discarded));
    }

    #[test]
    fn test_error_messages() {
        let spawn = InvokeError::Spawn {
            program: "missing".to_string(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(spawn.to_string().starts_with("failed to spawn missing"));

        let stream = InvokeError::Stream {
            stream: StreamKind::Stdout,
            source: io::Error::from(io::ErrorKind::BrokenPipe),
        };
        assert!(stream.to_string().starts_with("failed to copy stdout"));
    }
}
