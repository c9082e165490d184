//! Asynchronous, cancellable process invocations with captured output.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use super::io::{feed, pump, InvokeIo};
use super::result::{InvocationResult, InvokeError, ResultReceiver, StreamKind};
use crate::buffer::SafeBuffer;

/// Default bound on waiting for output pumps once the process is gone.
pub const DEFAULT_IO_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default size of each read from a process pipe.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8 * 1024;

/// Configuration shared by every invocation of an [`Invoker`].
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    /// Extra delay before [`Invoker::run_with_io`] delivers its result.
    ///
    /// Sinks are always flushed before delivery; this only helps sinks that
    /// forward bytes somewhere else asynchronously.
    pub settle_delay: Duration,

    /// How long to wait, in total, for stdout/stderr to reach EOF after the
    /// process exited or was killed. Descendants holding the pipes open can
    /// otherwise stall the run forever.
    pub io_drain_timeout: Duration,

    /// Environment variables to set (merged with the current env).
    pub env: HashMap<String, String>,

    /// Environment variables to remove.
    pub env_remove: Vec<String>,

    /// Whether to clear the environment before adding `env`.
    pub env_clear: bool,

    /// Size of each read from the output pipes.
    pub read_chunk_size: usize,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            io_drain_timeout: DEFAULT_IO_DRAIN_TIMEOUT,
            env: HashMap::new(),
            env_remove: Vec::new(),
            env_clear: false,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

impl InvokerConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the post-exit delay applied by `run_with_io`.
    pub const fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the output drain timeout.
    pub const fn io_drain_timeout(mut self, limit: Duration) -> Self {
        self.io_drain_timeout = limit;
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Remove an environment variable.
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    /// Clear the environment before setting variables.
    pub fn env_clear(mut self) -> Self {
        self.env_clear = true;
        self
    }

    /// Set the pipe read size.
    pub const fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }
}

#[derive(Debug)]
struct Target {
    bin_path: PathBuf,
    work_dir: PathBuf,
    config: InvokerConfig,
}

/// Launches one binary asynchronously and tracks every outstanding run.
///
/// Each run gets fresh stdout/stderr buffers and reports through a
/// single-value channel that always receives exactly one
/// [`InvocationResult`], whether the process succeeded, failed, could not
/// be started, or was cancelled.
///
/// ```rust,no_run
/// use invoker::Invoker;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo() -> anyhow::Result<()> {
/// let git = Invoker::new("git", "/tmp/repo");
/// let result = git.run(&CancellationToken::new(), ["status", "--short"]).await?;
/// println!("{}", result.stdout_string()?);
/// result.discard();
/// git.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Invoker {
    target: Arc<Target>,
    tracker: TaskTracker,
}

impl Invoker {
    /// Invoker for `bin_path`, run from `work_dir` (empty means the current directory).
    pub fn new(bin_path: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(bin_path, work_dir, InvokerConfig::default())
    }

    /// Invoker with explicit configuration.
    pub fn with_config(
        bin_path: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        config: InvokerConfig,
    ) -> Self {
        Self {
            target: Arc::new(Target {
                bin_path: bin_path.into(),
                work_dir: work_dir.into(),
                config,
            }),
            tracker: TaskTracker::new(),
        }
    }

    /// The working directory every invocation runs in.
    pub fn working_dir(&self) -> &Path {
        &self.target.work_dir
    }

    /// The binary every invocation launches.
    pub fn binary_path(&self) -> &Path {
        &self.target.bin_path
    }

    /// Number of runs that have not delivered their result yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Run the binary with `args`, capturing stdout and stderr.
    ///
    /// Cancelling `cancel` kills the process; the result then carries
    /// [`InvokeError::Cancelled`] and whatever output was captured. Must be
    /// called from within a Tokio runtime.
    pub fn run<I, S>(&self, cancel: &CancellationToken, args: I) -> ResultReceiver
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.start(cancel, InvokeIo::default(), args, false)
    }

    /// Like [`run`](Self::run), with optional stdin and live output sinks.
    ///
    /// Output is written both to the sink and to the result's own buffer, so
    /// the result always holds a complete copy. Sinks are flushed before the
    /// result is delivered.
    pub fn run_with_io<I, S>(&self, cancel: &CancellationToken, io: InvokeIo, args: I) -> ResultReceiver
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.start(cancel, io, args, true)
    }

    /// Wait until every run started so far has delivered its result.
    ///
    /// Does not cancel anything; cancel the tokens passed to the runs for that.
    pub async fn close(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    fn start<I, S>(&self, cancel: &CancellationToken, io: InvokeIo, args: I, settle: bool) -> ResultReceiver
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args.into_iter().map(|arg| arg.as_ref().to_os_string()).collect();
        let (tx, rx) = oneshot::channel();
        let target = Arc::clone(&self.target);
        let cancel = cancel.clone();
        let id = Uuid::now_v7();
        let span = info_span!("invocation", %id, program = %target.bin_path.display());

        // The tracker counts the task from here until the future below has
        // returned, i.e. after the result was sent.
        self.tracker.spawn(
            async move {
                let stdout = SafeBuffer::new();
                let stderr = SafeBuffer::new();
                let result = InvocationResult::new(id, stdout.clone(), stderr.clone());

                let error = target.invoke(&cancel, io, &args, stdout, stderr).await;
                if settle && !target.config.settle_delay.is_zero() {
                    sleep(target.config.settle_delay).await;
                }

                if let Err(result) = tx.send(result.finish(error)) {
                    debug!("result receiver dropped, discarding output");
                    result.discard();
                }
            }
            .instrument(span),
        );

        rx
    }
}

impl Target {
    fn command(&self, args: &[OsString], pipe_stdin: bool) -> Command {
        let mut cmd = Command::new(&self.bin_path);
        cmd.args(args).kill_on_drop(true);

        if !self.work_dir.as_os_str().is_empty() {
            cmd.current_dir(&self.work_dir);
        }

        if self.config.env_clear {
            cmd.env_clear();
        }
        for key in &self.config.env_remove {
            cmd.env_remove(key);
        }
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        cmd.stdin(if pipe_stdin { Stdio::piped() } else { Stdio::null() });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    /// Run one process to completion and report the highest-precedence failure.
    async fn invoke(
        &self,
        cancel: &CancellationToken,
        io: InvokeIo,
        args: &[OsString],
        stdout: SafeBuffer,
        stderr: SafeBuffer,
    ) -> Option<InvokeError> {
        if cancel.is_cancelled() {
            debug!("cancelled before start");
            return Some(InvokeError::Cancelled);
        }

        let (stdin_source, stdout_sink, stderr_sink) = io.into_parts();
        let mut child = match self.command(args, stdin_source.is_some()).spawn() {
            Ok(child) => child,
            Err(source) => {
                debug!(error = %source, "failed to spawn process");
                return Some(InvokeError::Spawn {
                    program: self.bin_path.display().to_string(),
                    source,
                });
            }
        };
        debug!(pid = child.id(), "process started");

        let chunk = self.config.read_chunk_size;
        let feeder = stdin_source
            .zip(child.stdin.take())
            .map(|(source, pipe)| tokio::spawn(feed(source, pipe)));
        let pumps: Vec<JoinHandle<Result<(), InvokeError>>> = [
            child
                .stdout
                .take()
                .map(|pipe| tokio::spawn(pump(pipe, stdout, stdout_sink, StreamKind::Stdout, chunk))),
            child
                .stderr
                .take()
                .map(|pipe| tokio::spawn(pump(pipe, stderr, stderr_sink, StreamKind::Stderr, chunk))),
        ]
        .into_iter()
        .flatten()
        .collect();

        let mut error = tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => None,
                Ok(status) => Some(InvokeError::Exit(status)),
                Err(err) => Some(InvokeError::Wait(err)),
            },
            () = cancel.cancelled() => {
                if let Err(err) = child.kill().await {
                    warn!(error = %err, "failed to kill cancelled process");
                }
                Some(InvokeError::Cancelled)
            }
        };
        debug!(outcome = ?error, "process finished");

        // One deadline for both pipes, however long the first one takes.
        let deadline = Instant::now() + self.config.io_drain_timeout;
        for mut handle in pumps {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(stream_error))) => {
                    error.get_or_insert(stream_error);
                }
                Ok(Err(join_error)) => warn!(error = %join_error, "output pump failed"),
                Err(_) => {
                    warn!("output still open after process exit, abandoning it");
                    handle.abort();
                }
            }
        }

        if let Some(feeder) = feeder {
            if feeder.is_finished() {
                if let Ok(Err(stdin_error)) = feeder.await {
                    error.get_or_insert(stdin_error);
                }
            } else {
                // Nobody will read the rest of the input.
                feeder.abort();
            }
        }

        error
    }
}
