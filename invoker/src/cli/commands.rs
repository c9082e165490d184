//! CLI command execution.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use invoker::{InvocationResult, InvokeIo, Invoker, WatchedBuffer};

use super::args::{Cli, Commands, Target};

/// What `run` reports once the command is done.
#[derive(Debug, Serialize)]
struct Summary {
    id: Uuid,
    program: String,
    exit_code: Option<i32>,
    error: Option<String>,
    duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
}

impl Summary {
    fn new(
        invoker: &Invoker,
        result: &InvocationResult,
        elapsed: Duration,
        with_output: bool,
    ) -> Result<Self> {
        let (stdout, stderr) = if with_output {
            (Some(result.stdout_string()?), Some(result.stderr_string()?))
        } else {
            (None, None)
        };

        Ok(Self {
            id: result.id(),
            program: invoker.binary_path().display().to_string(),
            exit_code: result.exit_code(),
            error: result.exit_error().map(ToString::to_string),
            duration_ms: elapsed.as_millis(),
            stdout,
            stderr,
        })
    }
}

/// Execute the parsed CLI command.
pub async fn execute(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Run { json, target } => run_command(target, json).await,
        Commands::Watch { until, target } => watch_command(target, until.as_deref()).await,
    }
}

/// Map a child exit code onto our own.
fn exit_code(code: Option<i32>) -> ExitCode {
    code.and_then(|code| u8::try_from(code).ok())
        .map_or(ExitCode::FAILURE, ExitCode::from)
}

/// Cancel `cancel` after `secs` seconds, if a timeout was requested.
fn arm_timeout(cancel: &CancellationToken, secs: Option<u64>) -> Option<JoinHandle<()>> {
    secs.map(|secs| {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!(secs, "timeout elapsed, cancelling command");
            cancel.cancel();
        })
    })
}

/// Stdin wiring for the target, if an input file was given.
async fn stdin_io(target: &Target) -> Result<InvokeIo> {
    let io = InvokeIo::new();
    let Some(path) = &target.input else {
        return Ok(io);
    };
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open input file: {}", path.display()))?;
    Ok(io.stdin(file))
}

async fn run_command(target: Target, json: bool) -> Result<ExitCode> {
    let invoker = Invoker::new(&target.program, &target.dir);
    let cancel = CancellationToken::new();
    let deadline = arm_timeout(&cancel, target.timeout);

    let mut io = stdin_io(&target).await?;
    if !json {
        io = io.stdout(tokio::io::stdout()).stderr(tokio::io::stderr());
    }

    let started = Instant::now();
    let result = invoker
        .run_with_io(&cancel, io, &target.args)
        .await
        .context("Invocation ended without a result")?;
    let elapsed = started.elapsed();
    if let Some(deadline) = deadline {
        deadline.abort();
    }

    let summary = Summary::new(&invoker, &result, elapsed, json)?;
    result.discard();
    invoker.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        match &summary.error {
            None => eprintln!("{} finished in {} ms", summary.program, summary.duration_ms),
            Some(err) => eprintln!(
                "{} failed after {} ms: {err}",
                summary.program, summary.duration_ms
            ),
        }
    }

    Ok(exit_code(summary.exit_code))
}

async fn watch_command(target: Target, until: Option<&str>) -> Result<ExitCode> {
    let pattern = until
        .map(Regex::new)
        .transpose()
        .context("Invalid --until pattern")?;
    let invoker = Invoker::new(&target.program, &target.dir);
    let cancel = CancellationToken::new();
    let deadline = arm_timeout(&cancel, target.timeout);
    let matched = Arc::new(AtomicBool::new(false));

    let watched = {
        let scan_cancel = cancel.child_token();
        let cancel = cancel.clone();
        let matched = Arc::clone(&matched);
        WatchedBuffer::spawn(
            scan_cancel,
            move |token: &[u8]| {
                let line = String::from_utf8_lossy(token);
                println!("{line}");
                let hit = pattern.as_ref().is_some_and(|re| re.is_match(&line));
                if hit {
                    info!(%line, "stop pattern matched, cancelling command");
                    matched.store(true, Ordering::SeqCst);
                    cancel.cancel();
                }
                hit
            },
            None,
        )
    };

    let io = stdin_io(&target)
        .await?
        .stdout(watched.handle())
        .stderr(tokio::io::stderr());
    let result = invoker
        .run_with_io(&cancel, io, &target.args)
        .await
        .context("Invocation ended without a result")?;
    watched.finish().await;
    if let Some(deadline) = deadline {
        deadline.abort();
    }

    let code = if matched.load(Ordering::SeqCst) {
        ExitCode::SUCCESS
    } else {
        if let Some(err) = result.exit_error() {
            warn!(error = %err, "command failed");
        }
        exit_code(result.exit_code())
    };
    result.discard();
    invoker.close().await;

    Ok(code)
}
