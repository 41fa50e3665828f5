//! Running external programs.
//!
//! Engines and djvulibre tools are run with piped output and a timeout.
//! A program that cannot be started, runs too long, or exits with a failure
//! becomes an [`OcrodjvuError::Engine`] naming the program.

use crate::error::{OcrodjvuError, Result};
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{Duration, timeout};

/// Default timeout for a single engine or tool invocation (10 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// How to run a program.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// `OMP_THREAD_LIMIT` for the child.
    pub thread_limit: Option<usize>,
    /// Timeout in seconds; [`DEFAULT_TIMEOUT_SECS`] when unset.
    pub timeout_secs: Option<u64>,
    /// Data written to the child's standard input.
    pub stdin: Option<Vec<u8>>,
    /// Extra environment variables for the child.
    pub env: Vec<(OsString, OsString)>,
}

/// Find `program` on `PATH`.
///
/// A name containing a path separator is checked as given. Only executable
/// files count.
pub fn find_program(program: &str) -> Result<PathBuf> {
    which::which(program).map_err(|_| missing_program(program))
}

fn missing_program(program: &str) -> OcrodjvuError {
    OcrodjvuError::engine(program, format!("cannot find {} on PATH", program))
}

/// Run `program` with `args` and collect its output.
///
/// The exit status is not checked; see [`check_status`].
pub async fn run<S: AsRef<OsStr>>(program: impl AsRef<OsStr>, args: &[S], options: &RunOptions) -> Result<Output> {
    let program = program.as_ref();
    let name = program.to_string_lossy().into_owned();
    tracing::debug!("Running {} with {} argument(s)", name, args.len());

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if options.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(limit) = options.thread_limit {
        command.env("OMP_THREAD_LIMIT", limit.to_string());
    }
    command.envs(options.env.iter().map(|(key, value)| (key, value)));

    let mut child = command.spawn().map_err(|e| OcrodjvuError::Engine {
        engine: name.clone(),
        message: format!("cannot execute {}: {}", name, e),
        source: Some(Box::new(e)),
    })?;

    // Stdin is written while stdout and stderr are drained.
    let writer = match (options.stdin.clone(), child.stdin.take()) {
        (Some(input), Some(mut stdin)) => Some(tokio::spawn(async move {
            let result = stdin.write_all(&input).await;
            drop(stdin);
            result
        })),
        _ => None,
    };

    let collect = async move {
        let output = child.wait_with_output().await?;
        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                // The child may exit without reading all of its input.
                Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(io::Error::other(e)),
            }
        }
        Ok::<_, io::Error>(output)
    };

    let seconds = options.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
    match timeout(Duration::from_secs(seconds), collect).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(OcrodjvuError::Engine {
            engine: name.clone(),
            message: format!("failed to run {}: {}", name, e),
            source: Some(Box::new(e)),
        }),
        Err(_) => Err(OcrodjvuError::engine(
            name,
            format!("timed out after {} seconds", seconds),
        )),
    }
}

/// Turn a failed exit status into an error carrying the child's stderr.
pub fn check_status(engine: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    let status = match output.status.code() {
        Some(code) => format!("exit status {}", code),
        None => "terminated by a signal".to_string(),
    };
    Err(OcrodjvuError::engine(
        engine,
        if stderr.is_empty() {
            status
        } else {
            format!("{}: {}", status, stderr)
        },
    ))
}

/// Log whatever the child wrote to stderr, unless `is_noise` says otherwise.
pub fn forward_stderr(engine: &str, stderr: &[u8], is_noise: impl Fn(&str) -> bool) {
    let text = String::from_utf8_lossy(stderr);
    if text.trim().is_empty() || is_noise(&text) {
        return;
    }
    for line in text.lines().filter(|line| !line.trim().is_empty()) {
        tracing::warn!("{}: {}", engine, line);
    }
}
