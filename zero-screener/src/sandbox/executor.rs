//! Child-process executor.
//!
//! Runs an assembled script with the configured interpreter:
//! - Private temp directory as working directory
//! - Environment cleared and rebuilt from an allowlist
//! - Incremental reads of both streams, capped per stream
//! - Hard deadline, enforced by killing the whole process group
//! - Process group reaped after every run, so background children die too

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::assembler::AssembledScript;
use super::markers::MarkerScanner;
use crate::error::ScreenerError;

/// Variables copied from the service environment. Everything else,
/// credentials included, is dropped.
pub const ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "LANG", "TMPDIR", "SYSTEMROOT"];

/// Read buffer size per stream.
const CHUNK_SIZE: usize = 8 * 1024;

/// How long to keep reading after the child exits. Bounds the wait when a
/// background process inherited the pipes.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub interpreter: String,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl ExecutorConfig {
    pub fn from_config(config: &zero_common::ExecutionConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            max_output_bytes: config.max_output_bytes,
        }
    }
}

/// Everything observed about one child process.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when killed by a signal or on timeout
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub elapsed: Duration,
    /// Payload isolated by the streaming marker scanner
    pub captured_payload: Option<String>,
    /// At least one stream exceeded the capture cap
    pub truncated: bool,
}

/// Accumulates at most `cap` bytes, remembering whether more arrived.
struct CappedBuffer {
    bytes: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl CappedBuffer {
    fn new(cap: usize) -> Self {
        Self {
            bytes: Vec::new(),
            cap,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.cap.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Runs assembled scripts in isolated child processes.
pub struct SandboxExecutor {
    config: ExecutorConfig,
}

impl SandboxExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Build the child environment.
    fn build_env(work_dir: &Path) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| ENV_ALLOWLIST.contains(&k.as_str()))
            .collect();

        env.insert("TMPDIR".into(), work_dir.display().to_string());
        env.insert("PYTHONUNBUFFERED".into(), "1".into());
        env.insert("PYTHONIOENCODING".into(), "utf-8".into());
        env.insert("PYTHONDONTWRITEBYTECODE".into(), "1".into());

        env
    }

    /// Run with the configured deadline.
    pub async fn run(&self, script: &AssembledScript) -> Result<RunOutput, ScreenerError> {
        self.run_with_timeout(script, self.config.timeout).await
    }

    /// Run `script` and wait for it to exit or for `timeout` to pass.
    ///
    /// Only a spawn failure is an error. A timeout or a non-zero exit is
    /// reported in the returned [`RunOutput`].
    pub async fn run_with_timeout(
        &self,
        script: &AssembledScript,
        timeout: Duration,
    ) -> Result<RunOutput, ScreenerError> {
        let work_dir = tempfile::Builder::new()
            .prefix("zero-screener-")
            .tempdir()
            .map_err(|e| ScreenerError::Internal(format!("create temp dir: {}", e)))?;

        let script_path = work_dir.path().join("screener.py");
        tokio::fs::write(&script_path, &script.source)
            .await
            .map_err(|e| ScreenerError::Internal(format!("write script: {}", e)))?;

        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(&script_path)
            .env_clear()
            .envs(Self::build_env(work_dir.path()))
            .current_dir(work_dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a timeout can take down anything it forked
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| ScreenerError::Spawn(format!("{}: {}", self.config.interpreter, e)))?;

        // `Child::id` goes away once the child is reaped; the group outlives it
        let pgid = child.id();
        debug!(pid = ?pgid, interpreter = %self.config.interpreter, "Spawned screener process");

        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
            terminate(&mut child, pgid).await;
            return Err(ScreenerError::Internal("child pipes unavailable".into()));
        };

        let mut scanner = MarkerScanner::new(&script.markers);
        let mut out_cap = CappedBuffer::new(self.config.max_output_bytes);
        let mut err_cap = CappedBuffer::new(self.config.max_output_bytes);
        let mut out_buf = vec![0u8; CHUNK_SIZE];
        let mut err_buf = vec![0u8; CHUNK_SIZE];
        let (mut out_open, mut err_open) = (true, true);
        let mut exited = false;
        let mut exit_code = None;
        let mut timed_out = false;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        // Re-armed when the child exits
        let drain = tokio::time::sleep(timeout);
        tokio::pin!(drain);

        while out_open || err_open || !exited {
            tokio::select! {
                read = stdout.read(&mut out_buf), if out_open => match read {
                    Ok(0) | Err(_) => out_open = false,
                    Ok(n) => {
                        scanner.feed(&out_buf[..n]);
                        out_cap.push(&out_buf[..n]);
                    }
                },
                read = stderr.read(&mut err_buf), if err_open => match read {
                    Ok(0) | Err(_) => err_open = false,
                    Ok(n) => err_cap.push(&err_buf[..n]),
                },
                status = child.wait(), if !exited => {
                    exited = true;
                    match status {
                        Ok(status) => exit_code = status.code(),
                        Err(e) => warn!(error = %e, "Failed to wait for screener process"),
                    }
                    drain.as_mut().reset(tokio::time::Instant::now() + DRAIN_GRACE);
                },
                _ = &mut drain, if exited => {
                    debug!("Descendant still holds output pipes open, stopping reads");
                    break;
                },
                _ = &mut deadline, if !exited => {
                    timed_out = true;
                    break;
                }
            }
        }

        let elapsed = started.elapsed();
        if timed_out {
            let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(timeout_ms, "Screener deadline exceeded, killing process group");
            terminate(&mut child, pgid).await;
        } else {
            // Anything the script left running in the background
            kill_group(pgid).await;
        }

        let truncated = out_cap.truncated || err_cap.truncated;
        if truncated {
            warn!(
                cap = %zero_common::util::format_bytes(self.config.max_output_bytes as u64),
                "Screener output exceeded capture cap"
            );
        }

        Ok(RunOutput {
            stdout: out_cap.into_string(),
            stderr: err_cap.into_string(),
            exit_code,
            timed_out,
            elapsed,
            captured_payload: scanner.finish(),
            truncated,
        })
    }
}

/// SIGKILL every process in the group led by `pgid` (unix).
async fn kill_group(pgid: Option<u32>) {
    #[cfg(unix)]
    {
        if let Some(pid) = pgid {
            let _ = Command::new("kill")
                .args(["-KILL", "--", &format!("-{}", pid)])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;
}

/// Kill the child's process group and the child itself, then reap it.
async fn terminate(child: &mut Child, pgid: Option<u32>) {
    kill_group(pgid).await;

    if let Err(e) = child.kill().await {
        debug!(error = %e, "Child already exited");
    }
}
