//! Process sandbox: runs the unit in a fresh interpreter.
//!
//! Изоляция на уровне процесса: каждый вызов получает свой интерпретатор,
//! свой кэш заглушек и жёсткий таймаут.

use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::{Sandbox, Verdict};
use crate::parser::SourceUnit;

const HARNESS: &str = include_str!("harness.py");

pub const DEFAULT_PYTHON: &str = "python3";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
const MAX_TIMEOUT_SECONDS: u64 = 120;

/// Last verdict line printed by the harness; the unit may print anything before it.
static VERDICT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^@@pyslice-verdict@@ (\{.*\})\s*$").unwrap());

#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    python: String,
    timeout: Duration,
}

impl Default for ProcessSandbox {
    fn default() -> Self {
        Self::new(
            DEFAULT_PYTHON.to_string(),
            Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        )
    }
}

impl ProcessSandbox {
    pub fn new(python: String, timeout: Duration) -> Self {
        Self {
            python,
            timeout: timeout.min(Duration::from_secs(MAX_TIMEOUT_SECONDS)),
        }
    }
}

impl Sandbox for ProcessSandbox {
    fn name(&self) -> &'static str {
        "process"
    }

    fn execute(&self, unit: &SourceUnit) -> Verdict {
        // отдельный runtime на вызов: execute вызывается из rayon-потоков
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => return sandbox_failure(e.into()),
        };

        match runtime.block_on(run_harness(&self.python, unit.text(), self.timeout)) {
            Ok(verdict) => verdict,
            Err(e) => sandbox_failure(e),
        }
    }
}

fn sandbox_failure(error: anyhow::Error) -> Verdict {
    tracing::warn!(error = %error, "process sandbox failed");
    Verdict::ExecutionError {
        exception: "SandboxError".to_string(),
        message: format!("{error:#}"),
    }
}

async fn run_harness(python: &str, source: &str, limit: Duration) -> Result<Verdict> {
    let start = Instant::now();

    let mut child = Command::new(python)
        .arg("-B")
        .arg("-c")
        .arg(HARNESS)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to start {python}"))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(source.as_bytes())
            .await
            .context("failed to send unit to interpreter")?;
    }

    // по таймауту future с child дропается, kill_on_drop убивает процесс
    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(output) => output.context("interpreter did not finish")?,
        Err(_) => {
            tracing::warn!(timeout_secs = limit.as_secs(), "unit execution timed out");
            return Ok(Verdict::ExecutionError {
                exception: "TimeoutError".to_string(),
                message: format!("Execution timed out after {} seconds", limit.as_secs()),
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    tracing::debug!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        status = ?output.status.code(),
        "harness finished"
    );

    match parse_verdict(&stdout) {
        Some(verdict) => Ok(verdict),
        None => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last = stderr.lines().last().unwrap_or("no verdict from interpreter");
            Ok(Verdict::ExecutionError {
                exception: "SandboxError".to_string(),
                message: last.trim().to_string(),
            })
        }
    }
}

fn parse_verdict(stdout: &str) -> Option<Verdict> {
    let json = VERDICT_LINE
        .captures_iter(stdout)
        .last()
        .and_then(|caps| caps.get(1))?;
    match serde_json::from_str(json.as_str()) {
        Ok(verdict) => Some(verdict),
        Err(e) => {
            tracing::warn!(error = %e, "malformed verdict line");
            None
        }
    }
}
