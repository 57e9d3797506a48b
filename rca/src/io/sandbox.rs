//! Sandboxed execution of candidate analysis code.
//!
//! The [`Sandbox`] trait decouples the gate from the interpreter backend.
//! [`ProcessSandbox`] runs each block through a configured interpreter inside
//! one working directory that persists for the whole session, so files
//! written by an earlier block are visible to later ones.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::cancel::CancellationToken;
use crate::core::types::{CodeBlock, ExecutionResult};
use crate::io::config::SandboxConfig;
use crate::io::process::{command_from_argv, run_command_with_timeout};

/// Exit code reported for a block that hit its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Abstraction over code-execution backends.
pub trait Sandbox {
    /// Run `blocks` in order, stopping at the first non-zero exit.
    fn execute(
        &self,
        blocks: &[CodeBlock],
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<ExecutionResult>;
}

/// Sandbox that writes each block to `snippet_<n>.py` and runs the interpreter on it.
pub struct ProcessSandbox {
    command: Vec<String>,
    workdir: PathBuf,
    block_timeout: Duration,
    output_limit_bytes: usize,
    next_snippet: Cell<u64>,
}

impl ProcessSandbox {
    pub fn new(config: &SandboxConfig) -> Result<Self> {
        if config.command.is_empty() {
            bail!("sandbox.command must be a non-empty array");
        }
        fs::create_dir_all(&config.workdir)
            .with_context(|| format!("create sandbox dir {}", config.workdir.display()))?;
        let workdir = config
            .workdir
            .canonicalize()
            .with_context(|| format!("resolve sandbox dir {}", config.workdir.display()))?;
        info!(workdir = %workdir.display(), "sandbox ready");
        Ok(Self {
            command: config.command.clone(),
            workdir,
            block_timeout: Duration::from_secs(config.block_timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
            next_snippet: Cell::new(0),
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn write_snippet(&self, block: &CodeBlock) -> Result<String> {
        let index = self.next_snippet.get();
        self.next_snippet.set(index + 1);
        let name = format!("snippet_{index}.py");
        let path = self.workdir.join(&name);
        fs::write(&path, &block.code)
            .with_context(|| format!("write snippet {}", path.display()))?;
        Ok(name)
    }
}

impl Sandbox for ProcessSandbox {
    #[instrument(skip_all, fields(blocks = blocks.len()))]
    fn execute(
        &self,
        blocks: &[CodeBlock],
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        let mut output = String::new();
        let mut truncated = false;
        let mut exit_code = 0;

        for block in blocks {
            if cancel.is_cancelled() {
                bail!("sandbox execution cancelled");
            }
            let snippet = self.write_snippet(block)?;
            let mut argv = self.command.clone();
            argv.push(snippet.clone());
            let cmd = command_from_argv(&argv, Some(&self.workdir))?;

            let block_timeout = self.block_timeout.min(timeout);
            let run = run_command_with_timeout(
                cmd,
                None,
                block_timeout,
                self.output_limit_bytes,
                Some(cancel),
            )
            .with_context(|| format!("run {snippet}"))?;

            if run.cancelled {
                bail!("sandbox execution cancelled");
            }

            output.push_str(&run.stdout_lossy());
            output.push_str(&run.stderr_lossy());
            if run.truncated() {
                truncated = true;
                output.push_str(&run.truncated_notice("sandbox"));
            }

            if run.timed_out {
                warn!(snippet, timeout_secs = block_timeout.as_secs(), "block timed out");
                output.push_str(&format!(
                    "\nTimeout: block {snippet} exceeded {}s\n",
                    block_timeout.as_secs()
                ));
                exit_code = TIMEOUT_EXIT_CODE;
                break;
            }
            exit_code = run.status.code().unwrap_or(1);
            debug!(snippet, exit_code, "block finished");
            if exit_code != 0 {
                break;
            }
        }

        Ok(ExecutionResult {
            output,
            exit_code,
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox(dir: &Path, timeout_secs: u64) -> ProcessSandbox {
        ProcessSandbox::new(&SandboxConfig {
            command: vec!["sh".to_string()],
            workdir: dir.join("sandbox"),
            block_timeout_secs: timeout_secs,
            output_limit_bytes: 10_000,
        })
        .expect("sandbox")
    }

    fn block(code: &str) -> CodeBlock {
        CodeBlock {
            language: "python".to_string(),
            code: code.to_string(),
        }
    }

    #[test]
    fn blocks_share_a_persistent_workdir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sb = sandbox(temp.path(), 10);
        let result = sb
            .execute(
                &[block("echo state > state.txt\n"), block("cat state.txt\n")],
                &CancellationToken::new(),
                Duration::from_secs(10),
            )
            .expect("execute");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "state\n");
        assert!(sb.workdir().join("snippet_0.py").exists());
        assert!(sb.workdir().join("snippet_1.py").exists());
    }

    #[test]
    fn stops_at_first_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sb = sandbox(temp.path(), 10);
        let result = sb
            .execute(
                &[block("echo boom >&2\nexit 2\n"), block("echo unreachable\n")],
                &CancellationToken::new(),
                Duration::from_secs(10),
            )
            .expect("execute");
        assert_eq!(result.exit_code, 2);
        assert_eq!(result.output, "boom\n");
    }

    #[test]
    fn timeout_reports_exit_124() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sb = sandbox(temp.path(), 10);
        let result = sb
            .execute(
                &[block("exec sleep 5\n")],
                &CancellationToken::new(),
                Duration::from_millis(200),
            )
            .expect("execute");
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(result.output.contains("Timeout"));
    }

    #[test]
    fn cancelled_token_aborts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sb = sandbox(temp.path(), 10);
        let token = CancellationToken::new();
        token.cancel();
        let err = sb
            .execute(&[block("echo hi\n")], &token, Duration::from_secs(10))
            .expect_err("cancelled");
        assert!(err.to_string().contains("cancelled"));
    }
}
