//! Inference-service abstraction.
//!
//! The [`ChatModel`] trait decouples roles from the language-model backend.
//! [`CommandModel`] shells out to a configured command; tests use scripted
//! models that return predetermined replies without spawning processes.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::cancel::CancellationToken;
use crate::core::history::ChatTurn;
use crate::core::types::TokenUsage;
use crate::io::config::{ModelConfig, ReplyFormat};
use crate::io::process::{command_from_argv, run_command_with_timeout};

/// One completion returned by the inference service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatReply {
    pub content: String,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

impl ChatReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }
}

/// Abstraction over inference backends.
pub trait ChatModel {
    /// Complete the conversation. Errors propagate to the calling role.
    fn complete(&self, turns: &[ChatTurn], timeout: Duration) -> Result<ChatReply>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatTurn],
}

/// Model that pipes `{"messages": [...]}` to a command and reads its stdout.
pub struct CommandModel {
    config: ModelConfig,
    cancel: CancellationToken,
}

impl CommandModel {
    pub fn new(config: ModelConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }
}

impl ChatModel for CommandModel {
    #[instrument(skip_all, fields(turns = turns.len(), timeout_secs = timeout.as_secs()))]
    fn complete(&self, turns: &[ChatTurn], timeout: Duration) -> Result<ChatReply> {
        let request =
            serde_json::to_vec(&ChatRequest { messages: turns }).context("serialize request")?;
        let cmd = command_from_argv(&self.config.command, None)?;
        let output = run_command_with_timeout(
            cmd,
            Some(&request),
            timeout.min(self.config.timeout()),
            self.config.output_limit_bytes,
            Some(&self.cancel),
        )
        .context("run model command")?;

        if output.cancelled {
            return Err(anyhow!("model command cancelled"));
        }
        if output.timed_out {
            warn!("model command timed out");
            return Err(anyhow!("model command timed out after {:?}", timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                output.status.code(),
                output.stderr_lossy().trim()
            ));
        }
        if output.stdout_truncated > 0 {
            warn!(
                dropped = output.stdout_truncated,
                "model reply exceeded output limit"
            );
        }

        let stdout = output.stdout_lossy();
        let reply = parse_reply(&stdout, self.config.format)?;
        debug!(chars = reply.content.len(), usage = ?reply.usage, "model replied");
        Ok(reply)
    }
}

/// Decode a model command's stdout according to its declared format.
pub fn parse_reply(stdout: &str, format: ReplyFormat) -> Result<ChatReply> {
    match format {
        ReplyFormat::Json => serde_json::from_str(stdout.trim()).context("parse model reply json"),
        ReplyFormat::Text => Ok(ChatReply::text(stdout.trim_end())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(script: &str, format: ReplyFormat) -> CommandModel {
        CommandModel::new(
            ModelConfig {
                command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
                format,
                timeout_secs: 10,
                output_limit_bytes: 10_000,
            },
            CancellationToken::new(),
        )
    }

    #[test]
    fn json_reply_carries_usage() {
        let reply = parse_reply(
            r#"{"content": "hi", "usage": {"prompt_tokens": 3, "completion_tokens": 2}}"#,
            ReplyFormat::Json,
        )
        .expect("parse");
        assert_eq!(reply.content, "hi");
        assert_eq!(reply.usage.map(|u| u.total()), Some(5));
    }

    #[test]
    fn text_reply_has_no_usage() {
        let reply = parse_reply("plain answer\n", ReplyFormat::Text).expect("parse");
        assert_eq!(reply, ChatReply::text("plain answer"));
    }

    #[test]
    fn command_receives_transcript_on_stdin() {
        // Echo stdin back as the reply text.
        let m = model("cat", ReplyFormat::Text);
        let reply = m
            .complete(&[ChatTurn::user("ping")], Duration::from_secs(10))
            .expect("complete");
        let request: serde_json::Value = serde_json::from_str(&reply.content).expect("json");
        assert_eq!(request["messages"][0]["role"], "user");
        assert_eq!(request["messages"][0]["content"], "ping");
    }

    #[test]
    fn failing_command_is_an_error() {
        let m = model("echo nope >&2; exit 1", ReplyFormat::Text);
        let err = m
            .complete(&[ChatTurn::user("ping")], Duration::from_secs(10))
            .expect_err("fails");
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn malformed_json_reply_is_an_error() {
        assert!(parse_reply("not json", ReplyFormat::Json).is_err());
    }
}
