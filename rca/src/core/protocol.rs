//! In-band signaling over the untyped text channel between roles.
//!
//! Two sentinel tag pairs carry control information inside otherwise free
//! text: `<task>…</task>` names the task a generator is working on and
//! `<success>…</success>` tells a generator that no further code is needed.
//! Fenced code blocks carry candidate analysis code.
//!
//! All extraction here is first-match, case-sensitive and spans lines.
//! A missing or unterminated tag is treated as absent, never as an error.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::CodeBlock;

static TASK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<task>(.*?)</task>").expect("task tag regex"));
static SUCCESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<success>(.*?)</success>").expect("success tag regex"));
static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:[ \t]*([\w+\-]+))?[ \t]*\r?\n([\s\S]*?)```").expect("code fence regex")
});

/// Control signals decoded from one inbound message.
///
/// Precedence: the task is always recorded first; a success marker then
/// suppresses code generation for the turn. Both may be present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signals {
    pub task: Option<String>,
    pub success: Option<String>,
}

impl Signals {
    pub fn decode(text: &str) -> Self {
        Self {
            task: extract_task(text),
            success: extract_success(text),
        }
    }

    /// True when the sender asked the generator to stop this turn.
    pub fn halts_generation(&self) -> bool {
        self.success.is_some()
    }
}

/// Content of the first `<task>…</task>` pair.
pub fn extract_task(text: &str) -> Option<String> {
    first_capture(&TASK_RE, text)
}

/// Content of the first `<success>…</success>` pair.
pub fn extract_success(text: &str) -> Option<String> {
    first_capture(&SUCCESS_RE, text)
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn wrap_task(task: &str) -> String {
    format!("<task>{task}</task>")
}

pub fn wrap_success(body: &str) -> String {
    format!("<success>{body}</success>")
}

/// Extract every fenced code block, in order of appearance.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    FENCE_RE
        .captures_iter(text)
        .map(|caps| CodeBlock {
            language: caps
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            code: caps
                .get(2)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        })
        .collect()
}

/// Only the blocks the sandbox is allowed to execute.
pub fn python_blocks(blocks: &[CodeBlock]) -> Vec<CodeBlock> {
    blocks.iter().filter(|b| b.is_python()).cloned().collect()
}

/// Format a generator submission as `"{origin}:\n{body}"`.
pub fn submission(origin: &str, body: &str) -> String {
    format!("{origin}:\n{body}")
}

/// Split a submission into `(origin, body)`.
///
/// The origin is everything before the first `":\n"`. Content without that
/// separator is attributed to `fallback` (normally the sender) as a whole.
pub fn split_origin<'a>(content: &'a str, fallback: &'a str) -> (&'a str, &'a str) {
    match content.split_once(":\n") {
        Some((origin, body)) if !origin.trim().is_empty() && !origin.contains('\n') => {
            (origin.trim(), body)
        }
        _ => (fallback, content),
    }
}
