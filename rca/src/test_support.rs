//! Test-only fakes for the model, the sandbox and message sinks.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::agents::{Role, RoleContext};
use crate::core::cancel::CancellationToken;
use crate::core::history::ChatTurn;
use crate::core::types::{CodeBlock, ExecutionResult, Message};
use crate::io::model::{ChatModel, ChatReply};
use crate::io::sandbox::Sandbox;

/// Model that returns queued replies in order and logs every request.
///
/// Running out of replies is an error, like a failing backend.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: RefCell<VecDeque<ChatReply>>,
    requests: RefCell<Vec<Vec<ChatTurn>>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_replies(replies.into_iter().map(ChatReply::text))
    }

    pub fn with_replies(replies: impl IntoIterator<Item = ChatReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into_iter().collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: impl Into<String>) {
        self.replies.borrow_mut().push_back(ChatReply::text(reply));
    }

    /// Every transcript view sent so far.
    pub fn requests(&self) -> Vec<Vec<ChatTurn>> {
        self.requests.borrow().clone()
    }

    /// Content of the last user turn of each request.
    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .filter_map(|turns| turns.last().map(|t| t.content.clone()))
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl ChatModel for ScriptedModel {
    fn complete(&self, turns: &[ChatTurn], _timeout: Duration) -> Result<ChatReply> {
        self.requests.borrow_mut().push(turns.to_vec());
        self.replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted model has no replies left"))
    }
}

/// Sandbox that returns queued results and logs every executed batch.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSandbox {
    results: Rc<RefCell<VecDeque<ExecutionResult>>>,
    executed: Rc<RefCell<Vec<Vec<CodeBlock>>>>,
}

impl ScriptedSandbox {
    pub fn new(results: impl IntoIterator<Item = ExecutionResult>) -> Self {
        Self {
            results: Rc::new(RefCell::new(results.into_iter().collect())),
            executed: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn executed(&self) -> Vec<Vec<CodeBlock>> {
        self.executed.borrow().clone()
    }
}

impl Sandbox for ScriptedSandbox {
    fn execute(
        &self,
        blocks: &[CodeBlock],
        _cancel: &CancellationToken,
        _timeout: Duration,
    ) -> Result<ExecutionResult> {
        self.executed.borrow_mut().push(blocks.to_vec());
        self.results
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted sandbox has no results left"))
    }
}

/// Role that only records what it receives.
pub struct Recorder {
    name: String,
    received: Rc<RefCell<Vec<Message>>>,
}

impl Recorder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            received: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Shared handle to the received messages; stays valid after boxing.
    pub fn received(&self) -> Rc<RefCell<Vec<Message>>> {
        Rc::clone(&self.received)
    }
}

impl Role for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&mut self, message: Message, _ctx: &mut RoleContext<'_>) -> Result<()> {
        self.received.borrow_mut().push(message);
        Ok(())
    }
}

/// Successful execution result with the given output.
pub fn exec_ok(output: &str) -> ExecutionResult {
    ExecutionResult {
        output: output.to_string(),
        exit_code: 0,
        truncated: false,
    }
}

/// Failed execution result with the given output.
pub fn exec_err(output: &str, exit_code: i32) -> ExecutionResult {
    ExecutionResult {
        output: output.to_string(),
        exit_code,
        truncated: false,
    }
}

/// A reply containing one fenced Python block.
pub fn python_reply(code: &str) -> String {
    format!("Here is the analysis.\n```python\n{code}\n```\n")
}
