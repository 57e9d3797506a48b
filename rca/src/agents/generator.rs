//! Per-modality code generator.

use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::budget::call_budget;
use crate::core::history::{Conversation, HistoryPolicy};
use crate::core::protocol::{Signals, submission};
use crate::core::text::compress_duplicate_lines;
use crate::core::types::{GATE_ROLE, Message, Modality};
use crate::io::model::ChatModel;

use super::{Role, RoleContext};

/// Turns tasks and gate feedback into candidate analysis code.
///
/// The transcript only grows; the history policy decides what is sent.
pub struct Generator {
    name: String,
    conversation: Conversation,
    model: Rc<dyn ChatModel>,
    history: HistoryPolicy,
    call_timeout: Duration,
}

impl Generator {
    pub fn new(
        modality: Modality,
        system_primer: impl Into<String>,
        model: Rc<dyn ChatModel>,
        history: HistoryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            name: modality.coder_name(),
            conversation: Conversation::new(system_primer),
            model,
            history,
            call_timeout,
        }
    }
}

impl Role for Generator {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(role = %self.name, from = %message.sender))]
    fn handle(&mut self, message: Message, ctx: &mut RoleContext<'_>) -> Result<()> {
        let enriched = ctx.blackboard.enrich(&message.content, &self.name);
        let signals = Signals::decode(&enriched);
        if let Some(task) = signals.task.as_deref() {
            ctx.blackboard.record_task(&self.name, task);
        }
        self.conversation.push_user(enriched);

        if signals.halts_generation() {
            debug!("success marker received, not generating");
            return Ok(());
        }

        let timeout = call_budget(ctx.deadline, self.call_timeout)?;
        let reply = self
            .model
            .complete(&self.conversation.view(self.history), timeout)
            .with_context(|| format!("{} inference call", self.name))?;
        self.conversation.push_assistant(reply.content.as_str());

        let call = ctx.usage.record(&self.name, reply.usage);
        info!(
            call,
            prompt_tokens = reply.usage.map(|u| u.prompt_tokens),
            completion_tokens = reply.usage.map(|u| u.completion_tokens),
            "generator replied"
        );

        ctx.blackboard
            .record_response(&self.name, compress_duplicate_lines(&reply.content));
        ctx.send(GATE_ROLE, submission(&self.name, &reply.content));
        Ok(())
    }

    fn transcript(&self) -> Option<&Conversation> {
        Some(&self.conversation)
    }
}
