//! Conversational roles driven directly by the controller.

use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::budget::call_budget;
use crate::core::history::{Conversation, HistoryPolicy};
use crate::core::types::UsageLedger;
use crate::io::model::ChatModel;

/// Planner, router, explorer or reasoner: a primer, a transcript and a model.
pub struct Assistant {
    name: String,
    conversation: Conversation,
    model: Rc<dyn ChatModel>,
    history: HistoryPolicy,
    call_timeout: Duration,
}

impl Assistant {
    pub fn new(
        name: impl Into<String>,
        system_primer: impl Into<String>,
        model: Rc<dyn ChatModel>,
        history: HistoryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            conversation: Conversation::new(system_primer),
            model,
            history,
            call_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transcript(&self) -> &Conversation {
        &self.conversation
    }

    /// Send `text` as the next user turn and return the model's reply.
    #[instrument(skip_all, fields(role = %self.name))]
    pub fn respond(
        &mut self,
        text: &str,
        usage: &mut UsageLedger,
        deadline: Instant,
    ) -> Result<String> {
        self.conversation.push_user(text);
        let timeout = call_budget(deadline, self.call_timeout)?;
        let reply = self
            .model
            .complete(&self.conversation.view(self.history), timeout)
            .with_context(|| format!("{} inference call", self.name))?;
        self.conversation.push_assistant(reply.content.as_str());
        let call = usage.record(&self.name, reply.usage);
        debug!(call, chars = reply.content.len(), "assistant replied");
        Ok(reply.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::history::TurnRole;
    use crate::test_support::ScriptedModel;

    #[test]
    fn respond_appends_both_turns_and_counts_usage() {
        let model = Rc::new(ScriptedModel::new(["plan: check logs"]));
        let mut planner = Assistant::new(
            "planner",
            "primer",
            model.clone(),
            HistoryPolicy::Unbounded,
            Duration::from_secs(5),
        );
        let mut usage = UsageLedger::default();

        let reply = planner
            .respond("why is it slow", &mut usage, Instant::now() + Duration::from_secs(5))
            .expect("respond");

        assert_eq!(reply, "plan: check logs");
        let roles: Vec<TurnRole> = planner.transcript().turns().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![TurnRole::System, TurnRole::User, TurnRole::Assistant]
        );
        assert_eq!(usage.get("planner").calls, 1);
        assert_eq!(model.requests()[0].len(), 2);
    }

    #[test]
    fn windowed_history_limits_what_is_sent() {
        let model = Rc::new(ScriptedModel::new(["a", "b", "c"]));
        let mut explorer = Assistant::new(
            "log_explorer",
            "primer",
            model.clone(),
            HistoryPolicy::Window { max_turns: 1 },
            Duration::from_secs(5),
        );
        let mut usage = UsageLedger::default();
        let deadline = Instant::now() + Duration::from_secs(5);
        for text in ["one", "two", "three"] {
            explorer.respond(text, &mut usage, deadline).expect("respond");
        }

        let last = model.requests().pop().expect("request");
        assert_eq!(last.len(), 2);
        assert_eq!(last[1].content, "three");
        assert_eq!(explorer.transcript().len(), 7);
    }
}
