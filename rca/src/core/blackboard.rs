//! Shared latest-task/latest-response store used to enrich role messages.

use std::collections::BTreeMap;

const ENRICH_PREAMBLE: &str = "Here are the latest responses from other agents for your reference:";

/// Per-role latest task and latest response. Writes overwrite; no history.
///
/// Iteration order is the role name order, which keeps composed context
/// stable across runs.
#[derive(Debug, Clone, Default)]
pub struct Blackboard {
    tasks: BTreeMap<String, String>,
    responses: BTreeMap<String, String>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_task(&mut self, role: &str, text: impl Into<String>) {
        self.tasks.insert(role.to_string(), text.into());
    }

    pub fn record_response(&mut self, role: &str, text: impl Into<String>) {
        self.responses.insert(role.to_string(), text.into());
    }

    pub fn task(&self, role: &str) -> Option<&str> {
        self.tasks.get(role).map(String::as_str)
    }

    pub fn response(&self, role: &str) -> Option<&str> {
        self.responses.get(role).map(String::as_str)
    }

    /// All stored tasks, then all stored responses, skipping `excluding`.
    pub fn compose(&self, excluding: &str) -> String {
        let mut out = String::new();
        for (role, task) in self.tasks.iter().filter(|(r, _)| r.as_str() != excluding) {
            out.push_str(&format!("<{role}Task>\n{task}\n</{role}Task>\n\n"));
        }
        for (role, response) in self
            .responses
            .iter()
            .filter(|(r, _)| r.as_str() != excluding)
        {
            out.push_str(&format!(
                "<{role}Response>\n{response}\n</{role}Response>\n\n"
            ));
        }
        out
    }

    /// Append other roles' context to `message`, if there is any.
    pub fn enrich(&self, message: &str, role: &str) -> String {
        let context = self.compose(role);
        if context.is_empty() {
            return message.to_string();
        }
        format!("{message}\n\n{ENRICH_PREAMBLE}\n{context}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrich_without_context_is_identity() {
        let mut board = Blackboard::new();
        assert_eq!(board.enrich("hello", "a"), "hello");

        board.record_task("a", "own task");
        board.record_response("a", "own response");
        assert_eq!(board.enrich("hello", "a"), "hello");
    }

    #[test]
    fn enrich_excludes_own_blocks_and_includes_others() {
        let mut board = Blackboard::new();
        board.record_task("A", "task a");
        board.record_response("A", "resp a");
        board.record_task("B", "task b");
        board.record_response("C", "resp c");

        let enriched = board.enrich("msg", "A");
        assert!(enriched.starts_with("msg\n\n"));
        assert!(!enriched.contains("<ATask>"));
        assert!(!enriched.contains("<AResponse>"));
        assert!(enriched.contains("<BTask>\ntask b\n</BTask>"));
        assert!(enriched.contains("<CResponse>\nresp c\n</CResponse>"));
    }

    #[test]
    fn tasks_precede_responses_and_writes_overwrite() {
        let mut board = Blackboard::new();
        board.record_response("a", "first");
        board.record_response("a", "second");
        board.record_task("z", "task");

        let composed = board.compose("none");
        let task_pos = composed.find("<zTask>").expect("task block");
        let resp_pos = composed.find("<aResponse>").expect("response block");
        assert!(task_pos < resp_pos);
        assert!(!composed.contains("first"));
        assert_eq!(board.response("a"), Some("second"));
    }
}
