//! Append-only conversation transcripts and the policy for what gets sent.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

/// Which stored turns are sent to the model on each call.
///
/// The stored transcript itself is never truncated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum HistoryPolicy {
    #[default]
    Unbounded,
    /// System primer plus the most recent `max_turns` turns.
    Window { max_turns: usize },
}

/// A transcript that starts with one system primer and only grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    turns: Vec<ChatTurn>,
}

impl Conversation {
    pub fn new(system_primer: impl Into<String>) -> Self {
        Self {
            turns: vec![ChatTurn::system(system_primer)],
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(ChatTurn::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(ChatTurn::assistant(content));
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Turns to send under `policy`.
    pub fn view(&self, policy: HistoryPolicy) -> Vec<ChatTurn> {
        match policy {
            HistoryPolicy::Unbounded => self.turns.clone(),
            HistoryPolicy::Window { max_turns } => {
                let (primer, rest) = self.turns.split_at(1.min(self.turns.len()));
                let skip = rest.len().saturating_sub(max_turns);
                primer.iter().chain(&rest[skip..]).cloned().collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(turns: usize) -> Conversation {
        let mut conv = Conversation::new("primer");
        for i in 0..turns {
            if i % 2 == 0 {
                conv.push_user(format!("u{i}"));
            } else {
                conv.push_assistant(format!("a{i}"));
            }
        }
        conv
    }

    #[test]
    fn unbounded_view_is_whole_transcript() {
        let conv = conversation(6);
        assert_eq!(conv.view(HistoryPolicy::Unbounded), conv.turns());
    }

    #[test]
    fn window_keeps_primer_and_latest_turns() {
        let conv = conversation(6);
        let view = conv.view(HistoryPolicy::Window { max_turns: 2 });
        let contents: Vec<&str> = view.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["primer", "u4", "a5"]);
        assert_eq!(conv.len(), 7, "stored transcript is untouched");
    }

    #[test]
    fn window_larger_than_history_sends_everything() {
        let conv = conversation(2);
        assert_eq!(conv.view(HistoryPolicy::Window { max_turns: 10 }).len(), 3);
    }

    #[test]
    fn policy_parses_from_toml() {
        let policy: HistoryPolicy =
            toml::from_str("strategy = \"window\"\nmax_turns = 8").expect("parse");
        assert_eq!(policy, HistoryPolicy::Window { max_turns: 8 });
        let policy: HistoryPolicy = toml::from_str("strategy = \"unbounded\"").expect("parse");
        assert_eq!(policy, HistoryPolicy::Unbounded);
    }
}
