//! Conversation history with a fixed window.
//!
//! The agent never sees more than `history_window` prior turns, however long
//! the conversation grows. The host owns the full history; the core only
//! borrows the tail of it.

use crate::Message;
use serde::{Deserialize, Serialize};

/// One completed exchange: what the user asked and what the assistant answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
}

impl ConversationTurn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

/// The last `window` turns of `history`.
pub fn windowed(history: &[ConversationTurn], window: usize) -> &[ConversationTurn] {
    let start = history.len().saturating_sub(window);
    &history[start..]
}

/// Render the last `window` turns as alternating user/assistant messages.
pub fn history_messages(history: &[ConversationTurn], window: usize) -> Vec<Message> {
    windowed(history, window)
        .iter()
        .flat_map(|turn| {
            [
                Message::user(turn.user.clone()),
                Message::assistant_text(turn.assistant.clone()),
            ]
        })
        .collect()
}

/// Compact plain-text rendering of the last `window` turns, for prompts
/// that take history as context rather than as messages.
pub fn history_summary(history: &[ConversationTurn], window: usize, max_chars: usize) -> String {
    let mut out = String::new();
    for turn in windowed(history, window) {
        let user: String = turn.user.chars().take(max_chars).collect();
        let assistant: String = turn.assistant.chars().take(max_chars).collect();
        out.push_str(&format!("User: {user}\nAssistant: {assistant}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageRole;

    fn turns(n: usize) -> Vec<ConversationTurn> {
        (0..n)
            .map(|i| ConversationTurn::new(format!("q{i}"), format!("a{i}")))
            .collect()
    }

    #[test]
    fn window_keeps_most_recent_turns() {
        let history = turns(5);
        let w = windowed(&history, 2);
        assert_eq!(w.len(), 2);
        assert_eq!(w[0].user, "q3");
        assert_eq!(windowed(&history, 10).len(), 5);
        assert!(windowed(&history, 0).is_empty());
    }

    #[test]
    fn messages_alternate_roles() {
        let msgs = history_messages(&turns(3), 2);
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].role, MessageRole::User);
        assert_eq!(msgs[1].role, MessageRole::Assistant);
        assert_eq!(msgs[3].content.as_deref(), Some("a2"));
    }

    #[test]
    fn summary_truncates_long_turns() {
        let history = vec![ConversationTurn::new("x".repeat(50), "short")];
        let summary = history_summary(&history, 5, 10);
        assert!(summary.contains(&format!("User: {}\n", "x".repeat(10))));
        assert!(summary.contains("Assistant: short"));
    }
}
