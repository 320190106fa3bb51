//! Bounded conversation history for one chat session.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message in the chat-completion wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Persona turn followed by at most `2 * max_history` user/assistant turns.
///
/// The persona turn lives outside the turn list, so nothing that edits the
/// list can remove it or move it out of first place.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationHistory {
    system: ChatTurn,
    turns: Vec<ChatTurn>,
    max_history: usize,
}

impl ConversationHistory {
    pub fn new(system_prompt: impl Into<String>, max_history: usize) -> Self {
        Self {
            system: ChatTurn::system(system_prompt),
            turns: Vec::new(),
            max_history,
        }
    }

    /// Largest length `len()` can report.
    pub fn capacity(&self) -> usize {
        2 * self.max_history + 1
    }

    /// Number of turns including the persona turn.
    pub fn len(&self) -> usize {
        self.turns.len() + 1
    }

    pub fn push(&mut self, turn: ChatTurn) {
        self.turns.push(turn);
        self.trim();
    }

    /// Drop the oldest turns beyond the window; the tail keeps its order.
    fn trim(&mut self) {
        let keep = 2 * self.max_history;
        if self.turns.len() > keep {
            let excess = self.turns.len() - keep;
            self.turns.drain(..excess);
        }
    }

    /// Full message list as sent to the chat-completion API.
    pub fn messages(&self) -> Vec<ChatTurn> {
        std::iter::once(self.system.clone())
            .chain(self.turns.iter().cloned())
            .collect()
    }
}
