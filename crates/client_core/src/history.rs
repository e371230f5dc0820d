use std::collections::VecDeque;

use shared::domain::Message;

/// Messages retained per contact; older entries are evicted first.
pub const HISTORY_LIMIT: usize = 100;

/// Append-only, bounded message log for one contact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationHistory {
    messages: VecDeque<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the newest [`HISTORY_LIMIT`] entries of `messages`, in order.
    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut history = Self::new();
        for message in messages {
            history.append(message);
        }
        history
    }

    /// The single append-and-truncate primitive every mutation path uses.
    /// Returns the evicted entry when the cap was exceeded.
    pub fn append(&mut self, message: Message) -> Option<Message> {
        self.messages.push_back(message);
        if self.messages.len() > HISTORY_LIMIT {
            self.messages.pop_front()
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
