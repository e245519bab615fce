//! Append-only conversation history.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{Message, ToolCall};

/// Ordered message list that can only grow.
///
/// The sequence is the entire model context; nothing here allows removal or
/// in-place mutation of an appended message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Tool calls from the latest assistant tool-call message that have no result yet.
    ///
    /// Non-empty only when a turn stopped between appending the assistant message
    /// and answering every call in it.
    #[must_use]
    pub fn unanswered_tool_calls(&self) -> Vec<ToolCall> {
        let Some(index) = self
            .messages
            .iter()
            .rposition(|message| !message.tool_calls().is_empty())
        else {
            return Vec::new();
        };

        let answered: HashSet<&str> = self.messages[index + 1..]
            .iter()
            .filter_map(Message::tool_call_id)
            .collect();

        self.messages[index]
            .tool_calls()
            .iter()
            .filter(|call| !answered.contains(call.id.as_str()))
            .cloned()
            .collect()
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

impl From<Vec<Message>> for Transcript {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}
