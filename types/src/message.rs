//! Core message domain model.
//!
//! Contains the `Message` sum type and its role-specific structs.

use serde::{Deserialize, Serialize};

use crate::{EmptyStringError, NonEmptyString, ToolCall, ToolResult};

/// Wire role of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMessage {
    content: NonEmptyString,
}

impl SystemMessage {
    #[must_use]
    pub fn new(content: NonEmptyString) -> Self {
        Self { content }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        self.content.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    content: NonEmptyString,
}

impl UserMessage {
    #[must_use]
    pub fn new(content: NonEmptyString) -> Self {
        Self { content }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        self.content.as_str()
    }
}

/// Assistant output for one model call.
///
/// Text may be empty only when the message carries tool calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCall>,
}

impl AssistantMessage {
    pub fn new(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Result<Self, EmptyStringError> {
        let content = content.into();
        if content.trim().is_empty() && tool_calls.is_empty() {
            return Err(EmptyStringError);
        }
        Ok(Self {
            content,
            tool_calls,
        })
    }

    #[must_use]
    pub fn text(content: NonEmptyString) -> Self {
        Self {
            content: content.into_inner(),
            tool_calls: Vec::new(),
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }
}

/// A complete message.
///
/// This is a real sum type (not a `Role` tag + "sometimes-meaningful" fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    System(SystemMessage),
    User(UserMessage),
    Assistant(AssistantMessage),
    /// The result of a tool call, answering exactly one assistant tool call.
    Tool(ToolResult),
}

impl Message {
    #[must_use]
    pub fn system(content: NonEmptyString) -> Self {
        Self::System(SystemMessage::new(content))
    }

    #[must_use]
    pub fn user(content: NonEmptyString) -> Self {
        Self::User(UserMessage::new(content))
    }

    pub fn try_user(content: impl Into<String>) -> Result<Self, EmptyStringError> {
        Ok(Self::user(NonEmptyString::new(content)?))
    }

    pub fn assistant(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Result<Self, EmptyStringError> {
        Ok(Self::Assistant(AssistantMessage::new(content, tool_calls)?))
    }

    /// Assistant message carrying at least one tool call; `content` may be empty.
    pub fn tool_use(
        content: impl Into<String>,
        first: ToolCall,
        rest: impl IntoIterator<Item = ToolCall>,
    ) -> Self {
        let mut tool_calls = vec![first];
        tool_calls.extend(rest);
        Self::Assistant(AssistantMessage {
            content: content.into(),
            tool_calls,
        })
    }

    #[must_use]
    pub fn tool_result(result: ToolResult) -> Self {
        Self::Tool(result)
    }

    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            Message::System(_) => Role::System,
            Message::User(_) => Role::User,
            Message::Assistant(_) => Role::Assistant,
            Message::Tool(_) => Role::Tool,
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Message::System(m) => m.content(),
            Message::User(m) => m.content(),
            Message::Assistant(m) => m.content(),
            Message::Tool(result) => &result.content,
        }
    }

    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant(m) => m.tool_calls(),
            _ => &[],
        }
    }

    #[must_use]
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Message::Tool(result) => Some(&result.tool_call_id),
            _ => None,
        }
    }

    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Message::Tool(result) => Some(&result.tool_name),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_tool_result(&self) -> bool {
        matches!(self, Message::Tool(_))
    }
}
