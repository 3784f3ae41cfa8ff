//! Chat message model.
//!
//! These types mirror the JSON shapes of the tacheles backend API.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{ConversationId, StreamKey, UserId};

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Typed by the person using the client.
    User,
    /// Produced by the model.
    Assistant,
    /// Prompt scaffolding; only ever seen when loading history.
    System,
}

impl Role {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who wrote the message.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Conversation the message belongs to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// Stream session that produced this message (assistant messages only).
    #[serde(skip)]
    pub stream_key: Option<StreamKey>,
}

impl Message {
    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            conversation_id: None,
            stream_key: None,
        }
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            conversation_id: None,
            stream_key: None,
        }
    }

    /// Attach the conversation this message belongs to.
    #[must_use]
    pub fn in_conversation(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    /// Tag the message as produced by a stream session.
    #[must_use]
    pub fn from_stream(mut self, key: StreamKey) -> Self {
        self.stream_key = Some(key);
        self
    }

    /// Check if this is a user message.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    /// Check if this is an assistant message.
    #[must_use]
    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

/// A conversation together with its messages.
///
/// Returned by `/api/new_conversation`; the message list is usually empty but
/// the backend may seed it with a greeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation ID.
    pub id: ConversationId,
    /// Messages, oldest first.
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Entry of the conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation ID.
    pub id: ConversationId,
    /// Owner of the conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

impl ConversationSummary {
    /// Menu label shown in the conversation list.
    #[must_use]
    pub fn label(&self) -> String {
        format!("Conversation {}", self.id)
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Always [`Role::User`].
    pub role: Role,
    /// The user's text.
    pub content: String,
    /// Conversation the text is appended to.
    pub conversation_id: ConversationId,
}

impl ChatRequest {
    /// Build a request for `content` in `conversation_id`.
    #[must_use]
    pub fn new(content: impl Into<String>, conversation_id: ConversationId) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            conversation_id,
        }
    }

    /// Build the request that sends an already displayed user message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is not a user message or is not bound
    /// to a conversation.
    pub fn from_message(message: &Message) -> Result<Self, CoreError> {
        if !message.is_user() {
            return Err(CoreError::NotAUserMessage(message.role));
        }
        let conversation_id = message
            .conversation_id
            .ok_or(CoreError::MissingConversation)?;
        Ok(Self::new(message.content.clone(), conversation_id))
    }
}
