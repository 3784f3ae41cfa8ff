//! Core types for the tacheles chat client.
//!
//! This crate provides the foundational types shared by the client library and
//! the terminal UI:
//!
//! - **Identifiers**: Strongly-typed IDs for users and conversations
//! - **Messages**: The chat message model and the wire request for sending one
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use tacheles_core::{ChatRequest, ConversationId, Message};
//!
//! let conversation: ConversationId = "456".parse().unwrap();
//! let message = Message::user("Hello, how are you?").in_conversation(conversation);
//! let request = ChatRequest::from_message(&message).unwrap();
//!
//! assert_eq!(request.conversation_id, conversation);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod message;

pub use error::{CoreError, Result};
pub use ids::{ConversationId, IdError, StreamKey, UserId};
pub use message::{ChatRequest, Conversation, ConversationSummary, Message, Role};
