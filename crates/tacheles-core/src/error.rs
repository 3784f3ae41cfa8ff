//! Common error types for tacheles.
//!
//! This module provides shared error types that are used across multiple crates.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur when building or validating domain values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A chat request can only be built from a user message.
    #[error("cannot send a {0} message to the chat endpoint")]
    NotAUserMessage(crate::message::Role),

    /// A chat request needs the conversation it belongs to.
    #[error("message is not bound to a conversation")]
    MissingConversation,
}
