//! Seams between the streaming core and the backend.
//!
//! The core never talks HTTP directly. It opens chat streams through
//! [`Transport`] and loads conversations through [`ConversationApi`], so tests
//! can substitute in-memory implementations.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use tacheles_core::{ChatRequest, Conversation, ConversationId, ConversationSummary, Message, UserId};
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, StreamError};

/// Raw response body of a chat request, in arrival order.
pub type ByteStream = BoxStream<'static, Result<Bytes, StreamError>>;

/// Opens streamed chat responses.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return the response body as a byte stream.
    ///
    /// Once `cancel` fires, dispatch is abandoned and every later read on the
    /// returned stream yields [`StreamError::Cancelled`] and then ends.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Transport`] if the request fails or the backend
    /// answers with a non-success status, and [`StreamError::Cancelled`] if the
    /// token fires before the response arrives.
    async fn open_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, StreamError>;
}

/// Conversation bookkeeping calls.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    /// Register a new user.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn new_user(&self) -> Result<UserId, ClientError>;

    /// Start a new conversation for `user`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn new_conversation(&self, user: UserId) -> Result<Conversation, ClientError>;

    /// List the conversations of `user`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn list_conversations(&self, user: UserId)
        -> Result<Vec<ConversationSummary>, ClientError>;

    /// Load the messages of a conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn conversation_messages(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<Message>, ClientError>;
}

/// Make `inner` stop as soon as `cancel` fires.
///
/// The first poll after cancellation yields [`StreamError::Cancelled`] and
/// drops `inner`; the stream is finished afterwards.
pub fn cancellable<S>(inner: S, cancel: CancellationToken) -> ByteStream
where
    S: Stream<Item = Result<Bytes, StreamError>> + Send + 'static,
{
    futures::stream::unfold(Some((Box::pin(inner), cancel)), |state| async move {
        let (mut inner, cancel) = state?;
        tokio::select! {
            biased;
            () = cancel.cancelled() => Some((Err(StreamError::Cancelled), None)),
            item = inner.next() => item.map(|item| (item, Some((inner, cancel)))),
        }
    })
    .boxed()
}
