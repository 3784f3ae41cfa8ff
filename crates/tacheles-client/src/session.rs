//! Per-send stream sessions and the chat surface that owns them.
//!
//! A [`StreamSession`] lives for exactly one send. The [`ChatSurface`] holds
//! at most one active session at a time, the cancellation handle for it, and
//! the transient error shown to the user.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tacheles_core::{ConversationId, StreamKey};
use tokio_util::sync::CancellationToken;

/// Lifecycle of one stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing sent yet.
    Idle,
    /// Request dispatched, waiting for the first byte.
    Sending,
    /// Receiving fragments.
    Streaming,
    /// The backend closed the stream normally.
    Completed,
    /// Stopped on purpose (conversation switch, new conversation, teardown).
    Cancelled,
    /// Ended by an error that was reported to the user.
    Failed,
}

impl SessionState {
    /// Whether the session has ended.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Cancellation handle for an active session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    key: StreamKey,
    conversation: ConversationId,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Key of the session.
    #[must_use]
    pub fn key(&self) -> StreamKey {
        self.key
    }

    /// Conversation the session writes into.
    #[must_use]
    pub fn conversation(&self) -> ConversationId {
        self.conversation
    }

    /// Stop the session. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the session has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// State of one send-and-stream cycle.
#[derive(Debug)]
pub struct StreamSession {
    handle: SessionHandle,
    accumulated: String,
    state: SessionState,
}

impl StreamSession {
    fn new(key: StreamKey, conversation: ConversationId) -> Self {
        Self {
            handle: SessionHandle {
                key,
                conversation,
                cancel: CancellationToken::new(),
            },
            accumulated: String::new(),
            state: SessionState::Idle,
        }
    }

    /// Key of the session.
    #[must_use]
    pub fn key(&self) -> StreamKey {
        self.handle.key
    }

    /// Conversation the session writes into.
    #[must_use]
    pub fn conversation(&self) -> ConversationId {
        self.handle.conversation
    }

    /// Token handed to the transport.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.handle.cancel.clone()
    }

    /// Whether the session has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Text received so far.
    #[must_use]
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Append a fragment and return the full text so far.
    pub fn append(&mut self, fragment: &str) -> &str {
        self.accumulated.push_str(fragment);
        &self.accumulated
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`.
    pub fn transition(&mut self, next: SessionState) {
        tracing::debug!(
            stream = %self.handle.key,
            conversation_id = %self.handle.conversation,
            from = ?self.state,
            to = ?next,
            "Stream session transition"
        );
        self.state = next;
    }
}

/// Per-surface send state.
#[derive(Debug, Default)]
pub struct ChatSurface {
    active: Mutex<Option<SessionHandle>>,
    error: Mutex<Option<String>>,
    next_key: AtomicU64,
}

impl ChatSurface {
    /// Create an idle surface.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the surface for a new session bound to `conversation`.
    ///
    /// Returns `None` if a session is already active.
    pub fn begin(&self, conversation: ConversationId) -> Option<StreamSession> {
        let mut active = self.active.lock();
        if active.is_some() {
            return None;
        }
        let key = StreamKey::new(self.next_key.fetch_add(1, Ordering::Relaxed) + 1);
        let session = StreamSession::new(key, conversation);
        *active = Some(session.handle.clone());
        Some(session)
    }

    /// Release the surface if `key` still holds it.
    pub fn release(&self, key: StreamKey) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|handle| handle.key == key) {
            *active = None;
        }
    }

    /// Whether a send is in progress (the send trigger is disabled).
    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Handle of the active session, if any.
    #[must_use]
    pub fn active_session(&self) -> Option<SessionHandle> {
        self.active.lock().clone()
    }

    /// Cancel the active session, if any. Returns whether one was cancelled.
    pub fn cancel_active(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(handle) => {
                tracing::debug!(stream = %handle.key, "Cancelling active stream");
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel the active session unless it writes into `conversation`.
    pub fn cancel_unless(&self, conversation: ConversationId) -> bool {
        match self.active.lock().as_ref() {
            Some(handle) if handle.conversation != conversation => {
                tracing::debug!(
                    stream = %handle.key,
                    from = %handle.conversation,
                    to = %conversation,
                    "Cancelling stream for conversation switch"
                );
                handle.cancel();
                true
            }
            _ => false,
        }
    }

    /// Error currently shown to the user.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    /// Show an error to the user.
    pub fn set_error(&self, message: impl Into<String>) {
        *self.error.lock() = Some(message.into());
    }

    /// Dismiss the error.
    pub fn clear_error(&self) {
        *self.error.lock() = None;
    }
}
