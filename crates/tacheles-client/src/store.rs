//! The message list bound to the chat surface.
//!
//! All mutation goes through closures applied to the state current at the
//! time of application, never to a copy captured earlier. A stream that
//! resumes after a suspension point therefore sees any conversation switch
//! that happened in between.

use std::sync::Arc;

use parking_lot::RwLock;
use tacheles_core::{ConversationId, Message};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct StoreState {
    conversation: Option<ConversationId>,
    messages: Vec<Message>,
    revision: u64,
}

/// Shared handle to the displayed conversation.
#[derive(Debug, Clone)]
pub struct MessageStore {
    state: Arc<RwLock<StoreState>>,
    changes: Arc<watch::Sender<u64>>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    /// Create an empty, unbound store.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            changes: Arc::new(changes),
        }
    }

    /// Create a store bound to `conversation` holding `messages`.
    #[must_use]
    pub fn bound(conversation: ConversationId, messages: Vec<Message>) -> Self {
        let store = Self::new();
        store.bind(conversation, messages);
        store
    }

    /// Replace the displayed conversation.
    pub fn bind(&self, conversation: ConversationId, messages: Vec<Message>) {
        let mut state = self.state.write();
        state.conversation = Some(conversation);
        state.messages = messages;
        self.bump(&mut state);
    }

    /// Apply `f` to the current message list.
    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<Message>) -> R) -> R {
        let mut state = self.state.write();
        let result = f(&mut state.messages);
        self.bump(&mut state);
        result
    }

    /// Apply `f` only if the store still shows `conversation`.
    ///
    /// Returns `None` without calling `f` when another conversation (or none)
    /// is bound.
    pub fn update_if_bound<R>(
        &self,
        conversation: ConversationId,
        f: impl FnOnce(&mut Vec<Message>) -> R,
    ) -> Option<R> {
        let mut state = self.state.write();
        if state.conversation != Some(conversation) {
            return None;
        }
        let result = f(&mut state.messages);
        self.bump(&mut state);
        Some(result)
    }

    /// Like [`update_if_bound`](Self::update_if_bound), but `f` reports
    /// whether it wrote anything.
    ///
    /// The revision only moves when `f` returns `true`.
    pub fn try_update_if_bound(
        &self,
        conversation: ConversationId,
        f: impl FnOnce(&mut Vec<Message>) -> bool,
    ) -> Option<bool> {
        let mut state = self.state.write();
        if state.conversation != Some(conversation) {
            return None;
        }
        let written = f(&mut state.messages);
        if written {
            self.bump(&mut state);
        }
        Some(written)
    }

    /// Copy of the current message list.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.state.read().messages.clone()
    }

    /// Number of messages currently shown.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().messages.len()
    }

    /// Whether no messages are shown.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().messages.is_empty()
    }

    /// Conversation currently shown.
    #[must_use]
    pub fn bound_conversation(&self) -> Option<ConversationId> {
        self.state.read().conversation
    }

    /// Counter bumped on every mutation.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    /// Receiver that observes every new revision.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn bump(&self, state: &mut StoreState) {
        state.revision += 1;
        self.changes.send_replace(state.revision);
    }
}
