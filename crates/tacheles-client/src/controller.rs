//! Conversation session controller.
//!
//! Owns the user session and the conversation list, decides which
//! conversation the chat surface shows, and cancels in-flight streams when
//! the shown conversation changes or the surface goes away.

use std::sync::Arc;

use parking_lot::Mutex;
use tacheles_core::{ConversationId, ConversationSummary, UserId};

use crate::api::BackendClient;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::reconciler::{SendOutcome, StreamingReconciler};
use crate::session::ChatSurface;
use crate::store::MessageStore;
use crate::transport::{ConversationApi, Transport};

/// Session setup progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    /// Nothing has been set up yet.
    Uninitialized,
    /// Setup is running.
    Initializing,
    /// A user and a conversation exist.
    Ready,
    /// Setup failed with the given user-facing message.
    Failed(String),
}

#[derive(Debug)]
struct ControllerState {
    init: InitState,
    user: Option<UserId>,
    conversations: Vec<ConversationSummary>,
    selected: Option<ConversationId>,
    loading: Option<ConversationId>,
    error: Option<String>,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            init: InitState::Uninitialized,
            user: None,
            conversations: Vec::new(),
            selected: None,
            loading: None,
            error: None,
        }
    }
}

/// Drives the user session and the conversation shown on one chat surface.
#[derive(Clone)]
pub struct ConversationController {
    api: Arc<dyn ConversationApi>,
    reconciler: StreamingReconciler,
    state: Arc<Mutex<ControllerState>>,
}

impl std::fmt::Debug for ConversationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationController")
            .field("reconciler", &self.reconciler)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ConversationController {
    /// Create a controller over explicit collaborators.
    #[must_use]
    pub fn new(
        api: Arc<dyn ConversationApi>,
        transport: Arc<dyn Transport>,
        max_stream_reads: u64,
    ) -> Self {
        let reconciler = StreamingReconciler::new(
            transport,
            MessageStore::new(),
            Arc::new(ChatSurface::new()),
            max_stream_reads,
        );
        Self {
            api,
            reconciler,
            state: Arc::new(Mutex::new(ControllerState::default())),
        }
    }

    /// Create a controller talking to the backend described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = Arc::new(BackendClient::new(config)?);
        Ok(Self::new(
            client.clone(),
            client,
            config.max_stream_reads,
        ))
    }

    /// Set up the user session: new user, new conversation, list refresh.
    ///
    /// Only the first call does anything; later calls (including concurrent
    /// ones) return immediately.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the setup. It is also stored in the
    /// controller's error slot.
    pub async fn initialize(&self) -> Result<(), ClientError> {
        {
            let mut state = self.state.lock();
            if state.init != InitState::Uninitialized {
                tracing::debug!(state = ?state.init, "Session already initialized");
                return Ok(());
            }
            state.init = InitState::Initializing;
        }

        match self.setup().await {
            Ok(()) => {
                self.state.lock().init = InitState::Ready;
                Ok(())
            }
            Err(e) => {
                let message = e.user_message();
                tracing::error!(error = %e, "Session setup failed");
                let mut state = self.state.lock();
                state.init = InitState::Failed(message.clone());
                state.error = Some(message);
                Err(e)
            }
        }
    }

    async fn setup(&self) -> Result<(), ClientError> {
        let user = self.api.new_user().await?;
        self.state.lock().user = Some(user);

        let conversation = self.api.new_conversation(user).await?;
        tracing::info!(user_id = %user, conversation_id = %conversation.id, "Session ready");
        self.show(conversation.id, conversation.messages);

        // A list failure is reported but does not undo the session.
        let _ = self.refresh_conversations().await;
        Ok(())
    }

    /// Show `conversation`.
    ///
    /// Does nothing if it is already shown. Otherwise cancels any stream
    /// writing into another conversation, loads the history and binds it.
    /// On failure the previous conversation stays shown.
    ///
    /// # Errors
    ///
    /// Returns the load error, also stored in the controller's error slot.
    pub async fn select_conversation(&self, conversation: ConversationId) -> Result<(), ClientError> {
        {
            let mut state = self.state.lock();
            if state.selected == Some(conversation) {
                // Going back to the shown conversation supersedes any load.
                state.loading = None;
                return Ok(());
            }
            state.loading = Some(conversation);
        }
        self.surface().cancel_unless(conversation);

        let messages = match self.api.conversation_messages(conversation).await {
            Ok(messages) => messages,
            Err(e) => {
                let mut state = self.state.lock();
                if state.loading == Some(conversation) {
                    state.loading = None;
                }
                drop(state);
                return Err(self.record(e));
            }
        };

        {
            let mut state = self.state.lock();
            if state.loading != Some(conversation) {
                tracing::debug!(conversation_id = %conversation, "Discarding superseded history load");
                return Ok(());
            }
            state.loading = None;
        }
        tracing::debug!(conversation_id = %conversation, count = messages.len(), "Conversation loaded");
        self.show(conversation, messages);
        Ok(())
    }

    /// Start a new conversation and show it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotInitialized`] before setup, or the backend
    /// error. Both are stored in the controller's error slot.
    pub async fn new_conversation(&self) -> Result<ConversationId, ClientError> {
        let user = self.require_user()?;
        self.surface().cancel_active();

        let conversation = match self.api.new_conversation(user).await {
            Ok(conversation) => conversation,
            Err(e) => return Err(self.record(e)),
        };
        tracing::info!(conversation_id = %conversation.id, "Started new conversation");
        self.state.lock().loading = None;
        self.show(conversation.id, conversation.messages);

        let _ = self.refresh_conversations().await;
        Ok(conversation.id)
    }

    /// Reload the conversation list for the current user.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotInitialized`] before setup, or the backend
    /// error. Both are stored in the controller's error slot.
    pub async fn refresh_conversations(&self) -> Result<(), ClientError> {
        let user = self.require_user()?;
        match self.api.list_conversations(user).await {
            Ok(conversations) => {
                tracing::debug!(count = conversations.len(), "Conversation list refreshed");
                self.state.lock().conversations = conversations;
                Ok(())
            }
            Err(e) => Err(self.record(e)),
        }
    }

    /// Send `text` to the shown conversation and stream the reply.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotInitialized`] when no conversation is shown.
    /// Streaming failures are not errors here; see [`SendOutcome`].
    pub async fn send(&self, text: &str) -> Result<SendOutcome, ClientError> {
        let conversation = self
            .current_conversation()
            .ok_or(ClientError::NotInitialized)?;
        Ok(self.reconciler.send_and_stream(text, conversation).await)
    }

    /// Tear down the surface: cancel any in-flight stream.
    pub fn unmount(&self) {
        if self.surface().cancel_active() {
            tracing::info!("Cancelled in-flight stream on unmount");
        }
    }

    /// Setup progress.
    #[must_use]
    pub fn init_state(&self) -> InitState {
        self.state.lock().init.clone()
    }

    /// Current user, once set up.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.state.lock().user
    }

    /// Conversation shown on the chat surface.
    #[must_use]
    pub fn current_conversation(&self) -> Option<ConversationId> {
        self.state.lock().selected
    }

    /// Last loaded conversation list.
    #[must_use]
    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.state.lock().conversations.clone()
    }

    /// Whether a history load is in progress.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.lock().loading.is_some()
    }

    /// Last controller error, as shown to the user.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    /// Dismiss the controller error.
    pub fn clear_error(&self) {
        self.state.lock().error = None;
    }

    /// The streaming reconciler of the chat surface.
    #[must_use]
    pub fn reconciler(&self) -> &StreamingReconciler {
        &self.reconciler
    }

    /// The message list of the chat surface.
    #[must_use]
    pub fn store(&self) -> &MessageStore {
        self.reconciler.store()
    }

    /// Send state of the chat surface.
    #[must_use]
    pub fn surface(&self) -> &Arc<ChatSurface> {
        self.reconciler.surface()
    }

    fn show(&self, conversation: ConversationId, messages: Vec<tacheles_core::Message>) {
        let mut state = self.state.lock();
        state.selected = Some(conversation);
        self.store().bind(conversation, messages);
    }

    fn require_user(&self) -> Result<UserId, ClientError> {
        self.state.lock().user.ok_or(ClientError::NotInitialized)
    }

    fn record(&self, error: ClientError) -> ClientError {
        tracing::error!(error = %error, endpoint = ?error.endpoint(), "Backend request failed");
        self.state.lock().error = Some(error.user_message());
        error
    }
}
