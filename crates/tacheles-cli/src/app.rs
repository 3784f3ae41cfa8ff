//! Application state.
//!
//! The conversation controller owns everything that talks to the backend.
//! `App` adds the purely local state of the terminal UI: list cursor, input
//! line, focus and status text.

use tacheles_client::{ClientError, ConversationController, SendOutcome};
use tacheles_core::{ConversationId, ConversationSummary, Message};
use tokio::sync::mpsc;

/// Label of the list entry that starts a new conversation.
pub const NEW_CONVERSATION_LABEL: &str = "New Conversation";

/// Events produced by background tasks.
#[derive(Debug)]
pub enum AppEvent {
    /// A send task finished.
    SendFinished {
        /// The text that was sent.
        text: String,
        /// What the controller did with it.
        result: Result<SendOutcome, ClientError>,
    },
}

/// Which UI column has focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    /// Left column: conversation list.
    Conversations,
    /// Right column: chat and input.
    #[default]
    Chat,
}

impl Focus {
    /// Toggle to the other column.
    #[must_use]
    pub const fn toggle(self) -> Self {
        match self {
            Self::Conversations => Self::Chat,
            Self::Chat => Self::Conversations,
        }
    }
}

/// Entry of the conversation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEntry {
    /// An existing conversation.
    Conversation(ConversationId),
    /// The trailing "New Conversation" entry.
    New,
}

/// Application state.
pub struct App {
    controller: ConversationController,
    backend_url: String,
    /// Whether the backend answered the startup healthcheck.
    pub backend_reachable: bool,
    /// Conversations as last loaded by the controller.
    pub conversations: Vec<ConversationSummary>,
    /// Cursor in the conversation list (the last index is "New Conversation").
    pub list_cursor: usize,
    /// Current input buffer.
    pub input: String,
    /// Cursor position in input, in characters.
    pub cursor_position: usize,
    /// Which column has focus.
    pub focus: Focus,
    /// Chat scroll position, in lines from the bottom.
    pub chat_scroll: usize,
    /// Status message to display.
    pub status_message: Option<String>,
    /// Whether the app should quit.
    pub should_quit: bool,
    /// Animation frame counter for the sending indicator.
    pub animation_frame: usize,
    last_revision: u64,
}

impl App {
    /// Create a new application.
    #[must_use]
    pub fn new(controller: ConversationController, backend_url: impl Into<String>) -> Self {
        Self {
            controller,
            backend_url: backend_url.into(),
            backend_reachable: true,
            conversations: Vec::new(),
            list_cursor: 0,
            input: String::new(),
            cursor_position: 0,
            focus: Focus::default(),
            chat_scroll: 0,
            status_message: None,
            should_quit: false,
            animation_frame: 0,
            last_revision: 0,
        }
    }

    /// The conversation controller.
    #[must_use]
    pub fn controller(&self) -> &ConversationController {
        &self.controller
    }

    /// Backend URL for display.
    #[must_use]
    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    /// Tick the animation frame (call on each render).
    pub fn tick_animation(&mut self) {
        self.animation_frame = self.animation_frame.wrapping_add(1);
    }

    /// Get current spinner character for the sending indicator.
    #[must_use]
    pub fn spinner_char(&self) -> &'static str {
        const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
        SPINNER[self.animation_frame % SPINNER.len()]
    }

    /// Messages of the shown conversation.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.controller.store().snapshot()
    }

    /// Whether a reply is being streamed.
    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.controller.surface().is_sending()
    }

    /// Error to show, streaming errors first.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.controller
            .surface()
            .error()
            .or_else(|| self.controller.error())
    }

    /// Dismiss any shown error.
    pub fn clear_error(&self) {
        self.controller.surface().clear_error();
        self.controller.clear_error();
    }

    /// Set the status message.
    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
    }

    /// Whether the message list changed since the last call.
    pub fn take_store_change(&mut self) -> bool {
        let revision = self.controller.store().revision();
        if revision == self.last_revision {
            return false;
        }
        self.last_revision = revision;
        self.chat_scroll = 0;
        true
    }

    // =========================================================================
    // Conversation List
    // =========================================================================

    /// Copy the controller's conversation list and move the cursor onto the
    /// shown conversation.
    pub fn sync_conversations(&mut self) {
        self.conversations = self.controller.conversations();
        let current = self.controller.current_conversation();
        self.list_cursor = self
            .conversations
            .iter()
            .position(|c| Some(c.id) == current)
            .unwrap_or_else(|| self.list_cursor.min(self.conversations.len()));
    }

    /// Number of list entries, including "New Conversation".
    #[must_use]
    pub fn list_len(&self) -> usize {
        self.conversations.len() + 1
    }

    /// Entry under the list cursor.
    #[must_use]
    pub fn selected_entry(&self) -> ListEntry {
        self.conversations
            .get(self.list_cursor)
            .map_or(ListEntry::New, |c| ListEntry::Conversation(c.id))
    }

    /// Move the list cursor up.
    pub fn select_prev(&mut self) {
        self.list_cursor = match self.list_cursor {
            0 => self.list_len() - 1,
            i => i - 1,
        };
    }

    /// Move the list cursor down.
    pub fn select_next(&mut self) {
        self.list_cursor = if self.list_cursor + 1 >= self.list_len() {
            0
        } else {
            self.list_cursor + 1
        };
    }

    /// Open the entry under the list cursor.
    ///
    /// # Errors
    ///
    /// Returns the backend error; the controller also keeps it for display.
    pub async fn activate_selected(&mut self) -> Result<(), ClientError> {
        match self.selected_entry() {
            ListEntry::Conversation(id) => {
                self.controller.select_conversation(id).await?;
                self.sync_conversations();
                self.focus = Focus::Chat;
                Ok(())
            }
            ListEntry::New => self.new_conversation().await,
        }
    }

    /// Start a new conversation and focus the input.
    ///
    /// # Errors
    ///
    /// Returns the backend error; the controller also keeps it for display.
    pub async fn new_conversation(&mut self) -> Result<(), ClientError> {
        let id = self.controller.new_conversation().await?;
        self.sync_conversations();
        self.focus = Focus::Chat;
        self.set_status(format!("Started conversation {id}"));
        Ok(())
    }

    // =========================================================================
    // Input Handling
    // =========================================================================

    fn byte_index(&self, chars: usize) -> usize {
        self.input
            .char_indices()
            .nth(chars)
            .map_or(self.input.len(), |(i, _)| i)
    }

    fn input_chars(&self) -> usize {
        self.input.chars().count()
    }

    /// Insert a character at the cursor position.
    pub fn insert_char(&mut self, c: char) {
        let index = self.byte_index(self.cursor_position);
        self.input.insert(index, c);
        self.cursor_position += 1;
    }

    /// Delete the character before the cursor.
    pub fn delete_char(&mut self) {
        if self.cursor_position > 0 {
            self.cursor_position -= 1;
            let index = self.byte_index(self.cursor_position);
            self.input.remove(index);
        }
    }

    /// Delete the character at the cursor.
    pub fn delete_char_forward(&mut self) {
        if self.cursor_position < self.input_chars() {
            let index = self.byte_index(self.cursor_position);
            self.input.remove(index);
        }
    }

    /// Delete back to the previous space.
    pub fn delete_word(&mut self) {
        while self.cursor_position > 0 {
            self.delete_char();
            let previous = self
                .cursor_position
                .checked_sub(1)
                .and_then(|i| self.input.chars().nth(i));
            if previous == Some(' ') {
                break;
            }
        }
    }

    /// Move cursor left.
    pub fn move_cursor_left(&mut self) {
        self.cursor_position = self.cursor_position.saturating_sub(1);
    }

    /// Move cursor right.
    pub fn move_cursor_right(&mut self) {
        if self.cursor_position < self.input_chars() {
            self.cursor_position += 1;
        }
    }

    /// Move cursor to the start.
    pub fn move_cursor_start(&mut self) {
        self.cursor_position = 0;
    }

    /// Move cursor to the end.
    pub fn move_cursor_end(&mut self) {
        self.cursor_position = self.input_chars();
    }

    /// Clear the input.
    pub fn clear_input(&mut self) {
        self.input.clear();
        self.cursor_position = 0;
    }

    /// Take the current input (clears it).
    pub fn take_input(&mut self) -> String {
        let input = std::mem::take(&mut self.input);
        self.cursor_position = 0;
        input
    }

    // =========================================================================
    // Chat
    // =========================================================================

    /// Send the input line on a background task.
    ///
    /// Returns `false` (and keeps the input) when the input is blank or a
    /// reply is still streaming.
    pub fn submit(&mut self, events: &mpsc::UnboundedSender<AppEvent>) -> bool {
        if self.input.trim().is_empty() || self.is_sending() {
            return false;
        }

        let text = self.take_input();
        let controller = self.controller.clone();
        let events = events.clone();
        self.status_message = None;
        self.chat_scroll = 0;

        tokio::spawn(async move {
            let result = controller.send(&text).await;
            let _ = events.send(AppEvent::SendFinished { text, result });
        });
        true
    }

    /// Apply an event from a background task.
    pub fn handle_event(&mut self, event: AppEvent) {
        let AppEvent::SendFinished { text, result } = event;
        match result {
            Ok(SendOutcome::Cancelled) => self.set_status("Request aborted"),
            Ok(SendOutcome::Busy) => {
                self.restore_input(text);
                self.set_status("Still waiting for the previous reply");
            }
            Ok(SendOutcome::Completed | SendOutcome::Skipped | SendOutcome::Failed(_)) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Send rejected");
                self.restore_input(text);
                self.set_status(format!("Cannot send: {e}"));
            }
        }
    }

    /// Put text that was never sent back into an empty input line.
    fn restore_input(&mut self, text: String) {
        if self.input.is_empty() {
            self.cursor_position = text.chars().count();
            self.input = text;
        }
    }

    /// Esc: cancel the active stream, else dismiss the error, else move focus
    /// to the conversation list.
    pub fn cancel_or_dismiss(&mut self) {
        if self.controller.surface().cancel_active() {
            self.set_status("Cancelling...");
        } else if self.error().is_some() {
            self.clear_error();
        } else {
            self.focus = Focus::Conversations;
        }
    }

    /// Scroll chat up (view older messages).
    pub fn scroll_chat_up(&mut self, amount: usize) {
        self.chat_scroll = self.chat_scroll.saturating_add(amount);
    }

    /// Scroll chat down (view newer messages).
    pub fn scroll_chat_down(&mut self, amount: usize) {
        self.chat_scroll = self.chat_scroll.saturating_sub(amount);
    }

    /// Quit, cancelling any in-flight stream.
    pub fn quit(&mut self) {
        self.controller.unmount();
        self.should_quit = true;
    }
}
