//! Send a user message and stream the reply into the message list.
//!
//! One call to [`StreamingReconciler::send_and_stream`] is one stream session:
//!
//! ```text
//! Idle -> Sending -> Streaming -> Completed | Cancelled | Failed
//! ```
//!
//! The user message is shown before any network activity. Every content
//! fragment then replaces the session's assistant bubble with the full text
//! received so far. Fragments are applied only while the session is not
//! cancelled and the store still shows the session's conversation, checked
//! under the store lock, so a stale stream can never write into another
//! conversation.

use std::sync::Arc;

use futures::StreamExt;
use tacheles_core::{ChatRequest, ConversationId, Message, StreamKey};

use crate::decoder::LineDecoder;
use crate::error::StreamError;
use crate::event::{parse_line, StreamEvent};
use crate::reconcile::reconcile;
use crate::session::{ChatSurface, SessionState, StreamSession};
use crate::store::MessageStore;
use crate::transport::{ByteStream, Transport};

/// Result of one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The input was empty; nothing happened.
    Skipped,
    /// Another send is still active; nothing happened.
    Busy,
    /// The reply was streamed completely.
    Completed,
    /// The session was cancelled; not reported to the user.
    Cancelled,
    /// The session failed; the message is also on the surface.
    Failed(String),
}

/// Releases the surface when the send ends, including when its future is
/// dropped mid-stream.
struct ActiveGuard<'a> {
    surface: &'a ChatSurface,
    key: StreamKey,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.surface.release(self.key);
    }
}

/// Drives stream sessions for one chat surface.
#[derive(Clone)]
pub struct StreamingReconciler {
    transport: Arc<dyn Transport>,
    store: MessageStore,
    surface: Arc<ChatSurface>,
    max_reads: u64,
}

impl std::fmt::Debug for StreamingReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingReconciler")
            .field("store", &self.store)
            .field("surface", &self.surface)
            .field("max_reads", &self.max_reads)
            .finish_non_exhaustive()
    }
}

impl StreamingReconciler {
    /// Create a reconciler writing into `store`.
    ///
    /// `max_reads` bounds the number of reads per stream; see
    /// [`ClientConfig::max_stream_reads`](crate::ClientConfig::max_stream_reads).
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        store: MessageStore,
        surface: Arc<ChatSurface>,
        max_reads: u64,
    ) -> Self {
        Self {
            transport,
            store,
            surface,
            max_reads,
        }
    }

    /// The message list this reconciler writes into.
    #[must_use]
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// The surface state shared with the UI and the controller.
    #[must_use]
    pub fn surface(&self) -> &Arc<ChatSurface> {
        &self.surface
    }

    /// Send `text` to `conversation` and stream the reply into the store.
    ///
    /// Errors never escape: a failure is stored on the surface and returned
    /// as [`SendOutcome::Failed`]; a cancellation is silent. Partial assistant
    /// text already shown stays in place.
    pub async fn send_and_stream(&self, text: &str, conversation: ConversationId) -> SendOutcome {
        if text.trim().is_empty() {
            return SendOutcome::Skipped;
        }

        let Some(mut session) = self.surface.begin(conversation) else {
            tracing::warn!(conversation_id = %conversation, "Send ignored, a stream is already active");
            return SendOutcome::Busy;
        };
        let _guard = ActiveGuard {
            surface: &self.surface,
            key: session.key(),
        };

        let user_message = Message::user(text).in_conversation(conversation);
        let request = match ChatRequest::from_message(&user_message) {
            Ok(request) => request,
            Err(e) => return self.finish(&mut session, Err(e.into())),
        };

        let shown = self.store.update_if_bound(conversation, |messages| {
            messages.push(user_message);
        });
        if shown.is_none() {
            tracing::warn!(
                conversation_id = %conversation,
                bound = ?self.store.bound_conversation(),
                "Send ignored, conversation is not displayed"
            );
            session.transition(SessionState::Cancelled);
            return SendOutcome::Cancelled;
        }

        let result = self.run(&mut session, &request).await;
        self.finish(&mut session, result)
    }

    async fn run(
        &self,
        session: &mut StreamSession,
        request: &ChatRequest,
    ) -> Result<(), StreamError> {
        session.transition(SessionState::Sending);
        let stream = self
            .transport
            .open_chat(request, session.cancel_token())
            .await?;

        session.transition(SessionState::Streaming);
        self.pump(session, stream).await
    }

    async fn pump(
        &self,
        session: &mut StreamSession,
        mut stream: ByteStream,
    ) -> Result<(), StreamError> {
        let mut decoder = LineDecoder::new();
        let mut reads: u64 = 0;

        loop {
            if reads >= self.max_reads {
                return Err(StreamError::Overflow {
                    limit: self.max_reads,
                });
            }
            reads += 1;

            let Some(chunk) = stream.next().await else {
                break;
            };
            let chunk = chunk?;
            if session.is_cancelled() {
                return Err(StreamError::Cancelled);
            }

            decoder.push(&chunk);
            while let Some(line) = decoder.next_line()? {
                self.apply_line(session, &line)?;
            }
        }

        if let Some(line) = decoder.finish()? {
            self.apply_line(session, &line)?;
        }

        tracing::debug!(stream = %session.key(), reads, "Stream finished");
        Ok(())
    }

    fn apply_line(&self, session: &mut StreamSession, line: &str) -> Result<(), StreamError> {
        match parse_line(line)? {
            StreamEvent::Content(fragment) => self.apply_fragment(session, &fragment),
            StreamEvent::End => {
                tracing::debug!(stream = %session.key(), "Backend signalled end of reply");
                Ok(())
            }
            StreamEvent::Ignored { kind } => {
                tracing::debug!(stream = %session.key(), kind = %kind, "Ignoring stream record");
                Ok(())
            }
        }
    }

    fn apply_fragment(&self, session: &mut StreamSession, fragment: &str) -> Result<(), StreamError> {
        let key = session.key();
        let conversation = session.conversation();
        let token = session.cancel_token();
        let accumulated = session.append(fragment);

        let applied = self.store.try_update_if_bound(conversation, |messages| {
            if token.is_cancelled() {
                return false;
            }
            *messages = reconcile(std::mem::take(messages), accumulated, key, Some(conversation));
            true
        });

        match applied {
            Some(true) => Ok(()),
            Some(false) => Err(StreamError::Cancelled),
            None => {
                // The conversation changed under us without a cancel.
                tracing::debug!(stream = %key, "Conversation no longer displayed, stopping stream");
                token.cancel();
                Err(StreamError::Cancelled)
            }
        }
    }

    fn finish(&self, session: &mut StreamSession, result: Result<(), StreamError>) -> SendOutcome {
        match result {
            Ok(()) => {
                session.transition(SessionState::Completed);
                SendOutcome::Completed
            }
            Err(e) if e.is_cancelled() || session.is_cancelled() => {
                tracing::info!(stream = %session.key(), "Request aborted");
                session.transition(SessionState::Cancelled);
                SendOutcome::Cancelled
            }
            Err(e) => {
                tracing::error!(stream = %session.key(), error = %e, "Streaming reply failed");
                session.transition(SessionState::Failed);
                let message = e.user_message();
                self.surface.set_error(message.clone());
                SendOutcome::Failed(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{content_line, contents, wait_until, FakeTransport};
    use bytes::Bytes;

    const CONVERSATION: ConversationId = ConversationId::new(456);

    fn setup(max_reads: u64) -> (Arc<FakeTransport>, StreamingReconciler) {
        let transport = Arc::new(FakeTransport::default());
        let store = MessageStore::bound(CONVERSATION, Vec::new());
        let reconciler = StreamingReconciler::new(
            transport.clone(),
            store,
            Arc::new(ChatSurface::new()),
            max_reads,
        );
        (transport, reconciler)
    }

    #[tokio::test]
    async fn single_fragment_reply() {
        let (transport, reconciler) = setup(100);
        transport.reply_with_chunks(vec![br#"{"type":"content","data":"Hello!"}"#.to_vec(), b"\n".to_vec()]);

        let outcome = reconciler.send_and_stream("Hello, how are you?", CONVERSATION).await;

        assert_eq!(outcome, SendOutcome::Completed);
        assert_eq!(
            contents(&reconciler.store().snapshot()),
            vec![("user", "Hello, how are you?"), ("assistant", "Hello!")]
        );
        assert_eq!(
            transport.requests(),
            vec![ChatRequest::new("Hello, how are you?", CONVERSATION)]
        );
        assert!(!reconciler.surface().is_sending());
    }

    #[tokio::test]
    async fn fragments_grow_one_bubble() {
        let (transport, reconciler) = setup(100);
        transport.reply_with_fragments(&["Hel", "lo!"]);

        let outcome = reconciler.send_and_stream("Hi", CONVERSATION).await;

        assert_eq!(outcome, SendOutcome::Completed);
        let messages = reconciler.store().snapshot();
        assert_eq!(contents(&messages), vec![("user", "Hi"), ("assistant", "Hello!")]);
        assert_eq!(messages[1].conversation_id, Some(CONVERSATION));
    }

    #[tokio::test]
    async fn many_fragments_concatenate_in_order() {
        let (transport, reconciler) = setup(1_000);
        let fragments: Vec<String> = (0..50).map(|i| format!("{i},")).collect();
        let refs: Vec<&str> = fragments.iter().map(String::as_str).collect();
        transport.reply_with_fragments(&refs);

        reconciler.send_and_stream("count", CONVERSATION).await;

        let messages = reconciler.store().snapshot();
        let assistants: Vec<_> = messages.iter().filter(|m| m.is_assistant()).collect();
        assert_eq!(assistants.len(), 1);
        assert_eq!(assistants[0].content, fragments.concat());
    }

    #[tokio::test]
    async fn records_split_across_reads_are_reassembled() {
        let (transport, reconciler) = setup(100);
        let mut bytes = content_line("Hel");
        bytes.extend(content_line("lo!"));
        let chunks: Vec<Vec<u8>> = bytes.chunks(7).map(<[u8]>::to_vec).collect();
        transport.reply_with_chunks(chunks);

        let outcome = reconciler.send_and_stream("Hi", CONVERSATION).await;

        assert_eq!(outcome, SendOutcome::Completed);
        assert_eq!(
            contents(&reconciler.store().snapshot()),
            vec![("user", "Hi"), ("assistant", "Hello!")]
        );
    }

    #[tokio::test]
    async fn end_and_unknown_records_are_ignored() {
        let (transport, reconciler) = setup(100);
        transport.reply_with_chunks(vec![
            content_line("Hi"),
            br#"{"type":"usage","data":{"tokens":3}}"#.to_vec(),
            b"\n".to_vec(),
            br#"{"type":"end","data":""} "#.to_vec(),
        ]);

        let outcome = reconciler.send_and_stream("x", CONVERSATION).await;

        assert_eq!(outcome, SendOutcome::Completed);
        assert_eq!(
            contents(&reconciler.store().snapshot()),
            vec![("user", "x"), ("assistant", "Hi")]
        );
    }

    #[tokio::test]
    async fn empty_input_is_a_noop() {
        let (transport, reconciler) = setup(100);

        assert_eq!(reconciler.send_and_stream("", CONVERSATION).await, SendOutcome::Skipped);
        assert_eq!(reconciler.send_and_stream("  \n", CONVERSATION).await, SendOutcome::Skipped);

        assert!(reconciler.store().is_empty());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn reply_without_content_leaves_only_user_message() {
        let (transport, reconciler) = setup(100);
        transport.reply_with_chunks(Vec::new());

        let outcome = reconciler.send_and_stream("Hi", CONVERSATION).await;

        assert_eq!(outcome, SendOutcome::Completed);
        assert_eq!(contents(&reconciler.store().snapshot()), vec![("user", "Hi")]);
    }

    #[tokio::test]
    async fn user_message_is_shown_before_the_reply() {
        let (transport, reconciler) = setup(100);
        let feed = transport.reply_with_feed();

        let task = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.send_and_stream("Hi", CONVERSATION).await }
        });

        wait_until(reconciler.store(), |m| m.len() == 1).await;
        assert!(reconciler.surface().is_sending());
        assert_eq!(contents(&reconciler.store().snapshot()), vec![("user", "Hi")]);

        drop(feed);
        assert_eq!(task.await.unwrap(), SendOutcome::Completed);
        assert!(!reconciler.surface().is_sending());
    }

    #[tokio::test]
    async fn second_send_while_active_is_rejected() {
        let (transport, reconciler) = setup(100);
        let feed = transport.reply_with_feed();

        let task = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.send_and_stream("first", CONVERSATION).await }
        });
        wait_until(reconciler.store(), |m| m.len() == 1).await;

        assert_eq!(
            reconciler.send_and_stream("second", CONVERSATION).await,
            SendOutcome::Busy
        );
        assert_eq!(reconciler.store().len(), 1);

        drop(feed);
        task.await.unwrap();
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn cancel_mid_stream_freezes_partial_reply() {
        let (transport, reconciler) = setup(100);
        let feed = transport.reply_with_feed();

        let task = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.send_and_stream("Hi", CONVERSATION).await }
        });

        feed.unbounded_send(Ok(Bytes::from(content_line("one ")))).unwrap();
        wait_until(reconciler.store(), |m| m.len() == 2).await;

        assert!(reconciler.surface().cancel_active());
        let revision = reconciler.store().revision();
        // The stale session may still receive bytes; none of them may land.
        let _ = feed.unbounded_send(Ok(Bytes::from(content_line("two "))));
        let _ = feed.unbounded_send(Ok(Bytes::from(content_line("three"))));

        assert_eq!(task.await.unwrap(), SendOutcome::Cancelled);
        assert_eq!(
            contents(&reconciler.store().snapshot()),
            vec![("user", "Hi"), ("assistant", "one ")]
        );
        assert_eq!(reconciler.store().revision(), revision);
        assert_eq!(reconciler.surface().error(), None);
        assert!(!reconciler.surface().is_sending());
    }

    #[tokio::test]
    async fn cancel_before_response_is_silent() {
        let (transport, reconciler) = setup(100);
        let _feed = transport.reply_with_feed();

        let task = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.send_and_stream("Hi", CONVERSATION).await }
        });
        wait_until(reconciler.store(), |m| m.len() == 1).await;

        reconciler.surface().cancel_active();
        reconciler.surface().cancel_active();

        assert_eq!(task.await.unwrap(), SendOutcome::Cancelled);
        assert_eq!(reconciler.surface().error(), None);
        assert_eq!(contents(&reconciler.store().snapshot()), vec![("user", "Hi")]);
    }

    #[tokio::test]
    async fn rebinding_the_store_stops_the_stream() {
        let (transport, reconciler) = setup(100);
        let feed = transport.reply_with_feed();

        let task = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.send_and_stream("Hi", CONVERSATION).await }
        });
        feed.unbounded_send(Ok(Bytes::from(content_line("old")))).unwrap();
        wait_until(reconciler.store(), |m| m.len() == 2).await;

        let other = ConversationId::new(789);
        reconciler.store().bind(other, vec![Message::user("elsewhere")]);
        let _ = feed.unbounded_send(Ok(Bytes::from(content_line(" more"))));

        assert_eq!(task.await.unwrap(), SendOutcome::Cancelled);
        assert_eq!(
            contents(&reconciler.store().snapshot()),
            vec![("user", "elsewhere")]
        );
    }

    #[tokio::test]
    async fn send_to_undisplayed_conversation_is_dropped() {
        let (transport, reconciler) = setup(100);

        let outcome = reconciler
            .send_and_stream("Hi", ConversationId::new(1))
            .await;

        assert_eq!(outcome, SendOutcome::Cancelled);
        assert!(reconciler.store().is_empty());
        assert!(transport.requests().is_empty());
        assert!(!reconciler.surface().is_sending());
    }

    #[tokio::test]
    async fn malformed_line_keeps_partial_reply_and_reports() {
        let (transport, reconciler) = setup(100);
        transport.reply_with_chunks(vec![
            content_line("Partial "),
            content_line("reply"),
            b"{\"type\": \"content\", \"data\n".to_vec(),
            content_line(" never shown"),
        ]);

        let outcome = reconciler.send_and_stream("Hi", CONVERSATION).await;

        let SendOutcome::Failed(message) = outcome else {
            panic!("Expected failure, got {outcome:?}");
        };
        assert!(message.contains("malformed stream record"));
        assert_eq!(reconciler.surface().error(), Some(message));
        assert_eq!(
            contents(&reconciler.store().snapshot()),
            vec![("user", "Hi"), ("assistant", "Partial reply")]
        );
        assert!(!reconciler.surface().is_sending());
    }

    #[tokio::test]
    async fn invalid_utf8_keeps_text_from_the_same_read() {
        let (transport, reconciler) = setup(100);
        let mut chunk = content_line("Partial");
        chunk.extend_from_slice(b"\xff\xfe\n");
        chunk.extend(content_line(" never shown"));
        transport.reply_with_chunks(vec![chunk]);

        let outcome = reconciler.send_and_stream("Hi", CONVERSATION).await;

        let SendOutcome::Failed(message) = outcome else {
            panic!("Expected failure, got {outcome:?}");
        };
        assert!(message.contains("not valid UTF-8"));
        assert_eq!(
            contents(&reconciler.store().snapshot()),
            vec![("user", "Hi"), ("assistant", "Partial")]
        );
        assert!(!reconciler.surface().is_sending());
    }

    #[tokio::test]
    async fn transport_error_is_reported_once() {
        let (transport, reconciler) = setup(100);
        transport.reply_with_status(500);

        let outcome = reconciler.send_and_stream("Hi", CONVERSATION).await;

        assert!(matches!(outcome, SendOutcome::Failed(ref m) if m.contains("Error 500 on /api/chat")));
        assert_eq!(contents(&reconciler.store().snapshot()), vec![("user", "Hi")]);
        assert!(!reconciler.surface().is_sending());

        reconciler.surface().clear_error();
        assert_eq!(reconciler.surface().error(), None);
    }

    #[tokio::test]
    async fn read_limit_is_a_failure_not_a_truncation() {
        let (transport, reconciler) = setup(3);
        transport.reply_with_fragments(&["a", "b", "c", "d"]);

        let outcome = reconciler.send_and_stream("Hi", CONVERSATION).await;

        assert!(matches!(outcome, SendOutcome::Failed(ref m) if m.contains("exceeded 3 reads")));
        assert_eq!(
            contents(&reconciler.store().snapshot()),
            vec![("user", "Hi"), ("assistant", "abc")]
        );
    }

    #[tokio::test]
    async fn stream_within_read_limit_completes() {
        // Two chunks plus the end-of-stream read fit in three reads.
        let (transport, reconciler) = setup(3);
        transport.reply_with_fragments(&["a", "b"]);

        assert_eq!(
            reconciler.send_and_stream("Hi", CONVERSATION).await,
            SendOutcome::Completed
        );
    }

    #[tokio::test]
    async fn consecutive_sends_get_separate_bubbles() {
        let (transport, reconciler) = setup(100);
        transport.reply_with_fragments(&["first"]);
        transport.reply_with_fragments(&["second"]);

        reconciler.send_and_stream("1", CONVERSATION).await;
        reconciler.send_and_stream("2", CONVERSATION).await;

        assert_eq!(
            contents(&reconciler.store().snapshot()),
            vec![
                ("user", "1"),
                ("assistant", "first"),
                ("user", "2"),
                ("assistant", "second"),
            ]
        );
    }

    #[tokio::test]
    async fn dropping_the_send_releases_the_surface() {
        let (transport, reconciler) = setup(100);
        let _feed = transport.reply_with_feed();

        let task = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.send_and_stream("Hi", CONVERSATION).await }
        });
        wait_until(reconciler.store(), |m| m.len() == 1).await;
        assert!(reconciler.surface().is_sending());

        task.abort();
        let _ = task.await;
        assert!(!reconciler.surface().is_sending());
    }
}
