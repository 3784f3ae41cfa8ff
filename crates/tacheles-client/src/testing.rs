//! In-memory backend doubles for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use parking_lot::Mutex;
use tacheles_core::{
    ChatRequest, Conversation, ConversationId, ConversationSummary, Message, UserId,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::api::CHAT_ENDPOINT;
use crate::error::{ClientError, StreamError};
use crate::store::MessageStore;
use crate::transport::{cancellable, ByteStream, ConversationApi, Transport};

/// Sender side of a stream the test feeds by hand.
pub(crate) type Feed = mpsc::UnboundedSender<Result<Bytes, StreamError>>;

enum Reply {
    Chunks(Vec<Bytes>),
    Feed(mpsc::UnboundedReceiver<Result<Bytes, StreamError>>),
    Status(u16),
}

/// One `content` record terminated the way the backend terminates it.
pub(crate) fn content_line(text: &str) -> Vec<u8> {
    let record = serde_json::json!({"type": "content", "data": text});
    format!("{record} \n").into_bytes()
}

/// Transport answering each call with the next scripted reply.
#[derive(Default)]
pub(crate) struct FakeTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl FakeTransport {
    pub(crate) fn reply_with_chunks(&self, chunks: Vec<Vec<u8>>) {
        self.replies
            .lock()
            .push_back(Reply::Chunks(chunks.into_iter().map(Bytes::from).collect()));
    }

    pub(crate) fn reply_with_fragments(&self, fragments: &[&str]) {
        self.reply_with_chunks(fragments.iter().map(|f| content_line(f)).collect());
    }

    pub(crate) fn reply_with_feed(&self) -> Feed {
        let (tx, rx) = mpsc::unbounded();
        self.replies.lock().push_back(Reply::Feed(rx));
        tx
    }

    pub(crate) fn reply_with_status(&self, status: u16) {
        self.replies.lock().push_back(Reply::Status(status));
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, StreamError> {
        self.requests.lock().push(request.clone());
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or(Reply::Chunks(Vec::new()));

        match reply {
            Reply::Chunks(chunks) => Ok(cancellable(
                futures::stream::iter(chunks.into_iter().map(Ok)),
                cancel,
            )),
            Reply::Feed(rx) => Ok(cancellable(rx, cancel)),
            Reply::Status(status) => Err(ClientError::Status {
                endpoint: CHAT_ENDPOINT.to_string(),
                status,
            }
            .into()),
        }
    }
}

#[derive(Default)]
struct ApiState {
    next_id: i64,
    user: Option<UserId>,
    conversations: Vec<ConversationId>,
    messages: HashMap<ConversationId, Vec<Message>>,
    fail_messages: bool,
    message_gate: Option<Arc<Notify>>,
    new_user_calls: usize,
    new_conversation_calls: usize,
    list_calls: usize,
    message_calls: Vec<ConversationId>,
}

/// Conversation API keeping everything in memory.
#[derive(Default)]
pub(crate) struct FakeApi {
    state: Mutex<ApiState>,
}

impl FakeApi {
    /// Seed an existing conversation with history.
    pub(crate) fn seed(&self, id: i64, messages: Vec<Message>) -> ConversationId {
        let mut state = self.state.lock();
        let id = ConversationId::new(id);
        state.conversations.push(id);
        state.messages.insert(id, messages);
        id
    }

    pub(crate) fn fail_message_loads(&self) {
        self.state.lock().fail_messages = true;
    }

    /// Hold every history load until the returned gate is notified once
    /// per load.
    pub(crate) fn gate_message_loads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().message_gate = Some(gate.clone());
        gate
    }

    pub(crate) fn new_user_calls(&self) -> usize {
        self.state.lock().new_user_calls
    }

    pub(crate) fn new_conversation_calls(&self) -> usize {
        self.state.lock().new_conversation_calls
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    pub(crate) fn message_calls(&self) -> Vec<ConversationId> {
        self.state.lock().message_calls.clone()
    }
}

#[async_trait]
impl ConversationApi for FakeApi {
    async fn new_user(&self) -> Result<UserId, ClientError> {
        let mut state = self.state.lock();
        state.new_user_calls += 1;
        let user = UserId::new(123);
        state.user = Some(user);
        Ok(user)
    }

    async fn new_conversation(&self, _user: UserId) -> Result<Conversation, ClientError> {
        let mut state = self.state.lock();
        state.new_conversation_calls += 1;
        state.next_id += 1;
        let id = ConversationId::new(1000 + state.next_id);
        state.conversations.push(id);
        state.messages.insert(id, Vec::new());
        Ok(Conversation {
            id,
            messages: Vec::new(),
        })
    }

    async fn list_conversations(
        &self,
        user: UserId,
    ) -> Result<Vec<ConversationSummary>, ClientError> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        Ok(state
            .conversations
            .iter()
            .map(|id| ConversationSummary {
                id: *id,
                user_id: Some(user),
            })
            .collect())
    }

    async fn conversation_messages(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<Message>, ClientError> {
        let gate = {
            let mut state = self.state.lock();
            state.message_calls.push(conversation);
            state.message_gate.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let state = self.state.lock();
        if state.fail_messages {
            return Err(ClientError::Status {
                endpoint: format!("/api/conversations/{conversation}/messages"),
                status: 500,
            });
        }
        Ok(state.messages.get(&conversation).cloned().unwrap_or_default())
    }
}

/// Wait until `predicate` holds for the store contents.
pub(crate) async fn wait_until(store: &MessageStore, mut predicate: impl FnMut(&[Message]) -> bool) {
    let mut changes = store.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if predicate(&store.snapshot()) {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .expect("store never reached the expected state");
}

/// Role/content pairs for compact assertions.
pub(crate) fn contents(messages: &[Message]) -> Vec<(&str, &str)> {
    messages
        .iter()
        .map(|m| (m.role.as_str(), m.content.as_str()))
        .collect()
}
