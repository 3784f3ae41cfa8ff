//! HTTP client for the tacheles backend REST API.
//!
//! The backend identifies the user through a session cookie set by
//! `/api/new_user`, so the underlying client keeps a cookie store.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tacheles_core::{ChatRequest, Conversation, ConversationId, ConversationSummary, Message, UserId};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::{ClientError, StreamError};
use crate::transport::{cancellable, ByteStream, ConversationApi, Transport};

/// Path of the streaming chat endpoint.
pub const CHAT_ENDPOINT: &str = "/api/chat";

const NEW_USER_ENDPOINT: &str = "/api/new_user";
const NEW_CONVERSATION_ENDPOINT: &str = "/api/new_conversation";
const HEALTHCHECK_ENDPOINT: &str = "/api/healthcheck";

#[derive(Debug, serde::Deserialize)]
struct NewUserResponse {
    id: UserId,
}

#[derive(Debug, Serialize)]
struct UserRef {
    id: UserId,
}

/// Client for the backend REST API.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    /// Create a new backend client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .cookie_store(true)
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self::with_client(client, config.base_url()))
    }

    /// Create a new backend client with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Decode a JSON response, mapping failures onto `endpoint`.
    async fn read_json<T: DeserializeOwned>(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        if !response.status().is_success() {
            return Err(ClientError::Status {
                endpoint: endpoint.to_string(),
                status: response.status().as_u16(),
            });
        }

        response.json().await.map_err(|e| ClientError::Parse {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })
    }

    async fn post_json<B, T>(&self, endpoint: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(endpoint))
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::http(endpoint, e))?;

        Self::read_json(endpoint, response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ClientError> {
        let response = self
            .client
            .get(self.url(endpoint))
            .send()
            .await
            .map_err(|e| ClientError::http(endpoint, e))?;

        Self::read_json(endpoint, response).await
    }

    // =========================================================================
    // Users and Conversations
    // =========================================================================

    /// Register a new user and return its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is malformed.
    pub async fn new_user(&self) -> Result<UserId, ClientError> {
        let body: NewUserResponse = self
            .post_json(NEW_USER_ENDPOINT, &serde_json::json!({}))
            .await?;
        tracing::debug!(user_id = %body.id, "Registered new user");
        Ok(body.id)
    }

    /// Start a new conversation for `user`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is malformed.
    pub async fn new_conversation(&self, user: UserId) -> Result<Conversation, ClientError> {
        let mut conversation: Conversation = self
            .post_json(NEW_CONVERSATION_ENDPOINT, &UserRef { id: user })
            .await?;
        for message in &mut conversation.messages {
            message.conversation_id.get_or_insert(conversation.id);
        }
        tracing::debug!(conversation_id = %conversation.id, "Started new conversation");
        Ok(conversation)
    }

    /// List the conversations of `user`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is malformed.
    pub async fn list_conversations(
        &self,
        user: UserId,
    ) -> Result<Vec<ConversationSummary>, ClientError> {
        self.get_json(&format!("/api/conversations/{user}")).await
    }

    /// Load the messages of a conversation, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is malformed.
    pub async fn conversation_messages(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<Message>, ClientError> {
        let mut messages: Vec<Message> = self
            .get_json(&format!("/api/conversations/{conversation}/messages"))
            .await?;
        for message in &mut messages {
            message.conversation_id.get_or_insert(conversation);
        }
        Ok(messages)
    }

    /// Check whether the backend is up.
    pub async fn healthcheck(&self) -> bool {
        match self.client.get(self.url(HEALTHCHECK_ENDPOINT)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Healthcheck failed");
                false
            }
        }
    }

    // =========================================================================
    // Chat
    // =========================================================================

    /// Send a user message and return the streamed response body.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Transport`] on network failure or a non-success
    /// status, and [`StreamError::Cancelled`] if `cancel` fires first.
    pub async fn open_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, StreamError> {
        tracing::debug!(
            conversation_id = %request.conversation_id,
            "Sending chat message"
        );

        let send = self.client.post(self.url(CHAT_ENDPOINT)).json(request).send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(StreamError::Cancelled),
            result = send => result.map_err(|e| ClientError::http(CHAT_ENDPOINT, e))?,
        };

        if !response.status().is_success() {
            return Err(ClientError::Status {
                endpoint: CHAT_ENDPOINT.to_string(),
                status: response.status().as_u16(),
            }
            .into());
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamError::from(ClientError::http(CHAT_ENDPOINT, e))));

        Ok(cancellable(body, cancel))
    }
}

#[async_trait]
impl Transport for BackendClient {
    async fn open_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ByteStream, StreamError> {
        BackendClient::open_chat(self, request, cancel).await
    }
}

#[async_trait]
impl ConversationApi for BackendClient {
    async fn new_user(&self) -> Result<UserId, ClientError> {
        BackendClient::new_user(self).await
    }

    async fn new_conversation(&self, user: UserId) -> Result<Conversation, ClientError> {
        BackendClient::new_conversation(self, user).await
    }

    async fn list_conversations(
        &self,
        user: UserId,
    ) -> Result<Vec<ConversationSummary>, ClientError> {
        BackendClient::list_conversations(self, user).await
    }

    async fn conversation_messages(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<Message>, ClientError> {
        BackendClient::conversation_messages(self, conversation).await
    }
}
