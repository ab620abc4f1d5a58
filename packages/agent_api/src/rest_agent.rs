//! Agents that expose a session REST API instead of a terminal (OpenCode).
//!
//! There is no screen to diff: each user message is one blocking request and
//! the reply is appended whole when it returns.

use async_trait::async_trait;
use chrono::Utc;
use screen_tracker::{
    Agent, ConversationMessage, ConversationRole, ConversationStatus, MessageKind, SendError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const FALLBACK_PROVIDER: &str = "anthropic";
const FALLBACK_MODEL: &str = "claude-3-5-sonnet-20241022";

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("request to {path} failed: {source}")]
    Http {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} returned {status}: {body}")]
    Status {
        path: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("{path} returned invalid JSON: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("server not ready after {0:?}")]
    NotReady(Duration),
}

#[derive(Clone, Debug)]
pub struct RestAgentConfig {
    pub base_url: String,
    /// Upper bound on one message round trip
    pub request_timeout: Duration,
}

impl Default for RestAgentConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4096".to_string(),
            request_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionInfo {
    id: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct TextPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    #[serde(rename = "messageID")]
    message_id: String,
    #[serde(rename = "providerID")]
    provider_id: &'a str,
    #[serde(rename = "modelID")]
    model_id: &'a str,
    parts: Vec<TextPart>,
}

/// Thin JSON client for the session API.
#[derive(Clone)]
pub struct RestClient {
    base_url: String,
    http: reqwest::Client,
}

impl RestClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RestError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| RestError::Http {
                path: "/".to_string(),
                source,
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&impl Serialize>,
    ) -> Result<Value, RestError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(body);
        }
        let http_err = |source: reqwest::Error| RestError::Http {
            path: path.to_string(),
            source,
        };

        let resp = req.send().await.map_err(http_err)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RestError::Status {
                path: path.to_string(),
                status,
                body,
            });
        }
        let bytes = resp.bytes().await.map_err(http_err)?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|source| RestError::Decode {
            path: path.to_string(),
            source,
        })
    }

    async fn get(&self, path: &str) -> Result<Value, RestError> {
        self.request(reqwest::Method::GET, path, None::<&()>).await
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<Value, RestError> {
        self.request(reqwest::Method::POST, path, Some(body)).await
    }

    /// Poll the config endpoint until it answers or `max_wait` runs out.
    pub async fn wait_for_ready(&self, max_wait: Duration) -> Result<(), RestError> {
        let deadline = Instant::now() + max_wait;
        loop {
            match self.get("/config").await {
                Ok(_) => return Ok(()),
                Err(e) => debug!(error = %e, "Server not ready yet"),
            }
            if Instant::now() + READY_POLL_INTERVAL > deadline {
                return Err(RestError::NotReady(max_wait));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn create_session(&self) -> Result<String, RestError> {
        let value = self.post("/session", &serde_json::json!({})).await?;
        let session: SessionInfo =
            serde_json::from_value(value).map_err(|source| RestError::Decode {
                path: "/session".to_string(),
                source,
            })?;
        Ok(session.id)
    }

    /// Default provider and model advertised by the server.
    async fn default_model(&self) -> Result<Option<(String, String)>, RestError> {
        let value = self.get("/config/providers").await?;
        Ok(pick_default_model(&value))
    }

    async fn chat(
        &self,
        session_id: &str,
        provider_id: &str,
        model_id: &str,
        text: &str,
    ) -> Result<String, RestError> {
        let request = ChatRequest {
            message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            provider_id,
            model_id,
            parts: vec![TextPart {
                kind: "text".to_string(),
                text: text.to_string(),
            }],
        };
        let value = self
            .post(&format!("/session/{}/message", session_id), &request)
            .await?;
        Ok(reply_text(&value))
    }

    /// Session history, oldest first. Accepts a bare array or `{messages}`.
    pub async fn messages(&self, session_id: &str) -> Result<Vec<Value>, RestError> {
        let value = self
            .get(&format!("/session/{}/message", session_id))
            .await?;
        let entries = match value {
            Value::Array(entries) => entries,
            Value::Object(mut map) => match map.remove("messages") {
                Some(Value::Array(entries)) => entries,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        Ok(entries)
    }

    /// Text of the newest assistant message in the session history.
    async fn latest_reply(&self, session_id: &str) -> Result<String, RestError> {
        let entries = self.messages(session_id).await?;
        Ok(last_assistant_text(&entries))
    }
}

/// First provider, and its advertised default model (else its first model).
fn pick_default_model(value: &Value) -> Option<(String, String)> {
    let provider = value.get("providers")?.as_array()?.first()?;
    let provider_id = provider.get("id")?.as_str()?.to_string();
    let model_id = value
        .get("default")
        .and_then(|d| d.get(&provider_id))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            provider
                .get("models")?
                .as_object()?
                .keys()
                .next()
                .cloned()
        })?;
    Some((provider_id, model_id))
}

/// Join the text parts of a reply, accepting both `{parts}` and
/// `{message: {parts}}` shapes.
fn reply_text(value: &Value) -> String {
    let parts = value
        .get("parts")
        .or_else(|| value.get("message").and_then(|m| m.get("parts")))
        .and_then(Value::as_array);
    let Some(parts) = parts else {
        return String::new();
    };
    parts
        .iter()
        .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn last_assistant_text(entries: &[Value]) -> String {
    entries
        .iter()
        .rev()
        .filter(|entry| {
            let role = entry
                .get("info")
                .and_then(|info| info.get("role"))
                .or_else(|| entry.get("role"))
                .and_then(Value::as_str);
            role == Some("assistant")
        })
        .map(reply_text)
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

struct RestState {
    messages: Vec<ConversationMessage>,
    status: ConversationStatus,
    next_id: u64,
}

impl RestState {
    fn push(&mut self, role: ConversationRole, content: String) {
        self.messages.push(ConversationMessage {
            id: self.next_id,
            role,
            content,
            time: Utc::now(),
        });
        self.next_id += 1;
    }
}

struct RestInner {
    client: RestClient,
    session_id: String,
    provider_id: String,
    model_id: String,
    state: RwLock<RestState>,
}

/// Conversation held by a remote session. Cheap to clone.
#[derive(Clone)]
pub struct RestAgent {
    inner: Arc<RestInner>,
}

impl RestAgent {
    /// Open a session on an already-running server.
    pub async fn connect(config: &RestAgentConfig) -> Result<Self, RestError> {
        let client = RestClient::new(&config.base_url, config.request_timeout)?;
        let session_id = client.create_session().await?;

        let (provider_id, model_id) = match client.default_model().await {
            Ok(Some(found)) => found,
            Ok(None) => {
                warn!("Server advertised no providers, using fallback model");
                (FALLBACK_PROVIDER.to_string(), FALLBACK_MODEL.to_string())
            }
            Err(e) => {
                warn!(error = %e, "Failed to read providers, using fallback model");
                (FALLBACK_PROVIDER.to_string(), FALLBACK_MODEL.to_string())
            }
        };

        info!(
            session_id = %session_id,
            provider = %provider_id,
            model = %model_id,
            "REST session created"
        );

        Ok(Self {
            inner: Arc::new(RestInner {
                client,
                session_id,
                provider_id,
                model_id,
                state: RwLock::new(RestState {
                    messages: Vec::new(),
                    status: ConversationStatus::Stable,
                    next_id: 0,
                }),
            }),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }
}

impl RestInner {
    async fn dispatch(&self, text: String) {
        let result = match self
            .client
            .chat(&self.session_id, &self.provider_id, &self.model_id, &text)
            .await
        {
            Ok(reply) if !reply.is_empty() => Ok(reply),
            Ok(_) => {
                debug!("Reply carried no text, reading session history");
                self.client.latest_reply(&self.session_id).await
            }
            Err(e @ RestError::Decode { .. }) => {
                warn!(error = %e, "Unreadable reply, reading session history");
                self.client.latest_reply(&self.session_id).await
            }
            Err(e) => Err(e),
        };

        let mut state = self.state.write().await;
        match result {
            Ok(reply) if !reply.is_empty() => {
                debug!(chars = reply.len(), "Reply received");
                state.push(ConversationRole::Agent, reply);
            }
            Ok(_) => {
                warn!("Agent server returned no reply text");
                state.push(
                    ConversationRole::Agent,
                    "Error: agent returned no reply".to_string(),
                );
            }
            Err(e) => {
                error!(error = %e, "Failed to send message to agent server");
                state.push(ConversationRole::Agent, format!("Error: {}", e));
            }
        }
        state.status = ConversationStatus::Stable;
    }
}

#[async_trait]
impl Agent for RestAgent {
    async fn send_message(&self, text: &str, kind: MessageKind) -> Result<(), SendError> {
        if kind == MessageKind::Raw {
            return Err(SendError::UnsupportedOperation("raw input"));
        }

        let content = text.trim();
        {
            let mut state = self.inner.state.write().await;
            if state.status == ConversationStatus::Changing {
                return Err(SendError::AgentBusy);
            }
            if content.is_empty() {
                return Err(SendError::EmptyInput);
            }
            state.push(ConversationRole::User, content.to_string());
            state.status = ConversationStatus::Changing;
        }

        let inner = self.inner.clone();
        let content = content.to_string();
        tokio::spawn(async move {
            inner.dispatch(content).await;
        });
        Ok(())
    }

    async fn messages(&self) -> Vec<ConversationMessage> {
        self.inner.state.read().await.messages.clone()
    }

    async fn status(&self) -> ConversationStatus {
        self.inner.state.read().await.status
    }

    async fn screen(&self) -> String {
        String::new()
    }

    fn start_polling(&self, _cancel: CancellationToken) {
        // Replies arrive with the send request; nothing to poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::{Path, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{get, post},
    };
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct MockServer {
        requests: Arc<Mutex<Vec<Value>>>,
        fail_chat: bool,
        fail_providers: bool,
        chat_delay: Duration,
        /// Answer the chat request without any text parts
        textless_reply: bool,
        /// Answer the chat request with a 200 that is not JSON
        non_json_reply: bool,
        /// Served from `GET /session/{id}/message`; 404 when unset
        history: Option<Value>,
    }

    async fn spawn_mock(mock: MockServer) -> String {
        async fn create_session() -> Json<Value> {
            Json(serde_json::json!({ "id": "ses_test", "title": "test" }))
        }

        async fn providers(State(mock): State<MockServer>) -> Result<Json<Value>, StatusCode> {
            if mock.fail_providers {
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
            Ok(Json(serde_json::json!({
                "providers": [
                    { "id": "mockai", "models": { "mock-small": {}, "mock-large": {} } }
                ],
                "default": { "mockai": "mock-large" }
            })))
        }

        async fn chat(
            State(mock): State<MockServer>,
            Path(session): Path<String>,
            Json(body): Json<Value>,
        ) -> Response {
            mock.requests.lock().unwrap().push(body.clone());
            tokio::time::sleep(mock.chat_delay).await;
            if mock.fail_chat {
                return (StatusCode::INTERNAL_SERVER_ERROR, "model exploded").into_response();
            }
            if mock.non_json_reply {
                return (StatusCode::OK, "accepted").into_response();
            }
            if mock.textless_reply {
                return Json(serde_json::json!({
                    "info": { "id": "msg_reply", "role": "assistant", "sessionID": session }
                }))
                .into_response();
            }
            let text = body["parts"][0]["text"].as_str().unwrap_or_default();
            Json(serde_json::json!({
                "info": { "id": "msg_reply", "role": "assistant", "sessionID": session },
                "parts": [
                    { "type": "step-start" },
                    { "type": "text", "text": format!("echo: {}", text) },
                    { "type": "text", "text": "done" }
                ]
            }))
            .into_response()
        }

        async fn history(State(mock): State<MockServer>) -> Result<Json<Value>, StatusCode> {
            mock.history.map(Json).ok_or(StatusCode::NOT_FOUND)
        }

        let app = Router::new()
            .route("/config", get(|| async { Json(serde_json::json!({})) }))
            .route("/config/providers", get(providers))
            .route("/session", post(create_session))
            .route("/session/{id}/message", post(chat).get(history))
            .with_state(mock);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(base_url: String) -> RestAgentConfig {
        RestAgentConfig {
            base_url,
            request_timeout: Duration::from_secs(5),
        }
    }

    async fn wait_stable(agent: &RestAgent) {
        for _ in 0..500 {
            if agent.status().await == ConversationStatus::Stable {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("agent never became stable");
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let mock = MockServer::default();
        let base_url = spawn_mock(mock.clone()).await;
        let agent = RestAgent::connect(&config(base_url)).await.unwrap();
        assert_eq!(agent.session_id(), "ses_test");

        tokio_test::assert_ok!(agent.send_message(" ping ", MessageKind::User).await);
        wait_stable(&agent).await;

        let messages = agent.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ConversationRole::User);
        assert_eq!(messages[0].content, "ping");
        assert_eq!(messages[1].role, ConversationRole::Agent);
        assert_eq!(messages[1].content, "echo: ping\ndone");
        assert!(messages[0].id < messages[1].id);

        let requests = mock.requests.lock().unwrap().clone();
        assert_eq!(requests[0]["providerID"], "mockai");
        assert_eq!(requests[0]["modelID"], "mock-large");
        assert_eq!(requests[0]["parts"][0]["type"], "text");
        assert!(requests[0]["messageID"].as_str().unwrap().starts_with("msg_"));
        assert_eq!(agent.screen().await, "");
    }

    #[tokio::test]
    async fn test_busy_while_request_in_flight() {
        let mock = MockServer {
            chat_delay: Duration::from_millis(300),
            ..Default::default()
        };
        let base_url = spawn_mock(mock).await;
        let agent = RestAgent::connect(&config(base_url)).await.unwrap();

        agent.send_message("first", MessageKind::User).await.unwrap();
        assert_eq!(agent.status().await, ConversationStatus::Changing);
        assert_eq!(
            agent.send_message("second", MessageKind::User).await,
            Err(SendError::AgentBusy)
        );
        assert_eq!(agent.messages().await.len(), 1);
        wait_stable(&agent).await;
    }

    #[tokio::test]
    async fn test_failure_recorded_in_conversation() {
        let mock = MockServer {
            fail_chat: true,
            ..Default::default()
        };
        let base_url = spawn_mock(mock).await;
        let agent = RestAgent::connect(&config(base_url)).await.unwrap();

        agent.send_message("hi", MessageKind::User).await.unwrap();
        wait_stable(&agent).await;

        let messages = agent.messages().await;
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.starts_with("Error: "));
        assert!(messages[1].content.contains("model exploded"));
    }

    #[tokio::test]
    async fn test_textless_reply_read_from_history() {
        let mock = MockServer {
            textless_reply: true,
            history: Some(serde_json::json!([
                { "info": { "role": "assistant" }, "parts": [{ "type": "text", "text": "old" }] },
                { "info": { "role": "user" }, "parts": [{ "type": "text", "text": "hi" }] },
                { "info": { "role": "assistant" }, "parts": [{ "type": "text", "text": "hello back" }] }
            ])),
            ..Default::default()
        };
        let base_url = spawn_mock(mock).await;
        let agent = RestAgent::connect(&config(base_url)).await.unwrap();

        agent.send_message("hi", MessageKind::User).await.unwrap();
        wait_stable(&agent).await;

        let messages = agent.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, ConversationRole::Agent);
        assert_eq!(messages[1].content, "hello back");
    }

    #[tokio::test]
    async fn test_non_json_reply_falls_back_to_wrapped_history() {
        let mock = MockServer {
            non_json_reply: true,
            history: Some(serde_json::json!({
                "messages": [
                    { "info": { "role": "assistant" }, "parts": [{ "type": "text", "text": "from history" }] }
                ]
            })),
            ..Default::default()
        };
        let base_url = spawn_mock(mock).await;
        let agent = RestAgent::connect(&config(base_url)).await.unwrap();

        agent.send_message("hi", MessageKind::User).await.unwrap();
        wait_stable(&agent).await;
        assert_eq!(agent.messages().await[1].content, "from history");
    }

    #[tokio::test]
    async fn test_missing_reply_is_recorded_as_error() {
        let mock = MockServer {
            textless_reply: true,
            ..Default::default()
        };
        let base_url = spawn_mock(mock).await;
        let agent = RestAgent::connect(&config(base_url)).await.unwrap();

        agent.send_message("hi", MessageKind::User).await.unwrap();
        wait_stable(&agent).await;

        let messages = agent.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, ConversationRole::Agent);
        assert!(messages[1].content.starts_with("Error: "));
        assert_eq!(agent.status().await, ConversationStatus::Stable);
    }

    #[tokio::test]
    async fn test_non_json_body_is_decode_error() {
        let mock = MockServer {
            non_json_reply: true,
            ..Default::default()
        };
        let base_url = spawn_mock(mock).await;
        let client = RestClient::new(&base_url, Duration::from_secs(1)).unwrap();
        let err = client
            .chat("ses_test", "mockai", "mock-large", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_rejections() {
        let base_url = spawn_mock(MockServer::default()).await;
        let agent = RestAgent::connect(&config(base_url)).await.unwrap();

        assert_eq!(
            agent.send_message("\x03", MessageKind::Raw).await,
            Err(SendError::UnsupportedOperation("raw input"))
        );
        assert_eq!(
            agent.send_message("   ", MessageKind::User).await,
            Err(SendError::EmptyInput)
        );
        assert!(agent.messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_provider_fallback() {
        let mock = MockServer {
            fail_providers: true,
            ..Default::default()
        };
        let base_url = spawn_mock(mock.clone()).await;
        let agent = RestAgent::connect(&config(base_url)).await.unwrap();

        agent.send_message("hi", MessageKind::User).await.unwrap();
        wait_stable(&agent).await;
        let requests = mock.requests.lock().unwrap().clone();
        assert_eq!(requests[0]["providerID"], FALLBACK_PROVIDER);
        assert_eq!(requests[0]["modelID"], FALLBACK_MODEL);
    }

    #[tokio::test]
    async fn test_wait_for_ready() {
        let base_url = spawn_mock(MockServer::default()).await;
        let client = RestClient::new(&base_url, Duration::from_secs(1)).unwrap();
        tokio_test::assert_ok!(client.wait_for_ready(Duration::from_secs(2)).await);

        // Nothing listens on the discard port
        let client = RestClient::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let err = client
            .wait_for_ready(Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::NotReady(_)));
    }

    #[test]
    fn test_pick_default_model_without_default_map() {
        let value = serde_json::json!({
            "providers": [{ "id": "p1", "models": { "m1": {} } }]
        });
        assert_eq!(
            pick_default_model(&value),
            Some(("p1".to_string(), "m1".to_string()))
        );
        assert_eq!(pick_default_model(&serde_json::json!({})), None);
    }

    #[test]
    fn test_reply_text_shapes() {
        let legacy = serde_json::json!({
            "message": { "parts": [{ "type": "text", "text": "hello" }] }
        });
        assert_eq!(reply_text(&legacy), "hello");
        assert_eq!(reply_text(&Value::Null), "");
    }
}
