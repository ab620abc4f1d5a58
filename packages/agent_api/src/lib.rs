//! HTTP control surface for a single coding agent.
//!
//! Routes:
//!
//! | Method | Path               | Purpose                                  |
//! |--------|--------------------|------------------------------------------|
//! | GET    | `/messages`        | Conversation so far                      |
//! | POST   | `/message`         | Send a user message or raw keystrokes    |
//! | GET    | `/status`          | `stable` or `running`                    |
//! | GET    | `/events`          | SSE: `message_update`, `status_change`   |
//! | GET    | `/internal/screen` | SSE: `screen_update`                     |
//! | GET    | `/health`          | Liveness and agent type                  |

pub mod agents;
pub mod config;
pub mod error;
pub mod pty_source;
pub mod rest_agent;
pub mod sse;

pub use agents::AgentType;
pub use error::ApiError;

use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use screen_tracker::{Agent, EventEmitter, MessageKind};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<dyn Agent>,
    pub emitter: Arc<EventEmitter>,
    pub agent_type: AgentType,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/messages", get(get_messages))
        .route("/message", post(send_message))
        .route("/status", get(get_status))
        .route("/events", get(sse::subscribe_events))
        .route("/internal/screen", get(sse::subscribe_screen))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_messages(State(state): State<AppState>) -> impl IntoResponse {
    let messages = state.agent.messages().await;
    Json(serde_json::json!({ "messages": messages }))
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    #[serde(rename = "type")]
    kind: MessageKind,
    content: String,
}

async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<MessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    debug!(kind = ?req.kind, chars = req.content.len(), "Message received");
    state.agent.send_message(&req.content, req.kind).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.agent.status().await;
    Json(serde_json::json!({ "status": status }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "agent_type": state.agent_type,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use screen_tracker::{
        ConversationMessage, ConversationRole, ConversationStatus, SendError, sync_emitter,
    };
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    /// Agent that answers every message with "ack".
    #[derive(Default)]
    struct StubAgent {
        messages: Mutex<Vec<ConversationMessage>>,
        busy: Mutex<bool>,
        raw: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Agent for StubAgent {
        async fn send_message(&self, text: &str, kind: MessageKind) -> Result<(), SendError> {
            if kind == MessageKind::Raw {
                self.raw.lock().unwrap().push(text.to_string());
                return Ok(());
            }
            if *self.busy.lock().unwrap() {
                return Err(SendError::AgentBusy);
            }
            if text.trim().is_empty() {
                return Err(SendError::EmptyInput);
            }
            let mut messages = self.messages.lock().unwrap();
            for (role, content) in [
                (ConversationRole::User, text.trim()),
                (ConversationRole::Agent, "ack"),
            ] {
                let id = messages.len() as u64;
                messages.push(ConversationMessage {
                    id,
                    role,
                    content: content.to_string(),
                    time: Utc::now(),
                });
            }
            Ok(())
        }

        async fn messages(&self) -> Vec<ConversationMessage> {
            self.messages.lock().unwrap().clone()
        }

        async fn status(&self) -> ConversationStatus {
            if *self.busy.lock().unwrap() {
                ConversationStatus::Changing
            } else {
                ConversationStatus::Stable
            }
        }

        async fn screen(&self) -> String {
            "> ".to_string()
        }

        fn start_polling(&self, _cancel: CancellationToken) {}
    }

    fn test_state(agent: Arc<StubAgent>) -> AppState {
        AppState {
            agent,
            emitter: Arc::new(EventEmitter::default()),
            agent_type: AgentType::Custom,
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_message(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/message")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_send_then_list_messages() {
        let agent = Arc::new(StubAgent::default());
        let app = create_router(test_state(agent));

        let response = app
            .clone()
            .oneshot(post_message(r#"{"type":"user","content":"hello"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({ "ok": true }));

        let response = app.oneshot(get("/messages")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "hello");
        assert_eq!(messages[1]["role"], "agent");
        assert!(messages[1]["time"].is_string());
    }

    #[tokio::test]
    async fn test_busy_agent_is_conflict() {
        let agent = Arc::new(StubAgent::default());
        *agent.busy.lock().unwrap() = true;
        let app = create_router(test_state(agent.clone()));

        let response = app
            .oneshot(post_message(r#"{"type":"user","content":"hello"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            body_json(response).await["error"],
            "agent is currently running"
        );
        assert!(agent.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_message_is_bad_request() {
        let app = create_router(test_state(Arc::new(StubAgent::default())));
        let response = app
            .oneshot(post_message(r#"{"type":"user","content":"  "}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_body_is_unprocessable() {
        let app = create_router(test_state(Arc::new(StubAgent::default())));
        let response = app
            .oneshot(post_message(r#"{"type":"shout","content":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_raw_message_passes_through() {
        let agent = Arc::new(StubAgent::default());
        *agent.busy.lock().unwrap() = true;
        let app = create_router(test_state(agent.clone()));

        let response = app
            .oneshot(post_message(r#"{"type":"raw","content":"\u0003"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(agent.raw.lock().unwrap().as_slice(), ["\u{3}"]);
    }

    #[tokio::test]
    async fn test_status_and_health() {
        let agent = Arc::new(StubAgent::default());
        let app = create_router(test_state(agent.clone()));

        let response = app.clone().oneshot(get("/status")).await.unwrap();
        assert_eq!(body_json(response).await["status"], "stable");

        *agent.busy.lock().unwrap() = true;
        let response = app.clone().oneshot(get("/status")).await.unwrap();
        assert_eq!(body_json(response).await["status"], "running");

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "status": "ok", "agent_type": "custom" })
        );
    }

    #[tokio::test]
    async fn test_events_stream_is_sse() {
        let agent = Arc::new(StubAgent::default());
        let state = test_state(agent.clone());
        agent.send_message("hi", MessageKind::User).await.unwrap();
        sync_emitter(agent.as_ref(), &state.emitter).await;
        let emitter = state.emitter.clone();
        let app = create_router(state);

        let response = app.oneshot(get("/events")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );
        assert_eq!(emitter.subscriber_count(), 1);

        drop(response);
        assert_eq!(emitter.subscriber_count(), 0);
    }
}
