//! Server-sent event streams backed by the event emitter.

use axum::{
    extract::State,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use futures::Stream;
use screen_tracker::{Event, EventEmitter, StreamKind, SubscriberId};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use crate::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Unsubscribes when the SSE connection goes away.
struct SubscriptionGuard {
    emitter: Arc<EventEmitter>,
    id: SubscriberId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        info!(subscriber_id = self.id, "SSE client disconnected");
        self.emitter.unsubscribe(self.id);
    }
}

fn to_sse(event: &Event) -> Result<SseEvent, axum::Error> {
    SseEvent::default()
        .event(event.kind.as_str())
        .id(event.sequence.to_string())
        .json_data(&event.payload)
}

/// Replay batch first, then live events, until the client disconnects.
pub fn event_stream(
    emitter: Arc<EventEmitter>,
    kind: StreamKind,
) -> impl Stream<Item = Result<SseEvent, axum::Error>> {
    let (id, rx, replay) = emitter.subscribe(kind);
    info!(subscriber_id = id, ?kind, "SSE client connected");
    let guard = SubscriptionGuard { emitter, id };

    tokio_stream::iter(replay)
        .chain(ReceiverStream::new(rx))
        .map(move |event| {
            let _subscription = &guard;
            to_sse(&event)
        })
}

/// GET /events
pub async fn subscribe_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, axum::Error>>> {
    Sse::new(event_stream(state.emitter.clone(), StreamKind::Conversation))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

/// GET /internal/screen
pub async fn subscribe_screen(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, axum::Error>>> {
    Sse::new(event_stream(state.emitter.clone(), StreamKind::Screen))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}
