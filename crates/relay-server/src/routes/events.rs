use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use crate::state::AppState;

/// GET /api/events: SSE stream of coordinator events. Each event is named
/// after its kind (`task_updated`, `progress_check_in`, ...) and carries the
/// event as JSON. Slow consumers silently skip what they missed.
pub async fn sse_events(State(app): State<AppState>) -> impl axum::response::IntoResponse {
    let rx = app.coordinator.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| {
        let ev = msg.ok()?;
        let data = serde_json::to_string(&ev).ok()?;
        Some(Ok::<Event, Infallible>(Event::default().event(ev.name()).data(data)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
