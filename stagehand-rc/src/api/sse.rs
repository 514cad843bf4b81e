//! Server-Sent Events (SSE) stream of engine events
//!
//! Streams:
//! - ConnectionStatus ("connected", once on subscribe)
//! - every [`EngineEvent`](stagehand_common::events::EngineEvent), with the
//!   variant name as the SSE `event:` field and the JSON body as data

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// GET /events - SSE event stream
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.orchestrator.events().subscribe();
    let client = uuid::Uuid::new_v4();
    info!(%client, "New SSE client connected");

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => {
                        debug!(%client, "Broadcasting SSE event: {}", event.event_type());
                        yield Ok(Event::default().event(event.event_type()).data(json));
                    }
                    Err(e) => warn!("Failed to serialize event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%client, skipped, "SSE client lagging; events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }

        info!(%client, "SSE event stream ended");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
