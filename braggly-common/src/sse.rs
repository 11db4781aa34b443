//! Server-Sent Events (SSE) utilities

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::CodEvent;

/// Heartbeat period for every SSE stream
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Turn a COD event subscription into an SSE response
///
/// Sends a `ConnectionStatus` event first, then every event received on
/// `rx`. A lagging client skips the events it missed. The stream ends once
/// a `SessionClosed` event is forwarded or the bus is dropped.
///
/// # Example
/// ```rust,ignore
/// pub async fn cod_events(session: Arc<CodSession>) -> Sse<impl Stream<...>> {
///     braggly_common::sse::cod_event_stream(session.subscribe(), "cod")
/// }
/// ```
pub fn cod_event_stream(
    mut rx: broadcast::Receiver<CodEvent>,
    label: &'static str,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} events", label);

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let event_type = event.event_type();
                    let closing = matches!(event, CodEvent::SessionClosed { .. });
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            debug!("SSE: Forwarding {} event", event_type);
                            yield Ok(Event::default().event(event_type).data(json));
                        }
                        Err(e) => {
                            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                        }
                    }
                    if closing {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("SSE: {} client lagged, skipped {} events", label, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("SSE: {} event stream ended", label);
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
