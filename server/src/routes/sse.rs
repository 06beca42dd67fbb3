use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use bytes::Bytes;
use futures::stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::config::SSE_KEEPALIVE_SECS;
use crate::state::{AppState, PreSerializedEvent};

/// Stream `refresh` and `capitalColorModes` events. New and lagging clients first get
/// the current refresh summary.
pub async fn land_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let rx = state.event_tx.subscribe();

        if let Some(event) = current_refresh_event(&state).await {
            yield Ok(event);
        }

        let mut stream = BroadcastStream::new(rx);
        while let Some(result) = stream.next().await {
            match result {
                Ok(event) => {
                    let (event_type, revision, data) = match event {
                        PreSerializedEvent::Refresh { revision, json } => ("refresh", revision, json),
                        PreSerializedEvent::CapitalColorModes { revision, json } => {
                            ("capitalColorModes", revision, json)
                        }
                    };
                    let Some(payload) = event_payload(&data) else {
                        warn!(revision, event = event_type, "event payload is not valid utf-8; dropping SSE event");
                        continue;
                    };
                    yield Ok(
                        Event::default()
                            .id(revision.to_string())
                            .event(event_type)
                            .data(payload),
                    );
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    state.observability.record_dropped_sse_events(skipped);
                    warn!(
                        skipped_events = skipped,
                        "SSE client lagged behind broadcast buffer; replaying current summary"
                    );
                    if let Some(event) = current_refresh_event(&state).await {
                        yield Ok(event);
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEPALIVE_SECS))
            .text("keep-alive"),
    )
}

async fn current_refresh_event(state: &AppState) -> Option<Event> {
    let (revision, data) = {
        let snapshot = state.live_snapshot.read().await;
        snapshot.summary.as_ref()?;
        (snapshot.revision, Arc::clone(&snapshot.refresh_json))
    };
    let Some(payload) = event_payload(&data) else {
        warn!(revision, "refresh payload is not valid utf-8; skipping SSE replay");
        return None;
    };
    Some(
        Event::default()
            .id(revision.to_string())
            .event("refresh")
            .data(payload),
    )
}

fn event_payload(bytes: &Bytes) -> Option<&str> {
    std::str::from_utf8(bytes.as_ref()).ok()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use crate::routes::test_support::{sample_land, seeded_state, spawn_test_server};
    use crate::services::land_poller::apply_land_data;
    use crate::state::LandSource;

    async fn read_until(
        stream: &mut (impl futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin),
        buffer: &mut String,
        needle: &str,
    ) {
        while !buffer.contains(needle) {
            let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("sse chunk before timeout")
                .expect("sse stream open")
                .expect("sse chunk");
            buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    #[tokio::test]
    async fn sends_current_summary_then_live_refreshes() {
        let state = seeded_state().await;
        let (addr, server_handle) = spawn_test_server(state.clone()).await;

        let response = reqwest::get(format!("http://{addr}/api/events"))
            .await
            .expect("events request")
            .error_for_status()
            .expect("events status");
        let mut stream = Box::pin(response.bytes_stream());
        let mut buffer = String::new();

        read_until(&mut stream, &mut buffer, "\"revision\":1").await;
        assert!(buffer.contains("refresh"));

        apply_land_data(&state, sample_land(), LandSource::Local)
            .await
            .expect("second refresh");
        read_until(&mut stream, &mut buffer, "\"revision\":2").await;
        assert!(buffer.contains("\"source\":\"local\""));

        server_handle.abort();
    }
}
