//! SSE helpers. Two distinct patterns per §9: ingestion relays a
//! generator's events verbatim (see `routes::ingestion`); background
//! tasks have no generator, so their SSE endpoints poll the task
//! engine's progress snapshot at a 0.5s cadence until the status is
//! terminal. Grounded on the teacher's `html-router` ingestion SSE
//! handler (`create_error_stream`, `KeepAlive` settings).

use std::pin::Pin;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive};
use axum::response::{IntoResponse, Sse};
use futures::{stream, Stream, StreamExt};
use tasks::{TaskEngine, TaskKind, TaskStatus};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event, axum::Error>> + Send>>;

pub fn error_stream(message: impl Into<String>) -> EventStream {
    let message = message.into();
    stream::once(async move { Ok(Event::default().event("error").data(message)) }).boxed()
}

pub fn with_keep_alive(stream: EventStream) -> impl IntoResponse {
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive-ping"),
    )
}

/// Polls the task engine's progress record for `(dataset_id, kind)` every
/// 0.5s, yielding one `progress` event per poll, until the status is
/// terminal — then yields a final event and closes.
pub fn poll_progress_stream(engine: TaskEngine, dataset_id: String, kind: TaskKind) -> EventStream {
    async_stream::stream! {
        loop {
            let Some(progress) = engine.snapshot(&dataset_id, kind).await else {
                yield Ok(Event::default().event("error").data("no such task"));
                break;
            };
            let payload = serde_json::to_string(&progress).unwrap_or_else(|_| "{}".to_string());
            yield Ok(Event::default().event("progress").data(payload));
            if progress.status != TaskStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
    .boxed()
}
