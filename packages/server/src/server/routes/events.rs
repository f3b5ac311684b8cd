//! SSE endpoint tailing a range's event log.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::Stream;
use tokio_stream::StreamExt;

use crate::common::ApiError;
use crate::domains::events::PgEventStore;
use crate::kernel::sse::range_event_stream;
use crate::server::app::AppState;
use crate::server::auth::CurrentUser;

use super::ranges::range_for_user;

const EVENT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub async fn stream_range_events(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let range = range_for_user(&state, id, user.0.id).await?;

    let feed = Arc::new(PgEventStore::new(state.db.clone()));
    let stream = range_event_stream(feed, range.id, EVENT_POLL_INTERVAL).map(|event| {
        let frame = SseEvent::default().event("event");
        let frame = frame
            .json_data(&event)
            .unwrap_or_else(|_| SseEvent::default().event("event").data("{}"));
        Ok::<_, Infallible>(frame)
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
