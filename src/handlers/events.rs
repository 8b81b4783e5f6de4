use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default)]
    pub organization_id: Option<String>,
}

/// Server-sent change events, filtered to one organization when asked.
pub async fn change_feed(
    State(state): State<AppState>,
    Query(q): Query<FeedQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let org = q.organization_id;
    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(move |item| {
        match item {
            Ok(ev) if ev.visible_to(org.as_deref()) => match Event::default()
                .event(ev.table)
                .json_data(&ev)
            {
                Ok(event) => Some(Ok(event)),
                Err(e) => {
                    warn!(error = %e, "failed to encode change event");
                    None
                }
            },
            Ok(_) => None,
            // Lagged receivers skip what they missed.
            Err(e) => {
                warn!(error = %e, "change feed subscriber lagged");
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
