//! Server-sent job event stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use comfybot_core::types::{GuildId, UserId};
use comfybot_events::JobEvent;

use crate::state::AppState;

/// Optional filters for GET /events.
#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    pub guild_id: Option<GuildId>,
    pub user_id: Option<UserId>,
}

impl EventFilter {
    fn matches(&self, event: &JobEvent) -> bool {
        self.guild_id.is_none_or(|g| g == event.guild_id)
            && self.user_id.is_none_or(|u| u == event.user_id)
    }
}

/// GET /api/v1/events
///
/// One SSE message per [`JobEvent`], named by its status. Subscribers that
/// fall behind skip the missed events.
pub async fn stream_events(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.event_bus.subscribe()).filter_map(move |item| {
        let event = match item {
            Ok(event) if filter.matches(&event) => to_sse(&event),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event stream subscriber lagged");
                None
            }
        };
        futures::future::ready(event.map(Ok))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn to_sse(event: &JobEvent) -> Option<Event> {
    match Event::default().event(event.event_name()).json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            tracing::error!(job_id = %event.job_id, error = %e, "Failed to encode job event");
            None
        }
    }
}
