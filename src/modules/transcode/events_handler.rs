use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::{Stream, stream};
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior, interval};
use uuid::Uuid;

use super::handler::failure;
use super::progress::ProgressSnapshot;
use super::service::ProgressFeed;
use crate::state::AppState;

const PUSH_INTERVAL: Duration = Duration::from_secs(1);

enum Cursor {
    Live(watch::Receiver<ProgressSnapshot>, Interval),
    Final(ProgressSnapshot),
    Closed,
}

/// One `progress` event per tick while the job runs, then a single `done`
/// event carrying the terminal snapshot.
pub fn progress_events(
    feed: ProgressFeed,
    period: Duration,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    let start = match feed {
        ProgressFeed::Live(rx) => {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Cursor::Live(rx, ticker)
        }
        ProgressFeed::Settled(snapshot) => Cursor::Final(snapshot),
    };

    stream::unfold(start, |cursor| async move {
        match cursor {
            Cursor::Live(mut rx, mut ticker) => {
                ticker.tick().await;
                let closed = rx.has_changed().is_err();
                let snapshot = *rx.borrow_and_update();

                if closed || snapshot.stage.is_terminal() {
                    let event = Event::default().event("done").json_data(snapshot);
                    Some((event, Cursor::Closed))
                } else {
                    let event = Event::default().event("progress").json_data(snapshot);
                    Some((event, Cursor::Live(rx, ticker)))
                }
            }
            Cursor::Final(snapshot) => {
                let event = Event::default().event("done").json_data(snapshot);
                Some((event, Cursor::Closed))
            }
            Cursor::Closed => None,
        }
    })
}

/// Live progress as server-sent events
#[utoipa::path(
    get,
    path = "/api/v1/transcodes/{id}/events",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "text/event-stream of progress snapshots", body = ProgressSnapshot),
        (status = 404, description = "Job Not Found")
    ),
    tag = "Transcode"
)]
pub async fn progress_stream(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.transcoder.subscribe(id).await {
        Ok(feed) => Sse::new(progress_events(feed, PUSH_INTERVAL))
            .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
            .into_response(),
        Err(e) => failure(e),
    }
}
