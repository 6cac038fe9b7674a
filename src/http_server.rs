use crate::publisher::StatePublisher;
use crate::summary::ActivitySummary;
use crate::types::StreamView;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Clone)]
struct ServerState {
    publisher: StatePublisher,
}

pub fn router(publisher: StatePublisher) -> Router {
    Router::new()
        .route("/stream/state", get(get_state))
        .route("/stream/summary", get(get_summary))
        .route("/stream/events", get(stream_events))
        .with_state(ServerState { publisher })
}

/// Bind the read surface on `bind` and serve it in the background.
/// Returns the bound port.
pub async fn start(bind: &str, publisher: StatePublisher) -> Result<u16, String> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| format!("failed to bind HTTP server on {bind}: {e}"))?;
    let port = listener
        .local_addr()
        .map_err(|e| format!("failed to read bound address: {e}"))?
        .port();
    info!(port, "activity HTTP surface bound");

    let app = router(publisher);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("activity HTTP surface error: {e}");
        }
    });

    Ok(port)
}

async fn get_state(State(state): State<ServerState>) -> Json<StreamView> {
    Json(state.publisher.get_snapshot())
}

async fn get_summary(State(state): State<ServerState>) -> Json<ActivitySummary> {
    Json(ActivitySummary::from_view(&state.publisher.get_snapshot()))
}

/// Server-sent events: one `state` event per view from [`view_stream`].
async fn stream_events(
    State(state): State<ServerState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = view_stream(&state.publisher).map(|view| {
        let event = match Event::default().event("state").json_data(&view) {
            Ok(event) => event,
            Err(e) => {
                warn!("failed to encode stream view: {e}");
                Event::default().comment("encode failed")
            }
        };
        Ok::<_, Infallible>(event)
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// The current view, then every later publish. A reader slower than the
/// publisher skips straight to the latest view. The listener is detached
/// when the stream is dropped.
fn view_stream(publisher: &StatePublisher) -> impl Stream<Item = StreamView> {
    let (tx, rx) = watch::channel(StreamView::default());
    let (current, subscription) = publisher.attach(move |view| {
        tx.send_replace(view.clone());
    });

    stream::unfold(
        (Some(current), rx, subscription),
        |(pending, mut rx, subscription)| async move {
            let view = match pending {
                Some(view) => view,
                None => {
                    rx.changed().await.ok()?;
                    rx.borrow_and_update().clone()
                }
            };
            Some((view, (None, rx, subscription)))
        },
    )
}
