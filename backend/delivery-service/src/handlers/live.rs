use crate::realtime::{SubscriberId, WorkspaceChannels};
use crate::state::AppState;
use actix_web::{http::header, web, HttpResponse};
use message_identity::LiveEvent;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::{IntervalStream, UnboundedReceiverStream};
use tokio_stream::{self as stream, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Unregisters the subscriber when the response body is dropped.
struct SubscriptionGuard {
    channels: WorkspaceChannels,
    workspace_id: Uuid,
    subscriber_id: SubscriberId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let channels = self.channels.clone();
        let workspace_id = self.workspace_id;
        let subscriber_id = self.subscriber_id;

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                channels.remove_subscriber(workspace_id, subscriber_id).await;
                debug!(workspace_id = %workspace_id, "Live subscriber disconnected");
            });
        }
    }
}

fn frame(event: &LiveEvent) -> Option<web::Bytes> {
    match serde_json::to_string(event) {
        Ok(json) => Some(web::Bytes::from(format!("data: {json}\n\n"))),
        Err(e) => {
            warn!(error = %e, "Could not encode live event");
            None
        }
    }
}

/// Server-Sent Events stream of message inserts/updates for a workspace
///
/// GET /api/v1/workspaces/{id}/live
pub async fn live_stream(state: web::Data<AppState>, path: web::Path<Uuid>) -> HttpResponse {
    let workspace_id = path.into_inner();
    let (subscriber_id, rx) = state.channels.add_subscriber(workspace_id).await;
    let guard = SubscriptionGuard {
        channels: state.channels.clone(),
        workspace_id,
        subscriber_id,
    };

    let connected = stream::once(web::Bytes::from_static(b": connected\n\n"));
    let events = UnboundedReceiverStream::new(rx).filter_map(move |event| {
        let _ = &guard;
        frame(&event)
    });
    let heartbeats = IntervalStream::new(tokio::time::interval(HEARTBEAT_INTERVAL))
        .skip(1)
        .map(|_| web::Bytes::from_static(b": ping\n\n"));

    let body = connected
        .chain(events.merge(heartbeats))
        .map(Ok::<_, Infallible>);

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(body)
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/v1/workspaces/{id}/live", web::get().to(live_stream));
}
