use super::WorkspaceChannels;
use crate::store::MessageStore;
use message_identity::LiveEvent;
use serde::Deserialize;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const CHANGE_CHANNEL: &str = "message_changes";

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Payload emitted by the `notify_message_change` trigger
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangeNotification {
    pub op: String,
    pub workspace_id: Option<Uuid>,
    pub id: Uuid,
}

impl ChangeNotification {
    /// Load the current row and wrap it as a live event.
    ///
    /// `None` for unknown ops, rows outside any workspace, and rows deleted
    /// before the lookup.
    pub async fn resolve(&self, store: &dyn MessageStore) -> Option<LiveEvent> {
        let workspace_id = self.workspace_id?;
        if self.op != "insert" && self.op != "update" {
            return None;
        }

        let message = match store.find_by_id(self.id).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(message_id = %self.id, "Changed message no longer exists");
                return None;
            }
            Err(e) => {
                warn!(message_id = %self.id, error = %e, "Could not load changed message");
                return None;
            }
        };

        Some(if self.op == "insert" {
            LiveEvent::Insert {
                workspace_id,
                message,
            }
        } else {
            LiveEvent::Update {
                workspace_id,
                message,
            }
        })
    }
}

pub fn parse_notification(payload: &str) -> Option<ChangeNotification> {
    match serde_json::from_str::<ChangeNotification>(payload) {
        Ok(notification) => Some(notification),
        Err(e) => {
            warn!(error = %e, "Ignoring malformed change notification");
            None
        }
    }
}

/// LISTEN on the change channel and fan events out per workspace.
///
/// Reconnects after connection loss; runs until the task is aborted.
pub async fn run_change_listener(
    pool: PgPool,
    store: Arc<dyn MessageStore>,
    channels: WorkspaceChannels,
) -> anyhow::Result<()> {
    loop {
        match listen(&pool, store.as_ref(), &channels).await {
            Ok(()) => warn!("Change listener stream ended, reconnecting"),
            Err(e) => error!(error = %e, "Change listener failed, reconnecting"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn listen(
    pool: &PgPool,
    store: &dyn MessageStore,
    channels: &WorkspaceChannels,
) -> Result<(), sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(CHANGE_CHANNEL).await?;
    info!(channel = CHANGE_CHANNEL, "Listening for message changes");

    loop {
        let notification = listener.recv().await?;
        let Some(change) = parse_notification(notification.payload()) else {
            continue;
        };
        // skip the row lookup when nobody is watching the workspace
        let Some(workspace_id) = change.workspace_id else {
            continue;
        };
        if channels.subscriber_count(workspace_id).await == 0 {
            continue;
        }

        if let Some(event) = change.resolve(store).await {
            debug!(
                workspace_id = %workspace_id,
                message_id = %change.id,
                insert = event.is_insert(),
                "Message change"
            );
            channels.broadcast(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use message_identity::{Message, MessageStatus, SenderType};

    #[test]
    fn test_parse_trigger_payload() {
        let workspace_id = Uuid::new_v4();
        let id = Uuid::new_v4();
        let payload = serde_json::json!({"op": "update", "workspace_id": workspace_id, "id": id})
            .to_string();

        let change = parse_notification(&payload).unwrap();
        assert_eq!(change.op, "update");
        assert_eq!(change.workspace_id, Some(workspace_id));
        assert_eq!(change.id, id);
        assert!(parse_notification("not json").is_none());
    }

    #[tokio::test]
    async fn test_resolve_loads_current_row() {
        let store = MemoryStore::new();
        let mut message = Message::text(Uuid::new_v4(), "a".repeat(9_000), SenderType::Contact);
        message.status = MessageStatus::Delivered;
        store.seed_message(message.clone());

        let workspace_id = Uuid::new_v4();
        let change = ChangeNotification {
            op: "update".into(),
            workspace_id: Some(workspace_id),
            id: message.id,
        };

        let event = change.resolve(&store).await.unwrap();
        assert!(!event.is_insert());
        assert_eq!(event.workspace_id(), workspace_id);
        assert_eq!(event.message().status, MessageStatus::Delivered);
        assert_eq!(event.message().content.as_deref().map(str::len), Some(9_000));
    }

    #[tokio::test]
    async fn test_resolve_skips_unknown_op_and_missing_rows() {
        let store = MemoryStore::new();
        let message = Message::text(Uuid::new_v4(), "x", SenderType::Agent);
        store.seed_message(message.clone());

        let delete = ChangeNotification {
            op: "delete".into(),
            workspace_id: Some(Uuid::new_v4()),
            id: message.id,
        };
        assert!(delete.resolve(&store).await.is_none());

        let gone = ChangeNotification {
            op: "insert".into(),
            workspace_id: Some(Uuid::new_v4()),
            id: Uuid::new_v4(),
        };
        assert!(gone.resolve(&store).await.is_none());

        let orphan = ChangeNotification {
            op: "insert".into(),
            workspace_id: None,
            id: message.id,
        };
        assert!(orphan.resolve(&store).await.is_none());
    }
}
