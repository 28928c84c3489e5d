use crate::Message;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Insert/update notification from the Message Store's change stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    Insert { workspace_id: Uuid, message: Message },
    Update { workspace_id: Uuid, message: Message },
}

impl LiveEvent {
    pub fn workspace_id(&self) -> Uuid {
        match self {
            LiveEvent::Insert { workspace_id, .. } | LiveEvent::Update { workspace_id, .. } => {
                *workspace_id
            }
        }
    }

    pub fn message(&self) -> &Message {
        match self {
            LiveEvent::Insert { message, .. } | LiveEvent::Update { message, .. } => message,
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.message().conversation_id
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, LiveEvent::Insert { .. })
    }
}
