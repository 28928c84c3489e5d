use crate::CacheResult;
use futures::stream::BoxStream;
use message_identity::{LiveEvent, Message};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One page of history, newest first as served by the delivery service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<Message>,
    /// Opaque cursor for the next older page; `None` at the start of history.
    #[serde(rename = "nextBefore", default, skip_serializing_if = "Option::is_none")]
    pub next_before: Option<String>,
}

#[async_trait::async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_page(
        &self,
        workspace_id: Uuid,
        conversation_id: Uuid,
        limit: u32,
        before: Option<&str>,
    ) -> CacheResult<Page>;
}

pub type LiveStream = BoxStream<'static, CacheResult<LiveEvent>>;

/// Upstream change feed for one workspace.
#[async_trait::async_trait]
pub trait LiveSource: Send + Sync {
    async fn subscribe(&self, workspace_id: Uuid) -> CacheResult<LiveStream>;
}
