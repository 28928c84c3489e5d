use message_identity::LiveEvent;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod listener;

/// Unique identifier for a live-stream subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

struct Subscriber {
    id: SubscriberId,
    sender: UnboundedSender<LiveEvent>,
}

/// Subscribers of one workspace. The registry drops a feed once it is empty.
#[derive(Default)]
struct WorkspaceFeed {
    subscribers: Vec<Subscriber>,
}

impl WorkspaceFeed {
    fn attach(&mut self, sender: UnboundedSender<LiveEvent>) -> SubscriberId {
        let id = SubscriberId::new();
        self.subscribers.push(Subscriber { id, sender });
        id
    }

    fn detach(&mut self, id: SubscriberId) {
        self.subscribers.retain(|s| s.id != id);
    }

    /// Send to every live receiver and forget closed ones. Returns how many
    /// were forgotten.
    fn publish(&mut self, event: &LiveEvent) -> usize {
        let before = self.subscribers.len();
        self.subscribers
            .retain(|subscriber| subscriber.sender.send(event.clone()).is_ok());
        before - self.subscribers.len()
    }

    fn len(&self) -> usize {
        self.subscribers.len()
    }

    fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// Per-workspace fan-out of Message Store change events
///
/// One feed per workspace with at least one subscriber; the feed is torn
/// down as soon as it holds no subscribers, whether they detached or their
/// receivers closed.
#[derive(Default, Clone)]
pub struct WorkspaceChannels {
    feeds: Arc<RwLock<HashMap<Uuid, WorkspaceFeed>>>,
}

impl WorkspaceChannels {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_subscriber(
        &self,
        workspace_id: Uuid,
    ) -> (SubscriberId, UnboundedReceiver<LiveEvent>) {
        let (tx, rx) = unbounded_channel();

        let mut feeds = self.feeds.write().await;
        let feed = feeds.entry(workspace_id).or_default();
        let subscriber_id = feed.attach(tx);

        tracing::debug!(
            workspace_id = %workspace_id,
            subscribers = feed.len(),
            "Added live subscriber"
        );

        (subscriber_id, rx)
    }

    pub async fn remove_subscriber(&self, workspace_id: Uuid, subscriber_id: SubscriberId) {
        let mut feeds = self.feeds.write().await;
        if let Some(feed) = feeds.get_mut(&workspace_id) {
            feed.detach(subscriber_id);
        }
        Self::release_if_empty(&mut feeds, workspace_id);
    }

    /// Deliver to every subscriber of the event's workspace.
    pub async fn broadcast(&self, event: LiveEvent) {
        let workspace_id = event.workspace_id();
        let mut feeds = self.feeds.write().await;
        let Some(feed) = feeds.get_mut(&workspace_id) else {
            return;
        };

        let closed = feed.publish(&event);
        if closed > 0 {
            tracing::debug!(
                workspace_id = %workspace_id,
                dropped = closed,
                active = feed.len(),
                "Cleaned up closed live subscribers"
            );
        }
        Self::release_if_empty(&mut feeds, workspace_id);
    }

    fn release_if_empty(feeds: &mut HashMap<Uuid, WorkspaceFeed>, workspace_id: Uuid) {
        if feeds.get(&workspace_id).is_some_and(WorkspaceFeed::is_empty) {
            feeds.remove(&workspace_id);
            tracing::debug!(workspace_id = %workspace_id, "Released empty workspace feed");
        }
    }

    pub async fn subscriber_count(&self, workspace_id: Uuid) -> usize {
        self.feeds
            .read()
            .await
            .get(&workspace_id)
            .map(WorkspaceFeed::len)
            .unwrap_or(0)
    }

    pub async fn workspace_count(&self) -> usize {
        self.feeds.read().await.len()
    }
}
