use crate::LiveSource;
use futures::StreamExt;
use message_identity::LiveEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

struct Channel {
    sender: broadcast::Sender<LiveEvent>,
    subscribers: usize,
    upstream: JoinHandle<()>,
}

type Channels = Arc<Mutex<HashMap<Uuid, Channel>>>;

/// One upstream live subscription per workspace, shared by every view in it.
///
/// Handles are reference counted; the upstream task is aborted when the last
/// [`LiveSubscription`] for a workspace is dropped.
#[derive(Clone)]
pub struct LiveHub {
    source: Arc<dyn LiveSource>,
    channels: Channels,
}

impl LiveHub {
    pub fn new(source: Arc<dyn LiveSource>) -> Self {
        Self {
            source,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Attach to the workspace feed, starting the upstream on first use.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, workspace_id: Uuid) -> LiveSubscription {
        let mut channels = self.channels.lock();
        let channel = channels.entry(workspace_id).or_insert_with(|| {
            let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
            let upstream = spawn_upstream(self.source.clone(), workspace_id, sender.clone());
            info!(workspace_id = %workspace_id, "Started live upstream");
            Channel {
                sender,
                subscribers: 0,
                upstream,
            }
        });
        channel.subscribers += 1;

        debug!(
            workspace_id = %workspace_id,
            subscribers = channel.subscribers,
            "Added live subscriber"
        );

        LiveSubscription {
            workspace_id,
            receiver: channel.sender.subscribe(),
            channels: self.channels.clone(),
        }
    }

    pub fn subscriber_count(&self, workspace_id: Uuid) -> usize {
        self.channels
            .lock()
            .get(&workspace_id)
            .map(|c| c.subscribers)
            .unwrap_or(0)
    }

    pub fn active_workspaces(&self) -> usize {
        self.channels.lock().len()
    }
}

fn spawn_upstream(
    source: Arc<dyn LiveSource>,
    workspace_id: Uuid,
    sender: broadcast::Sender<LiveEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match source.subscribe(workspace_id).await {
                Ok(mut stream) => {
                    while let Some(item) = stream.next().await {
                        match item {
                            // send only fails while no view is attached
                            Ok(event) => {
                                let _ = sender.send(event);
                            }
                            Err(e) => {
                                warn!(workspace_id = %workspace_id, error = %e, "Live stream error");
                            }
                        }
                    }
                    warn!(workspace_id = %workspace_id, "Live stream ended, reconnecting");
                }
                Err(e) => {
                    warn!(workspace_id = %workspace_id, error = %e, "Live subscribe failed, retrying");
                }
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    })
}

/// Handle on a workspace feed. Dropping it releases one reference.
pub struct LiveSubscription {
    workspace_id: Uuid,
    receiver: broadcast::Receiver<LiveEvent>,
    channels: Channels,
}

impl LiveSubscription {
    pub fn workspace_id(&self) -> Uuid {
        self.workspace_id
    }

    /// Next event, or `None` once the workspace channel is gone.
    pub async fn recv(&mut self) -> Option<LiveEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(workspace_id = %self.workspace_id, skipped, "Live subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        let mut channels = self.channels.lock();
        let Some(channel) = channels.get_mut(&self.workspace_id) else {
            return;
        };

        channel.subscribers = channel.subscribers.saturating_sub(1);
        if channel.subscribers == 0 {
            if let Some(channel) = channels.remove(&self.workspace_id) {
                channel.upstream.abort();
            }
            info!(workspace_id = %self.workspace_id, "Stopped live upstream, no subscribers left");
        }
    }
}
