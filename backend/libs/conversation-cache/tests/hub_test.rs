//! Integration tests for the per-workspace live hub

use conversation_cache::{CacheResult, LiveHub, LiveSource, LiveStream};
use futures::StreamExt;
use message_identity::{LiveEvent, Message, SenderType};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

/// Hands out mpsc-backed streams and keeps the senders for the test.
#[derive(Default)]
struct ChannelSource {
    subscribes: AtomicUsize,
    senders: Mutex<Vec<mpsc::Sender<CacheResult<LiveEvent>>>>,
}

impl ChannelSource {
    fn sender(&self) -> Option<mpsc::Sender<CacheResult<LiveEvent>>> {
        self.senders.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl LiveSource for ChannelSource {
    async fn subscribe(&self, _workspace_id: Uuid) -> CacheResult<LiveStream> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        self.senders.lock().unwrap().push(tx);
        Ok(ReceiverStream::new(rx).boxed())
    }
}

async fn wait_for_sender(source: &ChannelSource) -> mpsc::Sender<CacheResult<LiveEvent>> {
    for _ in 0..100 {
        if let Some(tx) = source.sender() {
            return tx;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("upstream never subscribed");
}

fn insert(workspace_id: Uuid) -> LiveEvent {
    LiveEvent::Insert {
        workspace_id,
        message: Message::text(Uuid::new_v4(), "hi", SenderType::Contact),
    }
}

#[tokio::test]
async fn test_one_upstream_per_workspace() {
    let source = Arc::new(ChannelSource::default());
    let hub = LiveHub::new(source.clone());
    let workspace_id = Uuid::new_v4();

    let mut a = hub.subscribe(workspace_id);
    let mut b = hub.subscribe(workspace_id);
    assert_eq!(hub.subscriber_count(workspace_id), 2);
    assert_eq!(hub.active_workspaces(), 1);

    let tx = wait_for_sender(&source).await;
    let event = insert(workspace_id);
    tx.send(Ok(event.clone())).await.unwrap();

    let got_a = tokio::time::timeout(Duration::from_secs(1), a.recv()).await.unwrap();
    let got_b = tokio::time::timeout(Duration::from_secs(1), b.recv()).await.unwrap();
    assert_eq!(got_a, Some(event.clone()));
    assert_eq!(got_b, Some(event));
    assert_eq!(source.subscribes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_last_handle_drop_tears_down_upstream() {
    let source = Arc::new(ChannelSource::default());
    let hub = LiveHub::new(source.clone());
    let workspace_id = Uuid::new_v4();

    let a = hub.subscribe(workspace_id);
    let b = hub.subscribe(workspace_id);
    let tx = wait_for_sender(&source).await;

    drop(a);
    assert_eq!(hub.subscriber_count(workspace_id), 1);
    assert!(!tx.is_closed());

    drop(b);
    assert_eq!(hub.subscriber_count(workspace_id), 0);
    assert_eq!(hub.active_workspaces(), 0);

    // aborting the upstream task drops the stream's receiver
    tokio::time::timeout(Duration::from_secs(1), tx.closed())
        .await
        .expect("upstream was not torn down");
}

#[tokio::test]
async fn test_workspaces_are_isolated() {
    let source = Arc::new(ChannelSource::default());
    let hub = LiveHub::new(source.clone());

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    let _a = hub.subscribe(first);
    let _b = hub.subscribe(second);

    assert_eq!(hub.active_workspaces(), 2);
    assert_eq!(hub.subscriber_count(first), 1);
    assert_eq!(hub.subscriber_count(second), 1);
}
