use crate::Page;
use dashmap::DashMap;
use message_identity::Message;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Entries older than this multiple of the TTL are evicted by `sweep`.
pub const SWEEP_FACTOR: u32 = 3;

pub type CacheKey = (Uuid, Uuid);

#[derive(Debug, Clone)]
pub struct CachedPage {
    pub messages: Vec<Message>,
    pub next_before: Option<String>,
    pub fetched_at: Instant,
}

/// First-page cache keyed by (workspace, conversation)
#[derive(Debug)]
pub struct PageCache {
    entries: DashMap<CacheKey, CachedPage>,
    ttl: Duration,
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl PageCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh entry only; expired entries read as a miss but stay until swept.
    pub fn get(&self, key: CacheKey) -> Option<CachedPage> {
        self.entries
            .get(&key)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.clone())
    }

    pub fn put(&self, key: CacheKey, page: &Page) {
        self.put_at(key, page, Instant::now());
    }

    pub(crate) fn put_at(&self, key: CacheKey, page: &Page, fetched_at: Instant) {
        self.entries.insert(
            key,
            CachedPage {
                messages: page.items.clone(),
                next_before: page.next_before.clone(),
                fetched_at,
            },
        );
    }

    pub fn invalidate(&self, key: CacheKey) -> bool {
        self.entries.remove(&key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict entries older than `SWEEP_FACTOR × ttl`. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let max_age = self.ttl * SWEEP_FACTOR;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.fetched_at.elapsed() < max_age);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Swept stale page cache entries");
        }
        removed
    }

    /// Run `sweep` once per TTL until the returned handle is aborted.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.ttl);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use message_identity::SenderType;

    fn page(conversation: Uuid) -> Page {
        Page {
            items: vec![Message::text(conversation, "hi", SenderType::Contact)],
            next_before: Some("cursor".into()),
        }
    }

    fn ago(secs: u64) -> Instant {
        Instant::now()
            .checked_sub(Duration::from_secs(secs))
            .expect("monotonic clock too close to boot")
    }

    #[test]
    fn test_fresh_entry_is_served() {
        let cache = PageCache::new(Duration::from_secs(30));
        let key = (Uuid::new_v4(), Uuid::new_v4());
        cache.put(key, &page(key.1));

        let hit = cache.get(key).unwrap();
        assert_eq!(hit.messages.len(), 1);
        assert_eq!(hit.next_before.as_deref(), Some("cursor"));
    }

    #[test]
    fn test_expired_entry_is_a_miss_but_not_evicted() {
        let cache = PageCache::new(Duration::from_secs(30));
        let key = (Uuid::new_v4(), Uuid::new_v4());
        cache.put_at(key, &page(key.1), ago(45));

        assert!(cache.get(key).is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.sweep(), 0);
    }

    #[test]
    fn test_sweep_evicts_entries_past_three_ttls() {
        let cache = PageCache::new(Duration::from_secs(30));
        let stale = (Uuid::new_v4(), Uuid::new_v4());
        let recent = (Uuid::new_v4(), Uuid::new_v4());
        cache.put_at(stale, &page(stale.1), ago(95));
        cache.put(recent, &page(recent.1));

        assert_eq!(cache.sweep(), 1);
        assert!(cache.get(recent).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let cache = PageCache::default();
        let key = (Uuid::new_v4(), Uuid::new_v4());
        cache.put(key, &page(key.1));

        assert!(cache.invalidate(key));
        assert!(!cache.invalidate(key));
        assert!(cache.is_empty());
    }
}
