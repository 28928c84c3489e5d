use crate::{CacheError, CacheResult, HistorySource, PageCache};
use message_identity::{
    find_match, merge_batch, merge_into, sort_chronological, LiveEvent, Message, MessageStatus,
    MergeOutcome,
};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Idle,
    Loading,
    Ready,
    LoadingMore,
}

/// What a live event did to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveApply {
    Inserted,
    Merged,
    /// Event belongs to another conversation (or none is open).
    Ignored,
    /// Update for a message this view never saw.
    Dropped,
}

/// Ordered, duplicate-free message list for the conversation currently open
/// in one consumer.
///
/// Every batch (initial page, older page, live event, optimistic insert) goes
/// through the same identity merge, and the list is re-sorted afterwards, so
/// [`messages`](Self::messages) is always `created_at` ascending no matter
/// which input arrived first.
pub struct ConversationView {
    workspace_id: Uuid,
    history: Arc<dyn HistorySource>,
    cache: Arc<PageCache>,
    page_size: u32,
    state: ViewState,
    conversation_id: Option<Uuid>,
    messages: Vec<Message>,
    next_before: Option<String>,
}

impl ConversationView {
    pub fn new(workspace_id: Uuid, history: Arc<dyn HistorySource>, cache: Arc<PageCache>) -> Self {
        Self {
            workspace_id,
            history,
            cache,
            page_size: DEFAULT_PAGE_SIZE,
            state: ViewState::Idle,
            conversation_id: None,
            messages: Vec::new(),
            next_before: None,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn state(&self) -> ViewState {
        self.state
    }

    pub fn workspace_id(&self) -> Uuid {
        self.workspace_id
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        self.conversation_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn has_more(&self) -> bool {
        self.next_before.is_some()
    }

    /// Load the newest page of `conversation_id`.
    ///
    /// Opening a different conversation discards the current list first. A
    /// fresh cache entry is served without a fetch unless `force` is set.
    pub async fn open(&mut self, conversation_id: Uuid, force: bool) -> CacheResult<&[Message]> {
        if self.conversation_id != Some(conversation_id) {
            self.close();
            self.conversation_id = Some(conversation_id);
        }

        let key = (self.workspace_id, conversation_id);
        if !force {
            if let Some(cached) = self.cache.get(key) {
                debug!(conversation_id = %conversation_id, "Serving conversation from page cache");
                merge_batch(&mut self.messages, cached.messages);
                self.next_before = cached.next_before;
                self.state = ViewState::Ready;
                return Ok(&self.messages);
            }
        }

        let previous = self.state;
        self.state = ViewState::Loading;
        let page = match self
            .history
            .fetch_page(self.workspace_id, conversation_id, self.page_size, None)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Initial history fetch failed");
                self.state = if previous == ViewState::Ready {
                    ViewState::Ready
                } else {
                    ViewState::Idle
                };
                return Err(e);
            }
        };

        self.cache.put(key, &page);
        merge_batch(&mut self.messages, page.items);
        self.next_before = page.next_before;
        self.state = ViewState::Ready;
        Ok(&self.messages)
    }

    /// Re-fetch the newest page, bypassing the cache.
    pub async fn refresh(&mut self) -> CacheResult<&[Message]> {
        let conversation_id = self.conversation_id.ok_or(CacheError::NotOpen)?;
        self.open(conversation_id, true).await
    }

    /// Fetch the next older page. Returns how many new entries it added;
    /// `0` once the server reported no further pages.
    pub async fn load_more(&mut self) -> CacheResult<usize> {
        let conversation_id = self.conversation_id.ok_or(CacheError::NotOpen)?;
        if self.state != ViewState::Ready {
            return Err(CacheError::NotOpen);
        }
        let Some(cursor) = self.next_before.clone() else {
            return Ok(0);
        };

        self.state = ViewState::LoadingMore;
        let result = self
            .history
            .fetch_page(self.workspace_id, conversation_id, self.page_size, Some(&cursor))
            .await;
        self.state = ViewState::Ready;

        let page = result?;
        let added = merge_batch(&mut self.messages, page.items);
        self.next_before = page.next_before;
        debug!(conversation_id = %conversation_id, added, has_more = self.has_more(), "Loaded older messages");
        Ok(added)
    }

    /// Apply an insert/update from the workspace feed.
    pub fn apply_live(&mut self, event: &LiveEvent) -> LiveApply {
        let Some(conversation_id) = self.conversation_id else {
            return LiveApply::Ignored;
        };
        if event.conversation_id() != conversation_id || self.state == ViewState::Idle {
            return LiveApply::Ignored;
        }

        let message = event.message().clone();
        if !event.is_insert() && find_match(&self.messages, &message).is_none() {
            debug!(
                conversation_id = %conversation_id,
                message_id = %message.id,
                "Dropping live update for unknown message"
            );
            return LiveApply::Dropped;
        }

        let outcome = merge_into(&mut self.messages, message);
        sort_chronological(&mut self.messages);
        self.cache.invalidate((self.workspace_id, conversation_id));

        match outcome {
            MergeOutcome::Appended => LiveApply::Inserted,
            MergeOutcome::Merged { .. } => LiveApply::Merged,
        }
    }

    /// Show a locally composed message before the server confirms it.
    ///
    /// The entry should carry `external_id = clientMessageId` so the server
    /// row folds onto it when it arrives.
    pub fn insert_optimistic(&mut self, message: Message) -> CacheResult<()> {
        let conversation_id = self.conversation_id.ok_or(CacheError::NotOpen)?;
        if message.conversation_id != conversation_id {
            return Err(CacheError::NotOpen);
        }
        merge_into(&mut self.messages, message);
        sort_chronological(&mut self.messages);
        self.cache.invalidate((self.workspace_id, conversation_id));
        Ok(())
    }

    /// Flag the entry known by `key` (id or external id) as failed after a
    /// send error. Returns false when no entry matched or it can no longer fail.
    pub fn mark_local_failed(&mut self, key: &str) -> bool {
        let entry = self.messages.iter_mut().find(|m| {
            m.id.to_string() == key || m.external_id.as_deref() == Some(key)
        });
        match entry {
            Some(message) if message.status.can_transition_to(MessageStatus::Failed) => {
                message.status = MessageStatus::Failed;
                true
            }
            _ => false,
        }
    }

    /// Back to `Idle`, dropping the in-memory list. Server data is untouched.
    pub fn close(&mut self) {
        self.state = ViewState::Idle;
        self.conversation_id = None;
        self.messages.clear();
        self.next_before = None;
    }
}
