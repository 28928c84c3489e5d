//! Client-side message cache
//!
//! Keeps one ordered, duplicate-free message list per open conversation by
//! merging three inputs through the shared identity rule from
//! `message-identity`:
//! - the newest history page (served from a short-TTL [`PageCache`] when fresh)
//! - older pages fetched with an opaque cursor
//! - live insert/update events from a per-workspace [`LiveHub`]
//!
//! Views never open their own upstream subscription; they receive events from
//! a hub handle and filter on `conversation_id`.

mod error;
mod http;
mod hub;
mod page_cache;
mod source;
mod view;

pub use error::{CacheError, CacheResult};
pub use http::{HttpHistorySource, SseLiveSource};
pub use hub::{LiveHub, LiveSubscription};
pub use page_cache::{CacheKey, CachedPage, PageCache, DEFAULT_TTL, SWEEP_FACTOR};
pub use source::{HistorySource, LiveSource, LiveStream, Page};
pub use view::{ConversationView, LiveApply, ViewState, DEFAULT_PAGE_SIZE};
