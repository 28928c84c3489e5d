//! # Message identity
//!
//! Shared message model and the identity rules used on both sides of the
//! delivery pipeline.
//!
//! A logical chat message can be known by several identifiers at once:
//!
//! - `id`: the Message Store primary key
//! - `external_id`: the caller's idempotency key, or the Evolution key id once
//!   the relay acknowledged the send
//! - `metadata.client_message_id`: the idempotency key, kept after the
//!   Evolution write-back replaces `external_id`
//! - provider-linked ids: `evolution_key_id` and `metadata.provider_msg_id`
//!
//! Two messages that share any of these are the same message. The resolver
//! ([`candidate_keys`]) and the merge step ([`merge_into`]) are pure functions
//! so the server-side reconciler and the client-side cache apply the exact
//! same rule.
//!
//! ```text
//! candidate ──► find_match (id → external_id → client key → provider ids)
//!                   │ match                      │ none
//!                   ▼                            ▼
//!             merge (candidate wins)          append
//!                   │
//!                   ▼
//!          collapse overlapping entries ──► sort by (created_at, id)
//! ```

mod identity;
mod live;
mod message;
mod status;

pub use identity::{
    candidate_keys, client_keys, collapse_overlaps, find_match, merge, merge_batch, merge_into,
    provider_ids, same_message, sort_chronological, CandidateKey, MatchRule, MergeOutcome,
};
pub use live::LiveEvent;
pub use message::{meta, Message, MessageType, Provider, SenderType};
pub use status::MessageStatus;

use thiserror::Error;

/// Raised when a stored enum column holds a value this build does not know.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
