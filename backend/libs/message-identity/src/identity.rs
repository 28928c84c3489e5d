use crate::Message;
use std::collections::BTreeSet;
use uuid::Uuid;

/// One identifier under which a message may be known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CandidateKey {
    Id(Uuid),
    External(String),
    Client(String),
    Provider(String),
}

/// Which rule matched a candidate to an existing entry, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    Id,
    ExternalId,
    /// Idempotency key, wherever each side currently keeps it
    ClientKey,
    ProviderId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Candidate folded into the entry now at this index.
    Merged { index: usize, rule: MatchRule },
    Appended,
}

/// Provider-linked identifiers: `evolution_key_id` and `metadata.provider_msg_id`.
pub fn provider_ids(message: &Message) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    if let Some(key_id) = message.evolution_key_id.as_deref().filter(|s| !s.is_empty()) {
        ids.insert(key_id.to_string());
    }
    if let Some(provider_id) = message.provider_msg_id() {
        ids.insert(provider_id.to_string());
    }
    ids
}

/// Where the caller's idempotency key may live: `external_id` before the
/// Evolution write-back replaces it, `metadata.client_message_id` always.
pub fn client_keys(message: &Message) -> BTreeSet<&str> {
    [message.external_id.as_deref(), message.client_message_id()]
        .into_iter()
        .flatten()
        .filter(|key| !key.is_empty())
        .collect()
}

pub fn candidate_keys(message: &Message) -> BTreeSet<CandidateKey> {
    let mut keys = BTreeSet::new();
    keys.insert(CandidateKey::Id(message.id));
    if let Some(external_id) = message.external_id.as_deref().filter(|s| !s.is_empty()) {
        keys.insert(CandidateKey::External(external_id.to_string()));
    }
    if let Some(client_id) = message.client_message_id().filter(|s| !s.is_empty()) {
        keys.insert(CandidateKey::Client(client_id.to_string()));
    }
    keys.extend(provider_ids(message).into_iter().map(CandidateKey::Provider));
    keys
}

fn external_eq(a: &Message, b: &Message) -> bool {
    match (a.external_id.as_deref(), b.external_id.as_deref()) {
        (Some(x), Some(y)) => !x.is_empty() && x == y,
        _ => false,
    }
}

fn client_overlap(a: &Message, b: &Message) -> bool {
    let left = client_keys(a);
    !left.is_empty() && client_keys(b).iter().any(|key| left.contains(key))
}

fn provider_overlap(a: &Message, b: &Message) -> bool {
    let left = provider_ids(a);
    if left.is_empty() {
        return false;
    }
    provider_ids(b).iter().any(|id| left.contains(id))
}

/// True when the two messages are the same logical message.
pub fn same_message(a: &Message, b: &Message) -> bool {
    a.id == b.id || external_eq(a, b) || client_overlap(a, b) || provider_overlap(a, b)
}

/// Locate the entry `candidate` should merge into.
///
/// Rules are tried in priority order across the whole list: an `id` match
/// anywhere beats an `external_id` match earlier in the list.
pub fn find_match(existing: &[Message], candidate: &Message) -> Option<(usize, MatchRule)> {
    if let Some(index) = existing.iter().position(|m| m.id == candidate.id) {
        return Some((index, MatchRule::Id));
    }
    if let Some(index) = existing.iter().position(|m| external_eq(m, candidate)) {
        return Some((index, MatchRule::ExternalId));
    }
    if let Some(index) = existing.iter().position(|m| client_overlap(m, candidate)) {
        return Some((index, MatchRule::ClientKey));
    }
    existing
        .iter()
        .position(|m| provider_overlap(m, candidate))
        .map(|index| (index, MatchRule::ProviderId))
}

/// Fold `candidate` onto `existing`.
///
/// Candidate wins every field it carries a value for; metadata is merged
/// shallowly with candidate keys overriding; status only moves forward.
pub fn merge(existing: &Message, candidate: &Message) -> Message {
    let mut metadata = existing.metadata.clone();
    for (key, value) in &candidate.metadata {
        metadata.insert(key.clone(), value.clone());
    }

    Message {
        id: candidate.id,
        external_id: candidate
            .external_id
            .clone()
            .or_else(|| existing.external_id.clone()),
        conversation_id: candidate.conversation_id,
        content: candidate.content.clone().or_else(|| existing.content.clone()),
        message_type: candidate.message_type,
        sender_type: candidate.sender_type,
        sender_id: candidate.sender_id.or(existing.sender_id),
        file_url: candidate.file_url.clone().or_else(|| existing.file_url.clone()),
        file_name: candidate
            .file_name
            .clone()
            .or_else(|| existing.file_name.clone()),
        mime_type: candidate
            .mime_type
            .clone()
            .or_else(|| existing.mime_type.clone()),
        status: existing.status.advance(candidate.status),
        evolution_key_id: candidate
            .evolution_key_id
            .clone()
            .or_else(|| existing.evolution_key_id.clone()),
        metadata,
        reply_to_message_id: candidate.reply_to_message_id.or(existing.reply_to_message_id),
        quoted_message: candidate
            .quoted_message
            .clone()
            .or_else(|| existing.quoted_message.clone()),
        created_at: candidate.created_at,
    }
}

/// Merge entries that overlap the one at `index` into it.
///
/// A merge can give an entry a new identifier that another entry already
/// carries; this keeps the list closed under the identity rule. Returns the
/// final index of the surviving entry.
pub fn collapse_overlaps(list: &mut Vec<Message>, mut index: usize) -> usize {
    loop {
        let overlapping = list
            .iter()
            .enumerate()
            .find(|(j, other)| *j != index && same_message(other, &list[index]))
            .map(|(j, _)| j);

        let Some(j) = overlapping else {
            return index;
        };

        let absorbed = list.remove(j);
        if j < index {
            index -= 1;
        }
        list[index] = merge(&absorbed, &list[index]);
    }
}

/// Merge one candidate into `list` or append it.
pub fn merge_into(list: &mut Vec<Message>, candidate: Message) -> MergeOutcome {
    match find_match(list, &candidate) {
        Some((index, rule)) => {
            list[index] = merge(&list[index], &candidate);
            let index = collapse_overlaps(list, index);
            MergeOutcome::Merged { index, rule }
        }
        None => {
            list.push(candidate);
            MergeOutcome::Appended
        }
    }
}

/// Merge a batch in order, then restore chronological order.
///
/// Returns how many candidates were appended as new entries.
pub fn merge_batch<I>(list: &mut Vec<Message>, batch: I) -> usize
where
    I: IntoIterator<Item = Message>,
{
    let appended = batch
        .into_iter()
        .filter(|candidate| matches!(merge_into(list, candidate.clone()), MergeOutcome::Appended))
        .count();
    sort_chronological(list);
    appended
}

/// `created_at` ascending, ties broken by id.
pub fn sort_chronological(list: &mut [Message]) {
    list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
