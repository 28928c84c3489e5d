//! # Inbound Reconciler
//!
//! Folds normalised provider events into the Message Store without creating
//! duplicate rows. Every failure is logged and counted; nothing propagates to
//! the webhook handler, since providers redeliver on handler errors.

use super::webhook::{InboundEvent, InboundMessage, StatusUpdate};
use crate::metrics;
use crate::store::{Directory, InsertOutcome, MessagePatch, MessageStore, StoreResult};
use chrono::Utc;
use message_identity::{meta, Message, MessageStatus, Provider, SenderType};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Rows scanned when pairing an echo with a pre-saved row that has no
/// provider id yet.
const ECHO_SCAN_LIMIT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconciled {
    Matched,
    Inserted,
    Unmatched,
    Ignored,
}

impl Reconciled {
    fn as_str(&self) -> &'static str {
        match self {
            Reconciled::Matched => "matched",
            Reconciled::Inserted => "inserted",
            Reconciled::Unmatched => "unmatched",
            Reconciled::Ignored => "ignored",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub processed: usize,
    pub matched: usize,
    pub inserted: usize,
    pub unmatched: usize,
    pub ignored: usize,
    pub failed: usize,
}

impl ReconcileSummary {
    fn record(&mut self, result: Reconciled) {
        self.processed += 1;
        match result {
            Reconciled::Matched => self.matched += 1,
            Reconciled::Inserted => self.inserted += 1,
            Reconciled::Unmatched => self.unmatched += 1,
            Reconciled::Ignored => self.ignored += 1,
        }
    }
}

pub struct InboundReconciler {
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn Directory>,
}

impl InboundReconciler {
    pub fn new(store: Arc<dyn MessageStore>, directory: Arc<dyn Directory>) -> Self {
        Self { store, directory }
    }

    pub async fn process(
        &self,
        provider: Provider,
        connection_id: Uuid,
        events: Vec<InboundEvent>,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        for event in events {
            let kind = event.kind();
            let result = match &event {
                InboundEvent::Message(message) => {
                    self.apply_message(provider, connection_id, message).await
                }
                InboundEvent::Status(update) => self.apply_status(connection_id, update).await,
            };

            match result {
                Ok(result) => {
                    metrics::record_reconcile(kind, result.as_str());
                    summary.record(result);
                }
                Err(e) => {
                    error!(connection_id = %connection_id, kind, error = %e, "Reconciliation failed");
                    metrics::record_reconcile(kind, "failed");
                    summary.processed += 1;
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    async fn apply_message(
        &self,
        provider: Provider,
        connection_id: Uuid,
        inbound: &InboundMessage,
    ) -> StoreResult<Reconciled> {
        let pid = inbound.provider_message_id.as_str();

        if let Some(existing) = self.store.find_by_provider_id(connection_id, pid).await? {
            let patch = echo_patch(provider, &existing, inbound);
            self.store.update(existing.id, &patch).await?;
            debug!(message_id = %existing.id, provider_message_id = %pid, "Merged provider echo");
            return Ok(Reconciled::Matched);
        }

        let Some(conversation) = self
            .directory
            .conversation_for_contact(connection_id, &inbound.phone_number)
            .await?
        else {
            warn!(
                connection_id = %connection_id,
                provider_message_id = %pid,
                "No conversation for inbound message, dropping"
            );
            return Ok(Reconciled::Unmatched);
        };

        if inbound.from_me {
            if let Some(pending) = self.pending_echo_match(conversation.id, inbound).await? {
                let patch = echo_patch(provider, &pending, inbound);
                self.store.update(pending.id, &patch).await?;
                info!(
                    message_id = %pending.id,
                    provider_message_id = %pid,
                    "Paired echo with pre-saved message"
                );
                return Ok(Reconciled::Matched);
            }
        }

        let message = inbound_row(provider, conversation.id, inbound);
        match self.store.insert(&message).await? {
            InsertOutcome::Inserted(row) => {
                info!(
                    conversation_id = %conversation.id,
                    message_id = %row.id,
                    provider_message_id = %pid,
                    from_me = inbound.from_me,
                    "Stored inbound message"
                );
                Ok(Reconciled::Inserted)
            }
            InsertOutcome::Existing(row) => {
                debug!(message_id = %row.id, provider_message_id = %pid, "Inbound message already stored");
                Ok(Reconciled::Matched)
            }
        }
    }

    /// A message typed on our side whose relay write-back has not landed
    /// yet: still `sending`, no provider id, same payload.
    async fn pending_echo_match(
        &self,
        conversation_id: Uuid,
        inbound: &InboundMessage,
    ) -> StoreResult<Option<Message>> {
        let recent = self
            .store
            .history(conversation_id, ECHO_SCAN_LIMIT, None)
            .await?;

        Ok(recent.into_iter().find(|m| {
            m.status == MessageStatus::Sending
                && m.sender_type != SenderType::Contact
                && m.evolution_key_id.is_none()
                && m.provider_msg_id().is_none()
                && m.message_type == inbound.message_type
                && m.content.as_deref().unwrap_or_default().trim()
                    == inbound.content.as_deref().unwrap_or_default().trim()
        }))
    }

    async fn apply_status(&self, connection_id: Uuid, update: &StatusUpdate) -> StoreResult<Reconciled> {
        let pid = update.provider_message_id.as_str();
        let Some(existing) = self.store.find_by_provider_id(connection_id, pid).await? else {
            warn!(
                connection_id = %connection_id,
                provider_message_id = %pid,
                status = %update.status,
                "Status update for unknown message, dropping"
            );
            return Ok(Reconciled::Unmatched);
        };

        if !existing.status.can_transition_to(update.status) {
            debug!(
                message_id = %existing.id,
                current = %existing.status,
                incoming = %update.status,
                "Ignoring non-forward status update"
            );
            return Ok(Reconciled::Ignored);
        }

        match self
            .store
            .update(existing.id, &MessagePatch::status(update.status))
            .await?
        {
            Some(row) => {
                debug!(message_id = %row.id, status = %row.status, "Status advanced");
                Ok(Reconciled::Matched)
            }
            None => Ok(Reconciled::Unmatched),
        }
    }
}

/// Fill correlation and media gaps on a row we already hold. Status only
/// moves to `sent` for our own messages; `external_id` is never replaced.
fn echo_patch(provider: Provider, existing: &Message, inbound: &InboundMessage) -> MessagePatch {
    let pid = &inbound.provider_message_id;
    let mut patch = MessagePatch::default();

    if inbound.from_me {
        patch.status = Some(MessageStatus::Sent);
    }
    if existing.evolution_key_id.is_none() {
        patch.evolution_key_id = Some(pid.clone());
    }
    if existing.provider().is_none() {
        patch
            .metadata
            .insert(meta::PROVIDER.into(), json!(provider.as_str()));
    }
    if provider == Provider::Zapi && existing.provider_msg_id().is_none() {
        patch.metadata.insert(meta::PROVIDER_MSG_ID.into(), json!(pid));
    }
    if existing.file_url.is_none() {
        patch.file_url = inbound.file_url.clone();
        patch.file_name = inbound.file_name.clone();
        patch.mime_type = inbound.mime_type.clone();
    }
    patch
}

fn inbound_row(provider: Provider, conversation_id: Uuid, inbound: &InboundMessage) -> Message {
    let sender_type = if inbound.from_me {
        SenderType::User
    } else {
        SenderType::Contact
    };
    let mut message = Message::text(
        conversation_id,
        inbound.content.clone().unwrap_or_default(),
        sender_type,
    );

    message.message_type = inbound.message_type;
    message.status = if inbound.from_me {
        MessageStatus::Sent
    } else {
        MessageStatus::Delivered
    };
    message.external_id = Some(inbound.provider_message_id.clone());
    message.evolution_key_id = Some(inbound.provider_message_id.clone());
    message.file_url = inbound.file_url.clone();
    message.file_name = inbound.file_name.clone();
    message.mime_type = inbound.mime_type.clone();
    message.created_at = inbound.timestamp.unwrap_or_else(Utc::now);
    message
        .metadata
        .insert(meta::PROVIDER.into(), json!(provider.as_str()));
    message.metadata.insert(
        meta::PROVIDER_MSG_ID.into(),
        json!(inbound.provider_message_id),
    );
    message
}
