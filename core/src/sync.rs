/// Dual-write synchronizer — the orchestration layer.
///
/// Every conversation mutation touches up to three independent
/// documents (initiator's index, peer's index, the shared message log).
/// Each document write is atomic on its own; nothing spans the round
/// trips between them. A failure part-way through therefore leaves the
/// two sides inconsistent — that window is surfaced to the caller as
/// `PartialWrite` naming the steps that committed, never hidden.
use crate::codec;
use crate::directory::Directory;
use crate::error::{Result, StoreError};
use crate::events::{EventBus, StoreEvent};
use crate::identity::UserKey;
use crate::index::{ConversationIndex, ConversationSummary, LatestMessage};
use crate::log::MessageLog;
use crate::message::{conversation_id_for, Message, MessageRecord};
use crate::store::DocTree;
use tracing::{info, warn};

#[derive(Clone)]
pub struct Synchronizer {
    directory: Directory,
    index: ConversationIndex,
    log: MessageLog,
    events: EventBus,
}

impl Synchronizer {
    pub fn new(tree: DocTree, retries: usize, events: EventBus) -> Self {
        Self {
            directory: Directory::new(tree.clone(), retries),
            index: ConversationIndex::new(tree.clone(), retries),
            log: MessageLog::new(tree, retries),
            events,
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn index(&self) -> &ConversationIndex {
        &self.index
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Create a conversation from its first message: mirror a summary
    /// into both participants' indexes and seed the message log.
    ///
    /// The two summaries share the conversation id but are independent
    /// documents. No automatic retry; a failure after the first index
    /// write reports `PartialWrite`.
    pub async fn create_conversation(
        &self,
        initiator: &UserKey,
        peer: &UserKey,
        peer_display_name: &str,
        first_message: &Message,
    ) -> Result<String> {
        let initiator_record = self.directory.require_user(initiator)?;

        let record = codec::encode(first_message);
        let conversation_id = conversation_id_for(&first_message.id);
        let preview = preview_of(&record);

        let initiator_summary = ConversationSummary {
            id: conversation_id.clone(),
            peer: peer.clone(),
            name: peer_display_name.to_string(),
            latest_message: preview.clone(),
        };
        let peer_summary = ConversationSummary {
            id: conversation_id.clone(),
            peer: initiator.clone(),
            name: initiator_record.display_name(),
            latest_message: preview,
        };

        let mut committed: Vec<&'static str> = Vec::new();

        self.step("create_conversation", &committed, "peer_index", || {
            self.index.append(peer, peer_summary)
        })?;
        committed.push("peer_index");

        self.step("create_conversation", &committed, "initiator_index", || {
            self.index.append(initiator, initiator_summary)
        })?;
        committed.push("initiator_index");

        self.step("create_conversation", &committed, "message_log", || {
            self.log.append(&conversation_id, record.clone())
        })?;

        info!(
            "Created {} between {} and {}",
            conversation_id, initiator, peer
        );
        self.events.emit(StoreEvent::ConversationCreated {
            conversation_id: conversation_id.clone(),
            initiator: initiator.to_string(),
            peer: peer.to_string(),
        });
        Ok(conversation_id)
    }

    /// Append a message to an existing conversation and refresh the
    /// latest-message preview on both participants' indexes. A missing
    /// log is treated as empty; a missing summary on either side is
    /// synthesized from the fallback (first message arriving from the
    /// other direction).
    pub async fn send_message(
        &self,
        conversation_id: &str,
        initiator: &UserKey,
        peer: &UserKey,
        peer_display_name: &str,
        message: &Message,
    ) -> Result<()> {
        let record = codec::encode(message);
        let preview = preview_of(&record);

        // Read before the first write: once a step has committed, every
        // later failure must carry the committed-steps metadata, so no
        // plain read may sit between the writes.
        let initiator_name = self
            .directory
            .get_user(initiator)?
            .map(|r| r.display_name())
            .unwrap_or_else(|| initiator.to_string());

        let mut committed: Vec<&'static str> = Vec::new();

        // Versioned append: two concurrent senders both keep their
        // message instead of last-write-wins on the full list.
        self.step("send_message", &committed, "message_log", || {
            self.log.append(conversation_id, record.clone())
        })?;
        committed.push("message_log");

        let initiator_fallback = ConversationSummary {
            id: conversation_id.to_string(),
            peer: peer.clone(),
            name: peer_display_name.to_string(),
            latest_message: preview.clone(),
        };
        self.step("send_message", &committed, "initiator_index", || {
            self.index.upsert_latest_message(
                initiator,
                conversation_id,
                preview.clone(),
                initiator_fallback,
            )
        })?;
        committed.push("initiator_index");

        // The peer's fallback names the initiator the way the peer
        // would see them: by their directory display name.
        let peer_fallback = ConversationSummary {
            id: conversation_id.to_string(),
            peer: initiator.clone(),
            name: initiator_name,
            latest_message: preview.clone(),
        };
        self.step("send_message", &committed, "peer_index", || {
            self.index
                .upsert_latest_message(peer, conversation_id, preview.clone(), peer_fallback)
        })?;

        self.events.emit(StoreEvent::NewMessage {
            conversation_id: conversation_id.to_string(),
            record,
        });
        Ok(())
    }

    /// Remove the conversation from this user's index only. The peer's
    /// copy survives as an orphan: one-sided delete is the intended
    /// behavior, and no exposed operation deletes both sides.
    pub async fn delete_conversation(&self, user: &UserKey, conversation_id: &str) -> Result<bool> {
        let removed = self.index.remove(user, conversation_id)?;
        if removed {
            info!("{} removed {} from their index", user, conversation_id);
            self.events.emit(StoreEvent::ConversationRemoved {
                conversation_id: conversation_id.to_string(),
                user: user.to_string(),
            });
        }
        Ok(removed)
    }

    /// Run one write step, mapping failure to `PartialWrite` when an
    /// earlier step already committed.
    fn step<T>(
        &self,
        op: &'static str,
        committed: &[&'static str],
        failed: &'static str,
        action: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        action().map_err(|e| {
            if committed.is_empty() {
                e
            } else {
                warn!(
                    "{} left a partial write: committed [{}], failed at {}: {}",
                    op,
                    committed.join(", "),
                    failed,
                    e
                );
                StoreError::PartialWrite {
                    op,
                    committed: committed.join(", "),
                    failed,
                    cause: e.to_string(),
                }
            }
        })
    }
}

fn preview_of(record: &MessageRecord) -> LatestMessage {
    LatestMessage {
        date: record.date.clone(),
        text: record.content.clone(),
        is_read: false,
    }
}
