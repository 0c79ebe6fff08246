/// Per-user conversation index — the ordered list of conversation
/// summaries shown in a user's chat list.
use crate::error::Result;
use crate::identity::UserKey;
use crate::store::{paths, DocTree};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Denormalized preview of the most recent message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestMessage {
    pub date: String,
    pub text: String,
    pub is_read: bool,
}

/// One entry in a user's conversation index. Each participant stores
/// their own copy; the two copies share an `id` but are independent
/// documents with no referential integrity between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// `conversation_<firstMessageId>`; unique within one user's index.
    pub id: String,
    /// The other participant.
    pub peer: UserKey,
    /// Display name shown for this conversation.
    pub name: String,
    pub latest_message: LatestMessage,
}

#[derive(Clone)]
pub struct ConversationIndex {
    tree: DocTree,
    retries: usize,
}

impl ConversationIndex {
    pub fn new(tree: DocTree, retries: usize) -> Self {
        Self { tree, retries }
    }

    /// Append a summary to the end of the user's list, creating the
    /// list document if the user has none yet.
    pub fn append(&self, user: &UserKey, summary: ConversationSummary) -> Result<()> {
        let path = paths::conversations(user);
        self.tree.update(&path, self.retries, |current: Option<Vec<ConversationSummary>>| {
            let mut list = current.unwrap_or_default();
            list.push(summary.clone());
            (list, ())
        })
    }

    /// Replace the `latest_message` of the first summary matching
    /// `conversation_id`; if no summary matches, append `fallback`
    /// instead. Covers the peer who has no local copy yet (first
    /// message arriving from the other direction). Never errors on
    /// absence.
    pub fn upsert_latest_message(
        &self,
        user: &UserKey,
        conversation_id: &str,
        preview: LatestMessage,
        fallback: ConversationSummary,
    ) -> Result<()> {
        let path = paths::conversations(user);
        self.tree.update(&path, self.retries, |current: Option<Vec<ConversationSummary>>| {
            let mut list = current.unwrap_or_default();
            match list.iter_mut().find(|s| s.id == conversation_id) {
                Some(summary) => summary.latest_message = preview.clone(),
                None => {
                    debug!(
                        "No summary for {} in {}'s index, appending fallback",
                        conversation_id, user
                    );
                    list.push(fallback.clone());
                }
            }
            (list, ())
        })
    }

    /// Remove the first summary matching `conversation_id`. Absence is
    /// a silent no-op; the return value says whether anything was
    /// removed.
    pub fn remove(&self, user: &UserKey, conversation_id: &str) -> Result<bool> {
        let path = paths::conversations(user);
        self.tree.update(&path, self.retries, |current: Option<Vec<ConversationSummary>>| {
            let mut list = current.unwrap_or_default();
            let removed = match list.iter().position(|s| s.id == conversation_id) {
                Some(position) => {
                    list.remove(position);
                    true
                }
                None => {
                    debug!("No summary {} in {}'s index to remove", conversation_id, user);
                    false
                }
            };
            (list, removed)
        })
    }

    /// Full ordered read of the user's index. No pagination.
    pub fn list(&self, user: &UserKey) -> Result<Vec<ConversationSummary>> {
        Ok(self
            .tree
            .read(&paths::conversations(user))?
            .unwrap_or_default())
    }
}
