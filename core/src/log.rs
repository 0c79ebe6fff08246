/// Per-conversation message log.
///
/// The store has no partial-append primitive: every append is a full
/// read-modify-write of the list document. The version check on the
/// write-back is what keeps two concurrent senders from erasing each
/// other's message.
use crate::codec;
use crate::error::Result;
use crate::message::{Message, MessageRecord};
use crate::store::{paths, DocTree};
use tracing::warn;

#[derive(Clone)]
pub struct MessageLog {
    tree: DocTree,
    retries: usize,
}

impl MessageLog {
    pub fn new(tree: DocTree, retries: usize) -> Self {
        Self { tree, retries }
    }

    /// Append one record; missing log reads as empty. Logs are
    /// append-only — there is no edit or delete for individual records.
    pub fn append(&self, conversation_id: &str, record: MessageRecord) -> Result<()> {
        let path = paths::messages(conversation_id);
        self.tree.update(&path, self.retries, |current: Option<Vec<MessageRecord>>| {
            let mut records = current.unwrap_or_default();
            records.push(record.clone());
            (records, ())
        })
    }

    /// Full read of the raw stored records, in insertion order.
    pub fn read_records(&self, conversation_id: &str) -> Result<Vec<MessageRecord>> {
        Ok(self
            .tree
            .read(&paths::messages(conversation_id))?
            .unwrap_or_default())
    }

    /// Full read of the raw records, dropping any record that no
    /// longer decodes. This is the wire-facing read: clients never see
    /// records the codec would reject.
    pub fn read_valid_records(&self, conversation_id: &str) -> Result<Vec<MessageRecord>> {
        let records = self.read_records(conversation_id)?;
        Ok(records
            .into_iter()
            .filter(|record| match codec::decode(record) {
                Ok(_) => true,
                Err(e) => {
                    warn!("Skipping undecodable record in {}: {}", conversation_id, e);
                    false
                }
            })
            .collect())
    }

    /// Full decoded read, in insertion order. A record that fails to
    /// decode is skipped (and logged) rather than failing the batch.
    pub fn read_all(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let records = self.read_records(conversation_id)?;
        let total = records.len();
        let mut messages = Vec::with_capacity(total);
        for record in &records {
            match codec::decode(record) {
                Ok(message) => messages.push(message),
                Err(e) => warn!("Skipping undecodable record in {}: {}", conversation_id, e),
            }
        }
        if messages.len() < total {
            warn!(
                "Conversation {}: {} of {} records skipped on read",
                conversation_id,
                total - messages.len(),
                total
            );
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::UserKey;
    use crate::message::{Message, MessageKind};

    fn log() -> (tempfile::TempDir, MessageLog) {
        let dir = tempfile::tempdir().unwrap();
        let tree = DocTree::open(dir.path(), false).unwrap();
        (dir, MessageLog::new(tree, 5))
    }

    fn record(id: &str, text: &str) -> MessageRecord {
        codec::encode(&Message {
            id: id.to_string(),
            sender: UserKey::normalize("a@x.com"),
            sender_name: "Alice".to_string(),
            sent_at: "2026-02-10T12:00:00+00:00".to_string(),
            kind: MessageKind::Text(text.to_string()),
        })
    }

    #[test]
    fn append_preserves_insertion_order() {
        let (_dir, log) = log();
        log.append("conversation_1", record("m1", "first")).unwrap();
        log.append("conversation_1", record("m2", "second")).unwrap();

        let ids: Vec<_> = log
            .read_all("conversation_1")
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn missing_log_reads_as_empty() {
        let (_dir, log) = log();
        assert!(log.read_all("conversation_none").unwrap().is_empty());
    }

    #[test]
    fn undecodable_record_is_skipped_not_fatal() {
        let (_dir, log) = log();
        log.append("conversation_1", record("m1", "ok")).unwrap();

        let mut bad = record("m2", "");
        bad.kind = "location".to_string();
        bad.content = "garbage".to_string();
        log.append("conversation_1", bad).unwrap();

        log.append("conversation_1", record("m3", "also ok")).unwrap();

        let ids: Vec<_> = log
            .read_all("conversation_1")
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["m1", "m3"]);
        // Raw read still returns all three; the wire-facing read drops
        // the bad one.
        assert_eq!(log.read_records("conversation_1").unwrap().len(), 3);
        let valid = log.read_valid_records("conversation_1").unwrap();
        assert_eq!(valid.len(), 2);
        assert!(valid.iter().all(|r| r.id != "m2"));
    }
}
