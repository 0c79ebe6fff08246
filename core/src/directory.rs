/// User records and the flat directory list used for search.
use crate::error::{Result, StoreError};
use crate::identity::UserKey;
use crate::store::{paths, DocTree};
use serde::{Deserialize, Serialize};
use tracing::info;

/// `users/<key>` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub first_name: String,
    pub last_name: String,
}

impl UserRecord {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// One entry in the flat `directory/users` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    /// Normalized key, not the raw email.
    pub email: UserKey,
}

#[derive(Clone)]
pub struct Directory {
    tree: DocTree,
    retries: usize,
}

impl Directory {
    pub fn new(tree: DocTree, retries: usize) -> Self {
        Self { tree, retries }
    }

    /// Create (or overwrite) a user record and make the user findable
    /// in the flat directory list. The directory entry is deduplicated
    /// by key so re-registration does not grow the list.
    pub fn insert_user(&self, raw_email: &str, record: UserRecord) -> Result<UserKey> {
        let key = UserKey::normalize(raw_email);
        self.tree.write(&paths::user(&key), &record)?;

        let entry = DirectoryEntry {
            name: record.display_name(),
            email: key.clone(),
        };
        self.tree.update(paths::DIRECTORY, self.retries, |current: Option<Vec<DirectoryEntry>>| {
            let mut entries = current.unwrap_or_default();
            match entries.iter_mut().find(|e| e.email == entry.email) {
                Some(existing) => *existing = entry.clone(),
                None => entries.push(entry.clone()),
            }
            (entries, ())
        })?;

        info!("Registered user {} as {}", raw_email, key);
        Ok(key)
    }

    pub fn get_user(&self, key: &UserKey) -> Result<Option<UserRecord>> {
        self.tree.read(&paths::user(key))
    }

    pub fn user_exists(&self, key: &UserKey) -> Result<bool> {
        Ok(self.get_user(key)?.is_some())
    }

    /// Fetch a user record, failing with `UserNotFound` when absent.
    pub fn require_user(&self, key: &UserKey) -> Result<UserRecord> {
        self.get_user(key)?
            .ok_or_else(|| StoreError::UserNotFound(key.to_string()))
    }

    /// All directory entries, in registration order.
    pub fn all(&self) -> Result<Vec<DirectoryEntry>> {
        Ok(self.tree.read(paths::DIRECTORY)?.unwrap_or_default())
    }

    /// Case-insensitive prefix search over display names, for the
    /// new-conversation autocomplete flow.
    pub fn search(&self, query: &str) -> Result<Vec<DirectoryEntry>> {
        let needle = query.to_lowercase();
        Ok(self
            .all()?
            .into_iter()
            .filter(|e| e.name.to_lowercase().starts_with(&needle))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> (tempfile::TempDir, Directory) {
        let dir = tempfile::tempdir().unwrap();
        let tree = DocTree::open(dir.path(), false).unwrap();
        (dir, Directory::new(tree, 3))
    }

    fn record(first: &str, last: &str) -> UserRecord {
        UserRecord {
            first_name: first.to_string(),
            last_name: last.to_string(),
        }
    }

    #[test]
    fn insert_then_lookup() {
        let (_dir, directory) = directory();
        let key = directory.insert_user("alice@gmail.com", record("Alice", "Smith")).unwrap();
        assert_eq!(key.as_str(), "alice-gmail-com");
        assert_eq!(directory.require_user(&key).unwrap().display_name(), "Alice Smith");
    }

    #[test]
    fn missing_user_is_user_not_found() {
        let (_dir, directory) = directory();
        let err = directory.require_user(&UserKey::normalize("ghost@x.com")).unwrap_err();
        assert!(matches!(err, StoreError::UserNotFound(_)));
    }

    #[test]
    fn search_is_prefix_and_case_insensitive() {
        let (_dir, directory) = directory();
        directory.insert_user("alice@x.com", record("Alice", "Smith")).unwrap();
        directory.insert_user("bob@x.com", record("Bob", "Jones")).unwrap();

        let hits = directory.search("ali").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Alice Smith");
        assert!(directory.search("smith").unwrap().is_empty());
    }

    #[test]
    fn reregistration_updates_in_place() {
        let (_dir, directory) = directory();
        directory.insert_user("alice@x.com", record("Alice", "Smith")).unwrap();
        directory.insert_user("alice@x.com", record("Alicia", "Smith")).unwrap();

        let entries = directory.all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Alicia Smith");
    }
}
