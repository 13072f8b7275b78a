//! Persistence of per-user memory documents
//!
//! `MemoryStore` is the narrow load/save seam the service persists through.
//! `save` is atomic from the caller's point of view: a reader sees either
//! the previous document or the new one, never a partial write.

use super::item::UserMemory;
use crate::error::{Error, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Load/save access to one `UserMemory` document per user.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Last successfully saved document, or `None` if the user has none
    async fn load(&self, user_id: &str) -> Result<Option<UserMemory>>;

    /// Replace the user's document
    async fn save(&self, user_id: &str, memory: &UserMemory) -> Result<()>;
}

/// In-memory store, for tests and embedding.
pub struct InMemoryStore {
    documents: Arc<RwLock<HashMap<String, UserMemory>>>,
}

impl InMemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of users with a stored document
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Whether no documents are stored
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn load(&self, user_id: &str) -> Result<Option<UserMemory>> {
        Ok(self.documents.read().await.get(user_id).cloned())
    }

    async fn save(&self, user_id: &str, memory: &UserMemory) -> Result<()> {
        check_owner(user_id, memory)?;
        self.documents
            .write()
            .await
            .insert(user_id.to_string(), memory.clone());
        Ok(())
    }
}

/// One pretty-printed JSON document per user under a base directory.
///
/// File names are the hex SHA-256 of the user id, so arbitrary ids map to
/// safe, fixed-length names. Writes go to a temporary file in the same
/// directory which is then renamed over the target.
pub struct JsonFileStore {
    base_dir: PathBuf,
}

impl JsonFileStore {
    /// Create a store rooted at `base_dir`; the directory is created on
    /// first save
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Root directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the document for `user_id`
    pub fn path_for(&self, user_id: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(user_id.as_bytes());
        self.base_dir.join(format!("{:x}.json", hasher.finalize()))
    }
}

#[async_trait]
impl MemoryStore for JsonFileStore {
    async fn load(&self, user_id: &str) -> Result<Option<UserMemory>> {
        let path = self.path_for(user_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut memory: UserMemory = serde_json::from_slice(&bytes).map_err(|e| {
            Error::Persistence(format!("corrupt memory document {}: {}", path.display(), e))
        })?;
        check_owner(user_id, &memory)?;
        memory.normalize()?;

        tracing::debug!(
            user_id,
            memories = memory.total_memories,
            storage_used = memory.storage_used,
            "Loaded memory document"
        );
        Ok(Some(memory))
    }

    async fn save(&self, user_id: &str, memory: &UserMemory) -> Result<()> {
        check_owner(user_id, memory)?;
        tokio::fs::create_dir_all(&self.base_dir).await?;

        let path = self.path_for(user_id);
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let bytes = serde_json::to_vec_pretty(memory)?;

        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Persistence(format!(
                "failed to replace {}: {}",
                path.display(),
                e
            )));
        }

        tracing::debug!(
            user_id,
            memories = memory.total_memories,
            bytes = bytes.len(),
            "Saved memory document"
        );
        Ok(())
    }
}

fn check_owner(user_id: &str, memory: &UserMemory) -> Result<()> {
    if memory.user_id != user_id {
        return Err(Error::Persistence(format!(
            "document for '{}' cannot be stored under '{}'",
            memory.user_id, user_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::item::{MemoryCategory, MemoryItemBuilder};
    use chrono::Utc;

    fn document(user_id: &str, contents: &[&str]) -> UserMemory {
        let mut memory = UserMemory::new(user_id, 1024 * 1024, Utc::now());
        memory.memories = contents
            .iter()
            .map(|c| {
                MemoryItemBuilder::new(MemoryCategory::Fact)
                    .content(*c)
                    .build()
                    .unwrap()
            })
            .collect();
        memory.refresh_stats().unwrap();
        memory
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemoryStore::new();
        assert!(store.load("user-1").await.unwrap().is_none());

        let memory = document("user-1", &["likes tea"]);
        store.save("user-1", &memory).await.unwrap();

        assert_eq!(store.load("user-1").await.unwrap(), Some(memory));
        assert!(store.load("user-2").await.unwrap().is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_in_memory_rejects_foreign_document() {
        let store = InMemoryStore::new();
        let memory = document("user-1", &[]);
        assert!(store.save("user-2", &memory).await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_file_store_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("memories"));
        assert!(store.load("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("memories"));
        let memory = document("user@example.com", &["likes tea", "lives in Lisbon"]);

        store.save("user@example.com", &memory).await.unwrap();
        let loaded = store.load("user@example.com").await.unwrap().unwrap();

        assert_eq!(loaded.memories, memory.memories);
        assert_eq!(loaded.storage_used, memory.storage_used);
        assert_eq!(loaded.total_memories, 2);
    }

    #[tokio::test]
    async fn test_file_store_overwrites_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        store.save("u", &document("u", &["one"])).await.unwrap();
        store.save("u", &document("u", &["two", "three"])).await.unwrap();

        let loaded = store.load("u").await.unwrap().unwrap();
        assert_eq!(loaded.total_memories, 2);

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_file_names_are_hashed() {
        let store = JsonFileStore::new("/tmp/aura");
        let path = store.path_for("../../etc/passwd");
        assert_eq!(path.parent(), Some(Path::new("/tmp/aura")));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), 64 + ".json".len());
        assert_ne!(store.path_for("a"), store.path_for("b"));
    }

    #[tokio::test]
    async fn test_file_store_recomputes_stale_stats() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mut memory = document("u", &["likes tea"]);
        let expected = memory.storage_used;
        memory.total_memories = 42;
        memory.storage_used = 7;
        store.save("u", &memory).await.unwrap();

        let loaded = store.load("u").await.unwrap().unwrap();
        assert_eq!(loaded.total_memories, 1);
        assert_eq!(loaded.storage_used, expected);
    }

    #[tokio::test]
    async fn test_file_store_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        std::fs::write(store.path_for("u"), b"{ not json").unwrap();

        let err = store.load("u").await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }

    #[tokio::test]
    async fn test_file_store_reads_camel_case_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let json = r#"{
            "userId": "u",
            "memories": [{
                "id": "6f1c1a34-98f4-4f43-9d3e-6f7f1b0f2a11",
                "content": "Prefers dark mode",
                "category": "preference",
                "importance": 4,
                "source": "manual",
                "sessionId": "s-1",
                "timestamp": "2024-05-01T10:00:00Z"
            }],
            "lastUpdated": "2024-05-01T10:00:00Z",
            "totalMemories": 1,
            "storageUsed": 0,
            "storageLimit": 1048576
        }"#;
        std::fs::write(store.path_for("u"), json).unwrap();

        let loaded = store.load("u").await.unwrap().unwrap();
        assert_eq!(loaded.memories[0].content, "Prefers dark mode");
        assert_eq!(loaded.memories[0].category, MemoryCategory::Preference);
        assert!(loaded.storage_used > 2);
    }
}
