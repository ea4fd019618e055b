//! The object-store backend: disk-backed storage for records over the
//! small-item table's size ceiling.
//!
//! [`cacache`] is used purely for its explicit-key `write`/`read`/`remove`
//! API (not content-hash addressing), keyed by `<prefix>/<id>` so several
//! logical object stores can share one `cacache` directory without
//! colliding.

use async_trait::async_trait;

use crate::error::Result;
use crate::record::CacheRecord;

use super::StorageManager;

/// A named object store rooted at `path`, namespacing its keys under
/// `prefix`.
pub struct ObjectManager {
    id: String,
    path: std::path::PathBuf,
    prefix: String,
}

impl ObjectManager {
    pub fn new(id: impl Into<String>, path: impl Into<std::path::PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            prefix: prefix.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn object_key(&self, id: &str) -> String {
        format!("{}/{}", self.prefix, id)
    }
}

#[async_trait]
impl StorageManager for ObjectManager {
    async fn get(&self, id: &str) -> Result<Option<CacheRecord>> {
        let key = self.object_key(id);
        match cacache::read(&self.path, &key).await {
            Ok(bytes) => {
                let record: CacheRecord = serde_json::from_slice(&bytes)?;
                Ok(Some(record))
            }
            Err(cacache::Error::EntryNotFound(..)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, record: CacheRecord) -> Result<CacheRecord> {
        let key = self.object_key(&record.id);
        let bytes = serde_json::to_vec(&record)?;
        cacache::write(&self.path, &key, bytes).await?;
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let key = self.object_key(id);
        cacache::remove(&self.path, &key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::record::{Encoding, Storage};

    fn sample(id: &str) -> CacheRecord {
        CacheRecord {
            id: id.to_owned(),
            created_at: 0,
            expires_at: i64::MAX,
            purge_at: i64::MAX,
            storage: Storage::External,
            status_code: 200,
            headers: vec![],
            encoding: Encoding::Plain,
            iv: None,
            body: String::new(),
            served_stale: false,
        }
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ObjectManager::new("default", dir.path(), "objects");
        manager.put(sample("big1")).await.unwrap();
        let fetched = manager.get("big1").await.unwrap().unwrap();
        assert_eq!(fetched.id, "big1");
    }

    #[tokio::test]
    async fn missing_id_is_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ObjectManager::new("default", dir.path(), "objects");
        assert!(manager.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ObjectManager::new("default", dir.path(), "objects");
        manager.put(sample("big1")).await.unwrap();
        manager.delete("big1").await.unwrap();
        assert!(manager.get("big1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn two_prefixes_in_the_same_directory_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let a = ObjectManager::new("a", dir.path(), "a");
        let b = ObjectManager::new("b", dir.path(), "b");
        a.put(sample("shared-id")).await.unwrap();
        assert!(b.get("shared-id").await.unwrap().is_none());
    }
}
