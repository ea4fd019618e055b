//! Storage backends for [`crate::record::CacheRecord`]s.
//!
//! Two backend roles exist, mirroring the size split the coordinator
//! enforces: a fast small-item table for records under the configured
//! ceiling ([`table::TableManager`]), and a disk-backed object store for
//! everything over it ([`object::ObjectManager`]).

pub mod object;
pub mod table;

use async_trait::async_trait;

use crate::error::Result;
use crate::record::CacheRecord;

/// Common storage backend contract: `get`/`put`/`delete` by id, nothing
/// more.
#[async_trait]
pub trait StorageManager: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<CacheRecord>>;
    async fn put(&self, record: CacheRecord) -> Result<CacheRecord>;
    async fn delete(&self, id: &str) -> Result<()>;
}
