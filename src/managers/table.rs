//! The small-item table backend: an in-memory, TTL-aware cache for
//! records under the configured size ceiling.
//!
//! Built on `moka`'s async cache, generalized from a single fixed
//! `Cache<String, Arc<Vec<u8>>>` to one keyed and expired against
//! [`CacheRecord::purge_at`] via a custom [`moka::Expiry`] implementation,
//! so a record's physical eviction always tracks its own `purgeAt` instead
//! of a cache-wide TTL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;

use crate::error::Result;
use crate::record::CacheRecord;

use super::StorageManager;

struct PurgeAtExpiry;

impl Expiry<String, Arc<CacheRecord>> for PurgeAtExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheRecord>,
        created_at: Instant,
    ) -> Option<Duration> {
        let now_millis = crate::util::now_millis();
        let remaining = (value.purge_at - now_millis).max(0) as u64;
        let _ = created_at;
        Some(Duration::from_millis(remaining))
    }
}

/// A named small-item table. `CacheInit` may configure more than one
/// (e.g. to give a hot profile its own capacity budget); `id` is the
/// logical name a [`crate::profile::CacheProfile::table_id`] selects.
pub struct TableManager {
    id: String,
    cache: Cache<String, Arc<CacheRecord>>,
}

impl TableManager {
    /// Builds a table capped at `max_capacity` entries, with per-entry
    /// expiry governed by each record's own `purgeAt`.
    pub fn new(id: impl Into<String>, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PurgeAtExpiry)
            .build();
        Self {
            id: id.into(),
            cache,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Drops every entry, used only by tests.
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl StorageManager for TableManager {
    async fn get(&self, id: &str) -> Result<Option<CacheRecord>> {
        Ok(self.cache.get(id).await.map(|arc| (*arc).clone()))
    }

    async fn put(&self, record: CacheRecord) -> Result<CacheRecord> {
        self.cache
            .insert(record.id.clone(), Arc::new(record.clone()))
            .await;
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.cache.invalidate(id).await;
        Ok(())
    }
}
