//! The on-disk/in-memory shape of a single cached response.

use serde::{Deserialize, Serialize};

/// Where a record's body actually lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Storage {
    /// The body is carried inline on the record itself, in the small-item
    /// table.
    Inline,
    /// The record in the small-item table is a pointer; the body lives in
    /// the object store under the record's `id`.
    External,
}

/// Whether a record's body bytes are encrypted at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Encoding {
    Plain,
    Encrypted,
}

/// A single cached response, as held by the small-item table backend.
///
/// When `storage` is [`Storage::External`], `body` is empty and the
/// caller must fetch the actual bytes from the object store keyed by
/// `id`. Writers always create the object-store entry before the pointer
/// record that references it, so a reader never observes a pointer with
/// no backing object: there is never a dangling EXTERNAL pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    /// The fingerprint hex string this record is keyed by.
    pub id: String,
    /// Unix epoch milliseconds when this record was written.
    pub created_at: i64,
    /// Unix epoch milliseconds after which this record is stale.
    pub expires_at: i64,
    /// Unix epoch milliseconds after which the backend may physically
    /// evict this record (usually equal to `expires_at`, but may be
    /// extended past it to keep a record available for error-extension
    /// serving).
    pub purge_at: i64,
    pub storage: Storage,
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub encoding: Encoding,
    /// Present only when `encoding` is `Encrypted`: the random IV used for
    /// this write, hex-encoded.
    pub iv: Option<String>,
    /// Base64-encoded body bytes (ciphertext if `encoding` is
    /// `Encrypted`); empty when `storage` is `External`.
    pub body: String,
    /// True if this record was last served past its `expires_at` because
    /// an upstream refetch failed. This is a storage-side marker only —
    /// callers observe the same fact through `CachedResult::cache_status`
    /// (`CacheStatus::StaleServed`), set directly by whichever coordinator
    /// call produced the record, not by reading this field back. The
    /// response envelope's `message` stays `"SUCCESS"`/`"FAIL"` regardless,
    /// per the closed set spec defines for it.
    #[serde(default)]
    pub served_stale: bool,
}

impl CacheRecord {
    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis >= self.expires_at
    }
}
