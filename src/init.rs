//! Process-wide cache configuration.
//!
//! A [`CacheInit`] binds together the storage backends, the symmetric
//! key, and the algorithm choices every [`crate::coordinator::CacheCoordinator`]
//! and [`crate::fetcher::CacheableFetcher`] needs. Most callers build one
//! explicitly and thread it through; [`init`]/[`context`] additionally
//! expose a process-wide convenience binding for callers (short-lived
//! worker entry points in particular) that would rather not carry the
//! value around themselves.

use std::sync::OnceLock;

use serde::Deserialize;

use crate::crypto::Cipher;
use crate::error::{CacheError, Result};
use crate::fingerprint::Algorithm;

/// Tolerant configuration input for [`CacheInit::from_config`]. Accepts
/// both the current field names and the legacy aliases inherited from
/// older configuration blobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInitConfig {
    #[serde(alias = "tableId", default = "default_table_id")]
    pub table_id: String,
    #[serde(alias = "objectStoreId", default = "default_object_store_id")]
    pub object_store_id: String,
    #[serde(alias = "objectStorePrefix", default = "default_object_store_prefix")]
    pub object_store_prefix: String,
    #[serde(alias = "cipherId", default = "default_cipher")]
    pub cipher: String,
    /// Hex-encoded symmetric key.
    #[serde(alias = "encryptionKey")]
    pub key_hex: String,
    #[serde(alias = "fingerprintAlgorithm", default = "default_fingerprint_algorithm")]
    pub fingerprint_algorithm: String,
    #[serde(alias = "smallTableMaxEntryKb", default = "default_max_entry_kb")]
    pub small_table_max_entry_kb: u64,
    #[serde(alias = "purgeAfterHours", default = "default_purge_after_hours")]
    pub purge_after_hours: u64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_table_id() -> String {
    "default".to_owned()
}
fn default_object_store_id() -> String {
    "default".to_owned()
}
fn default_object_store_prefix() -> String {
    "cacheable-fetch".to_owned()
}
fn default_cipher() -> String {
    "aes-256-cbc".to_owned()
}
fn default_fingerprint_algorithm() -> String {
    "blake3".to_owned()
}
fn default_max_entry_kb() -> u64 {
    16
}
fn default_purge_after_hours() -> u64 {
    24 * 7
}
fn default_timezone() -> String {
    "UTC".to_owned()
}

/// Redacted, log-safe summary of a [`CacheInit`], as returned by
/// [`CacheInit::info`].
#[derive(Debug, Clone)]
pub struct CacheInitInfo {
    pub table_id: String,
    pub object_store_id: String,
    pub cipher: String,
    pub fingerprint_algorithm: String,
    pub small_table_max_entry_kb: u64,
    pub purge_after_hours: u64,
    pub timezone: String,
    /// Always the literal redacted placeholder; never the real key.
    pub key: String,
    /// The current UTC offset of `timezone`, in minutes. Varies with DST,
    /// so this is computed at `info()` call time rather than cached.
    pub offset_in_minutes: i32,
}

/// Process-wide cache configuration: storage backend ids, cipher, key,
/// and fingerprint algorithm.
#[derive(Clone)]
pub struct CacheInit {
    pub table_id: String,
    pub object_store_id: String,
    pub object_store_prefix: String,
    pub cipher: Cipher,
    pub key: Vec<u8>,
    pub fingerprint_algorithm: Algorithm,
    pub small_table_max_entry_kb: u64,
    pub purge_after_hours: u64,
    pub timezone: String,
}

impl CacheInit {
    /// Builds a `CacheInit` from a tolerant, alias-accepting config blob,
    /// validating the cipher and fingerprint algorithm identifiers and
    /// decoding the hex key.
    pub fn from_config(config: CacheInitConfig) -> Result<Self> {
        let cipher = Cipher::parse(&config.cipher)?;
        let fingerprint_algorithm = Algorithm::parse(&config.fingerprint_algorithm)?;
        let key = hex::decode(&config.key_hex)?;
        if key.is_empty() {
            return Err(CacheError::InvalidConfiguration(
                "encryption key must not be empty".to_owned(),
            ));
        }
        Ok(Self {
            table_id: config.table_id,
            object_store_id: config.object_store_id,
            object_store_prefix: config.object_store_prefix,
            cipher,
            key,
            fingerprint_algorithm,
            small_table_max_entry_kb: config.small_table_max_entry_kb,
            purge_after_hours: config.purge_after_hours,
            timezone: config.timezone,
        })
    }

    /// Returns a redacted view suitable for logging: every field verbatim
    /// except the key, which is replaced by a fixed placeholder string.
    pub fn info(&self) -> CacheInitInfo {
        CacheInitInfo {
            table_id: self.table_id.clone(),
            object_store_id: self.object_store_id.clone(),
            cipher: format!("{:?}", self.cipher),
            fingerprint_algorithm: self.fingerprint_algorithm.to_string(),
            small_table_max_entry_kb: self.small_table_max_entry_kb,
            purge_after_hours: self.purge_after_hours,
            timezone: self.timezone.clone(),
            key: "************** [buffer]".to_owned(),
            offset_in_minutes: self.offset_in_minutes(),
        }
    }

    /// The current UTC offset of `self.timezone`, in minutes east of UTC.
    /// Falls back to UTC (offset 0) if the configured name doesn't parse.
    pub fn offset_in_minutes(&self) -> i32 {
        use chrono::Offset;
        let tz: chrono_tz::Tz = self.timezone.parse().unwrap_or(chrono_tz::UTC);
        chrono::Utc::now()
            .with_timezone(&tz)
            .offset()
            .fix()
            .local_minus_utc()
            / 60
    }

    pub fn small_table_max_entry_bytes(&self) -> u64 {
        self.small_table_max_entry_kb * 1024
    }
}

static GLOBAL_INIT: OnceLock<CacheInit> = OnceLock::new();

/// Installs `init` as the process-wide default. Intended to be called
/// once near process start; later calls are rejected rather than
/// silently replacing the running configuration.
pub fn init(init: CacheInit) -> Result<()> {
    GLOBAL_INIT.set(init).map_err(|_| {
        CacheError::InvalidConfiguration(
            "cacheable-fetch global context is already initialized".to_owned(),
        )
    })
}

/// Returns the process-wide default installed by [`init`], if any.
pub fn context() -> Option<&'static CacheInit> {
    GLOBAL_INIT.get()
}

#[cfg(test)]
mod test {
    use super::*;

    fn config() -> CacheInitConfig {
        CacheInitConfig {
            table_id: "default".to_owned(),
            object_store_id: "default".to_owned(),
            object_store_prefix: "cf".to_owned(),
            cipher: "aes-256-cbc".to_owned(),
            key_hex: hex::encode([1u8; 32]),
            fingerprint_algorithm: "blake3".to_owned(),
            small_table_max_entry_kb: 16,
            purge_after_hours: 168,
            timezone: "UTC".to_owned(),
        }
    }

    #[test]
    fn info_redacts_the_key() {
        let init = CacheInit::from_config(config()).unwrap();
        let info = init.info();
        assert_eq!(info.key, "************** [buffer]");
        assert_eq!(info.table_id, "default");
    }

    #[test]
    fn offset_in_minutes_reflects_the_configured_timezone() {
        let mut c = config();
        c.timezone = "America/Chicago".to_owned();
        let init = CacheInit::from_config(c).unwrap();
        // America/Chicago is UTC-6 (CST) or UTC-5 (CDT); either way strictly negative.
        assert!(init.info().offset_in_minutes < 0);
    }

    #[test]
    fn legacy_field_aliases_deserialize() {
        let json = serde_json::json!({
            "tableId": "default",
            "objectStoreId": "default",
            "objectStorePrefix": "cf",
            "cipherId": "aes-256-cbc",
            "encryptionKey": hex::encode([1u8; 32]),
            "fingerprintAlgorithm": "blake3",
            "smallTableMaxEntryKb": 16,
            "purgeAfterHours": 168,
        });
        let config: CacheInitConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.cipher, "aes-256-cbc");
    }

    #[test]
    fn rejects_unknown_cipher() {
        let mut c = config();
        c.cipher = "rot13".to_owned();
        assert!(CacheInit::from_config(c).is_err());
    }

    #[test]
    fn small_table_max_entry_bytes_converts_from_kb() {
        let init = CacheInit::from_config(config()).unwrap();
        assert_eq!(init.small_table_max_entry_bytes(), 16 * 1024);
    }
}
