//! The cache coordinator: read/write/expiration logic sitting between the
//! fetcher and the two storage backends.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, TimeZone, Timelike};
use chrono_tz::Tz;
use log::{debug, info, warn};

use crate::crypto;
use crate::error::{CacheError, Result};
use crate::init::CacheInit;
use crate::managers::StorageManager;
use crate::profile::{CacheProfile, INTERVAL_DAY_SECONDS, INTERVAL_HOUR_SECONDS, INTERVAL_WEEK_SECONDS};
use crate::record::{CacheRecord, Encoding, Storage};
use crate::util::now_millis;

/// The outcome of [`CacheCoordinator::read`].
pub enum ReadOutcome {
    /// A fresh record was found; its (already decrypted, if applicable)
    /// body is attached.
    Hit(CacheRecord, Vec<u8>),
    /// A record exists but is past `expires_at`.
    Stale(CacheRecord),
    /// No record, or a dangling `External` pointer with nothing behind
    /// it (treated identically to an absent record).
    Miss,
}

/// Coordinates reads and writes across the small-item table and object
/// store backends, applying encryption, size-based backend routing, and
/// expiration computation.
pub struct CacheCoordinator {
    init: Arc<CacheInit>,
    table: Arc<dyn StorageManager>,
    object_store: Arc<dyn StorageManager>,
}

impl CacheCoordinator {
    pub fn new(
        init: Arc<CacheInit>,
        table: Arc<dyn StorageManager>,
        object_store: Arc<dyn StorageManager>,
    ) -> Self {
        info!(
            "cache coordinator initialized (table={}, objectStore={}, cipher={:?})",
            init.table_id, init.object_store_id, init.cipher
        );
        Self {
            init,
            table,
            object_store,
        }
    }

    /// Reads the record for `id`, following an `External` pointer into the
    /// object store and decrypting the body if necessary.
    ///
    /// A backend read failure is never propagated to the caller as an
    /// error: per spec it downgrades to a cache miss so the fetcher falls
    /// through to the upstream call, with the failure itself only
    /// surfaced as a `StorageUnavailable` WARN log.
    pub async fn read(&self, id: &str) -> Result<ReadOutcome> {
        let pointer = match self.table.get(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(ReadOutcome::Miss),
            Err(err) => {
                let unavailable = CacheError::StorageUnavailable(format!(
                    "small-item table read failed for {id}: {err}"
                ));
                warn!("{unavailable}, treating as miss");
                return Ok(ReadOutcome::Miss);
            }
        };

        let record = match pointer.storage {
            Storage::Inline => pointer,
            Storage::External => match self.object_store.get(id).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    warn!("dangling EXTERNAL pointer for {id}, treating as miss");
                    return Ok(ReadOutcome::Miss);
                }
                Err(err) => {
                    let unavailable = CacheError::StorageUnavailable(format!(
                        "object store read failed for {id}: {err}"
                    ));
                    warn!("{unavailable}, treating as miss");
                    return Ok(ReadOutcome::Miss);
                }
            },
        };

        if record.is_expired(now_millis()) {
            debug!("cache record {id} is stale");
            return Ok(ReadOutcome::Stale(record));
        }

        let body = self.decode_body(&record)?;
        debug!("cache record {id} is fresh");
        Ok(ReadOutcome::Hit(record, body))
    }

    /// Decrypts (if `encoding` is `Encrypted`) and base64-decodes a
    /// record's stored body.
    fn decode_body(&self, record: &CacheRecord) -> Result<Vec<u8>> {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine;

        let raw = BASE64.decode(&record.body)?;
        match record.encoding {
            Encoding::Plain => Ok(raw),
            Encoding::Encrypted => {
                let iv_hex = record.iv.as_deref().ok_or_else(|| CacheError::StorageCorrupted {
                    id: record.id.clone(),
                })?;
                let iv = hex::decode(iv_hex)?;
                crypto::open(self.init.cipher, &self.init.key, &iv, &raw, &record.id)
            }
        }
    }

    /// Writes `body` as a new record for `id`, choosing the small-item
    /// table or the object store by size, encrypting first if
    /// `profile.encrypt` is set, and always creating the object-store
    /// entry before the small-table pointer record for an `External`
    /// write so a crash between the two never leaves a dangling pointer.
    pub async fn write(
        &self,
        id: &str,
        status_code: u16,
        headers: &[(String, String)],
        body: &[u8],
        profile: &CacheProfile,
        upstream_expires_at: Option<i64>,
    ) -> Result<CacheRecord> {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine;

        let now = now_millis();
        let expires_at = self.compute_expires_at(now, profile, upstream_expires_at);
        let purge_at = expires_at + (self.init.purge_after_hours as i64) * 3_600_000;

        let (encoding, iv, stored_bytes) = if profile.encrypt {
            let sealed = crypto::seal(self.init.cipher, &self.init.key, body)?;
            (Encoding::Encrypted, Some(hex::encode(&sealed.iv)), sealed.ciphertext)
        } else {
            (Encoding::Plain, None, body.to_vec())
        };

        // `content-type` is always retained regardless of the profile's
        // `headers_to_retain` list.
        let retained_headers: Vec<(String, String)> = headers
            .iter()
            .filter(|(k, _)| {
                k.eq_ignore_ascii_case("content-type")
                    || profile
                        .headers_to_retain
                        .iter()
                        .any(|allowed| allowed.eq_ignore_ascii_case(k))
            })
            .cloned()
            .collect();

        let is_external = stored_bytes.len() as u64 > self.init.small_table_max_entry_bytes();

        let mut record = CacheRecord {
            id: id.to_owned(),
            created_at: now,
            expires_at,
            purge_at,
            storage: if is_external { Storage::External } else { Storage::Inline },
            status_code,
            headers: retained_headers,
            encoding,
            iv,
            body: BASE64.encode(&stored_bytes),
            served_stale: false,
        };

        if is_external {
            // Object first, pointer second: a crash between the two never
            // exposes a dangling pointer.
            self.object_store.put(record.clone()).await.map_err(|err| {
                CacheError::StorageUnavailable(format!("object store write failed for {id}: {err}"))
            })?;
            let mut pointer = record.clone();
            pointer.body = String::new();
            self.table.put(pointer).await.map_err(|err| {
                CacheError::StorageUnavailable(format!("small-item table write failed for {id}: {err}"))
            })?;
        } else {
            record = self.table.put(record).await.map_err(|err| {
                CacheError::StorageUnavailable(format!("small-item table write failed for {id}: {err}"))
            })?;
        }

        Ok(record)
    }

    /// Extends a stale record's `expires_at` (and `purge_at` alongside it)
    /// by `profile.expiration_extension_on_error_seconds`, marks it served
    /// stale, and writes it back to whichever backend it came from.
    pub async fn extend_on_error(&self, record: &CacheRecord, profile: &CacheProfile) -> Result<CacheRecord> {
        let extension_millis = (profile.expiration_extension_on_error_seconds as i64) * 1000;
        let mut extended = record.clone();
        extended.expires_at += extension_millis;
        extended.purge_at += extension_millis;
        extended.served_stale = true;

        warn!(
            "upstream refetch failed for {}, serving stale and extending expiry by {}s",
            record.id, profile.expiration_extension_on_error_seconds
        );

        match extended.storage {
            Storage::Inline => {
                self.table.put(extended.clone()).await.map_err(|err| {
                    CacheError::StorageUnavailable(format!(
                        "small-item table write failed for {}: {err}",
                        extended.id
                    ))
                })?;
            }
            Storage::External => {
                self.object_store.put(extended.clone()).await.map_err(|err| {
                    CacheError::StorageUnavailable(format!(
                        "object store write failed for {}: {err}",
                        extended.id
                    ))
                })?;
                let mut pointer = extended.clone();
                pointer.body = String::new();
                self.table.put(pointer).await.map_err(|err| {
                    CacheError::StorageUnavailable(format!(
                        "small-item table write failed for {}: {err}",
                        extended.id
                    ))
                })?;
            }
        }
        Ok(extended)
    }

    /// Computes the millisecond epoch at which a freshly-written record
    /// should expire.
    ///
    /// When `profile.expires_is_on_interval` is set and the interval is
    /// one of the canonical lengths, the result is aligned to the next
    /// wall-clock boundary of that length in `profile.timezone`. An
    /// unsupported interval length falls back to `now + N` with a
    /// warning, rather than failing the write.
    ///
    /// When `profile.override_origin_header_expiration` is false and the
    /// upstream response carried a usable expiry, the earlier of the two
    /// candidates wins.
    fn compute_expires_at(
        &self,
        now_millis: i64,
        profile: &CacheProfile,
        upstream_expires_at: Option<i64>,
    ) -> i64 {
        let computed = if profile.expires_is_on_interval {
            match self.align_to_interval(now_millis, profile) {
                Some(aligned) => aligned,
                None => {
                    warn!(
                        "unsupported interval length {}s for wall-clock alignment, falling back to now+N",
                        profile.expires_in_seconds
                    );
                    now_millis + (profile.expires_in_seconds as i64) * 1000
                }
            }
        } else {
            now_millis + (profile.expires_in_seconds as i64) * 1000
        };

        if profile.override_origin_header_expiration {
            return computed;
        }

        match upstream_expires_at {
            Some(upstream) => computed.min(upstream),
            None => computed,
        }
    }

    /// Aligns `now_millis` to the next hour/day/week boundary in
    /// `profile.timezone`. Returns `None` for any interval length other
    /// than the three canonical ones.
    fn align_to_interval(&self, now_millis: i64, profile: &CacheProfile) -> Option<i64> {
        let tz: Tz = profile.timezone.parse().unwrap_or(chrono_tz::UTC);
        let now_utc = chrono::Utc.timestamp_millis_opt(now_millis).single()?;
        let local = now_utc.with_timezone(&tz);

        let next_boundary = match profile.expires_in_seconds {
            INTERVAL_HOUR_SECONDS => {
                let base = local
                    .with_minute(0)?
                    .with_second(0)?
                    .with_nanosecond(0)?;
                base + chrono::Duration::hours(1)
            }
            INTERVAL_DAY_SECONDS => {
                let base = local
                    .with_hour(0)?
                    .with_minute(0)?
                    .with_second(0)?
                    .with_nanosecond(0)?;
                base + chrono::Duration::days(1)
            }
            INTERVAL_WEEK_SECONDS => {
                let base = local
                    .with_hour(0)?
                    .with_minute(0)?
                    .with_second(0)?
                    .with_nanosecond(0)?;
                let days_until_next_monday = (7 - base.weekday().num_days_from_monday() as i64) % 7;
                let days_until_next_monday = if days_until_next_monday == 0 { 7 } else { days_until_next_monday };
                base + chrono::Duration::days(days_until_next_monday)
            }
            _ => return None,
        };

        Some(next_boundary.with_timezone(&chrono::Utc).timestamp_millis())
    }
}

/// Parses a `Cache-Control`/`Expires` header pair into an absolute expiry
/// in epoch milliseconds, for callers composing `upstream_expires_at`.
/// `Cache-Control: max-age` takes precedence over `Expires` when both are
/// present, matching common upstream precedence rules.
pub fn parse_upstream_expires(headers: &BTreeMap<String, String>, now_millis: i64) -> Option<i64> {
    if let Some(cache_control) = headers.get("cache-control") {
        for directive in cache_control.split(',') {
            let directive = directive.trim();
            if let Some(seconds) = directive.strip_prefix("max-age=") {
                if let Ok(seconds) = seconds.parse::<i64>() {
                    return Some(now_millis + seconds * 1000);
                }
            }
        }
    }
    if let Some(expires) = headers.get("expires") {
        if let Ok(parsed) = httpdate::parse_http_date(expires) {
            let millis = parsed
                .duration_since(std::time::UNIX_EPOCH)
                .ok()?
                .as_millis() as i64;
            return Some(millis);
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::Cipher;
    use crate::fingerprint::Algorithm;
    use crate::managers::object::ObjectManager;
    use crate::managers::table::TableManager;

    fn init() -> Arc<CacheInit> {
        Arc::new(CacheInit {
            table_id: "default".to_owned(),
            object_store_id: "default".to_owned(),
            object_store_prefix: "cf".to_owned(),
            cipher: Cipher::Aes256Cbc,
            key: vec![3u8; 32],
            fingerprint_algorithm: Algorithm::Blake3,
            small_table_max_entry_kb: 1,
            purge_after_hours: 24,
            timezone: "UTC".to_owned(),
        })
    }

    async fn coordinator() -> (CacheCoordinator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let table: Arc<dyn StorageManager> = Arc::new(TableManager::new("default", 100));
        let object_store: Arc<dyn StorageManager> =
            Arc::new(ObjectManager::new("default", dir.path(), "cf"));
        (CacheCoordinator::new(init(), table, object_store), dir)
    }

    #[tokio::test]
    async fn small_body_is_inline() {
        let (coord, _dir) = coordinator().await;
        let profile = CacheProfile::default();
        let record = coord
            .write("id1", 200, &[], b"tiny", &profile, None)
            .await
            .unwrap();
        assert_eq!(record.storage, Storage::Inline);
    }

    #[tokio::test]
    async fn large_body_is_external() {
        let (coord, _dir) = coordinator().await;
        let profile = CacheProfile::default();
        let big = vec![b'x'; 4096];
        let record = coord
            .write("id2", 200, &[], &big, &profile, None)
            .await
            .unwrap();
        assert_eq!(record.storage, Storage::External);
    }

    #[tokio::test]
    async fn write_then_read_roundtrips_plaintext() {
        let (coord, _dir) = coordinator().await;
        let profile = CacheProfile::default();
        coord.write("id3", 200, &[], b"hello", &profile, None).await.unwrap();
        match coord.read("id3").await.unwrap() {
            ReadOutcome::Hit(_, body) => assert_eq!(body, b"hello"),
            _ => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn write_then_read_roundtrips_encrypted() {
        let (coord, _dir) = coordinator().await;
        let mut profile = CacheProfile::default();
        profile.encrypt = true;
        coord.write("id4", 200, &[], b"secret body", &profile, None).await.unwrap();
        match coord.read("id4").await.unwrap() {
            ReadOutcome::Hit(record, body) => {
                assert_eq!(record.encoding, Encoding::Encrypted);
                assert_eq!(body, b"secret body");
            }
            _ => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn missing_record_is_miss() {
        let (coord, _dir) = coordinator().await;
        match coord.read("nope").await.unwrap() {
            ReadOutcome::Miss => {}
            _ => panic!("expected miss"),
        }
    }

    #[tokio::test]
    async fn headers_to_retain_filters_at_write_time() {
        let (coord, _dir) = coordinator().await;
        let mut profile = CacheProfile::default();
        profile.headers_to_retain = vec!["content-type".to_owned()];
        let headers = vec![
            ("content-type".to_owned(), "application/json".to_owned()),
            ("x-secret".to_owned(), "dont-keep".to_owned()),
        ];
        let record = coord.write("id5", 200, &headers, b"{}", &profile, None).await.unwrap();
        assert_eq!(record.headers.len(), 1);
        assert_eq!(record.headers[0].0, "content-type");
    }

    #[test]
    fn max_age_takes_precedence_over_expires_header() {
        let mut headers = BTreeMap::new();
        headers.insert("cache-control".to_owned(), "max-age=60".to_owned());
        headers.insert("expires".to_owned(), "Thu, 01 Jan 1970 00:00:00 GMT".to_owned());
        let now = 1_000_000;
        assert_eq!(parse_upstream_expires(&headers, now), Some(now + 60_000));
    }

    #[tokio::test]
    async fn day_interval_aligns_to_next_utc_midnight() {
        let (coord, _dir) = coordinator().await;
        let mut profile = CacheProfile::default();
        profile.expires_is_on_interval = true;
        profile.expires_in_seconds = INTERVAL_DAY_SECONDS;
        profile.timezone = "UTC".to_owned();

        // 2024-01-10 15:30:00 UTC -> next midnight is 2024-01-11 00:00:00 UTC.
        let now = chrono::Utc.with_ymd_and_hms(2024, 1, 10, 15, 30, 0).unwrap();
        let aligned = coord
            .align_to_interval(now.timestamp_millis(), &profile)
            .unwrap();
        let expected = chrono::Utc.with_ymd_and_hms(2024, 1, 11, 0, 0, 0).unwrap();
        assert_eq!(aligned, expected.timestamp_millis());
    }

    #[tokio::test]
    async fn week_interval_aligns_to_next_utc_monday_from_every_weekday() {
        let (coord, _dir) = coordinator().await;
        let mut profile = CacheProfile::default();
        profile.expires_is_on_interval = true;
        profile.expires_in_seconds = INTERVAL_WEEK_SECONDS;
        profile.timezone = "UTC".to_owned();

        // 2024-01-08 is a Monday; 2024-01-14 is the following Sunday. For
        // every day in between, the aligned boundary must be 2024-01-15
        // 00:00:00 UTC (the next Monday), never fewer than 1 or more than
        // 7 days out.
        let next_monday = chrono::Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        for day in 8..=14 {
            let now = chrono::Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap();
            let aligned = coord
                .align_to_interval(now.timestamp_millis(), &profile)
                .unwrap();
            assert_eq!(
                aligned,
                next_monday.timestamp_millis(),
                "day {day} of week misaligned"
            );
        }
    }
}
