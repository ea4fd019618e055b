//! The Cacheable Fetcher: the top-level entry point callers actually use.
//!
//! [`CacheableFetcher::get_data`] ties the Fingerprinter, the Cache
//! Coordinator, the Request Engine, and the single-flight table together
//! into a read-through/write-through algorithm: hash the request, consult
//! the cache, and on a miss or stale entry fall through to the upstream
//! call, writing the result back before returning it.

use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::coordinator::{parse_upstream_expires, CacheCoordinator, ReadOutcome};
use crate::engine::{RedirectHop, RequestEngine, Response};
use crate::error::{CacheError, Result};
use crate::fingerprint;
use crate::init::CacheInit;
use crate::managers::StorageManager;
use crate::profile::CacheProfile;
use crate::record::CacheRecord;
use crate::singleflight::{Role, SingleFlight};
use crate::util::now_millis;

/// Where a [`CachedResult`] actually came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStatus {
    /// Served from a fresh cached record; no upstream call was made.
    Hit,
    /// No usable record existed; the upstream call succeeded and the
    /// result was written through.
    Miss,
    /// A record existed but was stale, the upstream refetch failed, and the
    /// stale record was served with its expiry extended.
    StaleServed,
    /// No usable record existed or the existing one was stale, the
    /// upstream refetch failed, and there was nothing to fall back to: the
    /// raw failure response is returned uncached.
    Bypass,
}

/// The response envelope [`CacheableFetcher::get_data`] resolves to,
/// combining the engine's [`Response`] shape with cache provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResult {
    pub status_code: u16,
    pub success: bool,
    pub headers: Vec<(String, String)>,
    pub message: String,
    pub body: serde_json::Value,
    pub redirects: Vec<RedirectHop>,
    pub cache_status: CacheStatus,
    /// Seconds elapsed since the underlying record was written; `0` for a
    /// freshly-fetched [`CacheStatus::Miss`] or an uncached
    /// [`CacheStatus::Bypass`], since neither has a record to measure from.
    pub age_seconds: i64,
}

impl CachedResult {
    fn from_engine_response(response: Response, cache_status: CacheStatus) -> Self {
        Self {
            status_code: response.status_code,
            success: response.success,
            headers: response.headers,
            message: response.message,
            body: response.body,
            redirects: response.redirects,
            cache_status,
            age_seconds: 0,
        }
    }

    fn from_record(record: &CacheRecord, body: &[u8], cache_status: CacheStatus) -> Self {
        Self {
            status_code: record.status_code,
            success: (200..300).contains(&record.status_code),
            headers: record.headers.clone(),
            message: if record.status_code >= 200 && record.status_code < 300 {
                "SUCCESS".to_owned()
            } else {
                "FAIL".to_owned()
            },
            body: bytes_to_json(body),
            redirects: Vec::new(),
            cache_status,
            age_seconds: ((now_millis() - record.created_at).max(0)) / 1000,
        }
    }
}

fn bytes_to_json(bytes: &[u8]) -> serde_json::Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Ties the Fingerprinter, Coordinator, Engine, and single-flight table
/// together behind one `get_data` call.
pub struct CacheableFetcher {
    init: Arc<CacheInit>,
    engine: RequestEngine,
    coordinator: Arc<CacheCoordinator>,
    single_flight: SingleFlight,
}

impl CacheableFetcher {
    pub fn new(
        init: Arc<CacheInit>,
        table: Arc<dyn StorageManager>,
        object_store: Arc<dyn StorageManager>,
    ) -> Result<Self> {
        let engine = RequestEngine::new()?;
        let coordinator = Arc::new(CacheCoordinator::new(init.clone(), table, object_store));
        Ok(Self {
            init,
            engine,
            coordinator,
            single_flight: SingleFlight::new(),
        })
    }

    fn coordinator_handle(&self) -> Arc<CacheCoordinator> {
        self.coordinator.clone()
    }

    fn fingerprint_id(&self, connection: &Connection, profile: &CacheProfile) -> Result<String> {
        let value = connection
            .to_scoped_fingerprint_value(profile.host_id.as_deref(), profile.path_id.as_deref());
        fingerprint::hash(self.init.fingerprint_algorithm, &value)
    }

    /// Resolves `connection` under `profile`'s freshness policy: a cache
    /// hit never touches the network; a miss or stale record falls through
    /// to the engine, coalescing concurrent callers for the same
    /// fingerprint onto a single upstream call via the single-flight table.
    pub async fn get_data(&self, connection: &Connection, profile: &CacheProfile) -> Result<CachedResult> {
        let id = self.fingerprint_id(connection, profile)?;

        match self.single_flight.join(&id) {
            Role::Follower(mut rx) => {
                debug!("joining in-flight fetch for {id}");
                match rx.recv().await {
                    Ok(shared) => Ok((*shared).clone()),
                    Err(_) => self.resolve(&id, connection, profile).await,
                }
            }
            Role::Leader => {
                let result = self.resolve(&id, connection, profile).await;
                match &result {
                    Ok(outcome) => self.single_flight.finish(&id, outcome.clone()),
                    Err(_) => {
                        // Leave no stuck followers behind on a hard error;
                        // they'll each retry independently.
                        self.single_flight.finish(
                            &id,
                            CachedResult {
                                status_code: 0,
                                success: false,
                                headers: Vec::new(),
                                message: "FAIL".to_owned(),
                                body: serde_json::Value::Null,
                                redirects: Vec::new(),
                                cache_status: CacheStatus::Bypass,
                                age_seconds: 0,
                            },
                        );
                    }
                }
                result
            }
        }
    }

    async fn resolve(&self, id: &str, connection: &Connection, profile: &CacheProfile) -> Result<CachedResult> {
        match self.coordinator.read(id).await? {
            ReadOutcome::Hit(record, body) => {
                debug!("cache hit for {id}");
                Ok(CachedResult::from_record(&record, &body, CacheStatus::Hit))
            }
            ReadOutcome::Stale(record) => {
                debug!("cache stale for {id}, refetching");
                self.refetch_or_serve_stale(id, connection, profile, Some(record)).await
            }
            ReadOutcome::Miss => {
                debug!("cache miss for {id}, fetching");
                self.refetch_or_serve_stale(id, connection, profile, None).await
            }
        }
    }

    async fn refetch_or_serve_stale(
        &self,
        id: &str,
        connection: &Connection,
        profile: &CacheProfile,
        stale: Option<CacheRecord>,
    ) -> Result<CachedResult> {
        let response = self.engine.send(connection).await;
        let host = connection.host.clone().unwrap_or_default();

        if response.success {
            let headers = response.headers.clone();
            let upstream_expires_at = if profile.override_origin_header_expiration {
                None
            } else {
                let map = headers
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), v.clone()))
                    .collect();
                parse_upstream_expires(&map, now_millis())
            };

            let body_bytes = response_body_bytes(&response);
            let write_id = id.to_owned();
            let write_status = response.status_code;
            let write_profile = profile.clone();
            let coordinator = self.coordinator_handle();
            // Spawned onto its own task rather than awaited inline: if the
            // caller cancels `get_data` (drops the future) while this is
            // in flight, the write keeps running to completion instead of
            // leaving a half-written record, and the caller's cancellation
            // never has to wait on it either. Awaiting the join handle
            // below still gives a normal, uncancelled caller a
            // deterministic happens-before relationship with the write's
            // completion.
            let write = tokio::spawn(async move {
                if let Err(err) = coordinator
                    .write(&write_id, write_status, &headers, &body_bytes, &write_profile, upstream_expires_at)
                    .await
                {
                    warn!("failed to write cache record {write_id}: {err}");
                }
            });
            let _ = write.await;
            return Ok(CachedResult::from_engine_response(response, CacheStatus::Miss));
        }

        if response.status_code >= 400 && response.status_code < 500 {
            let not_found = CacheError::UpstreamNotFound {
                host,
                status: response.status_code,
            };
            debug!("{not_found}, propagating verbatim and not caching");
            return Ok(CachedResult::from_engine_response(response, CacheStatus::Bypass));
        }

        if response.status_code == 504 {
            let timeout = CacheError::UpstreamTimeout {
                host,
                timeout_ms: connection.options.normalized_timeout_ms(),
            };
            warn!("{timeout}");
        } else {
            let upstream_error = CacheError::UpstreamError {
                host,
                message: response.message.clone(),
            };
            warn!("{upstream_error}");
        }

        match stale {
            Some(record) => {
                let extended = self.coordinator.extend_on_error(&record, profile).await?;
                let body = self.decode_for_result(&extended)?;
                warn!("serving stale record {id} after upstream failure");
                Ok(CachedResult::from_record(&extended, &body, CacheStatus::StaleServed))
            }
            None => Ok(CachedResult::from_engine_response(response, CacheStatus::Bypass)),
        }
    }

    fn decode_for_result(&self, record: &CacheRecord) -> Result<Vec<u8>> {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine;

        let raw = BASE64.decode(&record.body)?;
        match record.encoding {
            crate::record::Encoding::Plain => Ok(raw),
            crate::record::Encoding::Encrypted => {
                let iv_hex = record.iv.as_deref().ok_or_else(|| {
                    crate::error::CacheError::StorageCorrupted { id: record.id.clone() }
                })?;
                let iv = hex::decode(iv_hex)?;
                crate::crypto::open(self.init.cipher, &self.init.key, &iv, &raw, &record.id)
            }
        }
    }
}

fn response_body_bytes(response: &Response) -> Vec<u8> {
    match &response.body {
        serde_json::Value::String(s) => s.clone().into_bytes(),
        other => serde_json::to_vec(other).unwrap_or_default(),
    }
}
