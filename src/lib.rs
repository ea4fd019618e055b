#![forbid(unsafe_code)]
#![warn(missing_docs, unused_qualifications)]
//! A caching HTTP data-access layer for short-lived, stateless compute
//! workers that repeatedly fetch JSON/text from upstream HTTP APIs.
//!
//! This crate memoizes remote responses across a two-tier external store —
//! a fast small-item table for bodies under a configured size ceiling, and
//! a disk-backed object store for everything over it — enforces
//! per-endpoint freshness policies, coalesces concurrent fetches for the
//! same logical request, and can encrypt cached bodies at rest.
//!
//! The four pieces a caller actually touches:
//!
//! - [`connection::Connection`] describes one outbound call (method, host,
//!   path, parameters, headers, body, auth, timeouts).
//! - [`profile::CacheProfile`] is the per-endpoint freshness/encryption
//!   policy paired with a `Connection` on every call.
//! - [`init::CacheInit`] is the process-wide configuration: storage backend
//!   ids, the symmetric cipher and key, and the fingerprint algorithm.
//! - [`fetcher::CacheableFetcher`] ties the rest together behind one
//!   `get_data(connection, profile)` call.
//!
//! ```no_run
//! use std::sync::Arc;
//! use cacheable_fetch::connection::{Connection, Method, Protocol};
//! use cacheable_fetch::fetcher::CacheableFetcher;
//! use cacheable_fetch::init::{CacheInit, CacheInitConfig};
//! use cacheable_fetch::managers::object::ObjectManager;
//! use cacheable_fetch::managers::table::TableManager;
//! use cacheable_fetch::managers::StorageManager;
//! use cacheable_fetch::profile::CacheProfile;
//!
//! # async fn run() -> cacheable_fetch::error::Result<()> {
//! let init = Arc::new(CacheInit::from_config(CacheInitConfig {
//!     table_id: "default".into(),
//!     object_store_id: "default".into(),
//!     object_store_prefix: "cacheable-fetch".into(),
//!     cipher: "aes-256-cbc".into(),
//!     key_hex: hex::encode([0u8; 32]),
//!     fingerprint_algorithm: "blake3".into(),
//!     small_table_max_entry_kb: 16,
//!     purge_after_hours: 168,
//!     timezone: "UTC".into(),
//! })?);
//!
//! let table: Arc<dyn StorageManager> = Arc::new(TableManager::new("default", 10_000));
//! let object_store: Arc<dyn StorageManager> =
//!     Arc::new(ObjectManager::new("default", "./cache", "cacheable-fetch"));
//! let fetcher = CacheableFetcher::new(init, table, object_store)?;
//!
//! let connection = Connection::new(
//!     Method::Get,
//!     Protocol::Https,
//!     None,
//!     None,
//!     Some("https://api.example.net/games/".into()),
//! )?;
//! let result = fetcher.get_data(&connection, &CacheProfile::default()).await?;
//! println!("{:?} ({})", result.cache_status, result.status_code);
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod coordinator;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod fingerprint;
pub mod init;
pub mod managers;
pub mod profile;
pub mod record;
pub mod redact;
pub mod singleflight;
pub mod util;

pub use connection::{Connection, Method, Protocol};
pub use engine::{RequestEngine, Response};
pub use error::{CacheError, Result};
pub use fetcher::{CacheStatus, CacheableFetcher, CachedResult};
pub use fingerprint::{hash, Algorithm, Value};
pub use init::CacheInit;
pub use profile::CacheProfile;
pub use record::CacheRecord;
