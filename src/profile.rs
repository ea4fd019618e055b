//! Per-call cache policy.
//!
//! A [`CacheProfile`] travels alongside a `Connection` into
//! [`crate::fetcher::CacheableFetcher::get_data`] and controls freshness,
//! storage backend selection, and encryption for that one call. Field
//! names accept the legacy aliases the original configuration objects
//! used, so profiles built from old config blobs deserialize unchanged.

use serde::{Deserialize, Serialize};

/// Canonical interval lengths the coordinator knows how to align
/// `expiresAt` to a wall-clock boundary for (hour/day/week, in seconds).
pub const INTERVAL_HOUR_SECONDS: u64 = 3_600;
pub const INTERVAL_DAY_SECONDS: u64 = 86_400;
pub const INTERVAL_WEEK_SECONDS: u64 = 604_800;

/// Per-call cache policy: how long a record stays fresh, whether that
/// freshness window is anchored to a wall-clock interval, how upstream
/// `Cache-Control`/`Expires` headers factor in, and which headers survive
/// into the stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheProfile {
    /// Freshness window in seconds, measured from the time of write unless
    /// `expires_is_on_interval` is set.
    #[serde(alias = "defaultExpiresInSeconds", default = "default_expires_in")]
    pub expires_in_seconds: u64,

    /// When true, `expires_in_seconds` must be one of the canonical
    /// interval lengths and `expiresAt` is aligned to the next wall-clock
    /// boundary of that length in `timezone`, rather than `now + N`.
    #[serde(alias = "expiresIsOnInterval", default)]
    pub expires_is_on_interval: bool,

    /// IANA timezone name used for interval alignment (e.g.
    /// `"America/Chicago"`). Ignored unless `expires_is_on_interval` is set.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// When false (the default), the coordinator takes the minimum of
    /// `expires_in_seconds` and any `Cache-Control: max-age` / `Expires`
    /// header on the upstream response. When true, the origin headers are
    /// ignored entirely.
    #[serde(alias = "ignoreOriginHeaderExpires", default)]
    pub override_origin_header_expiration: bool,

    /// On a stale-and-upstream-failed read, how many additional seconds to
    /// extend the existing record's `expiresAt` by before serving it
    /// stale, so a flapping upstream doesn't force every caller through a
    /// failed refetch.
    #[serde(
        alias = "defaultExpiresExtensionOnErrorInSeconds",
        default = "default_error_extension"
    )]
    pub expiration_extension_on_error_seconds: u64,

    /// Response headers (case-insensitive) to retain in the stored record.
    /// All others are dropped at write time.
    #[serde(default)]
    pub headers_to_retain: Vec<String>,

    /// Short stable label for the host this profile addresses, folded into
    /// the fingerprint so two profiles that otherwise look identical but
    /// target distinct logical uses of the same host don't collide.
    #[serde(default)]
    pub host_id: Option<String>,

    /// Short stable label for the path this profile addresses, folded into
    /// the fingerprint alongside `host_id`.
    #[serde(default)]
    pub path_id: Option<String>,

    /// Whether to encrypt the stored body using the cipher configured on
    /// `CacheInit`.
    #[serde(default)]
    pub encrypt: bool,

    /// Logical id of the small-item table backend to use for records
    /// under the size ceiling. `None` selects `CacheInit`'s default.
    #[serde(default)]
    pub table_id: Option<String>,

    /// Logical id of the object-store backend to use for records over the
    /// size ceiling. `None` selects `CacheInit`'s default.
    #[serde(default)]
    pub object_store_id: Option<String>,
}

fn default_expires_in() -> u64 {
    INTERVAL_HOUR_SECONDS
}

fn default_timezone() -> String {
    "UTC".to_owned()
}

fn default_error_extension() -> u64 {
    300
}

impl Default for CacheProfile {
    fn default() -> Self {
        Self {
            expires_in_seconds: default_expires_in(),
            expires_is_on_interval: false,
            timezone: default_timezone(),
            override_origin_header_expiration: false,
            expiration_extension_on_error_seconds: default_error_extension(),
            headers_to_retain: Vec::new(),
            host_id: None,
            path_id: None,
            encrypt: false,
            table_id: None,
            object_store_id: None,
        }
    }
}

impl CacheProfile {
    /// Whether `expires_in_seconds` is one of the lengths the coordinator
    /// can align to a wall-clock boundary.
    pub fn is_canonical_interval(&self) -> bool {
        matches!(
            self.expires_in_seconds,
            INTERVAL_HOUR_SECONDS | INTERVAL_DAY_SECONDS | INTERVAL_WEEK_SECONDS
        )
    }
}
