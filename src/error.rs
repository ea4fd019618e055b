use miette::Diagnostic;
use thiserror::Error;

/// A `Result` typedef to use with the [`CacheError`] type.
pub type Result<T> = std::result::Result<T, CacheError>;

/// The error taxonomy for the cacheable data-access layer.
///
/// Every fallible public operation in this crate returns one of these
/// variants rather than panicking. The Fetcher in particular never lets a
/// panic escape to its caller; upstream failures are folded into a
/// [`crate::fetcher::CachedResult`] instead.
#[derive(Error, Diagnostic, Debug)]
pub enum CacheError {
    /// Configuration supplied to [`crate::init::CacheInit`] was missing a
    /// required field or named an unsupported cipher. Fatal, surfaced at
    /// init time.
    #[error("invalid cache configuration: {0}")]
    #[diagnostic(code(cacheable_fetch::invalid_configuration))]
    InvalidConfiguration(String),

    /// A [`crate::connection::Connection`] was built without enough
    /// information to address a request, or with an unsupported method.
    /// Surfaced synchronously; no I/O is performed.
    #[error("invalid connection: {0}")]
    #[diagnostic(code(cacheable_fetch::invalid_connection))]
    InvalidConnection(String),

    /// The engine exceeded `options.timeout_ms` waiting for a response.
    #[error("https.request resulted in timeout ({timeout_ms}ms) for host: {host}")]
    #[diagnostic(code(cacheable_fetch::upstream_timeout))]
    UpstreamTimeout {
        /// The host that timed out.
        host: String,
        /// The timeout that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// The upstream call failed with a 5xx status or a network-level error.
    #[error("upstream error for host {host}: {message}")]
    #[diagnostic(code(cacheable_fetch::upstream_error))]
    UpstreamError {
        /// The host that failed.
        host: String,
        /// A short description of the failure.
        message: String,
    },

    /// The upstream call returned a 4xx status. Propagated verbatim; not
    /// cached by default.
    #[error("upstream returned {status} for host {host}")]
    #[diagnostic(code(cacheable_fetch::upstream_not_found))]
    UpstreamNotFound {
        /// The host that responded.
        host: String,
        /// The 4xx status code returned.
        status: u16,
    },

    /// A storage backend (small-item table or object store) failed a read
    /// or write. Read failures downgrade to a cache miss; write failures
    /// are logged and swallowed by the coordinator, so this variant
    /// generally only reaches a caller when the failure could not be
    /// treated as best-effort (e.g. a dangling pointer during a refill).
    #[error("storage backend unavailable: {0}")]
    #[diagnostic(code(cacheable_fetch::storage_unavailable))]
    StorageUnavailable(String),

    /// A cached body failed to decrypt (IV or integrity mismatch). This is
    /// a hard, fail-closed error: the record is evicted rather than served.
    #[error("cached record {id} is corrupted and was evicted")]
    #[diagnostic(code(cacheable_fetch::storage_corrupted))]
    StorageCorrupted {
        /// The id of the evicted record.
        id: String,
    },

    /// The fingerprinter was given a value it cannot canonicalize.
    #[error("cannot hash value: {0}")]
    #[diagnostic(code(cacheable_fetch::invalid_hash_input))]
    InvalidHashInput(String),

    /// Transparent wrap for URL parsing failures.
    #[error(transparent)]
    #[diagnostic(code(cacheable_fetch::invalid_url))]
    InvalidUrl(#[from] url::ParseError),

    /// Transparent wrap for the underlying reqwest client.
    #[error(transparent)]
    #[diagnostic(code(cacheable_fetch::reqwest))]
    Reqwest(#[from] reqwest::Error),

    /// Transparent wrap for JSON (de)serialization failures, e.g. when
    /// serializing an `authentication.body` block or a record's headers.
    #[error(transparent)]
    #[diagnostic(code(cacheable_fetch::json))]
    Json(#[from] serde_json::Error),

    /// Transparent wrap for the disk-backed object store.
    #[error(transparent)]
    #[diagnostic(code(cacheable_fetch::cacache))]
    CaCache(#[from] cacache::Error),

    /// Transparent wrap for hex (de)coding failures on stored IVs/ids.
    #[error(transparent)]
    #[diagnostic(code(cacheable_fetch::hex))]
    Hex(#[from] hex::FromHexError),

    /// Transparent wrap for base64 (de)coding failures on stored bodies.
    #[error(transparent)]
    #[diagnostic(code(cacheable_fetch::base64))]
    Base64(#[from] base64::DecodeError),
}
