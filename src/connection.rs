//! The addressable description of an upstream request.
//!
//! A [`Connection`] is the only input the Fingerprinter and the Request
//! Engine both consume: the Fingerprinter hashes everything in it except
//! `options`, and the engine translates it into an actual outbound
//! request. Constructing one validates the `(host, path)` / `uri`
//! invariant up front so later stages never have to re-check it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CacheError, Result};
use crate::fingerprint::Value;

/// The HTTP method of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The wire protocol, mirrored into the `toString()`-equivalent output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Https => write!(f, "https"),
        }
    }
}

/// A single query/body parameter value. `OrderedSequence` is its own
/// variant (rather than folding into a generic array) because the three
/// duplicate-parameter serialization modes the engine supports treat
/// repeated scalar values differently from a value that was always a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    String(String),
    Number(f64),
    Bool(bool),
    OrderedSequence(Vec<ParameterValue>),
}

impl ParameterValue {
    /// Renders a scalar parameter value as it appears on the wire. Callers
    /// must not invoke this on `OrderedSequence`; the engine expands those
    /// itself according to the active duplicate-parameter mode.
    pub fn as_wire_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Number(n) => {
                if *n == n.trunc() {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            }
            Self::Bool(b) => b.to_string(),
            Self::OrderedSequence(_) => unreachable!("sequences are expanded by the engine"),
        }
    }
}

impl From<&Value> for ParameterValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::String(s) => Self::String(s.clone()),
            Value::Number(n) => Self::Number(*n),
            Value::Bool(b) => Self::Bool(*b),
            Value::Sequence(items) => {
                Self::OrderedSequence(items.iter().map(ParameterValue::from).collect())
            }
            other => Self::String(crate::fingerprint::canonicalize(other)),
        }
    }
}

/// How a value should be composed into the outbound request from
/// [`Authentication`]. Exactly one variant may be present on a given
/// `Connection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Authentication {
    /// `Authorization: Basic base64(user:pass)`.
    Basic { user: String, pass: String },
    /// Merged into the outbound query string, overriding same-named
    /// parameters already present on the connection.
    Parameters(BTreeMap<String, ParameterValue>),
    /// Merged into the outbound headers, overriding same-named headers
    /// already present on the connection.
    Headers(BTreeMap<String, String>),
    /// Composed into the outbound body per the body-composition rule
    /// (replace if the existing body is null, shallow-merge if the
    /// existing body is itself a mapping, replace otherwise).
    Body(serde_json::Value),
}

/// How duplicate parameter keys are appended when
/// `separate_duplicate_parameters` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DuplicateParameterAppend {
    /// `key=a&key=b` — no suffix.
    #[default]
    #[serde(rename = "")]
    None,
    /// `key[]=a&key[]=b`.
    #[serde(rename = "[]")]
    Brackets,
    /// `key0=a&key1=b`.
    #[serde(rename = "0++")]
    ZeroIndexed,
    /// `key1=a&key2=b`.
    #[serde(rename = "1++")]
    OneIndexed,
}

/// Per-connection knobs that are never part of the fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    /// Upstream request timeout. Any value `<= 0` supplied by a caller is
    /// coerced up to the floor below rather than treated as "no timeout".
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// When true, repeated keys in `parameters` are serialized as distinct
    /// `key=value` pairs (optionally suffixed per
    /// `separate_duplicate_parameters_append_to_key`) instead of being
    /// joined with `combined_duplicate_parameter_delimiter`.
    #[serde(default)]
    pub separate_duplicate_parameters: bool,
    /// Suffix style used when `separate_duplicate_parameters` is set.
    #[serde(default)]
    pub separate_duplicate_parameters_append_to_key: DuplicateParameterAppend,
    /// Delimiter used to join repeated parameter values when
    /// `separate_duplicate_parameters` is false.
    #[serde(default = "default_delimiter")]
    pub combined_duplicate_parameter_delimiter: String,
}

const TIMEOUT_FLOOR_MS: u64 = 8_000;
const TIMEOUT_CEILING_MS: u64 = 300_000;

fn default_timeout_ms() -> u64 {
    TIMEOUT_FLOOR_MS
}

fn default_delimiter() -> String {
    ",".to_owned()
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            separate_duplicate_parameters: false,
            separate_duplicate_parameters_append_to_key: DuplicateParameterAppend::default(),
            combined_duplicate_parameter_delimiter: default_delimiter(),
        }
    }
}

impl ConnectionOptions {
    /// Normalizes `timeout_ms`: a non-positive value is coerced up to the
    /// 8s floor (never "unlimited"), and anything above the 300s ceiling is
    /// clamped down to it. A caller-supplied positive value below the floor
    /// (e.g. a test deliberately asking for a 2ms deadline) is honored
    /// as-is — the floor only exists to give "unset"/"zero" a sane default,
    /// not to forbid a short deadline a caller asked for on purpose.
    pub fn normalized_timeout_ms(&self) -> u64 {
        if self.timeout_ms == 0 {
            TIMEOUT_FLOOR_MS
        } else {
            self.timeout_ms.min(TIMEOUT_CEILING_MS)
        }
    }
}

/// The `headers`/`parameters`/`body` of a [`Connection`] after folding in
/// its `authentication` block, as produced by [`Connection::to_normalized`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedConnection {
    pub parameters: BTreeMap<String, ParameterValue>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

/// The addressable description of a single upstream request.
///
/// Either `uri` is set, or both `host` and `path` are set; the constructor
/// rejects every other combination. `host` is lowercased on construction
/// so two connections that differ only in host casing fingerprint
/// identically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub method: Method,
    pub protocol: Protocol,
    pub host: Option<String>,
    pub path: Option<String>,
    pub uri: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterValue>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    pub authentication: Option<Authentication>,
    #[serde(default)]
    pub options: ConnectionOptions,
}

impl Connection {
    /// Validates and normalizes the `(host, path)` / `uri` invariant,
    /// lowercasing `host` in the process.
    ///
    /// Per spec: when `uri` is present and `host`/`path` are both empty,
    /// `uri` is parsed into `protocol`/`host`/`path` so that a connection
    /// built from a composite `uri` and one built from the equivalent
    /// `host`/`path` pair are indistinguishable from here on — they
    /// display and fingerprint identically.
    pub fn new(
        method: Method,
        protocol: Protocol,
        host: Option<String>,
        path: Option<String>,
        uri: Option<String>,
    ) -> Result<Self> {
        let mut host = host.map(|h| h.to_lowercase());
        let mut path = path;
        let mut protocol = protocol;

        if (host.is_none() || path.is_none()) && uri.is_some() {
            let raw_uri = uri.as_deref().unwrap();
            let parsed = Url::parse(raw_uri)
                .map_err(|e| CacheError::InvalidConnection(format!("invalid uri: {e}")))?;
            protocol = match parsed.scheme() {
                "http" => Protocol::Http,
                "https" => Protocol::Https,
                other => {
                    return Err(CacheError::InvalidConnection(format!(
                        "unsupported uri scheme: {other}"
                    )))
                }
            };
            let parsed_host = parsed
                .host_str()
                .ok_or_else(|| CacheError::InvalidConnection("uri has no host".to_owned()))?
                .to_lowercase();
            host = Some(match parsed.port() {
                Some(port) => format!("{parsed_host}:{port}"),
                None => parsed_host,
            });
            let mut parsed_path = parsed.path().to_owned();
            if let Some(query) = parsed.query() {
                parsed_path.push('?');
                parsed_path.push_str(query);
            }
            if parsed_path.is_empty() {
                parsed_path = "/".to_owned();
            }
            path = Some(parsed_path);
        }

        let has_host_path = host.is_some() && path.is_some();
        if !has_host_path {
            return Err(CacheError::InvalidConnection(
                "connection requires either (host and path) or uri".to_owned(),
            ));
        }
        Ok(Self {
            method,
            protocol,
            host,
            path,
            uri,
            parameters: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
            authentication: None,
            options: ConnectionOptions::default(),
        })
    }

    /// Folds [`Connection::authentication`] into `headers`/`parameters`/
    /// `body` per its kind, without mutating `self`. This is the single
    /// place the authentication-composition rule is implemented; the
    /// engine calls it rather than re-deriving the merge itself, and it's
    /// equally useful standalone for callers that just want to see what
    /// will actually go over the wire.
    ///
    /// Basic auth is deliberately not folded in here: it becomes an
    /// `Authorization` header built from base64-encoded credentials, which
    /// is a wire-encoding concern the engine owns, not a merge the
    /// connection model needs to know how to perform.
    pub fn to_normalized(&self) -> NormalizedConnection {
        let mut parameters = self.parameters.clone();
        let mut headers = self.headers.clone();

        match &self.authentication {
            Some(Authentication::Parameters(auth_params)) => {
                for (k, v) in auth_params {
                    parameters.insert(k.clone(), v.clone());
                }
            }
            Some(Authentication::Headers(auth_headers)) => {
                for (k, v) in auth_headers {
                    headers.insert(k.clone(), v.clone());
                }
            }
            _ => {}
        }

        let body = match &self.authentication {
            Some(Authentication::Body(auth_body)) => match &self.body {
                None | Some(serde_json::Value::Null) => Some(auth_body.clone()),
                Some(serde_json::Value::Object(existing)) => {
                    if let serde_json::Value::Object(extra) = auth_body {
                        let mut merged = existing.clone();
                        for (k, v) in extra {
                            merged.insert(k.clone(), v.clone());
                        }
                        Some(serde_json::Value::Object(merged))
                    } else {
                        Some(auth_body.clone())
                    }
                }
                Some(_) => Some(auth_body.clone()),
            },
            _ => self.body.clone(),
        };

        NormalizedConnection {
            parameters,
            headers,
            body,
        }
    }

    /// Converts this connection into the canonical [`Value`] fed to the
    /// Fingerprinter. `options` is deliberately excluded: two connections
    /// that differ only in timeout or parameter-serialization style must
    /// fingerprint identically. `uri` is likewise excluded — by
    /// construction it has already been parsed into `host`/`path` (see
    /// [`Connection::new`]), so a connection built from a composite `uri`
    /// and one built from the equivalent `host`/`path` pair fingerprint
    /// identically, as spec's fingerprint scope (host/path/method/
    /// parameters/headers/body/hostId/pathId/auth) requires.
    pub fn to_fingerprint_value(&self) -> Value {
        let mut fields = BTreeMap::new();
        fields.insert("method".to_owned(), Value::from(self.method.as_str()));
        fields.insert("protocol".to_owned(), Value::from(self.protocol.to_string()));
        fields.insert(
            "host".to_owned(),
            self.host.clone().map(Value::from).unwrap_or(Value::Null),
        );
        fields.insert(
            "path".to_owned(),
            self.path.clone().map(Value::from).unwrap_or(Value::Null),
        );
        fields.insert(
            "parameters".to_owned(),
            Value::Mapping(
                self.parameters
                    .iter()
                    .map(|(k, v)| (k.clone(), parameter_value_to_fingerprint(v)))
                    .collect(),
            ),
        );
        fields.insert(
            "headers".to_owned(),
            Value::Mapping(
                self.headers
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), Value::from(v.clone())))
                    .collect(),
            ),
        );
        fields.insert(
            "body".to_owned(),
            self.body.clone().map(Value::from).unwrap_or(Value::Null),
        );
        fields.insert(
            "authentication".to_owned(),
            authentication_to_fingerprint(self.authentication.as_ref()),
        );
        Value::Mapping(fields)
    }

    /// Converts this connection into the canonical [`Value`] fed to the
    /// Fingerprinter, folding in the owning [`crate::profile::CacheProfile`]'s
    /// `host_id`/`path_id` labels. This is the value every cache key is
    /// actually derived from; [`Connection::to_fingerprint_value`] alone is
    /// exposed separately only because it's useful on its own in tests that
    /// don't care about profile scoping.
    pub fn to_scoped_fingerprint_value(&self, host_id: Option<&str>, path_id: Option<&str>) -> Value {
        let mut fields = match self.to_fingerprint_value() {
            Value::Mapping(fields) => fields,
            _ => unreachable!("to_fingerprint_value always returns a Mapping"),
        };
        fields.insert(
            "hostId".to_owned(),
            host_id.map(Value::from).unwrap_or(Value::Null),
        );
        fields.insert(
            "pathId".to_owned(),
            path_id.map(Value::from).unwrap_or(Value::Null),
        );
        Value::Mapping(fields)
    }

    /// The `<method> <user?> <protocol>://<host><path>` textual form,
    /// preserving the literal string `"null"` for any unset component.
    /// This looks like a bug to a reader expecting `Option::None` to
    /// vanish from the output; it is kept deliberately, matching the
    /// behavior callers have already come to depend on.
    pub fn to_display_string(&self) -> String {
        let user = match &self.authentication {
            Some(Authentication::Basic { user, .. }) => user.clone(),
            _ => "null".to_owned(),
        };
        format!(
            "{} {} {}://{}{}",
            self.method,
            user,
            self.protocol,
            self.host.clone().unwrap_or_else(|| "null".to_owned()),
            self.path.clone().unwrap_or_else(|| "null".to_owned()),
        )
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

fn parameter_value_to_fingerprint(v: &ParameterValue) -> Value {
    match v {
        ParameterValue::String(s) => Value::from(s.clone()),
        ParameterValue::Number(n) => Value::Number(*n),
        ParameterValue::Bool(b) => Value::Bool(*b),
        ParameterValue::OrderedSequence(items) => {
            Value::Sequence(items.iter().map(parameter_value_to_fingerprint).collect())
        }
    }
}

fn authentication_to_fingerprint(auth: Option<&Authentication>) -> Value {
    match auth {
        None => Value::Null,
        Some(Authentication::Basic { user, pass }) => Value::mapping([
            ("kind", Value::from("basic")),
            ("user", Value::from(user.clone())),
            ("pass", Value::from(pass.clone())),
        ]),
        Some(Authentication::Parameters(params)) => Value::mapping([
            ("kind", Value::from("parameters")),
            (
                "parameters",
                Value::Mapping(
                    params
                        .iter()
                        .map(|(k, v)| (k.clone(), parameter_value_to_fingerprint(v)))
                        .collect(),
                ),
            ),
        ]),
        Some(Authentication::Headers(headers)) => Value::mapping([
            ("kind", Value::from("headers")),
            (
                "headers",
                Value::Mapping(
                    headers
                        .iter()
                        .map(|(k, v)| (k.to_lowercase(), Value::from(v.clone())))
                        .collect(),
                ),
            ),
        ]),
        Some(Authentication::Body(body)) => Value::mapping([
            ("kind", Value::from("body")),
            ("body", Value::from(body.clone())),
        ]),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn requires_host_and_path_or_uri() {
        assert!(Connection::new(Method::Get, Protocol::Https, None, None, None).is_err());
        assert!(Connection::new(
            Method::Get,
            Protocol::Https,
            Some("example.net".into()),
            None,
            None
        )
        .is_err());
        assert!(Connection::new(
            Method::Get,
            Protocol::Https,
            None,
            None,
            Some("https://example.net/x".into())
        )
        .is_ok());
    }

    #[test]
    fn host_is_lowercased() {
        let c = Connection::new(
            Method::Get,
            Protocol::Https,
            Some("API.Example.NET".into()),
            Some("/x".into()),
            None,
        )
        .unwrap();
        assert_eq!(c.host.as_deref(), Some("api.example.net"));
    }

    #[test]
    fn uri_is_parsed_into_host_and_path() {
        let c = Connection::new(
            Method::Get,
            Protocol::Https,
            None,
            None,
            Some("https://example.net/x".into()),
        )
        .unwrap();
        assert_eq!(c.host.as_deref(), Some("example.net"));
        assert_eq!(c.path.as_deref(), Some("/x"));
        assert!(matches!(c.protocol, Protocol::Https));
    }

    #[test]
    fn display_preserves_literal_null_for_unset_user() {
        // host/path are always populated by the time a Connection exists
        // (either supplied directly or parsed from `uri`), so the only
        // field that can still render the literal "null" quirk is the
        // Basic-auth user, when no authentication block is present.
        let c = Connection::new(
            Method::Get,
            Protocol::Https,
            None,
            None,
            Some("https://example.net/x".into()),
        )
        .unwrap();
        assert_eq!(c.to_display_string(), "GET null https://example.net/x");
    }

    #[test]
    fn uri_and_equivalent_host_path_fingerprint_identically() {
        let via_uri = Connection::new(
            Method::Get,
            Protocol::Https,
            None,
            None,
            Some("https://example.net/x".into()),
        )
        .unwrap();
        let via_host_path = Connection::new(
            Method::Get,
            Protocol::Https,
            Some("example.net".into()),
            Some("/x".into()),
            None,
        )
        .unwrap();
        assert_eq!(
            crate::fingerprint::hash(
                crate::fingerprint::Algorithm::Blake3,
                &via_uri.to_fingerprint_value()
            )
            .unwrap(),
            crate::fingerprint::hash(
                crate::fingerprint::Algorithm::Blake3,
                &via_host_path.to_fingerprint_value()
            )
            .unwrap()
        );
    }

    #[test]
    fn timeout_floor_applies_to_non_positive_values() {
        let mut opts = ConnectionOptions::default();
        opts.timeout_ms = 0;
        assert_eq!(opts.normalized_timeout_ms(), TIMEOUT_FLOOR_MS);
    }

    #[test]
    fn timeout_ceiling_clamps_large_values() {
        let mut opts = ConnectionOptions::default();
        opts.timeout_ms = 10_000_000;
        assert_eq!(opts.normalized_timeout_ms(), TIMEOUT_CEILING_MS);
    }

    #[test]
    fn small_positive_timeout_is_honored_as_is() {
        let mut opts = ConnectionOptions::default();
        opts.timeout_ms = 2;
        assert_eq!(opts.normalized_timeout_ms(), 2);
    }

    #[test]
    fn host_id_and_path_id_distinguish_otherwise_identical_connections() {
        let a = Connection::new(
            Method::Get,
            Protocol::Https,
            Some("example.net".into()),
            Some("/x".into()),
            None,
        )
        .unwrap();
        let b = a.clone();
        assert_ne!(
            crate::fingerprint::canonicalize(&a.to_scoped_fingerprint_value(Some("tenantA"), None)),
            crate::fingerprint::canonicalize(&b.to_scoped_fingerprint_value(Some("tenantB"), None)),
        );
    }

    #[test]
    fn to_normalized_overrides_same_named_parameter_with_auth_parameter() {
        let mut c = Connection::new(
            Method::Get,
            Protocol::Https,
            Some("example.net".into()),
            Some("/x".into()),
            None,
        )
        .unwrap();
        c.parameters
            .insert("key".to_owned(), ParameterValue::String("old".into()));
        let mut auth_params = BTreeMap::new();
        auth_params.insert("key".to_owned(), ParameterValue::String("new".into()));
        c.authentication = Some(Authentication::Parameters(auth_params));

        let normalized = c.to_normalized();
        assert_eq!(
            normalized.parameters.get("key"),
            Some(&ParameterValue::String("new".into()))
        );
        assert_eq!(
            c.parameters.get("key"),
            Some(&ParameterValue::String("old".into())),
            "to_normalized must not mutate the original connection"
        );
    }

    #[test]
    fn to_normalized_merges_auth_body_into_existing_mapping() {
        let mut c = Connection::new(
            Method::Post,
            Protocol::Https,
            Some("example.net".into()),
            Some("/x".into()),
            None,
        )
        .unwrap();
        c.body = Some(serde_json::json!({"a": 1}));
        c.authentication = Some(Authentication::Body(serde_json::json!({"b": 2})));
        assert_eq!(
            c.to_normalized().body,
            Some(serde_json::json!({"a": 1, "b": 2}))
        );
    }

    #[test]
    fn options_are_excluded_from_fingerprint_value() {
        let mut a = Connection::new(
            Method::Get,
            Protocol::Https,
            Some("example.net".into()),
            Some("/x".into()),
            None,
        )
        .unwrap();
        let mut b = a.clone();
        a.options.timeout_ms = 8_000;
        b.options.timeout_ms = 60_000;
        assert_eq!(
            crate::fingerprint::canonicalize(&a.to_fingerprint_value()),
            crate::fingerprint::canonicalize(&b.to_fingerprint_value())
        );
    }
}
