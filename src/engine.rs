//! The HTTP Request Engine.
//!
//! Translates a [`Connection`] into an outbound `reqwest` request,
//! composes authentication and parameters onto it, drives redirects
//! itself through a small bounded state machine (reqwest's own redirect
//! handling is disabled so every hop can be recorded), and always
//! resolves to a [`Response`] envelope rather than letting a network
//! error escape as a panic or an unhandled `Result::Err` the caller has
//! to special-case.

use std::time::Duration;

use log::{debug, warn};
use reqwest::redirect::Policy;
use reqwest::{Client, Method as ReqwestMethod, Url};
use serde::{Deserialize, Serialize};

use crate::connection::{Authentication, Connection, DuplicateParameterAppend, Method, ParameterValue, Protocol};
use crate::error::Result;
use crate::redact::{redact_header, redact_query};

const DEFAULT_MAX_REDIRECTS: u8 = 5;

/// One hop of a redirect chain, recorded in the order it was followed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectHop {
    pub from: String,
    pub to: String,
    pub status_code: u16,
}

/// The uniform response envelope every engine call resolves to,
/// regardless of whether the upstream call succeeded, returned an error
/// status, or never completed at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// `0` when the request never reached the network (DNS failure,
    /// connection refused, timeout): a real status code is always `>= 100`.
    pub status_code: u16,
    pub success: bool,
    pub headers: Vec<(String, String)>,
    pub message: String,
    pub body: serde_json::Value,
    pub redirects: Vec<RedirectHop>,
}

/// Drives outbound requests for a [`Connection`].
pub struct RequestEngine {
    client: Client,
    upgrade_insecure_redirects: bool,
}

impl RequestEngine {
    /// Builds an engine with reqwest's redirect handling disabled, so
    /// [`RequestEngine::send`] can drive a bounded redirect loop itself
    /// and record each hop.
    pub fn new() -> Result<Self> {
        let client = Client::builder().redirect(Policy::none()).build()?;
        Ok(Self {
            client,
            upgrade_insecure_redirects: false,
        })
    }

    /// When set, an `http://` redirect target encountered while following
    /// an `https://` connection is upgraded to `https://` before being
    /// followed.
    pub fn with_upgrade_insecure_redirects(mut self, upgrade: bool) -> Self {
        self.upgrade_insecure_redirects = upgrade;
        self
    }

    /// Sends `connection`, following redirects itself up to
    /// `DEFAULT_MAX_REDIRECTS` hops, and always returns a [`Response`]
    /// rather than an `Err` for network-level failures.
    pub async fn send(&self, connection: &Connection) -> Response {
        let mut redirects = Vec::new();
        let mut current_url = match build_url(connection) {
            Ok(url) => url,
            Err(err) => return error_response(err.to_string()),
        };

        for _ in 0..DEFAULT_MAX_REDIRECTS {
            let request = match build_request(&self.client, connection, &current_url) {
                Ok(req) => req,
                Err(err) => return error_response(err.to_string()),
            };

            let timeout = Duration::from_millis(connection.options.normalized_timeout_ms());
            let host = current_url.host_str().unwrap_or("").to_owned();

            let sent = tokio::time::timeout(timeout, request.send()).await;
            let response = match sent {
                Err(_elapsed) => {
                    warn!(
                        "Endpoint request timeout reached ({}ms) for host: {host}",
                        timeout.as_millis()
                    );
                    return timeout_response();
                }
                Ok(Err(err)) => {
                    warn!("upstream error for host {host}: {err}");
                    return error_response(err.to_string());
                }
                Ok(Ok(response)) => response,
            };

            let status = response.status();
            if status.is_redirection() {
                if let Some(location) = response.headers().get(reqwest::header::LOCATION) {
                    if let Ok(location_str) = location.to_str() {
                        let next = match current_url.join(location_str) {
                            Ok(mut next) => {
                                if self.upgrade_insecure_redirects
                                    && current_url.scheme() == "https"
                                    && next.scheme() == "http"
                                {
                                    let _ = next.set_scheme("https");
                                }
                                next
                            }
                            Err(err) => return error_response(err.to_string()),
                        };
                        warn!(
                            "following redirect {} -> {} ({})",
                            redact_query(current_url.as_str()),
                            redact_query(next.as_str()),
                            status.as_u16()
                        );
                        if status.as_u16() == 301 {
                            warn!("received a 301 for {}, update the caller's configured URL", redact_query(current_url.as_str()));
                        }
                        redirects.push(RedirectHop {
                            from: current_url.to_string(),
                            to: next.to_string(),
                            status_code: status.as_u16(),
                        });
                        current_url = next;
                        continue;
                    }
                }
            }

            return finalize_response(response, redirects).await;
        }

        error_response("exceeded maximum redirect chain length".to_owned())
    }
}

impl Default for RequestEngine {
    fn default() -> Self {
        Self::new().expect("reqwest client with no TLS/proxy config never fails to build")
    }
}

fn build_url(connection: &Connection) -> Result<Url> {
    // `Connection::new` parses a composite `uri` into `protocol`/`host`/`path`
    // at construction time, so by the time a connection reaches the engine
    // these are always populated regardless of which form the caller used.
    let host = connection.host.as_deref().unwrap_or_default();
    let path = connection.path.as_deref().unwrap_or("/");
    let base = Url::parse(&format!("{}://{host}{path}", connection.protocol))?;
    Ok(apply_parameters(base, connection))
}

/// Applies `connection`'s normalized parameters (caller-supplied plus any
/// `Authentication::Parameters` override, per [`Connection::to_normalized`])
/// to `base`'s query string, per the active duplicate-parameter
/// serialization mode.
fn apply_parameters(mut base: Url, connection: &Connection) -> Url {
    let params: Vec<(String, ParameterValue)> = connection
        .to_normalized()
        .parameters
        .into_iter()
        .collect();

    let opts = &connection.options;
    let mut pairs: Vec<(String, String)> = Vec::new();
    for (key, value) in params {
        match value {
            ParameterValue::OrderedSequence(items) if opts.separate_duplicate_parameters => {
                for (idx, item) in items.iter().enumerate() {
                    let key_for_item = suffix_key(&key, idx, opts.separate_duplicate_parameters_append_to_key);
                    pairs.push((key_for_item, item.as_wire_string()));
                }
            }
            ParameterValue::OrderedSequence(items) => {
                let joined = items
                    .iter()
                    .map(ParameterValue::as_wire_string)
                    .collect::<Vec<_>>()
                    .join(&opts.combined_duplicate_parameter_delimiter);
                pairs.push((key, joined));
            }
            other => pairs.push((key, other.as_wire_string())),
        }
    }

    if !pairs.is_empty() {
        let mut query = base.query_pairs_mut();
        query.clear();
        for (k, v) in &pairs {
            query.append_pair(k, v);
        }
    }
    base
}

fn suffix_key(key: &str, idx: usize, mode: DuplicateParameterAppend) -> String {
    match mode {
        DuplicateParameterAppend::None => key.to_owned(),
        DuplicateParameterAppend::Brackets => format!("{key}[]"),
        DuplicateParameterAppend::ZeroIndexed => format!("{key}{idx}"),
        DuplicateParameterAppend::OneIndexed => format!("{key}{}", idx + 1),
    }
}

fn build_request(
    client: &Client,
    connection: &Connection,
    url: &Url,
) -> Result<reqwest::RequestBuilder> {
    let method = match connection.method {
        Method::Get => ReqwestMethod::GET,
        Method::Post => ReqwestMethod::POST,
        Method::Put => ReqwestMethod::PUT,
        Method::Patch => ReqwestMethod::PATCH,
        Method::Delete => ReqwestMethod::DELETE,
        Method::Head => ReqwestMethod::HEAD,
        Method::Options => ReqwestMethod::OPTIONS,
    };

    let mut builder = client.request(method, url.clone());

    let normalized = connection.to_normalized();
    for (key, value) in &normalized.headers {
        builder = builder.header(key, value);
    }

    debug!(
        "composed request headers for {}: {:?}",
        url,
        normalized
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), redact_header(k, v)))
            .collect::<Vec<_>>()
    );

    if let Some(Authentication::Basic { user, pass }) = &connection.authentication {
        builder = builder.basic_auth(user, Some(pass));
    }

    if let Some(body) = normalized.body {
        builder = builder.json(&body);
    }

    Ok(builder)
}

async fn finalize_response(response: reqwest::Response, redirects: Vec<RedirectHop>) -> Response {
    let status = response.status();
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_owned()))
        .collect();

    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => return error_response(err.to_string()),
    };

    let body: serde_json::Value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned()));

    Response {
        status_code: status.as_u16(),
        success: status.is_success(),
        headers,
        message: if status.is_success() { "SUCCESS".to_owned() } else { "FAIL".to_owned() },
        body,
        redirects,
    }
}

fn timeout_response() -> Response {
    Response {
        status_code: 504,
        success: false,
        headers: vec![],
        message: "https.request resulted in timeout".to_owned(),
        body: serde_json::Value::Null,
        redirects: vec![],
    }
}

fn error_response(message: String) -> Response {
    Response {
        status_code: 0,
        success: false,
        headers: vec![],
        message,
        body: serde_json::Value::Null,
        redirects: vec![],
    }
}
