//! Log-safe redaction helpers.
//!
//! Redaction is intentionally narrow: only query strings and
//! `Authorization` header values are scrubbed before anything touches the
//! logger. Nothing else is redacted, so log lines stay useful for
//! debugging connection-shape issues.

/// Redacts the query component of a URL-shaped string, if any, replacing
/// everything from the first `?` onward with `?<redacted>`.
pub fn redact_query(value: &str) -> String {
    match value.find('?') {
        Some(idx) => format!("{}?<redacted>", &value[..idx]),
        None => value.to_owned(),
    }
}

/// Redacts an `Authorization` header value, keeping only the scheme
/// (`Basic`, `Bearer`, ...) so logs can still show what kind of auth was
/// used without leaking the credential.
pub fn redact_authorization(value: &str) -> String {
    match value.split_once(' ') {
        Some((scheme, _rest)) => format!("{scheme} <redacted>"),
        None => "<redacted>".to_owned(),
    }
}

/// Redacts a single header by name, applying [`redact_authorization`] only
/// to `Authorization` (case-insensitively) and leaving everything else
/// untouched.
pub fn redact_header(name: &str, value: &str) -> String {
    if name.eq_ignore_ascii_case("authorization") {
        redact_authorization(value)
    } else {
        value.to_owned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn query_string_is_redacted() {
        assert_eq!(
            redact_query("https://api.example.net/x?token=secret"),
            "https://api.example.net/x?<redacted>"
        );
    }

    #[test]
    fn url_without_query_is_untouched() {
        assert_eq!(
            redact_query("https://api.example.net/x"),
            "https://api.example.net/x"
        );
    }

    #[test]
    fn authorization_scheme_is_preserved_credential_is_not() {
        assert_eq!(
            redact_authorization("Bearer abc.def.ghi"),
            "Bearer <redacted>"
        );
    }

    #[test]
    fn only_authorization_header_is_redacted() {
        assert_eq!(redact_header("X-Request-Id", "abc123"), "abc123");
        assert_eq!(
            redact_header("authorization", "Basic dXNlcjpwYXNz"),
            "Basic <redacted>"
        );
    }
}
