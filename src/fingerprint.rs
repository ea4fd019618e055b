//! Deterministic, order-independent hashing over structured values.
//!
//! This is the cache-key machinery: [`hash`] canonicalizes a [`Value`] tree
//! into a byte string with mapping keys sorted lexicographically and
//! sequence order preserved, then digests that byte string with the
//! configured algorithm. Two values that differ only in the iteration
//! order of a map hash identically; two values that differ only in type
//! (the string `"1"` vs. the number `1`) never do, because every primitive
//! is serialized with a type-tag prefix.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CacheError, Result};

/// The digest algorithm backing a fingerprint.
///
/// `CacheInit`'s `fingerprint_algorithm` field selects between these by
/// name (`"blake3"` or `"sha256"`); both hash the same canonical bytes, so
/// switching algorithms changes every existing cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// [`blake3`], the default. Fast, non-cryptographic-adjacent use here
    /// (the key is not a security boundary, only a dedup key).
    Blake3,
    /// SHA-256, for deployments that require a FIPS-blessed digest.
    Sha256,
}

impl Algorithm {
    /// Parses a fingerprint algorithm identifier from `CacheInit`.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "blake3" => Ok(Self::Blake3),
            "sha256" => Ok(Self::Sha256),
            other => Err(CacheError::InvalidConfiguration(format!(
                "unknown fingerprint algorithm: {other}"
            ))),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blake3 => write!(f, "blake3"),
            Self::Sha256 => write!(f, "sha256"),
        }
    }
}

/// A structured value that can be canonicalized and hashed.
///
/// This mirrors the primitive and container shapes the original
/// JavaScript-flavored data model distinguishes, including ones `serde_json`
/// has no direct analogue for (`Undefined`, `BigInt`, `Symbol`, `Date`,
/// `Function`) so distinct types never collide after canonicalization,
/// even when this crate's callers only ever construct `String`, `Number`,
/// `Bool`, `Null`, `Sequence` and `Mapping` in practice.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// JSON null / an explicitly absent field.
    Null,
    /// A field that was never set at all, distinct from `Null`.
    Undefined,
    /// A boolean.
    Bool(bool),
    /// A finite decimal number, textualized without trailing zeros beyond
    /// the value's own significance.
    Number(f64),
    /// An arbitrary-precision integer, already in decimal text form.
    BigInt(String),
    /// A UTF-8 string.
    String(String),
    /// A symbol, identified only by its description (no two symbols with
    /// the same description are distinguishable once canonicalized).
    Symbol(String),
    /// A point in time, as milliseconds since the Unix epoch (UTC).
    Date(i64),
    /// Order-preserving sequence of values.
    Sequence(Vec<Value>),
    /// Order-insensitive mapping of string keys to values.
    Mapping(BTreeMap<String, Value>),
    /// A function, identified only by its source text.
    Function(String),
}

impl Value {
    /// Convenience constructor for a mapping from an iterator of pairs.
    pub fn mapping<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Mapping(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                Value::Number(n.as_f64().unwrap_or(0.0))
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Mapping(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ),
        }
    }
}

/// Formats a finite `f64` without trailing zeros beyond its significance,
/// matching the `n:` canonical textual form.
fn format_number(n: f64) -> String {
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        let s = format!("{n}");
        s
    }
}

/// Appends the canonical textual form of `value` (with its type-tag
/// prefix) to `out`. Mappings are walked in key-sorted order at every
/// depth; sequences preserve their given order.
fn canonicalize_into(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null:"),
        Value::Undefined => out.push_str("undef:"),
        Value::Bool(b) => {
            out.push_str("b:");
            out.push_str(if *b { "true" } else { "false" });
        }
        Value::Number(n) => {
            out.push_str("n:");
            out.push_str(&format_number(*n));
        }
        Value::BigInt(s) => {
            out.push_str("bi:");
            out.push_str(s);
        }
        Value::String(s) => {
            out.push_str("s:");
            out.push_str(s);
        }
        Value::Symbol(desc) => {
            out.push_str("sym:");
            out.push_str(desc);
        }
        Value::Date(millis) => {
            let secs = millis.div_euclid(1000);
            let nanos = millis.rem_euclid(1000) * 1_000_000;
            let dt = chrono::DateTime::<chrono::Utc>::from_timestamp(
                secs, nanos as u32,
            )
            .unwrap_or_default();
            out.push_str("date:");
            out.push_str(&dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string());
        }
        Value::Function(src) => {
            out.push_str("fn:");
            out.push_str(src);
        }
        Value::Sequence(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonicalize_into(item, out);
            }
            out.push(']');
        }
        Value::Mapping(map) => {
            out.push('{');
            // BTreeMap already iterates in lexicographic key order.
            for (i, (key, val)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str("s:");
                out.push_str(key);
                out.push(':');
                canonicalize_into(val, out);
            }
            out.push('}');
        }
    }
}

/// Canonicalizes `value` into its deterministic, order-independent textual
/// form. Exposed mainly for tests; [`hash`] is the operational entry point.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    canonicalize_into(value, &mut out);
    out
}

/// Walks `value` checking every primitive is actually hashable: a `Number`
/// must be finite (neither `NaN` nor `±infinity`, which have no single
/// canonical textual form and would silently break determinism), and a
/// `BigInt` must be a valid signed decimal integer literal.
fn validate(value: &Value) -> Result<()> {
    match value {
        Value::Number(n) if !n.is_finite() => Err(CacheError::InvalidHashInput(format!(
            "non-finite number cannot be hashed: {n}"
        ))),
        Value::BigInt(s) => {
            let digits = s.strip_prefix('-').unwrap_or(s);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(CacheError::InvalidHashInput(format!(
                    "not a valid big integer literal: {s}"
                )));
            }
            Ok(())
        }
        Value::Sequence(items) => items.iter().try_for_each(validate),
        Value::Mapping(map) => map.values().try_for_each(validate),
        _ => Ok(()),
    }
}

/// Hashes `value` with `algorithm`, returning the lowercase hex digest.
///
/// This is deterministic and order-insensitive for mappings at every
/// depth, order-sensitive for sequences, and distinguishes primitives that
/// share a textual shape but differ in type. Fails with
/// [`CacheError::InvalidHashInput`] if `value` contains a non-finite
/// number or a malformed big integer — the only ways this crate's closed
/// [`Value`] enum can describe something uncanonicalizable.
pub fn hash(algorithm: Algorithm, value: &Value) -> Result<String> {
    validate(value)?;
    let canonical = canonicalize(value);
    Ok(match algorithm {
        Algorithm::Blake3 => blake3::hash(canonical.as_bytes()).to_hex().to_string(),
        Algorithm::Sha256 => {
            use sha2::{Digest, Sha256};
            let digest = Sha256::digest(canonical.as_bytes());
            hex::encode(digest)
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mapping_order_is_insensitive() {
        let a = Value::mapping([
            ("host", Value::from("api.example.net")),
            ("path", Value::from("/games/")),
        ]);
        let b = Value::mapping([
            ("path", Value::from("/games/")),
            ("host", Value::from("api.example.net")),
        ]);
        assert_eq!(
            hash(Algorithm::Blake3, &a).unwrap(),
            hash(Algorithm::Blake3, &b).unwrap()
        );
    }

    #[test]
    fn nested_mapping_order_is_insensitive() {
        let a = Value::mapping([(
            "parameters",
            Value::mapping([
                ("a", Value::from("1")),
                ("b", Value::from("2")),
            ]),
        )]);
        let b = Value::mapping([(
            "parameters",
            Value::mapping([
                ("b", Value::from("2")),
                ("a", Value::from("1")),
            ]),
        )]);
        assert_eq!(
            hash(Algorithm::Blake3, &a).unwrap(),
            hash(Algorithm::Blake3, &b).unwrap()
        );
    }

    #[test]
    fn sequence_order_is_significant() {
        let a = Value::Sequence(vec![Value::from("a"), Value::from("b")]);
        let b = Value::Sequence(vec![Value::from("b"), Value::from("a")]);
        assert_ne!(
            hash(Algorithm::Blake3, &a).unwrap(),
            hash(Algorithm::Blake3, &b).unwrap()
        );
    }

    #[test]
    fn type_tag_distinguishes_shape_collisions() {
        let as_string = Value::String("1".to_owned());
        let as_number = Value::Number(1.0);
        assert_ne!(
            hash(Algorithm::Blake3, &as_string).unwrap(),
            hash(Algorithm::Blake3, &as_number).unwrap()
        );
    }

    #[test]
    fn deterministic_across_calls() {
        let v = Value::mapping([("k", Value::from("v"))]);
        assert_eq!(
            hash(Algorithm::Blake3, &v).unwrap(),
            hash(Algorithm::Blake3, &v).unwrap()
        );
    }

    #[test]
    fn sha256_and_blake3_disagree() {
        let v = Value::from("x");
        assert_ne!(
            hash(Algorithm::Blake3, &v).unwrap(),
            hash(Algorithm::Sha256, &v).unwrap()
        );
    }

    #[test]
    fn non_finite_number_is_rejected() {
        assert!(hash(Algorithm::Blake3, &Value::Number(f64::NAN)).is_err());
        assert!(hash(Algorithm::Blake3, &Value::Number(f64::INFINITY)).is_err());
    }

    #[test]
    fn malformed_big_int_is_rejected() {
        assert!(hash(Algorithm::Blake3, &Value::BigInt("12x3".to_owned())).is_err());
        assert!(hash(Algorithm::Blake3, &Value::BigInt(String::new())).is_err());
    }

    #[test]
    fn valid_big_int_is_accepted() {
        assert!(hash(Algorithm::Blake3, &Value::BigInt("-12345".to_owned())).is_ok());
    }

    #[test]
    fn non_finite_number_nested_in_mapping_is_rejected() {
        let v = Value::mapping([("n", Value::Number(f64::NAN))]);
        assert!(hash(Algorithm::Blake3, &v).is_err());
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        assert!(Algorithm::parse("md5").is_err());
    }
}
