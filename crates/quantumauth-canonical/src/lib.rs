//! Canonical byte string over an HTTP request.
//!
//! Signer and verifier must agree bit-for-bit on what was signed, so every
//! field is normalized here before serialization and the wire form is a fixed
//! 9-line text:
//!
//! ```text
//! <METHOD>
//! <path>
//! APP: <appId>
//! AUD: <backendHost>
//! TS: <timestamp>
//! CHALLENGE: <challengeId>
//! USER: <userId>
//! DEVICE: <deviceId>
//! BODY-SHA256: <hex>
//! ```
//!
//! Lines are joined with a single `\n` and there is no trailing newline. The
//! request-target (method, path) stays positional so a future labeled line
//! can be appended without re-homing older fields.

mod host;

pub use host::normalize_backend_host;

use sha2::{Digest as _, Sha256};
use thiserror::Error;
use uuid::Uuid;

const APP_PREFIX: &str = "APP: ";
const AUD_PREFIX: &str = "AUD: ";
const TS_PREFIX: &str = "TS: ";
const CHALLENGE_PREFIX: &str = "CHALLENGE: ";
const USER_PREFIX: &str = "USER: ";
const DEVICE_PREFIX: &str = "DEVICE: ";
const BODY_PREFIX: &str = "BODY-SHA256: ";

const ALLOWED_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS", "TRACE", "CONNECT",
];

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("invalid method: {0:?}")]
    InvalidMethod(String),
    #[error("invalid path: {0}")]
    InvalidPath(&'static str),
    #[error("invalid app id")]
    InvalidAppId,
    #[error("invalid backend host")]
    InvalidHost,
    #[error("invalid {field} uuid: {reason}")]
    InvalidUuid {
        field: &'static str,
        reason: &'static str,
    },
    #[error("invalid body sha256")]
    InvalidBodyHash,
    #[error("malformed canonical string: {0}")]
    Malformed(String),
}

/// Inputs to canonicalization. Fields are validated and normalized by
/// [`canonicalize`]; callers may pass them in raw wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalInput {
    pub method: String,
    pub path: String,
    pub app_id: String,
    pub backend_host: String,
    pub timestamp: i64,
    pub challenge_id: String,
    pub user_id: String,
    pub device_id: String,
    pub body_sha256_hex: String,
}

/// Fields recovered from a canonical string by [`parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCanonical {
    pub method: String,
    pub path: String,
    pub app_id: String,
    pub backend_host: String,
    pub timestamp: i64,
    pub challenge_id: String,
    pub user_id: String,
    pub device_id: String,
    pub body_sha256_hex: String,
}

/// Lowercase hex SHA-256 of a raw request body.
pub fn body_sha256_hex(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Normalize every field and serialize the 9-line canonical string.
pub fn canonicalize(input: &CanonicalInput) -> Result<Vec<u8>, CanonicalError> {
    let method = normalize_method(&input.method)?;
    let path = normalize_path(&input.path)?;
    let app_id = input.app_id.trim();
    if app_id.is_empty() {
        return Err(CanonicalError::InvalidAppId);
    }
    let host = normalize_backend_host(&input.backend_host)?;
    let challenge = normalize_uuid("challenge", &input.challenge_id)?;
    let user = normalize_uuid("user", &input.user_id)?;
    let device = normalize_uuid("device", &input.device_id)?;
    let body_hash = normalize_body_hash(&input.body_sha256_hex)?;

    let s = format!(
        "{method}\n{path}\n{APP_PREFIX}{app_id}\n{AUD_PREFIX}{host}\n{TS_PREFIX}{ts}\n\
         {CHALLENGE_PREFIX}{challenge}\n{USER_PREFIX}{user}\n{DEVICE_PREFIX}{device}\n\
         {BODY_PREFIX}{body_hash}",
        ts = input.timestamp,
    );
    Ok(s.into_bytes())
}

/// Parse a canonical string back into its fields.
///
/// Trailing whitespace is tolerated; everything else must match the layout
/// exactly: 9 lines, labeled lines carrying their literal prefix.
pub fn parse(bytes: &[u8]) -> Result<ParsedCanonical, CanonicalError> {
    let s = std::str::from_utf8(bytes)
        .map_err(|_| CanonicalError::Malformed("not utf-8".to_string()))?;
    let lines: Vec<&str> = s.trim_end().split('\n').collect();
    if lines.len() != 9 {
        return Err(CanonicalError::Malformed(format!(
            "unexpected line count: got {}, want 9",
            lines.len()
        )));
    }

    let labeled = |line: &str, prefix: &str| -> Result<String, CanonicalError> {
        line.strip_prefix(prefix)
            .map(|rest| rest.trim().to_string())
            .ok_or_else(|| CanonicalError::Malformed(format!("invalid {}line: {line:?}", prefix)))
    };

    let ts_str = labeled(lines[4], TS_PREFIX)?;
    let timestamp: i64 = ts_str
        .parse()
        .map_err(|_| CanonicalError::Malformed(format!("invalid timestamp: {ts_str:?}")))?;

    Ok(ParsedCanonical {
        method: lines[0].trim().to_string(),
        path: lines[1].trim().to_string(),
        app_id: labeled(lines[2], APP_PREFIX)?,
        backend_host: labeled(lines[3], AUD_PREFIX)?,
        timestamp,
        challenge_id: labeled(lines[5], CHALLENGE_PREFIX)?,
        user_id: labeled(lines[6], USER_PREFIX)?,
        device_id: labeled(lines[7], DEVICE_PREFIX)?,
        body_sha256_hex: labeled(lines[8], BODY_PREFIX)?,
    })
}

fn normalize_method(method: &str) -> Result<String, CanonicalError> {
    let m = method.trim();
    if m.is_empty() {
        return Err(CanonicalError::InvalidMethod(method.to_string()));
    }
    let upper = m.to_ascii_uppercase();
    if !ALLOWED_METHODS.contains(&upper.as_str()) {
        return Err(CanonicalError::InvalidMethod(method.to_string()));
    }
    Ok(upper)
}

fn normalize_path(path: &str) -> Result<String, CanonicalError> {
    let p = path.trim();
    if p.is_empty() {
        return Err(CanonicalError::InvalidPath("empty"));
    }
    if p.chars().any(|c| c <= '\u{1f}' || c == '\u{7f}') {
        return Err(CanonicalError::InvalidPath("control character"));
    }
    if p.contains('#') {
        return Err(CanonicalError::InvalidPath("fragment not allowed"));
    }
    if p.contains("://") {
        return Err(CanonicalError::InvalidPath("absolute URL not allowed"));
    }
    if p.starts_with("//") {
        return Err(CanonicalError::InvalidPath("protocol-relative not allowed"));
    }
    if !p.starts_with('/') {
        return Err(CanonicalError::InvalidPath("must start with /"));
    }

    // Collapse duplicate slashes in the path component only; the raw query is
    // preserved byte-for-byte, order and encoding included.
    let (path_part, query) = match p.split_once('?') {
        Some((path_part, query)) => (path_part, Some(query)),
        None => (p, None),
    };
    let mut collapsed = String::with_capacity(path_part.len());
    let mut prev_slash = false;
    for c in path_part.chars() {
        if c == '/' && prev_slash {
            continue;
        }
        prev_slash = c == '/';
        collapsed.push(c);
    }
    match query {
        Some(q) => Ok(format!("{collapsed}?{q}")),
        None => Ok(collapsed),
    }
}

fn normalize_uuid(field: &'static str, value: &str) -> Result<String, CanonicalError> {
    let id = Uuid::parse_str(value.trim()).map_err(|_| CanonicalError::InvalidUuid {
        field,
        reason: "unparseable",
    })?;
    if id.is_nil() {
        return Err(CanonicalError::InvalidUuid {
            field,
            reason: "nil uuid",
        });
    }
    if id.get_version_num() != 4 {
        return Err(CanonicalError::InvalidUuid {
            field,
            reason: "must be version 4",
        });
    }
    Ok(id.to_string())
}

fn normalize_body_hash(value: &str) -> Result<String, CanonicalError> {
    let h = value.trim().to_ascii_lowercase();
    if h.len() != 64 || !h.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CanonicalError::InvalidBodyHash);
    }
    Ok(h)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA256_EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn sample_input() -> CanonicalInput {
        CanonicalInput {
            method: "post".to_string(),
            path: "/api/v1/login?x=1".to_string(),
            app_id: "app-1".to_string(),
            backend_host: "EXAMPLE.com:443".to_string(),
            timestamp: 1_700_000_000,
            challenge_id: "0195b2a1-51a8-4cbb-9f68-ec2f6c4d1c11".to_string(),
            user_id: "4f9619ff-8b86-4011-b42d-00c04fc964ff".to_string(),
            device_id: "7c9e6679-7425-40de-944b-e07fc1f90ae7".to_string(),
            body_sha256_hex: SHA256_EMPTY.to_string(),
        }
    }

    #[test]
    fn empty_body_hash_constant() {
        assert_eq!(body_sha256_hex(b""), SHA256_EMPTY);
    }

    #[test]
    fn canonical_has_nine_labeled_lines() {
        let bytes = canonicalize(&sample_input()).unwrap();
        let s = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = s.split('\n').collect();
        assert_eq!(lines.len(), 9);
        assert_eq!(lines[0], "POST");
        assert_eq!(lines[1], "/api/v1/login?x=1");
        assert!(lines[2].starts_with("APP: "));
        assert!(lines[3].starts_with("AUD: "));
        assert!(lines[4].starts_with("TS: "));
        assert!(lines[5].starts_with("CHALLENGE: "));
        assert!(lines[6].starts_with("USER: "));
        assert!(lines[7].starts_with("DEVICE: "));
        assert!(lines[8].starts_with("BODY-SHA256: "));
        assert!(!s.ends_with('\n'));
    }

    #[test]
    fn round_trip_matches_normalized_input() {
        let input = sample_input();
        let bytes = canonicalize(&input).unwrap();
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.method, "POST");
        assert_eq!(parsed.path, input.path);
        assert_eq!(parsed.app_id, input.app_id);
        assert_eq!(parsed.backend_host, "example.com");
        assert_eq!(parsed.timestamp, input.timestamp);
        assert_eq!(parsed.challenge_id, input.challenge_id);
        assert_eq!(parsed.user_id, input.user_id);
        assert_eq!(parsed.device_id, input.device_id);
        assert_eq!(parsed.body_sha256_hex, input.body_sha256_hex);

        // Canonicalizing the parsed fields reproduces the same bytes.
        let again = canonicalize(&CanonicalInput {
            method: parsed.method,
            path: parsed.path,
            app_id: parsed.app_id,
            backend_host: parsed.backend_host,
            timestamp: parsed.timestamp,
            challenge_id: parsed.challenge_id,
            user_id: parsed.user_id,
            device_id: parsed.device_id,
            body_sha256_hex: parsed.body_sha256_hex,
        })
        .unwrap();
        assert_eq!(again, bytes);
    }

    #[test]
    fn parse_rejects_wrong_line_count_and_prefixes() {
        assert!(parse(b"GET\n/x").is_err());

        let bytes = canonicalize(&sample_input()).unwrap();
        let s = String::from_utf8(bytes).unwrap();
        let broken = s.replace("CHALLENGE: ", "CHALL: ");
        assert!(matches!(
            parse(broken.as_bytes()),
            Err(CanonicalError::Malformed(_))
        ));
    }

    #[test]
    fn method_must_be_in_allowed_set() {
        let mut input = sample_input();
        input.method = "BREW".to_string();
        assert!(matches!(
            canonicalize(&input),
            Err(CanonicalError::InvalidMethod(_))
        ));
        input.method = "  ".to_string();
        assert!(canonicalize(&input).is_err());
    }

    #[test]
    fn path_rejections() {
        for bad in ["foo", "//x", "/x#frag", "/x\u{1}", "https://e.com/x", ""] {
            assert!(normalize_path(bad).is_err(), "path {bad:?} should be rejected");
        }
    }

    #[test]
    fn path_collapses_slashes_but_preserves_query() {
        assert_eq!(normalize_path("/a//b///c").unwrap(), "/a/b/c");
        assert_eq!(
            normalize_path("/a//b?x=1//2&y=%2F%2F").unwrap(),
            "/a/b?x=1//2&y=%2F%2F"
        );
    }

    #[test]
    fn uuid_version_is_enforced() {
        // Time-based (version 1) uuid.
        let mut input = sample_input();
        input.challenge_id = "6f9619ff-8b86-d011-b42d-00c04fc964ff".to_string();
        assert!(matches!(
            canonicalize(&input),
            Err(CanonicalError::InvalidUuid { field: "challenge", .. })
        ));

        input.challenge_id = Uuid::nil().to_string();
        assert!(canonicalize(&input).is_err());
    }

    #[test]
    fn body_hash_is_validated_and_lowercased() {
        let mut input = sample_input();
        input.body_sha256_hex = SHA256_EMPTY.to_ascii_uppercase();
        let bytes = canonicalize(&input).unwrap();
        assert!(String::from_utf8(bytes).unwrap().ends_with(SHA256_EMPTY));

        input.body_sha256_hex = "abc".to_string();
        assert!(matches!(
            canonicalize(&input),
            Err(CanonicalError::InvalidBodyHash)
        ));
        input.body_sha256_hex = format!("{}zz", &SHA256_EMPTY[..62]);
        assert!(canonicalize(&input).is_err());
    }

    #[test]
    fn negative_timestamps_round_trip() {
        let mut input = sample_input();
        input.timestamp = -62_135_596_800;
        let parsed = parse(&canonicalize(&input).unwrap()).unwrap();
        assert_eq!(parsed.timestamp, -62_135_596_800);
    }
}
