//! Header names for QuantumAuth signed requests.

/// Standard `Authorization` header.
pub const AUTHORIZATION: &str = "Authorization";

/// Authorization scheme advertised on signed requests.
pub const SCHEME_QUANTUM_AUTH: &str = "QuantumAuth";

/// Application identifier.
pub const QA_APP_ID: &str = "X-QA-App-Id";
/// Normalized backend host the request is intended for.
pub const QA_AUDIENCE: &str = "X-QA-Aud";
/// Signing timestamp, integer seconds since epoch.
pub const QA_TIMESTAMP: &str = "X-QA-Ts";
/// Single-use challenge id (UUID v4).
pub const QA_CHALLENGE_ID: &str = "X-QA-Challenge-Id";
/// User id (UUID v4).
pub const QA_USER_ID: &str = "X-QA-User-Id";
/// Device id (UUID v4).
pub const QA_DEVICE_ID: &str = "X-QA-Device-Id";
/// Lowercase hex SHA-256 of the raw request body.
pub const QA_BODY_SHA256: &str = "X-QA-Body-Sha256";

/// Optional signature format version.
pub const QA_SIG_VERSION: &str = "X-QA-Sig-Ver";

/// Optional echo of the canonical bytes, base64, for debugging verifiers.
pub const QA_CANONICAL_B64: &str = "X-QuantumAuth-Canonical-B64";
