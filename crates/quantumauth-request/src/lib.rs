//! Hybrid-signed requests: produce and verify the QuantumAuth header set.
//!
//! Every signed request carries two independent signatures over the same
//! canonical bytes: a hardware-rooted ECDSA P-256 signature and an ML-DSA-65
//! post-quantum signature. Verification recomputes the canonical string from
//! the request and checks both against the presented public keys; replay
//! suppression is delegated to an injected [`ChallengeStore`].

use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderMap;
use quantumauth_canonical::{CanonicalError, CanonicalInput, body_sha256_hex, canonicalize, parse};
use quantumauth_core::headers;
use quantumauth_core::util::{b64_wire, b64_wire_decode};
use quantumauth_device::{DeviceError, HardwareSigner};
use quantumauth_vault::{PqKeyVault, VaultError};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const AUTH_PARAM_TPM_SIG: &str = "tpm-sig";
const AUTH_PARAM_PQ_SIG: &str = "pq-sig";
const AUTH_PARAM_TPM_KEY: &str = "tpm-key";
const AUTH_PARAM_PQ_KEY: &str = "pq-key";
const AUTH_PARAM_VERSION: &str = "ver";

#[derive(Debug, Error)]
pub enum SignError {
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    #[error("hardware signature: {0}")]
    Device(#[from] DeviceError),
    #[error("post-quantum signature: {0}")]
    Vault(#[from] VaultError),
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("missing header {0}")]
    MissingHeader(&'static str),
    #[error("malformed header {0}")]
    MalformedHeader(&'static str),
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    #[error("body hash mismatch")]
    BodyHashMismatch,
    #[error("hardware signature rejected")]
    TpmSignature,
    #[error("post-quantum signature rejected")]
    PqSignature,
    #[error("challenge replayed or timestamp rejected")]
    Replay,
    #[error("challenge store: {0}")]
    ChallengeStore(String),
}

/// Replay-suppression hook. The store owns the freshness policy: it sees the
/// challenge id and timestamp of a request whose signatures already verified
/// and returns `false` to reject it (reused challenge, stale timestamp).
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn register(&self, challenge_id: Uuid, timestamp: i64) -> anyhow::Result<bool>;
}

/// Request fields to sign. `body` is the raw bytes that will travel on the
/// wire; its hash is computed here.
#[derive(Debug, Clone)]
pub struct SignRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub app_id: &'a str,
    pub backend_host: &'a str,
    pub timestamp: i64,
    pub challenge_id: Uuid,
    pub user_id: Uuid,
    pub device_id: Uuid,
    pub body: &'a [u8],
}

#[derive(Debug, Clone)]
pub struct SignOptions {
    /// Value for `X-QA-Sig-Ver` and the `ver` authorization parameter.
    pub signature_version: Option<String>,
    /// Echo the canonical bytes in `X-QuantumAuth-Canonical-B64` for verifier
    /// debugging.
    pub include_canonical_echo: bool,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            signature_version: Some("1".to_string()),
            include_canonical_echo: false,
        }
    }
}

/// The header set that travels on a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequestHeaders {
    pub app_id: String,
    pub audience: String,
    pub timestamp: i64,
    pub challenge_id: String,
    pub user_id: String,
    pub device_id: String,
    pub body_sha256: String,
    pub tpm_signature_b64: String,
    pub pq_signature_b64: String,
    pub tpm_public_key_b64: String,
    pub pq_public_key_b64: String,
    pub signature_version: Option<String>,
    pub canonical_b64: Option<String>,
}

impl SignedRequestHeaders {
    /// Render into an [`http::HeaderMap`].
    pub fn to_header_map(&self) -> Result<HeaderMap, http::Error> {
        let mut map = HeaderMap::new();
        let mut put = |name: &'static str, value: &str| -> Result<(), http::Error> {
            map.insert(name, http::HeaderValue::from_str(value)?);
            Ok(())
        };
        put(headers::AUTHORIZATION, &self.format_authorization())?;
        put(headers::QA_APP_ID, &self.app_id)?;
        put(headers::QA_AUDIENCE, &self.audience)?;
        put(headers::QA_TIMESTAMP, &self.timestamp.to_string())?;
        put(headers::QA_CHALLENGE_ID, &self.challenge_id)?;
        put(headers::QA_USER_ID, &self.user_id)?;
        put(headers::QA_DEVICE_ID, &self.device_id)?;
        put(headers::QA_BODY_SHA256, &self.body_sha256)?;
        if let Some(ver) = &self.signature_version {
            put(headers::QA_SIG_VERSION, ver)?;
        }
        if let Some(canonical) = &self.canonical_b64 {
            put(headers::QA_CANONICAL_B64, canonical)?;
        }
        Ok(map)
    }

    /// Extract from an [`http::HeaderMap`]. Field values are carried verbatim;
    /// validation happens during verification.
    pub fn from_header_map(map: &HeaderMap) -> Result<Self, VerifyError> {
        let get = |name: &'static str| -> Result<String, VerifyError> {
            let value = map.get(name).ok_or(VerifyError::MissingHeader(name))?;
            Ok(value
                .to_str()
                .map_err(|_| VerifyError::MalformedHeader(name))?
                .to_string())
        };
        let get_opt = |name: &'static str| -> Option<String> {
            map.get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let auth = get(headers::AUTHORIZATION)?;
        let params = parse_authorization(&auth)?;

        let ts_raw = get(headers::QA_TIMESTAMP)?;
        let timestamp: i64 = ts_raw
            .trim()
            .parse()
            .map_err(|_| VerifyError::MalformedHeader(headers::QA_TIMESTAMP))?;

        Ok(Self {
            app_id: get(headers::QA_APP_ID)?,
            audience: get(headers::QA_AUDIENCE)?,
            timestamp,
            challenge_id: get(headers::QA_CHALLENGE_ID)?,
            user_id: get(headers::QA_USER_ID)?,
            device_id: get(headers::QA_DEVICE_ID)?,
            body_sha256: get(headers::QA_BODY_SHA256)?,
            tpm_signature_b64: params.tpm_sig,
            pq_signature_b64: params.pq_sig,
            tpm_public_key_b64: params.tpm_key,
            pq_public_key_b64: params.pq_key,
            signature_version: params.version.or_else(|| get_opt(headers::QA_SIG_VERSION)),
            canonical_b64: get_opt(headers::QA_CANONICAL_B64),
        })
    }

    fn format_authorization(&self) -> String {
        let mut params = vec![
            format!("{AUTH_PARAM_TPM_SIG}=\"{}\"", self.tpm_signature_b64),
            format!("{AUTH_PARAM_PQ_SIG}=\"{}\"", self.pq_signature_b64),
            format!("{AUTH_PARAM_TPM_KEY}=\"{}\"", self.tpm_public_key_b64),
            format!("{AUTH_PARAM_PQ_KEY}=\"{}\"", self.pq_public_key_b64),
        ];
        if let Some(ver) = &self.signature_version {
            params.push(format!("{AUTH_PARAM_VERSION}=\"{ver}\""));
        }
        format!("{} {}", headers::SCHEME_QUANTUM_AUTH, params.join(", "))
    }
}

struct AuthParams {
    tpm_sig: String,
    pq_sig: String,
    tpm_key: String,
    pq_key: String,
    version: Option<String>,
}

fn parse_authorization(value: &str) -> Result<AuthParams, VerifyError> {
    let malformed = || VerifyError::MalformedHeader(headers::AUTHORIZATION);
    let rest = value
        .trim()
        .strip_prefix(headers::SCHEME_QUANTUM_AUTH)
        .ok_or_else(malformed)?;
    if !rest.starts_with(char::is_whitespace) {
        return Err(malformed());
    }

    let mut tpm_sig = None;
    let mut pq_sig = None;
    let mut tpm_key = None;
    let mut pq_key = None;
    let mut version = None;
    for part in rest.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, raw) = part.split_once('=').ok_or_else(malformed)?;
        let value = raw
            .trim()
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .ok_or_else(malformed)?
            .to_string();
        match key.trim() {
            AUTH_PARAM_TPM_SIG => tpm_sig = Some(value),
            AUTH_PARAM_PQ_SIG => pq_sig = Some(value),
            AUTH_PARAM_TPM_KEY => tpm_key = Some(value),
            AUTH_PARAM_PQ_KEY => pq_key = Some(value),
            AUTH_PARAM_VERSION => version = Some(value),
            _ => {}
        }
    }

    Ok(AuthParams {
        tpm_sig: tpm_sig.ok_or_else(malformed)?,
        pq_sig: pq_sig.ok_or_else(malformed)?,
        tpm_key: tpm_key.ok_or_else(malformed)?,
        pq_key: pq_key.ok_or_else(malformed)?,
        version,
    })
}

/// Produces signed header sets. One per process, wrapping the process-wide
/// hardware signer and PQ vault.
pub struct RequestSigner {
    hardware: Arc<dyn HardwareSigner>,
    vault: Arc<PqKeyVault>,
}

impl RequestSigner {
    pub fn new(hardware: Arc<dyn HardwareSigner>, vault: Arc<PqKeyVault>) -> Self {
        Self { hardware, vault }
    }

    pub fn hardware(&self) -> &Arc<dyn HardwareSigner> {
        &self.hardware
    }

    pub fn vault(&self) -> &Arc<PqKeyVault> {
        &self.vault
    }

    /// Canonicalize the request and sign it with both algorithms.
    ///
    /// Fails without emitting anything if either signature cannot be
    /// produced; a partial header set never leaves this function.
    pub async fn sign(
        &self,
        request: &SignRequest<'_>,
        options: &SignOptions,
    ) -> Result<SignedRequestHeaders, SignError> {
        let input = CanonicalInput {
            method: request.method.to_string(),
            path: request.path.to_string(),
            app_id: request.app_id.to_string(),
            backend_host: request.backend_host.to_string(),
            timestamp: request.timestamp,
            challenge_id: request.challenge_id.to_string(),
            user_id: request.user_id.to_string(),
            device_id: request.device_id.to_string(),
            body_sha256_hex: body_sha256_hex(request.body),
        };
        let canonical = canonicalize(&input)?;
        // Header fields travel in normalized form so the verifier rebuilds
        // the identical canonical string.
        let normalized = parse(&canonical)?;

        let tpm_signature_b64 = self.hardware.sign_b64(&canonical).await?;
        let pq_signature_b64 = self.vault.sign_b64(&canonical).await?;

        Ok(SignedRequestHeaders {
            app_id: normalized.app_id,
            audience: normalized.backend_host,
            timestamp: normalized.timestamp,
            challenge_id: normalized.challenge_id,
            user_id: normalized.user_id,
            device_id: normalized.device_id,
            body_sha256: normalized.body_sha256_hex,
            tpm_signature_b64,
            pq_signature_b64,
            tpm_public_key_b64: self.hardware.public_key_b64(),
            pq_public_key_b64: self.vault.public_key_b64().await?,
            signature_version: options.signature_version.clone(),
            canonical_b64: options
                .include_canonical_echo
                .then(|| b64_wire(&canonical)),
        })
    }

    /// Close the underlying hardware session. The vault holds nothing open.
    pub async fn close(&self) -> Result<(), DeviceError> {
        self.vault.close();
        self.hardware.close().await
    }
}

/// A request under verification: the transport-level method and path plus
/// the received headers and raw body.
#[derive(Clone, Copy)]
pub struct VerifyRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

#[derive(Default)]
pub struct VerifyOptions {
    /// Consulted after both signatures verify, so forgeries cannot poison the
    /// store.
    pub challenge_store: Option<Arc<dyn ChallengeStore>>,
}

/// Accepted request fields, post-verification.
#[derive(Debug, Clone)]
pub struct VerifiedRequest {
    pub app_id: String,
    pub audience: String,
    pub timestamp: i64,
    pub challenge_id: Uuid,
    pub user_id: Uuid,
    pub device_id: Uuid,
    pub tpm_public_key: Vec<u8>,
    pub pq_public_key: Vec<u8>,
    pub canonical: Vec<u8>,
}

/// Verify both signatures on a received request.
///
/// Rejects on any missing or malformed canonical field, on a body hash
/// mismatch, and on either signature failing against its presented public
/// key.
pub async fn verify_signed_request(
    request: VerifyRequest<'_>,
    options: &VerifyOptions,
) -> Result<VerifiedRequest, VerifyError> {
    let header_set = SignedRequestHeaders::from_header_map(request.headers)?;

    let computed_body_hash = body_sha256_hex(request.body);
    if !header_set
        .body_sha256
        .trim()
        .eq_ignore_ascii_case(&computed_body_hash)
    {
        return Err(VerifyError::BodyHashMismatch);
    }

    let input = CanonicalInput {
        method: request.method.to_string(),
        path: request.path.to_string(),
        app_id: header_set.app_id.clone(),
        backend_host: header_set.audience.clone(),
        timestamp: header_set.timestamp,
        challenge_id: header_set.challenge_id.clone(),
        user_id: header_set.user_id.clone(),
        device_id: header_set.device_id.clone(),
        body_sha256_hex: computed_body_hash,
    };
    let canonical = canonicalize(&input)?;

    let tpm_public_key = b64_wire_decode(&header_set.tpm_public_key_b64)
        .map_err(|_| VerifyError::MalformedHeader(headers::AUTHORIZATION))?;
    let tpm_signature = b64_wire_decode(&header_set.tpm_signature_b64)
        .map_err(|_| VerifyError::MalformedHeader(headers::AUTHORIZATION))?;
    verify_ecdsa(&tpm_public_key, &canonical, &tpm_signature)?;

    let pq_public_key = b64_wire_decode(&header_set.pq_public_key_b64)
        .map_err(|_| VerifyError::MalformedHeader(headers::AUTHORIZATION))?;
    let pq_signature = b64_wire_decode(&header_set.pq_signature_b64)
        .map_err(|_| VerifyError::MalformedHeader(headers::AUTHORIZATION))?;
    quantumauth_vault::verify(&pq_public_key, &canonical, &pq_signature)
        .map_err(|_| VerifyError::PqSignature)?;

    // Values already passed strict parsing inside canonicalize.
    let normalized = parse(&canonical)?;
    let challenge_id = Uuid::parse_str(&normalized.challenge_id)
        .map_err(|_| VerifyError::MalformedHeader(headers::QA_CHALLENGE_ID))?;
    let user_id = Uuid::parse_str(&normalized.user_id)
        .map_err(|_| VerifyError::MalformedHeader(headers::QA_USER_ID))?;
    let device_id = Uuid::parse_str(&normalized.device_id)
        .map_err(|_| VerifyError::MalformedHeader(headers::QA_DEVICE_ID))?;

    if let Some(store) = &options.challenge_store {
        let fresh = store
            .register(challenge_id, normalized.timestamp)
            .await
            .map_err(|e| VerifyError::ChallengeStore(e.to_string()))?;
        if !fresh {
            debug!(%challenge_id, "challenge rejected by store");
            return Err(VerifyError::Replay);
        }
    }

    Ok(VerifiedRequest {
        app_id: normalized.app_id,
        audience: normalized.backend_host,
        timestamp: normalized.timestamp,
        challenge_id,
        user_id,
        device_id,
        tpm_public_key,
        pq_public_key,
        canonical,
    })
}

fn verify_ecdsa(public_key: &[u8], msg: &[u8], signature: &[u8]) -> Result<(), VerifyError> {
    use p256::ecdsa::signature::Verifier as _;

    if public_key.len() != 65 || public_key[0] != 0x04 {
        return Err(VerifyError::TpmSignature);
    }
    let point = p256::EncodedPoint::from_bytes(public_key).map_err(|_| VerifyError::TpmSignature)?;
    let verifying = p256::ecdsa::VerifyingKey::from_encoded_point(&point)
        .map_err(|_| VerifyError::TpmSignature)?;
    let signature =
        p256::ecdsa::Signature::from_slice(signature).map_err(|_| VerifyError::TpmSignature)?;
    verifying
        .verify(msg, &signature)
        .map_err(|_| VerifyError::TpmSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use quantumauth_device::{InMemorySealer, Sealer, SoftwareSigner};
    use quantumauth_vault::PqVaultConfig;

    struct InMemoryChallengeStore {
        seen: Mutex<HashMap<Uuid, i64>>,
    }

    #[async_trait]
    impl ChallengeStore for InMemoryChallengeStore {
        async fn register(&self, challenge_id: Uuid, timestamp: i64) -> anyhow::Result<bool> {
            let mut seen = self.seen.lock().expect("store lock");
            if seen.contains_key(&challenge_id) {
                return Ok(false);
            }
            seen.insert(challenge_id, timestamp);
            Ok(true)
        }
    }

    async fn test_signer(dir: &std::path::Path) -> anyhow::Result<RequestSigner> {
        let sealer: Arc<dyn Sealer> = Arc::new(InMemorySealer::default());
        let vault = PqKeyVault::new(
            sealer,
            PqVaultConfig {
                key_file_path: Some(dir.join("pqkeys.json.enc")),
                label: "request-test".to_string(),
            },
        )?;
        vault.ensure().await?;
        Ok(RequestSigner::new(
            Arc::new(SoftwareSigner::generate()),
            Arc::new(vault),
        ))
    }

    fn sample_request<'a>(body: &'a [u8], ids: &'a (Uuid, Uuid, Uuid)) -> SignRequest<'a> {
        SignRequest {
            method: "POST",
            path: "/api/v1/login?x=1",
            app_id: "app-1",
            backend_host: "https://Example.COM:443",
            timestamp: 1_700_000_000,
            challenge_id: ids.0,
            user_id: ids.1,
            device_id: ids.2,
            body,
        }
    }

    fn new_ids() -> (Uuid, Uuid, Uuid) {
        (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn sign_then_verify_accepts() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let signer = test_signer(dir.path()).await?;
        let ids = new_ids();
        let body = br#"{"user":"alice"}"#;

        let headers = signer
            .sign(&sample_request(body, &ids), &SignOptions::default())
            .await?;
        assert_eq!(headers.audience, "example.com");

        let map = headers.to_header_map()?;
        let verified = verify_signed_request(
            VerifyRequest {
                method: "POST",
                path: "/api/v1/login?x=1",
                headers: &map,
                body,
            },
            &VerifyOptions::default(),
        )
        .await?;

        assert_eq!(verified.app_id, "app-1");
        assert_eq!(verified.audience, "example.com");
        assert_eq!(verified.challenge_id, ids.0);
        assert_eq!(verified.tpm_public_key.len(), 65);
        Ok(())
    }

    #[tokio::test]
    async fn tampered_body_is_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let signer = test_signer(dir.path()).await?;
        let ids = new_ids();

        let headers = signer
            .sign(&sample_request(b"original", &ids), &SignOptions::default())
            .await?;
        let map = headers.to_header_map()?;

        let err = verify_signed_request(
            VerifyRequest {
                method: "POST",
                path: "/api/v1/login?x=1",
                headers: &map,
                body: b"tampered",
            },
            &VerifyOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VerifyError::BodyHashMismatch));
        Ok(())
    }

    #[tokio::test]
    async fn flipped_signatures_are_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let signer = test_signer(dir.path()).await?;
        let ids = new_ids();
        let body = b"payload";

        let headers = signer
            .sign(&sample_request(body, &ids), &SignOptions::default())
            .await?;

        let mut bad_tpm = headers.clone();
        let mut sig = b64_wire_decode(&bad_tpm.tpm_signature_b64)?;
        sig[10] ^= 0x01;
        bad_tpm.tpm_signature_b64 = b64_wire(&sig);
        let err = verify_signed_request(
            VerifyRequest {
                method: "POST",
                path: "/api/v1/login?x=1",
                headers: &bad_tpm.to_header_map()?,
                body,
            },
            &VerifyOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VerifyError::TpmSignature));

        let mut bad_pq = headers.clone();
        let mut sig = b64_wire_decode(&bad_pq.pq_signature_b64)?;
        sig[10] ^= 0x01;
        bad_pq.pq_signature_b64 = b64_wire(&sig);
        let err = verify_signed_request(
            VerifyRequest {
                method: "POST",
                path: "/api/v1/login?x=1",
                headers: &bad_pq.to_header_map()?,
                body,
            },
            &VerifyOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VerifyError::PqSignature));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_method_or_path_breaks_the_canonical_binding() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let signer = test_signer(dir.path()).await?;
        let ids = new_ids();
        let body = b"payload";

        let headers = signer
            .sign(&sample_request(body, &ids), &SignOptions::default())
            .await?;
        let map = headers.to_header_map()?;

        let err = verify_signed_request(
            VerifyRequest {
                method: "PUT",
                path: "/api/v1/login?x=1",
                headers: &map,
                body,
            },
            &VerifyOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VerifyError::TpmSignature));
        Ok(())
    }

    #[tokio::test]
    async fn missing_header_is_reported() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let signer = test_signer(dir.path()).await?;
        let ids = new_ids();
        let body = b"payload";

        let headers = signer
            .sign(&sample_request(body, &ids), &SignOptions::default())
            .await?;
        let mut map = headers.to_header_map()?;
        map.remove(headers::QA_CHALLENGE_ID);

        let err = verify_signed_request(
            VerifyRequest {
                method: "POST",
                path: "/api/v1/login?x=1",
                headers: &map,
                body,
            },
            &VerifyOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::MissingHeader(h) if h == headers::QA_CHALLENGE_ID
        ));
        Ok(())
    }

    #[tokio::test]
    async fn challenge_store_rejects_replay() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let signer = test_signer(dir.path()).await?;
        let ids = new_ids();
        let body = b"payload";

        let headers = signer
            .sign(&sample_request(body, &ids), &SignOptions::default())
            .await?;
        let map = headers.to_header_map()?;

        let options = VerifyOptions {
            challenge_store: Some(Arc::new(InMemoryChallengeStore {
                seen: Mutex::new(HashMap::new()),
            })),
        };
        let request = VerifyRequest {
            method: "POST",
            path: "/api/v1/login?x=1",
            headers: &map,
            body,
        };

        verify_signed_request(request, &options).await?;
        let err = verify_signed_request(request, &options).await.unwrap_err();
        assert!(matches!(err, VerifyError::Replay));
        Ok(())
    }

    #[tokio::test]
    async fn canonical_echo_round_trips() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let signer = test_signer(dir.path()).await?;
        let ids = new_ids();
        let body = b"payload";

        let options = SignOptions {
            include_canonical_echo: true,
            ..SignOptions::default()
        };
        let headers = signer.sign(&sample_request(body, &ids), &options).await?;

        let echoed = b64_wire_decode(headers.canonical_b64.as_deref().unwrap())?;
        let parsed = parse(&echoed)?;
        assert_eq!(parsed.method, "POST");
        assert_eq!(parsed.backend_host, "example.com");

        let round = SignedRequestHeaders::from_header_map(&headers.to_header_map()?)?;
        assert_eq!(round, headers);
        Ok(())
    }

    #[test]
    fn authorization_parsing_requires_all_parameters() {
        let err = parse_authorization("QuantumAuth tpm-sig=\"a\"").unwrap_err();
        assert!(matches!(
            err,
            VerifyError::MalformedHeader(h) if h == headers::AUTHORIZATION
        ));
        assert!(parse_authorization("Bearer abc").is_err());
    }
}
