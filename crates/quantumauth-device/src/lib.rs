//! Hardware-rooted signing and sealing for QuantumAuth.
//!
//! Security goals:
//! - the classical signing key is generated inside the hardware device and
//!   never leaves it; callers see only the public key and raw signatures
//! - the key lives at a **persistent handle** so the device identity is
//!   stable across restarts; a key that cannot be persisted is never used
//! - sealed blobs are recoverable only on the same physical device and owner
//!   hierarchy
//!
//! Backends share one [`HardwareSigner`] surface: TPM 2.0 on Linux and
//! Windows (via `tss-esapi`), a Secure Enclave backend on macOS (not yet
//! implemented), and an in-memory software backend for development and tests.
//! The [`open_hardware_signer`] factory picks the hardware backend for the
//! host OS; the software backend is only ever constructed explicitly.

#[cfg(target_os = "macos")]
mod enclave;
#[cfg(not(target_os = "macos"))]
mod seal;
#[cfg(not(target_os = "macos"))]
mod tpm;

#[cfg(not(target_os = "macos"))]
pub use seal::TpmSealer;
#[cfg(not(target_os = "macos"))]
pub use tpm::TpmSigner;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature as P256Signature, SigningKey as P256SigningKey};
use quantumauth_core::util::b64_wire;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default base of the persistent-handle range scanned for a signing slot.
pub const DEFAULT_HANDLE_RANGE_START: u32 = 0x8100_A001;
/// Default number of slots scanned from the range base.
pub const DEFAULT_HANDLE_RANGE_COUNT: u32 = 32;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("hardware device unavailable: {0}")]
    Unavailable(String),
    #[error("device {op} failed: {detail}")]
    Op { op: &'static str, detail: String },
    #[error("no reusable signing key and no empty persistent slot in 0x{start:08x}..0x{end:08x}")]
    SlotExhausted { start: u32, end: u32 },
    #[error("signing key created but could not be persisted at 0x{handle:08x}: {detail}")]
    PersistRequired { handle: u32, detail: String },
    #[error("hardware signing key missing")]
    MissingKey,
    #[error("sealed blob: {0}")]
    SealedBlob(&'static str),
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
    #[error("signer is closed")]
    Closed,
}

impl DeviceError {
    pub(crate) fn op(op: &'static str, detail: impl ToString) -> Self {
        DeviceError::Op {
            op,
            detail: detail.to_string(),
        }
    }
}

/// Where the signing key lives.
#[derive(Debug, Clone)]
pub struct HardwareKeyConfig {
    /// Explicit persistent handle. When set, only this slot is considered.
    pub handle: Option<u32>,
    /// First persistent handle of the scan range (ignored with `handle`).
    pub handle_range_start: u32,
    /// Number of slots scanned from `handle_range_start`.
    pub handle_range_count: u32,
    /// Never reuse an existing key; evict and recreate instead.
    pub force_new: bool,
    /// Owner-hierarchy auth. Usually empty on dev machines.
    pub owner_auth: Option<String>,
    /// TCTI override, e.g. `swtpm:host=127.0.0.1,port=2321`. Defaults to the
    /// host device (`/dev/tpmrm0` then `/dev/tpm0` on Linux, TBS on Windows).
    pub tcti: Option<String>,
}

impl Default for HardwareKeyConfig {
    fn default() -> Self {
        Self {
            handle: None,
            handle_range_start: DEFAULT_HANDLE_RANGE_START,
            handle_range_count: DEFAULT_HANDLE_RANGE_COUNT,
            force_new: false,
            owner_auth: None,
            tcti: None,
        }
    }
}

/// Configuration for the sealing backend.
#[derive(Debug, Clone, Default)]
pub struct SealerConfig {
    pub owner_auth: Option<String>,
    pub tcti: Option<String>,
}

/// A signing device holding a NIST P-256 key.
///
/// Signatures are ECDSA over SHA-256, encoded as raw `R || S` with each
/// coordinate left-padded to 32 bytes, never DER. The public key is
/// uncompressed SEC1 (`0x04 || X || Y`, 65 bytes).
#[async_trait]
pub trait HardwareSigner: Send + Sync {
    /// Uncompressed SEC1 public key, 65 bytes.
    fn public_key(&self) -> Vec<u8>;

    /// Public key as unpadded standard base64.
    fn public_key_b64(&self) -> String;

    /// Sign `msg` (hashed with SHA-256 internally). Returns 64 bytes.
    async fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, DeviceError>;

    /// [`HardwareSigner::sign`], base64-encoded.
    async fn sign_b64(&self, msg: &[u8]) -> Result<String, DeviceError> {
        Ok(b64_wire(&self.sign(msg).await?))
    }

    /// Release the device session. Idempotent: closing twice returns `Ok`.
    async fn close(&self) -> Result<(), DeviceError>;
}

/// Protects small secrets (like a 32-byte DEK) under the device's root of
/// trust. Blobs are portable only to the same physical device and hierarchy.
#[async_trait]
pub trait Sealer: Send + Sync {
    async fn seal(&self, label: &str, secret: &[u8]) -> Result<Vec<u8>, DeviceError>;
    async fn unseal(&self, label: &str, blob: &[u8]) -> Result<Vec<u8>, DeviceError>;
}

/// Open the hardware signing backend for the host OS.
///
/// Linux/Windows: TPM 2.0 with the persistent-slot lifecycle. macOS: the
/// Secure Enclave backend is not implemented yet and this returns
/// [`DeviceError::Unsupported`].
pub async fn open_hardware_signer(
    config: HardwareKeyConfig,
) -> Result<Arc<dyn HardwareSigner>, DeviceError> {
    #[cfg(target_os = "macos")]
    {
        enclave::open(config).await
    }
    #[cfg(not(target_os = "macos"))]
    {
        Ok(Arc::new(TpmSigner::open(config).await?))
    }
}

/// Build the sealing backend for the host OS.
pub fn new_sealer(config: SealerConfig) -> Arc<dyn Sealer> {
    #[cfg(target_os = "macos")]
    {
        let _ = config;
        Arc::new(enclave::EnclaveSealer)
    }
    #[cfg(not(target_os = "macos"))]
    {
        Arc::new(TpmSealer::new(config))
    }
}

/// In-memory P-256 signer with the hardware surface, for development and for
/// exercising the full sign/verify path in tests. Never selected by
/// [`open_hardware_signer`].
pub struct SoftwareSigner {
    key: Mutex<Option<P256SigningKey>>,
    public: Vec<u8>,
    public_b64: String,
}

impl SoftwareSigner {
    pub fn generate() -> Self {
        let key = P256SigningKey::random(&mut p256::elliptic_curve::rand_core::OsRng);
        Self::from_signing_key(key)
    }

    pub fn from_signing_key(key: P256SigningKey) -> Self {
        let public = key.verifying_key().to_encoded_point(false).as_bytes().to_vec();
        let public_b64 = b64_wire(&public);
        Self {
            key: Mutex::new(Some(key)),
            public,
            public_b64,
        }
    }
}

#[async_trait]
impl HardwareSigner for SoftwareSigner {
    fn public_key(&self) -> Vec<u8> {
        self.public.clone()
    }

    fn public_key_b64(&self) -> String {
        self.public_b64.clone()
    }

    async fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, DeviceError> {
        let guard = self.key.lock().expect("software signer lock");
        let key = guard.as_ref().ok_or(DeviceError::Closed)?;
        let sig: P256Signature = key.sign(msg);
        Ok(sig.to_bytes().to_vec())
    }

    async fn close(&self) -> Result<(), DeviceError> {
        self.key.lock().expect("software signer lock").take();
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct MemorySealedBlob {
    v: u32,
    label: String,
    slot: u64,
}

/// Label-checked [`Sealer`] keeping secrets in process memory. Blobs only
/// unseal on the instance that produced them, which mimics the
/// same-device-only property of the hardware sealer. For tests and
/// development on machines without a TPM.
#[derive(Default)]
pub struct InMemorySealer {
    slots: Mutex<HashMap<u64, Vec<u8>>>,
    next: Mutex<u64>,
}

#[async_trait]
impl Sealer for InMemorySealer {
    async fn seal(&self, label: &str, secret: &[u8]) -> Result<Vec<u8>, DeviceError> {
        if secret.is_empty() {
            return Err(DeviceError::SealedBlob("secret empty"));
        }
        let slot = {
            let mut next = self.next.lock().expect("sealer lock");
            *next += 1;
            *next
        };
        self.slots
            .lock()
            .expect("sealer lock")
            .insert(slot, secret.to_vec());
        let blob = MemorySealedBlob {
            v: 1,
            label: label.to_string(),
            slot,
        };
        serde_json::to_vec(&blob).map_err(|e| DeviceError::op("seal", e))
    }

    async fn unseal(&self, label: &str, blob: &[u8]) -> Result<Vec<u8>, DeviceError> {
        let blob: MemorySealedBlob =
            serde_json::from_slice(blob).map_err(|_| DeviceError::SealedBlob("unparseable"))?;
        if blob.v != 1 {
            return Err(DeviceError::SealedBlob("unsupported version"));
        }
        if !blob.label.is_empty() && blob.label != label {
            return Err(DeviceError::SealedBlob("label mismatch"));
        }
        self.slots
            .lock()
            .expect("sealer lock")
            .get(&blob.slot)
            .cloned()
            .ok_or(DeviceError::SealedBlob("unknown slot"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Verifier as _;

    #[tokio::test]
    async fn software_signer_round_trips() -> anyhow::Result<()> {
        let signer = SoftwareSigner::generate();

        let pk = signer.public_key();
        assert_eq!(pk.len(), 65);
        assert_eq!(pk[0], 0x04);

        let msg = b"hello hardware";
        let sig_bytes = signer.sign(msg).await?;
        assert_eq!(sig_bytes.len(), 64);

        let point = p256::EncodedPoint::from_bytes(&pk)?;
        let verifying = p256::ecdsa::VerifyingKey::from_encoded_point(&point)?;
        let sig = p256::ecdsa::Signature::from_slice(&sig_bytes)?;
        verifying.verify(msg, &sig)?;
        Ok(())
    }

    #[tokio::test]
    async fn software_signer_close_is_idempotent() -> anyhow::Result<()> {
        let signer = SoftwareSigner::generate();
        signer.close().await?;
        signer.close().await?;
        assert!(matches!(signer.sign(b"x").await, Err(DeviceError::Closed)));
        Ok(())
    }

    #[tokio::test]
    async fn memory_sealer_checks_labels_and_instance() -> anyhow::Result<()> {
        let sealer = InMemorySealer::default();
        let blob = sealer.seal("pq-dek", b"super secret").await?;
        assert_eq!(sealer.unseal("pq-dek", &blob).await?, b"super secret");

        assert!(matches!(
            sealer.unseal("other-label", &blob).await,
            Err(DeviceError::SealedBlob("label mismatch"))
        ));

        let other = InMemorySealer::default();
        assert!(other.unseal("pq-dek", &blob).await.is_err());

        assert!(sealer.seal("pq-dek", b"").await.is_err());
        Ok(())
    }
}
