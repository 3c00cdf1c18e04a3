//! At-rest protection for the post-quantum signing key.
//!
//! The ML-DSA-65 keypair lives on disk in a single JSON envelope:
//!
//! ```json
//! { "v": 1, "sealed_dek_b64": "...", "nonce_b64": "...", "ct_b64": "...", "label": "..." }
//! ```
//!
//! The ciphertext is XChaCha20-Poly1305 over the serialized keypair, keyed by
//! a fresh 32-byte DEK that is sealed to the hardware device. The AEAD's
//! associated data binds the envelope's absolute path and label, so copying
//! the file elsewhere or editing any field is detected at load. Every load
//! failure past "file missing" collapses into one opaque
//! [`VaultError::CorruptOrTampered`] so the error channel leaks nothing about
//! which check tripped.
//!
//! The vault never rewrites an existing envelope; rotation is an external
//! delete-and-regenerate operation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chacha20poly1305::aead::{Aead, KeyInit as _, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use fips204::ml_dsa_65;
use fips204::traits::{SerDes as _, Signer as _, Verifier as _};
use quantumauth_core::util::{b64_envelope, b64_envelope_decode, b64_wire, base64_bytes};
use quantumauth_device::{DeviceError, Sealer};
use rand::RngCore as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use zeroize::Zeroizing;

const AAD_DOMAIN: &str = "quantumauth:cryptoctx:pq:v1";
const DEK_LEN: usize = 32;
const NONCE_LEN: usize = 24;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("PQ key file missing")]
    MissingKeyFile,
    #[error("PQ key file corrupt or tampered")]
    CorruptOrTampered,
    #[error("vault label is required")]
    LabelRequired,
    #[error("no user config directory available for the default key path")]
    NoConfigDir,
    #[error("device: {0}")]
    Device(DeviceError),
    #[error("PQ keygen failed: {0}")]
    Keygen(String),
    #[error("PQ sign failed: {0}")]
    Sign(String),
    #[error("PQ signature invalid")]
    Verify,
    #[error("envelope encrypt failed")]
    Encrypt,
    #[error("envelope encode: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct PqVaultConfig {
    /// Envelope location. Defaults to `pqkeys.json.enc` under the user
    /// config dir.
    pub key_file_path: Option<PathBuf>,
    /// Required. Scopes DEK sealing and is bound into the AEAD.
    pub label: String,
}

#[derive(Serialize, Deserialize)]
struct PqEnvelopeV1 {
    v: u32,
    sealed_dek_b64: String,
    nonce_b64: String,
    ct_b64: String,
    label: String,
}

#[derive(Serialize, Deserialize)]
struct PqPayloadV1 {
    #[serde(rename = "pub", with = "base64_bytes")]
    public: Vec<u8>,
    #[serde(rename = "priv", with = "base64_bytes")]
    private: Vec<u8>,
}

struct PqKeypair {
    public: Zeroizing<Vec<u8>>,
    private: Zeroizing<Vec<u8>>,
}

/// Vault over one sealed ML-DSA-65 keypair file.
pub struct PqKeyVault {
    sealer: Arc<dyn Sealer>,
    path: PathBuf,
    label: String,
}

impl PqKeyVault {
    pub fn new(sealer: Arc<dyn Sealer>, config: PqVaultConfig) -> Result<Self, VaultError> {
        if config.label.is_empty() {
            return Err(VaultError::LabelRequired);
        }
        let path = match config.key_file_path {
            Some(p) => p,
            None => default_key_path()?,
        };
        Ok(Self {
            sealer,
            path,
            label: config.label,
        })
    }

    pub fn key_file_path(&self) -> &Path {
        &self.path
    }

    /// Generate and store the keypair if the envelope file is missing.
    ///
    /// Idempotent once the file exists. Two processes racing on a missing
    /// file both succeed and the later rename wins; callers that need strict
    /// single-writer semantics hold an external lock around the first run.
    pub async fn ensure(&self) -> Result<(), VaultError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(path = %self.path.display(), "generating ML-DSA-65 keypair");
        let (pk, sk) = ml_dsa_65::try_keygen().map_err(|e| VaultError::Keygen(e.to_string()))?;
        let keypair = PqKeypair {
            public: Zeroizing::new(pk.into_bytes().to_vec()),
            private: Zeroizing::new(sk.into_bytes().to_vec()),
        };
        self.write_envelope(&keypair).await
    }

    /// Current PQ public key, unpadded standard base64.
    pub async fn public_key_b64(&self) -> Result<String, VaultError> {
        let keypair = self.load_keypair().await?;
        Ok(b64_wire(&keypair.public))
    }

    /// Sign `msg` with the stored private key. ML-DSA-65 signature bytes.
    pub async fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, VaultError> {
        let keypair = self.load_keypair().await?;
        let sk_bytes: [u8; ml_dsa_65::SK_LEN] = keypair
            .private
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::CorruptOrTampered)?;
        let sk = ml_dsa_65::PrivateKey::try_from_bytes(&sk_bytes)
            .map_err(|_| VaultError::CorruptOrTampered)?;
        let sig = sk
            .try_sign(msg, &[])
            .map_err(|e| VaultError::Sign(e.to_string()))?;
        Ok(sig.to_vec())
    }

    /// [`PqKeyVault::sign`], base64-encoded.
    pub async fn sign_b64(&self, msg: &[u8]) -> Result<String, VaultError> {
        Ok(b64_wire(&self.sign(msg).await?))
    }

    /// The vault holds no key material between calls; this exists for
    /// lifecycle symmetry with the hardware signer.
    pub fn close(&self) {}

    async fn write_envelope(&self, keypair: &PqKeypair) -> Result<(), VaultError> {
        let mut dek = Zeroizing::new(vec![0u8; DEK_LEN]);
        rand::rng().fill_bytes(&mut dek);

        let sealed = self
            .sealer
            .seal(&self.label, &dek)
            .await
            .map_err(VaultError::Device)?;

        let payload = Zeroizing::new(serde_json::to_vec(&PqPayloadV1 {
            public: keypair.public.to_vec(),
            private: keypair.private.to_vec(),
        })?);

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&dek));
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);
        let ct = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &payload,
                    aad: &self.aad(),
                },
            )
            .map_err(|_| VaultError::Encrypt)?;

        let envelope = PqEnvelopeV1 {
            v: 1,
            sealed_dek_b64: b64_envelope(&sealed),
            nonce_b64: b64_envelope(&nonce),
            ct_b64: b64_envelope(&ct),
            label: self.label.clone(),
        };
        let out = serde_json::to_vec_pretty(&envelope)?;
        atomic_write(&self.path, &out).await
    }

    async fn load_keypair(&self) -> Result<PqKeypair, VaultError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VaultError::MissingKeyFile);
            }
            Err(e) => return Err(e.into()),
        };

        let envelope: PqEnvelopeV1 =
            serde_json::from_slice(&bytes).map_err(|_| VaultError::CorruptOrTampered)?;
        if envelope.v != 1 {
            return Err(VaultError::CorruptOrTampered);
        }
        if !envelope.label.is_empty() && envelope.label != self.label {
            return Err(VaultError::CorruptOrTampered);
        }

        let sealed =
            b64_envelope_decode(&envelope.sealed_dek_b64).map_err(|_| VaultError::CorruptOrTampered)?;
        let nonce =
            b64_envelope_decode(&envelope.nonce_b64).map_err(|_| VaultError::CorruptOrTampered)?;
        let ct = b64_envelope_decode(&envelope.ct_b64).map_err(|_| VaultError::CorruptOrTampered)?;
        if nonce.len() != NONCE_LEN {
            return Err(VaultError::CorruptOrTampered);
        }

        let dek = match self.sealer.unseal(&self.label, &sealed).await {
            Ok(dek) => Zeroizing::new(dek),
            Err(_) => return Err(VaultError::CorruptOrTampered),
        };
        if dek.len() != DEK_LEN {
            return Err(VaultError::CorruptOrTampered);
        }

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&dek));
        let plain = cipher
            .decrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &ct,
                    aad: &self.aad(),
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| VaultError::CorruptOrTampered)?;

        let payload: PqPayloadV1 =
            serde_json::from_slice(&plain).map_err(|_| VaultError::CorruptOrTampered)?;
        if payload.public.is_empty() || payload.private.is_empty() {
            return Err(VaultError::CorruptOrTampered);
        }

        Ok(PqKeypair {
            public: Zeroizing::new(payload.public),
            private: Zeroizing::new(payload.private),
        })
    }

    fn aad(&self) -> Vec<u8> {
        // Binds label + absolute path so moving or relabeling the file breaks
        // the AEAD open.
        let abs = std::path::absolute(&self.path).unwrap_or_else(|_| self.path.clone());
        format!("{AAD_DOMAIN}|{}|{}", self.label, abs.display()).into_bytes()
    }
}

/// Verify a detached ML-DSA-65 signature against raw public-key bytes.
pub fn verify(public_key: &[u8], msg: &[u8], signature: &[u8]) -> Result<(), VaultError> {
    let pk_bytes: [u8; ml_dsa_65::PK_LEN] =
        public_key.try_into().map_err(|_| VaultError::Verify)?;
    let pk = ml_dsa_65::PublicKey::try_from_bytes(&pk_bytes).map_err(|_| VaultError::Verify)?;
    let sig: [u8; ml_dsa_65::SIG_LEN] = signature.try_into().map_err(|_| VaultError::Verify)?;
    if pk.verify(msg, &sig, &[]) {
        Ok(())
    } else {
        Err(VaultError::Verify)
    }
}

fn default_key_path() -> Result<PathBuf, VaultError> {
    let proj = directories::ProjectDirs::from("io", "quantumauth", "quantumauth")
        .ok_or(VaultError::NoConfigDir)?;
    Ok(proj.config_dir().join("pqkeys.json.enc"))
}

async fn atomic_write(path: &Path, data: &[u8]) -> Result<(), VaultError> {
    if let Some(dir) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt as _;
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(dir)
                .or_else(|e| {
                    if e.kind() == std::io::ErrorKind::AlreadyExists {
                        Ok(())
                    } else {
                        Err(e)
                    }
                })?;
        }
        #[cfg(not(unix))]
        tokio::fs::create_dir_all(dir).await?;
    }

    let mut tmp_os = path.as_os_str().to_owned();
    tmp_os.push(".tmp");
    let tmp = PathBuf::from(tmp_os);

    let _ = tokio::fs::remove_file(&tmp).await;
    tokio::fs::write(&tmp, data).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
    }

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
