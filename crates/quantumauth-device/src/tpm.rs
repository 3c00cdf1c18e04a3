//! TPM 2.0 signing backend (Linux and Windows) via `tss-esapi`.
//!
//! The signing key is a primary ECC P-256 key under the owner hierarchy,
//! persisted with evict-control so the device identity survives power cycles:
//! - the configured handle range is scanned for a reusable ECC key
//! - slots holding incompatible objects (e.g. RSA) are skipped
//! - the first empty slot receives a freshly created key
//! - persistence is mandatory; a key that only exists transiently is an error
//!
//! Signatures are converted from the TPM's ECDSA structure to raw `(r||s)`
//! with both coordinates left-padded to 32 bytes.

use std::sync::{Arc, Mutex};

use quantumauth_core::util::b64_wire;
use sha2::{Digest as _, Sha256};
use tokio::task::spawn_blocking;
use tracing::{debug, info};
use tss_esapi::Context;
use tss_esapi::attributes::ObjectAttributesBuilder;
use tss_esapi::constants::tss::{TPM2_RH_NULL, TPM2_ST_HASHCHECK};
use tss_esapi::handles::{AuthHandle, KeyHandle, ObjectHandle, PersistentTpmHandle, TpmHandle};
use tss_esapi::interface_types::algorithm::{HashingAlgorithm, PublicAlgorithm};
use tss_esapi::interface_types::dynamic_handles::Persistent;
use tss_esapi::interface_types::ecc::EccCurve;
use tss_esapi::interface_types::resource_handles::{Hierarchy, Provision};
use tss_esapi::structures::{
    Auth, Digest as TpmDigest, EccPoint, EccScheme, HashScheme, HashcheckTicket,
    KeyDerivationFunctionScheme, Public, PublicBuilder, PublicEccParametersBuilder, Signature,
    SignatureScheme,
};
use tss_esapi::tcti_ldr::TctiNameConf;
use tss_esapi::tss2_esys::TPMT_TK_HASHCHECK;
use tss_esapi::utils::PublicKey as TssPublicKey;

use crate::{DeviceError, HardwareKeyConfig, HardwareSigner};

/// TPM-backed [`HardwareSigner`]. One open device session, one persistent
/// signing slot; `sign` calls serialize on the session and complete in
/// submission order.
pub struct TpmSigner {
    ctx: Arc<Mutex<Option<Context>>>,
    key: KeyHandle,
    handle_raw: u32,
    public: Vec<u8>,
    public_b64: String,
}

impl TpmSigner {
    /// Open the TPM and locate or create the persistent signing key.
    pub async fn open(config: HardwareKeyConfig) -> Result<Self, DeviceError> {
        let (ctx, key, handle_raw, public) = spawn_blocking(move || open_blocking(&config))
            .await
            .map_err(|e| DeviceError::op("open", e))??;
        if public.len() != 65 {
            return Err(DeviceError::MissingKey);
        }
        let public_b64 = b64_wire(&public);
        Ok(Self {
            ctx: Arc::new(Mutex::new(Some(ctx))),
            key,
            handle_raw,
            public,
            public_b64,
        })
    }

    /// Persistent handle the active signing key lives at.
    pub fn persistent_handle(&self) -> u32 {
        self.handle_raw
    }
}

#[async_trait::async_trait]
impl HardwareSigner for TpmSigner {
    fn public_key(&self) -> Vec<u8> {
        self.public.clone()
    }

    fn public_key_b64(&self) -> String {
        self.public_b64.clone()
    }

    async fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, DeviceError> {
        let ctx = Arc::clone(&self.ctx);
        let key = self.key;
        let msg = msg.to_vec();
        spawn_blocking(move || {
            let mut guard = ctx.lock().expect("tpm context lock");
            let ctx = guard.as_mut().ok_or(DeviceError::Closed)?;
            sign_blocking(ctx, key, &msg)
        })
        .await
        .map_err(|e| DeviceError::op("sign", e))?
    }

    async fn close(&self) -> Result<(), DeviceError> {
        let ctx = Arc::clone(&self.ctx);
        // Dropping the context closes the TCTI connection; a second close
        // finds the slot already empty and is a no-op.
        let _ = spawn_blocking(move || drop(ctx.lock().expect("tpm context lock").take())).await;
        Ok(())
    }
}

pub(crate) fn connect(tcti: Option<&str>) -> Result<Context, DeviceError> {
    let conf = resolve_tcti(tcti)?;
    Context::new(conf).map_err(|e| DeviceError::Unavailable(format!("open TPM: {e}")))
}

fn resolve_tcti(tcti: Option<&str>) -> Result<TctiNameConf, DeviceError> {
    if let Some(s) = tcti {
        return TctiNameConf::try_from(s.to_string())
            .map_err(|e| DeviceError::Unavailable(format!("invalid TCTI {s:?}: {e}")));
    }

    #[cfg(target_os = "linux")]
    {
        for dev in ["/dev/tpmrm0", "/dev/tpm0"] {
            if std::path::Path::new(dev).exists() {
                return TctiNameConf::try_from(format!("device:{dev}"))
                    .map_err(|e| DeviceError::Unavailable(format!("TCTI for {dev}: {e}")));
            }
        }
        Err(DeviceError::Unavailable(
            "no TPM device found (tried /dev/tpmrm0, /dev/tpm0)".to_string(),
        ))
    }

    #[cfg(target_os = "windows")]
    {
        TctiNameConf::try_from("tbs".to_string())
            .map_err(|e| DeviceError::Unavailable(format!("TBS TCTI: {e}")))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Err(DeviceError::Unavailable(
            "no TPM transport for this platform".to_string(),
        ))
    }
}

pub(crate) fn set_owner_auth(ctx: &mut Context, owner_auth: Option<&str>) -> Result<(), DeviceError> {
    let Some(auth) = owner_auth.filter(|a| !a.is_empty()) else {
        return Ok(());
    };
    let auth =
        Auth::try_from(auth.as_bytes().to_vec()).map_err(|e| DeviceError::op("owner_auth", e))?;
    ctx.tr_set_auth(AuthHandle::Owner.into(), auth)
        .map_err(|e| DeviceError::op("owner_auth", e))
}

enum SlotState {
    Compatible(ObjectHandle, Vec<u8>),
    Incompatible(ObjectHandle),
    Empty,
}

fn open_blocking(
    cfg: &HardwareKeyConfig,
) -> Result<(Context, KeyHandle, u32, Vec<u8>), DeviceError> {
    let mut ctx = connect(cfg.tcti.as_deref())?;
    set_owner_auth(&mut ctx, cfg.owner_auth.as_deref())?;

    let (range_start, range_count) = match cfg.handle {
        Some(h) => (h, 1),
        None => (cfg.handle_range_start, cfg.handle_range_count.max(1)),
    };

    let mut first_empty: Option<u32> = None;
    if cfg.force_new {
        // Never reuse an existing key: the first slot (the explicit handle,
        // or the start of the range) is the target. Any occupant is evicted
        // best-effort and the error discarded; key creation and the persist
        // evict-control always run afterwards, so a slot that could not
        // actually be cleared fails at the persist step with the accurate
        // error rather than a spurious slot-exhaustion.
        let raw = range_start;
        match inspect_slot(&mut ctx, raw)? {
            SlotState::Compatible(object, _) | SlotState::Incompatible(object) => {
                if let Err(e) = evict_persistent(&mut ctx, object, raw) {
                    debug!(handle = %format_args!("0x{raw:08x}"), error = %e, "pre-evict failed");
                }
            }
            SlotState::Empty => {}
        }
        first_empty = Some(raw);
    } else {
        for raw in (0..range_count).map(|i| range_start + i) {
            match inspect_slot(&mut ctx, raw)? {
                SlotState::Compatible(object, point) => {
                    info!(handle = %format_args!("0x{raw:08x}"), "reusing persistent signing key");
                    return Ok((ctx, object.into(), raw, point));
                }
                SlotState::Incompatible(_) => {
                    debug!(
                        handle = %format_args!("0x{raw:08x}"),
                        "skipping incompatible persistent object"
                    );
                }
                SlotState::Empty => {
                    debug!(handle = %format_args!("0x{raw:08x}"), "persistent slot is empty");
                    if first_empty.is_none() {
                        first_empty = Some(raw);
                    }
                }
            }
        }
    }

    let Some(slot) = first_empty else {
        return Err(DeviceError::SlotExhausted {
            start: range_start,
            end: range_start + range_count,
        });
    };

    let (transient, point) = create_primary_signing_key(&mut ctx)?;

    // Persist at the chosen slot. No fallback: persistence is required for a
    // stable device identity.
    let persistent =
        PersistentTpmHandle::new(slot).map_err(|e| DeviceError::op("evict_control", e))?;
    let persisted = ctx.execute_with_nullauth_session(|ctx| {
        ctx.evict_control(
            Provision::Owner,
            transient.into(),
            Persistent::Persistent(persistent),
        )
    });
    let persisted = match persisted {
        Ok(h) => h,
        Err(e) => {
            let _ = ctx.flush_context(transient.into());
            return Err(DeviceError::PersistRequired {
                handle: slot,
                detail: e.to_string(),
            });
        }
    };
    let _ = ctx.flush_context(transient.into());

    info!(handle = %format_args!("0x{slot:08x}"), "created persistent signing key");
    Ok((ctx, persisted.into(), slot, point))
}

fn inspect_slot(ctx: &mut Context, raw: u32) -> Result<SlotState, DeviceError> {
    let tpm_handle = TpmHandle::Persistent(
        PersistentTpmHandle::new(raw).map_err(|e| DeviceError::op("read_public", e))?,
    );
    let object = match ctx.tr_from_tpm_public(tpm_handle) {
        Ok(h) => h,
        Err(e) if vacant_handle_error(&e) => return Ok(SlotState::Empty),
        Err(e) => return Err(DeviceError::op("read_public", e)),
    };
    let (public, _name, _qualified_name) = ctx
        .read_public(object.into())
        .map_err(|e| DeviceError::op("read_public", e))?;
    match ecc_uncompressed_point(&public) {
        Ok(point) => Ok(SlotState::Compatible(object, point)),
        Err(_) => Ok(SlotState::Incompatible(object)),
    }
}

/// Whether a TPM error means "nothing lives at this handle".
///
/// The ESAPI binding reports this as a response-code error; the rendered code
/// is matched here (`TPM_RC_HANDLE`, value 0xb, or the spelled-out message).
/// This predicate is the single place to swap in a structured code match.
fn vacant_handle_error(err: &tss_esapi::Error) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("tpm_rc_handle")
        || msg.contains("handle is not correct")
        || msg.contains("0xb")
}

fn evict_persistent(ctx: &mut Context, object: ObjectHandle, raw: u32) -> Result<(), DeviceError> {
    let persistent =
        PersistentTpmHandle::new(raw).map_err(|e| DeviceError::op("evict_control", e))?;
    ctx.execute_with_nullauth_session(|ctx| {
        ctx.evict_control(Provision::Owner, object, Persistent::Persistent(persistent))
    })
    .map(|_| ())
    .map_err(|e| DeviceError::op("evict_control", e))
}

fn create_primary_signing_key(ctx: &mut Context) -> Result<(KeyHandle, Vec<u8>), DeviceError> {
    let public = signing_key_template()?;
    let result = ctx
        .execute_with_nullauth_session(|ctx| {
            ctx.create_primary(Hierarchy::Owner, public, None, None, None, None)
        })
        .map_err(|e| DeviceError::op("create_primary", e))?;
    let point = ecc_uncompressed_point(&result.out_public)?;
    Ok((result.key_handle, point))
}

fn signing_key_template() -> Result<Public, DeviceError> {
    let object_attributes = ObjectAttributesBuilder::new()
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .with_sensitive_data_origin(true)
        .with_user_with_auth(true)
        .with_sign_encrypt(true)
        .build()
        .map_err(|e| DeviceError::op("create_primary", e))?;

    let ecc_params = PublicEccParametersBuilder::new()
        .with_ecc_scheme(EccScheme::EcDsa(HashScheme::new(HashingAlgorithm::Sha256)))
        .with_curve(EccCurve::NistP256)
        .with_is_signing_key(true)
        .with_is_decryption_key(false)
        .with_restricted(false)
        .with_key_derivation_function_scheme(KeyDerivationFunctionScheme::Null)
        .build()
        .map_err(|e| DeviceError::op("create_primary", e))?;

    PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::Ecc)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(object_attributes)
        .with_ecc_parameters(ecc_params)
        .with_ecc_unique_identifier(EccPoint::default())
        .build()
        .map_err(|e| DeviceError::op("create_primary", e))
}

fn sign_blocking(ctx: &mut Context, key: KeyHandle, msg: &[u8]) -> Result<Vec<u8>, DeviceError> {
    let digest = Sha256::digest(msg);
    let digest =
        TpmDigest::try_from(digest.as_slice()).map_err(|e| DeviceError::op("sign", e))?;

    // Null hashcheck ticket: the digest was computed outside the TPM.
    let validation = HashcheckTicket::try_from(TPMT_TK_HASHCHECK {
        tag: TPM2_ST_HASHCHECK,
        hierarchy: TPM2_RH_NULL,
        digest: Default::default(),
    })
    .map_err(|e| DeviceError::op("sign", e))?;

    // SignatureScheme::Null defers to the ECDSA/SHA-256 scheme baked into the
    // key template.
    let signature = ctx
        .execute_with_nullauth_session(|ctx| {
            ctx.sign(key, digest, SignatureScheme::Null, validation)
        })
        .map_err(|e| DeviceError::op("sign", e))?;

    match signature {
        Signature::EcDsa(ecc) => {
            let mut raw = Vec::with_capacity(64);
            raw.extend_from_slice(&pad32(ecc.signature_r().value()));
            raw.extend_from_slice(&pad32(ecc.signature_s().value()));
            Ok(raw)
        }
        _ => Err(DeviceError::op("sign", "device returned non-ECC signature")),
    }
}

/// Extract `0x04 || X || Y` from a TPM public area, coordinates left-padded
/// to 32 bytes. Errors for non-ECC objects.
fn ecc_uncompressed_point(public: &Public) -> Result<Vec<u8>, DeviceError> {
    let key =
        TssPublicKey::try_from(public.clone()).map_err(|e| DeviceError::op("read_public", e))?;
    match key {
        TssPublicKey::Ecc { x, y } => {
            let mut out = Vec::with_capacity(65);
            out.push(0x04);
            out.extend_from_slice(&pad32(&x));
            out.extend_from_slice(&pad32(&y));
            Ok(out)
        }
        _ => Err(DeviceError::op(
            "read_public",
            "persistent object is not an ECC key",
        )),
    }
}

fn pad32(n: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let n = if n.len() > 32 { &n[n.len() - 32..] } else { n };
    out[32 - n.len()..].copy_from_slice(n);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad32_left_pads_and_truncates() {
        assert_eq!(pad32(&[1, 2])[30..], [1, 2]);
        assert_eq!(pad32(&[1, 2])[..30], [0u8; 30]);
        let long: Vec<u8> = (0u8..40).collect();
        assert_eq!(pad32(&long)[..], long[8..40]);
        assert_eq!(pad32(&[])[..], [0u8; 32]);
    }
}
