//! TPM 2.0 sealing backend.
//!
//! Each call opens its own short-lived device connection, rebuilds the same
//! primary ECC storage key under the owner hierarchy, and seals/unseals the
//! secret as a keyed-hash sealed-data child of that primary. The blob carries
//! the child's private and public areas plus the caller's label; it can only
//! be recovered on the same device and hierarchy.

use async_trait::async_trait;
use quantumauth_core::util::base64_bytes;
use serde::{Deserialize, Serialize};
use tokio::task::spawn_blocking;
use tss_esapi::Context;
use tss_esapi::attributes::ObjectAttributesBuilder;
use tss_esapi::handles::KeyHandle;
use tss_esapi::interface_types::algorithm::{HashingAlgorithm, PublicAlgorithm};
use tss_esapi::interface_types::ecc::EccCurve;
use tss_esapi::interface_types::resource_handles::Hierarchy;
use tss_esapi::structures::{
    Digest as TpmDigest, EccPoint, EccScheme, KeyDerivationFunctionScheme, KeyedHashScheme,
    Private, Public, PublicBuilder, PublicEccParametersBuilder, PublicKeyedHashParameters,
    SensitiveData, SymmetricDefinitionObject,
};
use tss_esapi::traits::{Marshall as _, UnMarshall as _};

use crate::{DeviceError, Sealer, SealerConfig, tpm};

#[derive(Serialize, Deserialize)]
struct SealedBlobV1 {
    v: u32,
    label: String,
    #[serde(rename = "priv", with = "base64_bytes")]
    priv_blob: Vec<u8>,
    #[serde(rename = "pub", with = "base64_bytes")]
    pub_blob: Vec<u8>,
}

/// TPM-backed [`Sealer`].
pub struct TpmSealer {
    owner_auth: Option<String>,
    tcti: Option<String>,
}

impl TpmSealer {
    pub fn new(config: SealerConfig) -> Self {
        Self {
            owner_auth: config.owner_auth,
            tcti: config.tcti,
        }
    }
}

#[async_trait]
impl Sealer for TpmSealer {
    async fn seal(&self, label: &str, secret: &[u8]) -> Result<Vec<u8>, DeviceError> {
        let owner_auth = self.owner_auth.clone();
        let tcti = self.tcti.clone();
        let label = label.to_string();
        let secret = secret.to_vec();
        spawn_blocking(move || seal_blocking(owner_auth.as_deref(), tcti.as_deref(), &label, &secret))
            .await
            .map_err(|e| DeviceError::op("seal", e))?
    }

    async fn unseal(&self, label: &str, blob: &[u8]) -> Result<Vec<u8>, DeviceError> {
        let owner_auth = self.owner_auth.clone();
        let tcti = self.tcti.clone();
        let label = label.to_string();
        let blob = blob.to_vec();
        spawn_blocking(move || unseal_blocking(owner_auth.as_deref(), tcti.as_deref(), &label, &blob))
            .await
            .map_err(|e| DeviceError::op("unseal", e))?
    }
}

fn seal_blocking(
    owner_auth: Option<&str>,
    tcti: Option<&str>,
    label: &str,
    secret: &[u8],
) -> Result<Vec<u8>, DeviceError> {
    if secret.is_empty() {
        return Err(DeviceError::SealedBlob("secret empty"));
    }

    let mut ctx = tpm::connect(tcti)?;
    tpm::set_owner_auth(&mut ctx, owner_auth)?;

    let parent = create_primary_storage_key(&mut ctx)?;
    let sensitive =
        SensitiveData::try_from(secret.to_vec()).map_err(|e| DeviceError::op("seal", e))?;
    let public = sealed_data_template()?;

    let created = ctx
        .execute_with_nullauth_session(|ctx| {
            ctx.create(parent, public, None, Some(sensitive), None, None)
        })
        .map_err(|e| DeviceError::op("seal", e));
    let _ = ctx.flush_context(parent.into());
    let created = created?;

    let blob = SealedBlobV1 {
        v: 1,
        label: label.to_string(),
        priv_blob: created.out_private.value().to_vec(),
        pub_blob: created
            .out_public
            .marshall()
            .map_err(|e| DeviceError::op("seal", e))?,
    };
    serde_json::to_vec(&blob).map_err(|e| DeviceError::op("seal", e))
}

fn unseal_blocking(
    owner_auth: Option<&str>,
    tcti: Option<&str>,
    label: &str,
    blob: &[u8],
) -> Result<Vec<u8>, DeviceError> {
    let blob: SealedBlobV1 =
        serde_json::from_slice(blob).map_err(|_| DeviceError::SealedBlob("unparseable"))?;
    if blob.v != 1 {
        return Err(DeviceError::SealedBlob("unsupported version"));
    }
    if !blob.label.is_empty() && blob.label != label {
        return Err(DeviceError::SealedBlob("label mismatch"));
    }

    let mut ctx = tpm::connect(tcti)?;
    tpm::set_owner_auth(&mut ctx, owner_auth)?;

    let private =
        Private::try_from(blob.priv_blob).map_err(|e| DeviceError::op("unseal", e))?;
    let public =
        Public::unmarshall(&blob.pub_blob).map_err(|e| DeviceError::op("unseal", e))?;

    let parent = create_primary_storage_key(&mut ctx)?;
    let loaded = ctx
        .execute_with_nullauth_session(|ctx| ctx.load(parent, private, public))
        .map_err(|e| DeviceError::op("unseal", e));
    let loaded = match loaded {
        Ok(h) => h,
        Err(e) => {
            let _ = ctx.flush_context(parent.into());
            return Err(e);
        }
    };

    let secret = ctx
        .execute_with_nullauth_session(|ctx| ctx.unseal(loaded.into()))
        .map_err(|e| DeviceError::op("unseal", e));
    let _ = ctx.flush_context(loaded.into());
    let _ = ctx.flush_context(parent.into());

    Ok(secret?.value().to_vec())
}

fn create_primary_storage_key(ctx: &mut Context) -> Result<KeyHandle, DeviceError> {
    let object_attributes = ObjectAttributesBuilder::new()
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .with_sensitive_data_origin(true)
        .with_user_with_auth(true)
        .with_decrypt(true)
        .with_restricted(true)
        .build()
        .map_err(|e| DeviceError::op("create_primary", e))?;

    let ecc_params = PublicEccParametersBuilder::new()
        .with_symmetric(SymmetricDefinitionObject::AES_128_CFB)
        .with_ecc_scheme(EccScheme::Null)
        .with_curve(EccCurve::NistP256)
        .with_is_decryption_key(true)
        .with_restricted(true)
        .with_key_derivation_function_scheme(KeyDerivationFunctionScheme::Null)
        .build()
        .map_err(|e| DeviceError::op("create_primary", e))?;

    let public = PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::Ecc)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(object_attributes)
        .with_ecc_parameters(ecc_params)
        .with_ecc_unique_identifier(EccPoint::default())
        .build()
        .map_err(|e| DeviceError::op("create_primary", e))?;

    ctx.execute_with_nullauth_session(|ctx| {
        ctx.create_primary(Hierarchy::Owner, public, None, None, None, None)
    })
    .map(|r| r.key_handle)
    .map_err(|e| DeviceError::op("create_primary", e))
}

/// Template for a sealed-data object: a keyed-hash object with a null scheme
/// whose sensitive area carries the caller's secret.
fn sealed_data_template() -> Result<Public, DeviceError> {
    let object_attributes = ObjectAttributesBuilder::new()
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .with_user_with_auth(true)
        .with_no_da(true)
        .build()
        .map_err(|e| DeviceError::op("seal", e))?;

    PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::KeyedHash)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(object_attributes)
        .with_keyed_hash_parameters(PublicKeyedHashParameters::new(KeyedHashScheme::Null))
        .with_keyed_hash_unique_identifier(TpmDigest::default())
        .build()
        .map_err(|e| DeviceError::op("seal", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_json_shape_matches_v1() {
        let blob = SealedBlobV1 {
            v: 1,
            label: "pq-dek".to_string(),
            priv_blob: vec![1, 2, 3],
            pub_blob: vec![4, 5],
        };
        let json = serde_json::to_value(&blob).unwrap();
        assert_eq!(json["v"], 1);
        assert_eq!(json["label"], "pq-dek");
        assert_eq!(json["priv"], "AQID");
        assert_eq!(json["pub"], "BAU=");
    }
}
