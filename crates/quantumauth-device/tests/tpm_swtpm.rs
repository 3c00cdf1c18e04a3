#![cfg(not(target_os = "macos"))]

//! Hardware integration tests. These need a TPM (usually `swtpm`); set
//! `QUANTUMAUTH_TPM2_TCTI=swtpm:host=127.0.0.1,port=2321` to run them.

use anyhow::Context as _;
use p256::ecdsa::signature::Verifier as _;
use quantumauth_device::{
    HardwareKeyConfig, HardwareSigner as _, Sealer as _, SealerConfig, TpmSealer, TpmSigner,
};

fn tcti_from_env() -> Option<String> {
    match std::env::var("QUANTUMAUTH_TPM2_TCTI") {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => {
            eprintln!("skipping: QUANTUMAUTH_TPM2_TCTI not set");
            None
        }
    }
}

#[tokio::test]
async fn sign_verify_and_slot_reuse() -> anyhow::Result<()> {
    let Some(tcti) = tcti_from_env() else {
        return Ok(());
    };

    let config = HardwareKeyConfig {
        tcti: Some(tcti.clone()),
        ..HardwareKeyConfig::default()
    };

    let signer = TpmSigner::open(config.clone()).await?;
    let pk = signer.public_key();
    assert_eq!(pk.len(), 65);
    assert_eq!(pk[0], 0x04);

    let msg = b"hello tpm";
    let sig_bytes = signer.sign(msg).await?;
    assert_eq!(sig_bytes.len(), 64);

    let point = p256::EncodedPoint::from_bytes(&pk).context("decode p256 point")?;
    let verifying =
        p256::ecdsa::VerifyingKey::from_encoded_point(&point).context("verifying key")?;
    let sig = p256::ecdsa::Signature::from_slice(&sig_bytes).context("decode raw signature")?;
    verifying.verify(msg, &sig).context("verify signature")?;

    signer.close().await?;
    signer.close().await?;

    // A second open against the same range must reuse the persisted key.
    let reopened = TpmSigner::open(config).await?;
    assert_eq!(reopened.public_key(), pk);
    reopened.close().await?;
    Ok(())
}

#[tokio::test]
async fn seal_unseal_roundtrip_and_label_binding() -> anyhow::Result<()> {
    let Some(tcti) = tcti_from_env() else {
        return Ok(());
    };

    let sealer = TpmSealer::new(SealerConfig {
        owner_auth: None,
        tcti: Some(tcti),
    });

    let secret = [7u8; 32];
    let blob = sealer.seal("vault-test", &secret).await?;
    let recovered = sealer.unseal("vault-test", &blob).await?;
    assert_eq!(recovered, secret);

    assert!(sealer.unseal("other-label", &blob).await.is_err());
    Ok(())
}
