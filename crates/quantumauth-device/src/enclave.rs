//! Secure Enclave backend (macOS).
//!
//! The intended shape is a signer and sealer with the same surfaces as the
//! TPM backends, rooted in the Enclave. Until that lands, both constructors
//! return [`DeviceError::Unsupported`] so callers fail loudly rather than
//! fall back to software keys.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{DeviceError, HardwareKeyConfig, HardwareSigner, Sealer};

pub(crate) async fn open(
    _config: HardwareKeyConfig,
) -> Result<Arc<dyn HardwareSigner>, DeviceError> {
    Err(DeviceError::Unsupported("Secure Enclave signer"))
}

pub(crate) struct EnclaveSealer;

#[async_trait]
impl Sealer for EnclaveSealer {
    async fn seal(&self, _label: &str, _secret: &[u8]) -> Result<Vec<u8>, DeviceError> {
        Err(DeviceError::Unsupported("Secure Enclave sealer"))
    }

    async fn unseal(&self, _label: &str, _blob: &[u8]) -> Result<Vec<u8>, DeviceError> {
        Err(DeviceError::Unsupported("Secure Enclave sealer"))
    }
}
