use std::sync::Arc;

use anyhow::Result;
use ssh_key::PublicKey;

use crate::service::{CaKeySource, Logger};

/// Exposes the CA public key through the configured key source. No SSH
/// formatting happens here; callers marshal or fingerprint as needed.
pub struct GetCaPublicKeyService {
    pub keys: Arc<dyn CaKeySource>,
    pub log: Arc<dyn Logger>,
}

impl GetCaPublicKeyService {
    pub async fn execute(&self) -> Result<PublicKey> {
        let key = self.keys.load().await?;
        let public = key.public_key().clone();
        self.log.debug(
            "loaded ca public key",
            &[("algorithm".to_string(), public.algorithm().to_string())],
        );
        Ok(public)
    }
}
