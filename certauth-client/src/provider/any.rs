//! Abstraction to pick whichever provider dialect is installed.
use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::provider::ProviderGateway;
use crate::types::{CertHandle, Certificate, EncodedCertificate, Signature, StoreRef};

/// [AnyGateway] dispatches to the first available of several candidate
/// gateways.
///
/// Candidates are probed once, in order, by [AnyGateway::detect]. If none of
/// them is available, the gateway reports itself unavailable and every
/// operation fails with [ProviderError::NotAvailable].
#[derive(Debug, Clone)]
pub struct AnyGateway {
    active: Option<Arc<dyn ProviderGateway>>,
}

impl AnyGateway {
    pub async fn detect(candidates: Vec<Arc<dyn ProviderGateway>>) -> Self {
        for (i, candidate) in candidates.into_iter().enumerate() {
            if candidate.is_available().await {
                debug!(candidate = i, "selected provider gateway: {:?}", candidate);
                return AnyGateway {
                    active: Some(candidate),
                };
            }
        }

        error!("No signing provider available!");
        AnyGateway { active: None }
    }

    /// The gateway calls are dispatched to, if any.
    pub fn active(&self) -> Option<&Arc<dyn ProviderGateway>> {
        self.active.as_ref()
    }

    fn gateway(&self) -> Result<&Arc<dyn ProviderGateway>, ProviderError> {
        self.active.as_ref().ok_or(ProviderError::NotAvailable)
    }
}

#[async_trait]
impl ProviderGateway for AnyGateway {
    async fn is_available(&self) -> bool {
        match &self.active {
            Some(g) => g.is_available().await,
            None => false,
        }
    }

    fn list_stores(&self) -> Vec<StoreRef> {
        self.active
            .as_ref()
            .map(|g| g.list_stores())
            .unwrap_or_default()
    }

    async fn open_and_enumerate(&self, store: &StoreRef) -> Result<Vec<Certificate>, ProviderError> {
        self.gateway()?.open_and_enumerate(store).await
    }

    async fn sign(&self, handle: &CertHandle, payload: &[u8]) -> Result<Signature, ProviderError> {
        self.gateway()?.sign(handle, payload).await
    }

    async fn export_certificate(
        &self,
        handle: &CertHandle,
    ) -> Result<EncodedCertificate, ProviderError> {
        self.gateway()?.export_certificate(handle).await
    }
}
