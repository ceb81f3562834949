//! Abstraction layer over the local signing provider.
//!
//! Every provider dialect is exposed through one [ProviderGateway] surface:
//!
//! * [ModernGateway] drives providers with an asynchronous, call-per-operation
//!   API ([AsyncStoreApi]).
//! * [LegacyGateway] drives providers exposing an object model, where a store
//!   object is opened and each certificate property is read one at a time
//!   ([ObjectModel]).
//! * [AnyGateway] picks whichever of several candidate gateways is available.
//!
//! If you don't care which dialect is present on the machine, prefer
//! [AnyGateway].
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::types::{CertHandle, Certificate, EncodedCertificate, Signature, StoreRef};

mod any;
mod legacy;
mod modern;

pub use self::any::AnyGateway;
pub use self::legacy::{CertObject, CertProperty, LegacyGateway, ObjectModel, StoreObject};
pub use self::modern::{AsyncStoreApi, ModernGateway, RawCertificate};

/// Uniform capability surface of a local signing provider.
#[async_trait]
pub trait ProviderGateway: fmt::Debug + Send + Sync {
    /// Probes whether the provider can be used. Never fails: any detection
    /// error is reported as `false`.
    async fn is_available(&self) -> bool;

    /// The ordered list of stores this gateway knows how to open.
    fn list_stores(&self) -> Vec<StoreRef>;

    /// Opens one store, lists its certificates, and closes it again.
    ///
    /// The store is released before this returns, on every path, and also
    /// when the returned future is dropped before completion.
    async fn open_and_enumerate(&self, store: &StoreRef) -> Result<Vec<Certificate>, ProviderError>;

    /// Signs `payload` with the certificate behind `handle`.
    async fn sign(&self, handle: &CertHandle, payload: &[u8]) -> Result<Signature, ProviderError>;

    /// Exports the certificate behind `handle`.
    async fn export_certificate(
        &self,
        handle: &CertHandle,
    ) -> Result<EncodedCertificate, ProviderError>;
}

#[async_trait]
impl<G> ProviderGateway for Arc<G>
where
    G: ProviderGateway + ?Sized,
{
    async fn is_available(&self) -> bool {
        (**self).is_available().await
    }

    fn list_stores(&self) -> Vec<StoreRef> {
        (**self).list_stores()
    }

    async fn open_and_enumerate(&self, store: &StoreRef) -> Result<Vec<Certificate>, ProviderError> {
        (**self).open_and_enumerate(store).await
    }

    async fn sign(&self, handle: &CertHandle, payload: &[u8]) -> Result<Signature, ProviderError> {
        (**self).sign(handle, payload).await
    }

    async fn export_certificate(
        &self,
        handle: &CertHandle,
    ) -> Result<EncodedCertificate, ProviderError> {
        (**self).export_certificate(handle).await
    }
}
