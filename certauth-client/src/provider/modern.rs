//! [ModernGateway] drives providers with an asynchronous, call-per-operation
//! API.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::{ProviderError, ProviderFault};
use crate::provider::ProviderGateway;
use crate::types::{
    default_stores, CertHandle, Certificate, EncodedCertificate, Signature, StoreRef,
};
use crate::util::normalize_thumbprint;

/// A certificate record, as reported by an [AsyncStoreApi].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCertificate {
    pub thumbprint: String,
    pub subject: String,
    pub issuer: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub serial_number: String,
    /// Provider-defined key which finds this certificate again within its
    /// store.
    pub key: String,
}

/// A provider API where every operation is a single asynchronous call.
#[async_trait]
pub trait AsyncStoreApi: fmt::Debug + Send + Sync {
    /// An opened store.
    type Store: Send + Sync;

    /// Checks that the provider is installed and answering.
    async fn probe(&self) -> Result<(), ProviderFault>;

    /// Opens a store. Stores which do not exist on this machine must fail
    /// with [ProviderError::StoreUnavailable].
    async fn open(&self, store: &StoreRef) -> Result<Self::Store, ProviderError>;

    async fn certificates(&self, store: &Self::Store)
        -> Result<Vec<RawCertificate>, ProviderError>;

    /// Releases an opened store.
    ///
    /// This is called from `Drop`, so it must not block or fail.
    fn close(&self, store: &mut Self::Store);

    async fn sign(
        &self,
        store: &Self::Store,
        key: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, ProviderError>;

    async fn export(&self, store: &Self::Store, key: &str) -> Result<Vec<u8>, ProviderError>;
}

/// An opened store, closed when dropped.
struct OpenStore<'a, A>
where
    A: AsyncStoreApi,
{
    api: &'a A,
    label: &'a str,
    store: A::Store,
}

impl<'a, A> OpenStore<'a, A>
where
    A: AsyncStoreApi,
{
    async fn open(api: &'a A, store: &'a StoreRef) -> Result<OpenStore<'a, A>, ProviderError> {
        trace!(store = %store, "opening store");
        let opened = api.open(store).await?;
        Ok(OpenStore {
            api,
            label: &store.label,
            store: opened,
        })
    }
}

impl<A> Drop for OpenStore<'_, A>
where
    A: AsyncStoreApi,
{
    fn drop(&mut self) {
        self.api.close(&mut self.store);
        trace!(store = %self.label, "closed store");
    }
}

/// [ProviderGateway] over an [AsyncStoreApi].
#[derive(Debug)]
pub struct ModernGateway<A> {
    api: A,
    stores: Vec<StoreRef>,
}

impl<A> ModernGateway<A>
where
    A: AsyncStoreApi,
{
    /// Creates a gateway searching the [default_stores].
    pub fn new(api: A) -> Self {
        Self::with_stores(api, default_stores())
    }

    pub fn with_stores(api: A, stores: Vec<StoreRef>) -> Self {
        ModernGateway { api, stores }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    fn to_certificate(store: &StoreRef, raw: RawCertificate) -> Certificate {
        Certificate {
            identity: normalize_thumbprint(&raw.thumbprint),
            subject: raw.subject,
            issuer: raw.issuer,
            valid_from: raw.valid_from,
            valid_to: raw.valid_to,
            serial_number: raw.serial_number,
            source_backend: store.label.clone(),
            handle: CertHandle::new(store.clone(), raw.key),
        }
    }
}

#[async_trait]
impl<A> ProviderGateway for ModernGateway<A>
where
    A: AsyncStoreApi,
{
    async fn is_available(&self) -> bool {
        match self.api.probe().await {
            Ok(()) => true,
            Err(fault) => {
                debug!(%fault, "provider probe failed");
                false
            }
        }
    }

    fn list_stores(&self) -> Vec<StoreRef> {
        self.stores.clone()
    }

    async fn open_and_enumerate(&self, store: &StoreRef) -> Result<Vec<Certificate>, ProviderError> {
        let opened = OpenStore::open(&self.api, store).await?;
        let raw = self.api.certificates(&opened.store).await?;
        trace!(store = %store.label, count = raw.len(), "enumerated store");

        Ok(raw
            .into_iter()
            .map(|r| Self::to_certificate(store, r))
            .collect())
    }

    async fn sign(&self, handle: &CertHandle, payload: &[u8]) -> Result<Signature, ProviderError> {
        let opened = OpenStore::open(&self.api, &handle.store).await?;
        self.api
            .sign(&opened.store, &handle.locator, payload)
            .await
            .map(Signature)
    }

    async fn export_certificate(
        &self,
        handle: &CertHandle,
    ) -> Result<EncodedCertificate, ProviderError> {
        let opened = OpenStore::open(&self.api, &handle.store).await?;
        self.api
            .export(&opened.store, &handle.locator)
            .await
            .map(EncodedCertificate)
    }
}
