//! [LegacyGateway] drives providers exposing a scriptable object model.
//!
//! In this dialect a store object is created, then opened with numeric
//! location and mode constants. Certificates are addressed by a 1-based index,
//! and each certificate property is a separate asynchronous read. Signatures
//! and exports come back as base64 text.
use async_trait::async_trait;
use std::fmt;

use crate::error::{ProviderError, ProviderFault};
use crate::provider::ProviderGateway;
use crate::types::{
    default_stores, CertHandle, Certificate, EncodedCertificate, Signature, StoreRef,
};
use crate::util::{decode_provider_base64, normalize_thumbprint, parse_provider_date};

/// Upper bound on the capacity preallocated from a provider's count.
const CAPACITY_HINT: usize = 64;

/// A store is given up on after this many unreadable items in a row. The
/// count comes from the provider, and may be nonsense.
const MAX_UNREADABLE_ITEMS: u32 = 16;

/// Properties readable from a [CertObject].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CertProperty {
    SubjectName,
    IssuerName,
    ValidFromDate,
    ValidToDate,
    SerialNumber,
    Thumbprint,
}

impl CertProperty {
    pub fn name(self) -> &'static str {
        match self {
            CertProperty::SubjectName => "SubjectName",
            CertProperty::IssuerName => "IssuerName",
            CertProperty::ValidFromDate => "ValidFromDate",
            CertProperty::ValidToDate => "ValidToDate",
            CertProperty::SerialNumber => "SerialNumber",
            CertProperty::Thumbprint => "Thumbprint",
        }
    }
}

/// Entry point of an object-model provider.
#[async_trait]
pub trait ObjectModel: fmt::Debug + Send + Sync {
    type Store: StoreObject;

    /// Waits for the provider to finish loading.
    async fn probe(&self) -> Result<(), ProviderFault>;

    /// Creates a new, unopened store object.
    async fn create_store(&self) -> Result<Self::Store, ProviderFault>;
}

/// A store object.
#[async_trait]
pub trait StoreObject: Send + Sync {
    type Certificate: CertObject;

    async fn open(&mut self, location: u32, name: &str, mode: u32) -> Result<(), ProviderFault>;

    async fn count(&self) -> Result<u32, ProviderFault>;

    /// Gets a certificate by its 1-based index.
    async fn item(&self, index: u32) -> Result<Self::Certificate, ProviderFault>;

    /// Closes an opened store. Called from `Drop`.
    fn close(&mut self);
}

/// A certificate object.
#[async_trait]
pub trait CertObject: Send + Sync {
    async fn property(&self, property: CertProperty) -> Result<String, ProviderFault>;

    /// Produces a detached signature over `content`, as base64.
    async fn sign_cades(&self, content: &[u8]) -> Result<String, ProviderFault>;

    /// Exports the certificate, as base64.
    async fn export_base64(&self) -> Result<String, ProviderFault>;
}

/// An opened store object, closed when dropped.
struct OpenedStore<'a, S>
where
    S: StoreObject,
{
    label: &'a str,
    store: S,
}

impl<S> Drop for OpenedStore<'_, S>
where
    S: StoreObject,
{
    fn drop(&mut self) {
        self.store.close();
        trace!(store = %self.label, "closed store");
    }
}

/// [ProviderGateway] over an [ObjectModel].
#[derive(Debug)]
pub struct LegacyGateway<O> {
    model: O,
    stores: Vec<StoreRef>,
}

impl<O> LegacyGateway<O>
where
    O: ObjectModel,
{
    /// Creates a gateway searching the [default_stores].
    pub fn new(model: O) -> Self {
        Self::with_stores(model, default_stores())
    }

    pub fn with_stores(model: O, stores: Vec<StoreRef>) -> Self {
        LegacyGateway { model, stores }
    }

    pub fn model(&self) -> &O {
        &self.model
    }

    async fn open<'a>(&self, store: &'a StoreRef) -> Result<OpenedStore<'a, O::Store>, ProviderError> {
        trace!(store = %store, "opening store");
        let mut obj = self
            .model
            .create_store()
            .await
            .map_err(ProviderError::Other)?;

        obj.open(
            store.location.value(),
            &store.name,
            store.open_mode.value(),
        )
        .await
        .map_err(|fault| ProviderError::StoreUnavailable {
            store: store.label.clone(),
            fault,
        })?;

        Ok(OpenedStore {
            label: &store.label,
            store: obj,
        })
    }

    /// Reads every property of one certificate, one at a time.
    async fn read_certificate(
        store: &StoreRef,
        cert: &<O::Store as StoreObject>::Certificate,
    ) -> Result<Certificate, ProviderError> {
        let read = |p: CertProperty| async move {
            cert.property(p)
                .await
                .map_err(|fault| ProviderError::Malformed(format!("{}: {}", p.name(), fault)))
        };
        let date = |p: CertProperty, s: String| {
            parse_provider_date(&s)
                .ok_or_else(|| ProviderError::Malformed(format!("{}: {:?}", p.name(), s)))
        };

        let thumbprint = normalize_thumbprint(&read(CertProperty::Thumbprint).await?);
        let subject = read(CertProperty::SubjectName).await?;
        let issuer = read(CertProperty::IssuerName).await?;
        let valid_from = date(
            CertProperty::ValidFromDate,
            read(CertProperty::ValidFromDate).await?,
        )?;
        let valid_to = date(
            CertProperty::ValidToDate,
            read(CertProperty::ValidToDate).await?,
        )?;
        let serial_number = read(CertProperty::SerialNumber).await?;

        Ok(Certificate {
            handle: CertHandle::new(store.clone(), thumbprint.clone()),
            identity: thumbprint,
            subject,
            issuer,
            valid_from,
            valid_to,
            serial_number,
            source_backend: store.label.clone(),
        })
    }

    /// Finds a certificate in an opened store by its thumbprint.
    async fn find(
        opened: &OpenedStore<'_, O::Store>,
        thumbprint: &str,
    ) -> Result<<O::Store as StoreObject>::Certificate, ProviderError> {
        let count = opened.store.count().await.map_err(ProviderError::Other)?;
        let mut unreadable = 0;
        for index in 1..=count {
            let Ok(item) = opened.store.item(index).await else {
                unreadable += 1;
                if unreadable >= MAX_UNREADABLE_ITEMS {
                    break;
                }
                continue;
            };
            unreadable = 0;
            match item.property(CertProperty::Thumbprint).await {
                Ok(t) if normalize_thumbprint(&t) == thumbprint => return Ok(item),
                _ => {}
            }
        }
        Err(ProviderError::CertificateNotFound(opened.label.to_string()))
    }
}

#[async_trait]
impl<O> ProviderGateway for LegacyGateway<O>
where
    O: ObjectModel,
{
    async fn is_available(&self) -> bool {
        match self.model.probe().await {
            Ok(()) => true,
            Err(fault) => {
                debug!(%fault, "object model probe failed");
                false
            }
        }
    }

    fn list_stores(&self) -> Vec<StoreRef> {
        self.stores.clone()
    }

    async fn open_and_enumerate(&self, store: &StoreRef) -> Result<Vec<Certificate>, ProviderError> {
        let opened = self.open(store).await?;
        let count = opened.store.count().await.map_err(ProviderError::Other)?;
        trace!(store = %store.label, count, "enumerating store");

        let mut certs = Vec::with_capacity((count as usize).min(CAPACITY_HINT));
        let mut unreadable = 0;
        for index in 1..=count {
            let item = match opened.store.item(index).await {
                Ok(item) => {
                    unreadable = 0;
                    item
                }
                Err(fault) => {
                    warn!(store = %store.label, index, %fault, "skipping unreadable certificate");
                    unreadable += 1;
                    if unreadable >= MAX_UNREADABLE_ITEMS {
                        return Err(ProviderError::Malformed(format!(
                            "{} reports {} certificates, but items {}..={} are unreadable",
                            store.label,
                            count,
                            index + 1 - unreadable,
                            index
                        )));
                    }
                    continue;
                }
            };
            match Self::read_certificate(store, &item).await {
                Ok(c) => certs.push(c),
                Err(e) => {
                    warn!(store = %store.label, index, error = %e, "skipping unreadable certificate")
                }
            }
        }

        Ok(certs)
    }

    async fn sign(&self, handle: &CertHandle, payload: &[u8]) -> Result<Signature, ProviderError> {
        let opened = self.open(&handle.store).await?;
        let cert = Self::find(&opened, &handle.locator).await?;
        let encoded = cert
            .sign_cades(payload)
            .await
            .map_err(ProviderError::SigningFailed)?;

        decode_provider_base64(&encoded)
            .map(Signature)
            .map_err(|e| ProviderError::Malformed(format!("signature: {e}")))
    }

    async fn export_certificate(
        &self,
        handle: &CertHandle,
    ) -> Result<EncodedCertificate, ProviderError> {
        let opened = self.open(&handle.store).await?;
        let cert = Self::find(&opened, &handle.locator).await?;
        let encoded = cert
            .export_base64()
            .await
            .map_err(ProviderError::ExportFailed)?;

        decode_provider_base64(&encoded)
            .map(EncodedCertificate)
            .map_err(|e| ProviderError::Malformed(format!("certificate: {e}")))
    }
}
