//! Best-effort certificate discovery across all of a provider's stores.
//!
//! A store which can't be opened (eg: because no token reader is attached) is
//! a soft failure: it is recorded in the [DiscoveryOutcome]'s diagnostics and
//! the remaining stores are still searched. The only hard failure is the
//! provider itself being unavailable, which is checked before any store is
//! opened.
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;

use crate::error::{CertAuthError, ProviderError};
use crate::provider::ProviderGateway;
use crate::types::{Certificate, StoreRef};

/// A store which failed during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDiagnostic {
    pub store: StoreRef,
    pub error: ProviderError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryStatus {
    /// Every store was searched.
    Complete,
    /// Some stores failed; certificates from the others were found.
    Partial { failed_stores: Vec<String> },
    /// No store yielded a certificate. This is a valid outcome: the user may
    /// need to insert a token.
    NoCertificatesFound,
}

/// The result of one discovery pass.
#[derive(Debug, Clone)]
pub struct DiscoveryOutcome {
    /// Unique by identity, in store order.
    pub certificates: Vec<Certificate>,
    pub diagnostics: Vec<StoreDiagnostic>,
}

impl DiscoveryOutcome {
    pub fn status(&self) -> DiscoveryStatus {
        if self.certificates.is_empty() {
            DiscoveryStatus::NoCertificatesFound
        } else if self.diagnostics.is_empty() {
            DiscoveryStatus::Complete
        } else {
            DiscoveryStatus::Partial {
                failed_stores: self
                    .diagnostics
                    .iter()
                    .map(|d| d.store.label.clone())
                    .collect(),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    pub fn find(&self, identity: &str) -> Option<&Certificate> {
        self.certificates.iter().find(|c| c.identity == identity)
    }
}

/// Merges per-store batches, keeping the first certificate seen for each
/// identity and dropping later duplicates.
///
/// The relative order of the kept certificates is preserved, so merging an
/// already merged list changes nothing.
pub fn merge_unique<I>(batches: I) -> Vec<Certificate>
where
    I: IntoIterator<Item = Vec<Certificate>>,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for cert in batches.into_iter().flatten() {
        if seen.contains(&cert.identity) {
            trace!(
                identity = %cert.identity,
                store = %cert.source_backend,
                "dropping duplicate certificate"
            );
            continue;
        }
        seen.insert(cert.identity.clone());
        merged.push(cert);
    }
    merged
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Searches every store a [ProviderGateway] knows about.
///
/// This holds no state between calls; every [discover][Self::discover] is an
/// independent pass.
#[derive(Debug)]
pub struct CertificateDiscovery<'a, G>
where
    G: ProviderGateway + ?Sized,
{
    gateway: &'a G,
}

impl<'a, G> CertificateDiscovery<'a, G>
where
    G: ProviderGateway + ?Sized,
{
    pub fn new(gateway: &'a G) -> Self {
        CertificateDiscovery { gateway }
    }

    /// Runs one discovery pass.
    ///
    /// Returns [CertAuthError::ProviderUnavailable] without opening any store
    /// if the provider is unavailable. Otherwise this always succeeds, even if
    /// every store failed.
    pub async fn discover(&self) -> Result<DiscoveryOutcome, CertAuthError> {
        if !self.gateway.is_available().await {
            error!("signing provider is not available");
            return Err(CertAuthError::ProviderUnavailable);
        }

        let stores = self.gateway.list_stores();
        let mut batches = Vec::with_capacity(stores.len());
        let mut diagnostics = Vec::new();

        // Stores are visited one at a time: providers don't cope well with
        // concurrent opens.
        for store in stores {
            let r = AssertUnwindSafe(self.gateway.open_and_enumerate(&store))
                .catch_unwind()
                .await;

            let error = match r {
                Ok(Ok(certs)) => {
                    debug!(store = %store, count = certs.len(), "found certificates");
                    batches.push(certs);
                    continue;
                }
                Ok(Err(e)) => e,
                Err(panic) => ProviderError::Aborted(panic_message(panic.as_ref())),
            };

            warn!(store = %store, %error, "skipping store");
            diagnostics.push(StoreDiagnostic { store, error });
        }

        let outcome = DiscoveryOutcome {
            certificates: merge_unique(batches),
            diagnostics,
        };
        debug!(
            count = outcome.certificates.len(),
            failed = outcome.diagnostics.len(),
            "discovery finished"
        );
        Ok(outcome)
    }
}
