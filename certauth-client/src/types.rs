//! Types used in the public API.
//!
//! These are shared by every provider dialect, the discovery pass and the
//! authentication session, regardless of which features were selected at
//! build time.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::BASE64_ENGINE;

/// Which kind of backend a store is.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreKind {
    /// Key containers held by the local machine or user profile.
    LocalContainer,
    /// An external token or smart card.
    ExternalToken,
}

/// Store location constants understood by the signing provider.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u32)]
pub enum StoreLocation {
    Memory = 0,
    LocalMachine = 1,
    CurrentUser = 2,
    SmartCardUser = 4,
    /// Certificates installed in key containers, including those on tokens.
    Container = 100,
}

impl StoreLocation {
    /// The provider's numeric value for this location.
    pub fn value(self) -> u32 {
        self as u32
    }

    /// A filesystem and log friendly name.
    pub fn slug(self) -> &'static str {
        match self {
            StoreLocation::Memory => "memory",
            StoreLocation::LocalMachine => "local-machine",
            StoreLocation::CurrentUser => "current-user",
            StoreLocation::SmartCardUser => "smart-card-user",
            StoreLocation::Container => "container",
        }
    }
}

/// How a store is opened.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u32)]
pub enum OpenMode {
    ReadOnly = 0,
    ReadWrite = 1,
    MaximumAllowed = 2,
}

impl OpenMode {
    pub fn value(self) -> u32 {
        self as u32
    }
}

/// A static descriptor of one certificate store, with the parameters needed
/// to open it.
#[derive(Debug, PartialEq, Eq, Clone, Hash, Serialize, Deserialize)]
pub struct StoreRef {
    /// Human readable provenance tag, eg: `local-container`.
    pub label: String,
    pub kind: StoreKind,
    pub location: StoreLocation,
    /// Store name, normally `My`.
    pub name: String,
    pub open_mode: OpenMode,
}

impl StoreRef {
    pub fn new(
        label: impl Into<String>,
        kind: StoreKind,
        location: StoreLocation,
        name: impl Into<String>,
        open_mode: OpenMode,
    ) -> Self {
        StoreRef {
            label: label.into(),
            kind,
            location,
            name: name.into(),
            open_mode,
        }
    }
}

impl fmt::Display for StoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}/{})",
            self.label,
            self.location.slug(),
            self.name
        )
    }
}

/// The ordered list of stores searched when nothing else is configured.
///
/// Local containers come first, followed by the external token variants. The
/// numeric location values differ between provider releases; deployments
/// should confirm them against the installed provider and override this list
/// in the configuration where needed.
pub fn default_stores() -> Vec<StoreRef> {
    vec![
        StoreRef::new(
            "local-container",
            StoreKind::LocalContainer,
            StoreLocation::CurrentUser,
            "My",
            OpenMode::MaximumAllowed,
        ),
        StoreRef::new(
            "external-token[1]",
            StoreKind::ExternalToken,
            StoreLocation::Container,
            "My",
            OpenMode::ReadOnly,
        ),
        StoreRef::new(
            "external-token[2]",
            StoreKind::ExternalToken,
            StoreLocation::SmartCardUser,
            "My",
            OpenMode::ReadOnly,
        ),
    ]
}

/// An opaque reference to a certificate inside the provider.
///
/// Only the [ProviderGateway][crate::provider::ProviderGateway] which produced
/// a handle can make sense of it. Handles are never serialised.
#[derive(Clone, PartialEq, Eq)]
pub struct CertHandle {
    pub(crate) store: StoreRef,
    pub(crate) locator: String,
}

impl CertHandle {
    pub(crate) fn new(store: StoreRef, locator: impl Into<String>) -> Self {
        CertHandle {
            store,
            locator: locator.into(),
        }
    }
}

impl fmt::Debug for CertHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertHandle")
            .field("store", &self.store.label)
            .finish()
    }
}

/// A certificate found in one of the provider's stores.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    /// Thumbprint; upper case hex. This is the certificate's identity.
    pub identity: String,
    pub subject: String,
    pub issuer: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub serial_number: String,
    /// Label of the store which yielded this certificate.
    pub source_backend: String,
    #[serde(skip)]
    pub(crate) handle: CertHandle,
}

/// Validity of a [Certificate] at a point in time.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExpiryStatus {
    NotYetValid,
    Valid,
    Expired,
}

impl Certificate {
    pub fn handle(&self) -> &CertHandle {
        &self.handle
    }

    pub fn expiry_status(&self, now: DateTime<Utc>) -> ExpiryStatus {
        if now < self.valid_from {
            ExpiryStatus::NotYetValid
        } else if self.valid_to < now {
            ExpiryStatus::Expired
        } else {
            ExpiryStatus::Valid
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_status(now) == ExpiryStatus::Expired
    }
}

/// A signature produced by the provider.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    pub fn to_base64(&self) -> String {
        BASE64_ENGINE.encode(&self.0)
    }
}

/// A certificate exported from the provider (DER).
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EncodedCertificate(pub Vec<u8>);

impl EncodedCertificate {
    pub fn to_base64(&self) -> String {
        BASE64_ENGINE.encode(&self.0)
    }
}
