//! SoftStore is a software key container, backed by PEM files on disk.
//!
//! Each store is a directory, `<root>/<location>/<name>/`, eg:
//! `<root>/current-user/My/`. Every `*.pem` file in it holds one certificate,
//! optionally followed by its private key.
//!
//! Signatures are detached CMS (PKCS#7) `SignedData`, with the signing
//! certificate embedded.
//!
//! This is intended for demos and testing. Private keys are stored
//! unencrypted.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use openssl::asn1::Asn1TimeRef;
use openssl::cms::{CMSOptions, CmsContentInfo};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::{X509NameRef, X509};
use std::path::{Path, PathBuf};

use crate::error::{ProviderError, ProviderFault};
use crate::provider::{AsyncStoreApi, RawCertificate};
use crate::types::StoreRef;

const ERROR_FILE_NOT_FOUND: u32 = 0x8007_0002;
const NTE_NO_KEY: u32 = 0x8009_000D;

fn malformed(e: ErrorStack) -> ProviderError {
    ProviderError::Malformed(e.to_string())
}

/// Renders a name as `SN=value, ...`, in the certificate's order.
fn render_name(name: &X509NameRef) -> String {
    name.entries()
        .map(|e| {
            let field = e.object().nid().short_name().unwrap_or("?");
            let value = e
                .data()
                .as_utf8()
                .map(|v| v.to_string())
                .unwrap_or_default();
            format!("{field}={value}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_utc(t: &Asn1TimeRef) -> Result<DateTime<Utc>, ProviderError> {
    let epoch = openssl::asn1::Asn1Time::from_unix(0).map_err(malformed)?;
    let d = epoch.diff(t).map_err(malformed)?;
    let secs = i64::from(d.days) * 86_400 + i64::from(d.secs);
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| ProviderError::Malformed(format!("timestamp out of range: {t}")))
}

/// One certificate file.
#[derive(Debug)]
pub struct SoftEntry {
    thumbprint: String,
    cert: X509,
    key: Option<PKey<Private>>,
}

impl SoftEntry {
    fn from_pem(pem: &[u8]) -> Result<Self, ErrorStack> {
        let cert = X509::from_pem(pem)?;
        let key = PKey::private_key_from_pem(pem).ok();
        let thumbprint = hex::encode_upper(&*cert.digest(MessageDigest::sha1())?);
        Ok(SoftEntry {
            thumbprint,
            cert,
            key,
        })
    }

    fn to_raw(&self) -> Result<RawCertificate, ProviderError> {
        let serial_number = self
            .cert
            .serial_number()
            .to_bn()
            .and_then(|bn| bn.to_hex_str().map(|s| s.to_string()))
            .map_err(malformed)?;

        Ok(RawCertificate {
            thumbprint: self.thumbprint.clone(),
            subject: render_name(self.cert.subject_name()),
            issuer: render_name(self.cert.issuer_name()),
            valid_from: to_utc(self.cert.not_before())?,
            valid_to: to_utc(self.cert.not_after())?,
            serial_number,
            key: self.thumbprint.clone(),
        })
    }
}

/// Drops the certificates which couldn't be converted, so one bad file doesn't
/// hide the rest of the store.
fn keep_readable<'a, I>(path: &Path, converted: I) -> Vec<RawCertificate>
where
    I: IntoIterator<Item = (&'a str, Result<RawCertificate, ProviderError>)>,
{
    converted
        .into_iter()
        .filter_map(|(thumbprint, r)| match r {
            Ok(c) => Some(c),
            Err(e) => {
                warn!("skipping {} in {}: {}", thumbprint, path.display(), e);
                None
            }
        })
        .collect()
}

/// An opened [SoftStore] directory.
#[derive(Debug)]
pub struct SoftStoreDir {
    path: PathBuf,
    entries: Vec<SoftEntry>,
}

impl SoftStoreDir {
    fn entry(&self, key: &str) -> Result<&SoftEntry, ProviderError> {
        self.entries
            .iter()
            .find(|e| e.thumbprint == key)
            .ok_or_else(|| ProviderError::CertificateNotFound(self.path.display().to_string()))
    }
}

/// [AsyncStoreApi] over a directory of PEM files.
#[derive(Debug, Clone)]
pub struct SoftStore {
    root: PathBuf,
}

impl SoftStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SoftStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory backing `store`.
    pub fn store_path(&self, store: &StoreRef) -> PathBuf {
        self.root.join(store.location.slug()).join(&store.name)
    }
}

#[async_trait]
impl AsyncStoreApi for SoftStore {
    type Store = SoftStoreDir;

    async fn probe(&self) -> Result<(), ProviderFault> {
        match tokio::fs::metadata(&self.root).await {
            Ok(m) if m.is_dir() => Ok(()),
            Ok(_) => Err(ProviderFault::message(format!(
                "{} is not a directory",
                self.root.display()
            ))),
            Err(e) => Err(ProviderFault::message(format!(
                "{}: {}",
                self.root.display(),
                e
            ))),
        }
    }

    async fn open(&self, store: &StoreRef) -> Result<SoftStoreDir, ProviderError> {
        let path = self.store_path(store);
        let mut dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ProviderError::StoreUnavailable {
                store: store.label.clone(),
                fault: ProviderFault::new(ERROR_FILE_NOT_FOUND, format!("{}: {}", path.display(), e)),
            })?;

        let mut files = Vec::new();
        while let Some(f) = dir.next_entry().await.map_err(|e| {
            ProviderError::Other(ProviderFault::message(format!("{}: {}", path.display(), e)))
        })? {
            let p = f.path();
            if p.extension().is_some_and(|ext| ext == "pem") {
                files.push(p);
            }
        }
        files.sort();

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let pem = match tokio::fs::read(&file).await {
                Ok(pem) => pem,
                Err(e) => {
                    warn!("skipping {}: {}", file.display(), e);
                    continue;
                }
            };
            match SoftEntry::from_pem(&pem) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("skipping {}: {}", file.display(), e),
            }
        }

        trace!("opened {} with {} entries", path.display(), entries.len());
        Ok(SoftStoreDir { path, entries })
    }

    async fn certificates(&self, store: &SoftStoreDir) -> Result<Vec<RawCertificate>, ProviderError> {
        Ok(keep_readable(
            &store.path,
            store.entries.iter().map(|e| (e.thumbprint.as_str(), e.to_raw())),
        ))
    }

    fn close(&self, store: &mut SoftStoreDir) {
        // Drops the private keys.
        store.entries.clear();
    }

    async fn sign(
        &self,
        store: &SoftStoreDir,
        key: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, ProviderError> {
        let entry = store.entry(key)?;
        let pkey = entry.key.as_ref().ok_or_else(|| {
            ProviderError::SigningFailed(ProviderFault::new(NTE_NO_KEY, "Key does not exist."))
        })?;

        let flags = CMSOptions::DETACHED | CMSOptions::BINARY;
        CmsContentInfo::sign(Some(&*entry.cert), Some(&**pkey), None, Some(payload), flags)
            .and_then(|cms| cms.to_der())
            .map_err(|e| ProviderError::SigningFailed(ProviderFault::message(e.to_string())))
    }

    async fn export(&self, store: &SoftStoreDir, key: &str) -> Result<Vec<u8>, ProviderError> {
        store
            .entry(key)?
            .cert
            .to_der()
            .map_err(|e| ProviderError::ExportFailed(ProviderFault::message(e.to_string())))
    }
}
