//! In-memory providers, servers and UIs for tests.
use async_trait::async_trait;
use base64::Engine;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use certauth_proto::{AuthResult, VerifyRequest};

use crate::error::{ProviderError, ProviderFault};
use crate::provider::{AsyncStoreApi, CertObject, CertProperty, ObjectModel, RawCertificate, StoreObject};
use crate::server::{ServerClient, ServerError};
use crate::session::AuthState;
use crate::types::StoreRef;
use crate::ui::UiCallback;
use crate::util::normalize_thumbprint;
use crate::BASE64_ENGINE;

const FILE_NOT_FOUND: u32 = 0x8007_0002;

pub(crate) fn raw_cert(thumbprint: &str, subject: &str) -> RawCertificate {
    RawCertificate {
        thumbprint: thumbprint.to_string(),
        subject: subject.to_string(),
        issuer: "CN=Test CA".to_string(),
        valid_from: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        valid_to: Utc.with_ymd_and_hms(2034, 1, 1, 0, 0, 0).unwrap(),
        serial_number: "01".to_string(),
        key: normalize_thumbprint(thumbprint),
    }
}

/// An [AsyncStoreApi] with stores keyed by label.
#[derive(Debug, Default)]
pub(crate) struct FakeStoreApi {
    stores: HashMap<String, Vec<RawCertificate>>,
    failing_listing: HashSet<String>,
    pending_listing: HashSet<String>,
    panicking_listing: HashSet<String>,
    sign_faults: HashMap<String, ProviderFault>,
    export_faults: HashMap<String, ProviderFault>,
    ejected: Mutex<HashSet<String>>,
    unavailable: bool,
    opened: AtomicUsize,
    open_handles: AtomicUsize,
}

#[derive(Debug)]
pub(crate) struct FakeStore {
    label: String,
}

impl FakeStoreApi {
    pub fn with_store(mut self, store: &StoreRef, certs: Vec<RawCertificate>) -> Self {
        self.stores.insert(store.label.clone(), certs);
        self
    }

    pub fn with_listing_failure(mut self, store: &StoreRef) -> Self {
        self.failing_listing.insert(store.label.clone());
        self
    }

    pub fn with_pending_listing(mut self, store: &StoreRef) -> Self {
        self.pending_listing.insert(store.label.clone());
        self
    }

    pub fn with_panicking_listing(mut self, store: &StoreRef) -> Self {
        self.panicking_listing.insert(store.label.clone());
        self
    }

    /// Makes signing with the certificate `key` fail with `fault`.
    pub fn with_sign_fault(mut self, key: &str, fault: ProviderFault) -> Self {
        self.sign_faults.insert(key.to_string(), fault);
        self
    }

    /// Makes exporting the certificate `key` fail with `fault`.
    pub fn with_export_fault(mut self, key: &str, fault: ProviderFault) -> Self {
        self.export_faults.insert(key.to_string(), fault);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Makes `store` unavailable from now on, as if its token was removed.
    pub fn eject(&self, store: &StoreRef) {
        self.ejected.lock().unwrap().insert(store.label.clone());
    }

    /// Total number of stores opened.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of stores currently open.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    fn find(&self, store: &FakeStore, key: &str) -> Result<(), ProviderError> {
        self.stores
            .get(&store.label)
            .and_then(|certs| certs.iter().find(|c| c.key == key))
            .map(|_| ())
            .ok_or_else(|| ProviderError::CertificateNotFound(store.label.clone()))
    }
}

#[async_trait]
impl AsyncStoreApi for FakeStoreApi {
    type Store = FakeStore;

    async fn probe(&self) -> Result<(), ProviderFault> {
        if self.unavailable {
            Err(ProviderFault::message("provider is not installed"))
        } else {
            Ok(())
        }
    }

    async fn open(&self, store: &StoreRef) -> Result<FakeStore, ProviderError> {
        let ejected = self.ejected.lock().unwrap().contains(&store.label);
        if ejected || !self.stores.contains_key(&store.label) {
            return Err(ProviderError::StoreUnavailable {
                store: store.label.clone(),
                fault: ProviderFault::new(FILE_NOT_FOUND, "The system cannot find the file specified."),
            });
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(FakeStore {
            label: store.label.clone(),
        })
    }

    async fn certificates(&self, store: &FakeStore) -> Result<Vec<RawCertificate>, ProviderError> {
        if self.panicking_listing.contains(&store.label) {
            panic!("provider crashed while listing {}", store.label);
        }
        if self.pending_listing.contains(&store.label) {
            futures::future::pending::<()>().await;
        }
        if self.failing_listing.contains(&store.label) {
            return Err(ProviderError::Other(ProviderFault::message("listing failed")));
        }
        Ok(self.stores.get(&store.label).cloned().unwrap_or_default())
    }

    fn close(&self, _store: &mut FakeStore) {
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
    }

    async fn sign(&self, store: &FakeStore, key: &str, payload: &[u8]) -> Result<Vec<u8>, ProviderError> {
        self.find(store, key)?;
        if let Some(fault) = self.sign_faults.get(key) {
            return Err(ProviderError::SigningFailed(fault.clone()));
        }
        let mut sig = format!("sig:{key}:").into_bytes();
        sig.extend_from_slice(payload);
        Ok(sig)
    }

    async fn export(&self, store: &FakeStore, key: &str) -> Result<Vec<u8>, ProviderError> {
        self.find(store, key)?;
        if let Some(fault) = self.export_faults.get(key) {
            return Err(ProviderError::ExportFailed(fault.clone()));
        }
        Ok(format!("der:{key}").into_bytes())
    }
}

/// A certificate object in a [FakeObjectModel].
#[derive(Debug, Clone)]
pub(crate) struct FakeCertObject {
    thumbprint: String,
    subject: String,
    broken: Option<CertProperty>,
    pending: Option<CertProperty>,
    sign_fault: Option<ProviderFault>,
}

impl FakeCertObject {
    pub fn new(thumbprint: &str, subject: &str) -> Self {
        FakeCertObject {
            thumbprint: thumbprint.to_string(),
            subject: subject.to_string(),
            broken: None,
            pending: None,
            sign_fault: None,
        }
    }

    /// Makes reading `property` fail.
    pub fn with_broken(mut self, property: CertProperty) -> Self {
        self.broken = Some(property);
        self
    }

    /// Makes reading `property` never complete.
    pub fn with_pending(mut self, property: CertProperty) -> Self {
        self.pending = Some(property);
        self
    }

    pub fn with_sign_fault(mut self, fault: ProviderFault) -> Self {
        self.sign_fault = Some(fault);
        self
    }
}

#[async_trait]
impl CertObject for FakeCertObject {
    async fn property(&self, property: CertProperty) -> Result<String, ProviderFault> {
        if self.pending == Some(property) {
            futures::future::pending::<()>().await;
        }
        if self.broken == Some(property) {
            return Err(ProviderFault::message("property is not readable"));
        }
        Ok(match property {
            CertProperty::SubjectName => self.subject.clone(),
            CertProperty::IssuerName => "CN=Test CA".to_string(),
            CertProperty::ValidFromDate => "Mon Jan 01 2024 03:00:00 GMT+0300 (Moscow Standard Time)".to_string(),
            CertProperty::ValidToDate => "2034-01-01T00:00:00Z".to_string(),
            CertProperty::SerialNumber => "7C00".to_string(),
            CertProperty::Thumbprint => self.thumbprint.clone(),
        })
    }

    async fn sign_cades(&self, content: &[u8]) -> Result<String, ProviderFault> {
        if let Some(fault) = &self.sign_fault {
            return Err(fault.clone());
        }
        let mut sig = format!("cades:{}:", normalize_thumbprint(&self.thumbprint)).into_bytes();
        sig.extend_from_slice(content);
        // Providers wrap long base64 output.
        let encoded = BASE64_ENGINE.encode(sig);
        let (a, b) = encoded.split_at(encoded.len() / 2);
        Ok(format!("{a}\r\n{b}"))
    }

    async fn export_base64(&self) -> Result<String, ProviderFault> {
        Ok(BASE64_ENGINE.encode(format!("der:{}", normalize_thumbprint(&self.thumbprint))))
    }
}

/// An [ObjectModel] with stores keyed by location.
#[derive(Debug, Default)]
pub(crate) struct FakeObjectModel {
    stores: HashMap<u32, Vec<FakeCertObject>>,
    /// Count reported instead of the real one; `None` fails the read.
    counts: HashMap<u32, Option<u32>>,
    open_handles: Arc<AtomicUsize>,
}

pub(crate) struct FakeStoreObject {
    stores: HashMap<u32, Vec<FakeCertObject>>,
    counts: HashMap<u32, Option<u32>>,
    certs: Option<Vec<FakeCertObject>>,
    count: Option<Option<u32>>,
    open_handles: Arc<AtomicUsize>,
}

impl FakeObjectModel {
    pub fn with_store(mut self, location: u32, certs: Vec<FakeCertObject>) -> Self {
        self.stores.insert(location, certs);
        self
    }

    /// Makes the store at `location` report `count` certificates, whatever
    /// it holds.
    pub fn with_reported_count(mut self, location: u32, count: u32) -> Self {
        self.counts.insert(location, Some(count));
        self
    }

    /// Makes counting the store at `location` fail.
    pub fn with_count_failure(mut self, location: u32) -> Self {
        self.counts.insert(location, None);
        self
    }

    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectModel for FakeObjectModel {
    type Store = FakeStoreObject;

    async fn probe(&self) -> Result<(), ProviderFault> {
        Ok(())
    }

    async fn create_store(&self) -> Result<FakeStoreObject, ProviderFault> {
        Ok(FakeStoreObject {
            stores: self.stores.clone(),
            counts: self.counts.clone(),
            certs: None,
            count: None,
            open_handles: self.open_handles.clone(),
        })
    }
}

impl FakeStoreObject {
    fn certs(&self) -> Result<&Vec<FakeCertObject>, ProviderFault> {
        self.certs
            .as_ref()
            .ok_or_else(|| ProviderFault::message("store is not open"))
    }
}

#[async_trait]
impl StoreObject for FakeStoreObject {
    type Certificate = FakeCertObject;

    async fn open(&mut self, location: u32, _name: &str, _mode: u32) -> Result<(), ProviderFault> {
        let certs = self
            .stores
            .get(&location)
            .cloned()
            .ok_or_else(|| ProviderFault::new(FILE_NOT_FOUND, "The system cannot find the file specified."))?;
        self.certs = Some(certs);
        self.count = self.counts.get(&location).copied();
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn count(&self) -> Result<u32, ProviderFault> {
        let certs = self.certs()?;
        match self.count {
            Some(Some(count)) => Ok(count),
            Some(None) => Err(ProviderFault::message("count is not readable")),
            None => Ok(certs.len() as u32),
        }
    }

    async fn item(&self, index: u32) -> Result<FakeCertObject, ProviderFault> {
        index
            .checked_sub(1)
            .and_then(|i| self.certs().ok()?.get(i as usize).cloned())
            .ok_or_else(|| ProviderFault::message("index out of range"))
    }

    fn close(&mut self) {
        if self.certs.take().is_some() {
            self.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// A [ServerClient] which replays queued responses and records requests.
///
/// With nothing queued, it issues `challenge-<n>` challenges and accepts every
/// signature.
#[derive(Debug, Default)]
pub(crate) struct FakeServer {
    challenges: Mutex<VecDeque<Result<String, ServerError>>>,
    verdicts: Mutex<VecDeque<Result<AuthResult, ServerError>>>,
    challenge_requests: Mutex<Vec<String>>,
    verify_requests: Mutex<Vec<VerifyRequest>>,
}

impl FakeServer {
    pub fn with_challenge(self, r: Result<String, ServerError>) -> Self {
        self.challenges.lock().unwrap().push_back(r);
        self
    }

    pub fn with_verdict(self, r: Result<AuthResult, ServerError>) -> Self {
        self.verdicts.lock().unwrap().push_back(r);
        self
    }

    pub fn challenge_requests(&self) -> Vec<String> {
        self.challenge_requests.lock().unwrap().clone()
    }

    pub fn verify_requests(&self) -> Vec<VerifyRequest> {
        self.verify_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServerClient for FakeServer {
    async fn get_challenge(&self, session_id: &str) -> Result<String, ServerError> {
        let n = {
            let mut requests = self.challenge_requests.lock().unwrap();
            requests.push(session_id.to_string());
            requests.len()
        };
        let queued = self.challenges.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(format!("challenge-{n}")))
    }

    async fn verify(&self, request: &VerifyRequest) -> Result<AuthResult, ServerError> {
        self.verify_requests.lock().unwrap().push(request.clone());
        let queued = self.verdicts.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(AuthResult::accepted(None)))
    }
}

/// A [UiCallback] which records what it was told.
#[derive(Debug, Default)]
pub(crate) struct RecordingUi {
    states: Mutex<Vec<AuthState>>,
    insertion_requests: AtomicUsize,
}

impl RecordingUi {
    pub fn states(&self) -> Vec<AuthState> {
        self.states.lock().unwrap().clone()
    }

    pub fn insertion_requests(&self) -> usize {
        self.insertion_requests.load(Ordering::SeqCst)
    }
}

impl UiCallback for RecordingUi {
    fn state_changed(&self, state: &AuthState) {
        self.states.lock().unwrap().push(state.clone());
    }

    fn request_token_insertion(&self) {
        self.insertion_requests.fetch_add(1, Ordering::SeqCst);
    }
}
