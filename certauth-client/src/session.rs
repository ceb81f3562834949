//! The challenge-response state machine.
//!
//! An [AuthSession] drives one user through:
//!
//! 1. requesting a challenge for a fresh session id,
//! 2. discovering certificates,
//! 3. selecting one of them,
//! 4. signing the challenge and submitting it for verification.
//!
//! A challenge is single use: once a verify attempt completes, whatever the
//! outcome, a new challenge has to be requested. A failed signature or export
//! does not consume the challenge, so the user can pick another certificate
//! and try again.
//!
//! The session takes `&mut self` for every operation, so only one sequence is
//! in flight at a time. Dropping an operation's future abandons it; the next
//! [request_challenge][AuthSession::request_challenge] starts over.
use std::fmt;

use certauth_proto::{AuthResult, VerifyRequest};

use crate::discovery::{CertificateDiscovery, DiscoveryOutcome};
use crate::error::{
    CertAuthError, FailureKind, ProviderError, ProviderFault, Result, SigningError,
    SigningFailureKind,
};
use crate::provider::ProviderGateway;
use crate::server::ServerClient;
use crate::types::Certificate;
use crate::ui::UiCallback;
use crate::util::{new_session_id, normalize_thumbprint};

/// Why a session failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    /// A human readable description. For [FailureKind::VerificationRejected]
    /// this is the server's message, verbatim.
    pub message: String,
    /// The provider's raw error, for signing and export failures.
    pub fault: Option<ProviderFault>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    ChallengeRequested,
    ChallengeReady,
    CertificatesDiscovered,
    Signing,
    Verifying,
    Succeeded { message: Option<String> },
    Failed(Failure),
}

impl AuthState {
    pub fn name(&self) -> &'static str {
        match self {
            AuthState::Idle => "idle",
            AuthState::ChallengeRequested => "requesting challenge",
            AuthState::ChallengeReady => "challenge ready",
            AuthState::CertificatesDiscovered => "certificates discovered",
            AuthState::Signing => "signing",
            AuthState::Verifying => "verifying",
            AuthState::Succeeded { .. } => "succeeded",
            AuthState::Failed(_) => "failed",
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            AuthState::Failed(f) => Some(f),
            _ => None,
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A live challenge and the certificate chosen to answer it.
#[derive(Debug)]
struct ChallengeSession {
    session_id: String,
    challenge: String,
    selected: Option<String>,
}

/// The raw fault behind a provider error, if it carried one.
fn raw_fault(e: &ProviderError) -> ProviderFault {
    match e {
        ProviderError::SigningFailed(f)
        | ProviderError::ExportFailed(f)
        | ProviderError::Other(f)
        | ProviderError::StoreUnavailable { fault: f, .. } => f.clone(),
        e => ProviderFault::message(e.to_string()),
    }
}

fn signing_error(e: &ProviderError) -> SigningError {
    let mut se = SigningError::from(raw_fault(e));
    if se.kind == SigningFailureKind::Unknown
        && matches!(
            e,
            ProviderError::StoreUnavailable { .. } | ProviderError::CertificateNotFound(_)
        )
    {
        // The certificate was there during discovery.
        se.kind = SigningFailureKind::TokenRemoved;
    }
    se
}

pub struct AuthSession<'a, G, S, U>
where
    G: ProviderGateway,
    S: ServerClient,
    U: UiCallback + ?Sized,
{
    gateway: G,
    server: S,
    ui: &'a U,
    state: AuthState,
    challenge: Option<ChallengeSession>,
    discovered: Option<DiscoveryOutcome>,
    accepted_empty: bool,
}

impl<'a, G, S, U> AuthSession<'a, G, S, U>
where
    G: ProviderGateway,
    S: ServerClient,
    U: UiCallback + ?Sized,
{
    pub fn new(gateway: G, server: S, ui: &'a U) -> Self {
        AuthSession {
            gateway,
            server,
            ui,
            state: AuthState::Idle,
            challenge: None,
            discovered: None,
            accepted_empty: false,
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    /// The id of the live challenge, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.challenge.as_ref().map(|c| c.session_id.as_str())
    }

    pub fn challenge(&self) -> Option<&str> {
        self.challenge.as_ref().map(|c| c.challenge.as_str())
    }

    /// Certificates from the most recent discovery.
    pub fn certificates(&self) -> &[Certificate] {
        self.discovered
            .as_ref()
            .map(|d| d.certificates.as_slice())
            .unwrap_or_default()
    }

    pub fn last_discovery(&self) -> Option<&DiscoveryOutcome> {
        self.discovered.as_ref()
    }

    pub fn selected(&self) -> Option<&Certificate> {
        let identity = self.challenge.as_ref()?.selected.as_deref()?;
        self.discovered.as_ref()?.find(identity)
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    fn set_state(&mut self, state: AuthState) {
        trace!(from = %self.state, to = %state, "state transition");
        self.state = state;
        self.ui.state_changed(&self.state);
    }

    /// Moves to [AuthState::Failed] if `err` has a [FailureKind], and hands
    /// `err` back.
    fn fail(&mut self, err: CertAuthError, fault: Option<ProviderFault>) -> CertAuthError {
        if let Some(kind) = err.failure_kind() {
            error!(?kind, "{}", err);
            if let Some(fault) = &fault {
                debug!(%fault, "provider fault");
            }
            self.set_state(AuthState::Failed(Failure {
                kind,
                message: err.to_string(),
                fault,
            }));
        }
        err
    }

    /// Whether the latest discovery can be used to pick a certificate.
    fn has_usable_discovery(&self) -> bool {
        match &self.discovered {
            Some(d) => !d.is_empty() || self.accepted_empty,
            None => false,
        }
    }

    /// Checks that the signing provider is installed and reachable.
    pub async fn check_availability(&mut self) -> Result<()> {
        if self.gateway.is_available().await {
            Ok(())
        } else {
            Err(self.fail(CertAuthError::ProviderUnavailable, None))
        }
    }

    /// Requests a challenge for a fresh session id.
    pub async fn request_challenge(&mut self) -> Result<()> {
        self.request_challenge_with_id(new_session_id()).await
    }

    /// Requests a challenge for `session_id`.
    ///
    /// Any previous challenge is discarded first, even if this fails.
    pub async fn request_challenge_with_id(&mut self, session_id: String) -> Result<()> {
        self.challenge = None;
        self.set_state(AuthState::ChallengeRequested);
        debug!(%session_id, "requesting challenge");

        let r = self.server.get_challenge(&session_id).await;
        let challenge = match r {
            Ok(c) => c,
            Err(e) => return Err(self.fail(CertAuthError::ChallengeFetch(e.to_string()), None)),
        };

        self.challenge = Some(ChallengeSession {
            session_id,
            challenge,
            selected: None,
        });
        self.set_state(AuthState::ChallengeReady);

        // Certificates found before this challenge remain usable.
        if self.has_usable_discovery() {
            self.set_state(AuthState::CertificatesDiscovered);
        }
        Ok(())
    }

    /// Runs a fresh discovery pass, replacing the previous result.
    ///
    /// An empty result asks the UI for token insertion, and leaves the session
    /// waiting for a challenge answer until certificates are found or
    /// [accept_empty_discovery][Self::accept_empty_discovery] is called.
    pub async fn discover_certificates(&mut self) -> Result<DiscoveryOutcome> {
        let r = CertificateDiscovery::new(&self.gateway).discover().await;
        let outcome = match r {
            Ok(o) => o,
            Err(e) => return Err(self.fail(e, None)),
        };

        self.discovered = Some(outcome.clone());
        self.accepted_empty = false;

        // A selection must come from the latest discovery.
        if let Some(c) = self.challenge.as_mut() {
            if let Some(identity) = c.selected.as_deref() {
                if outcome.find(identity).is_none() {
                    debug!(%identity, "selected certificate is gone");
                    c.selected = None;
                }
            }
        }

        if outcome.is_empty() {
            info!("no certificates found");
            self.ui.request_token_insertion();
        }

        if self.challenge.is_some() {
            if outcome.is_empty() {
                self.set_state(AuthState::ChallengeReady);
            } else {
                self.set_state(AuthState::CertificatesDiscovered);
            }
        }

        Ok(outcome)
    }

    /// Proceeds with an empty discovery result.
    pub fn accept_empty_discovery(&mut self) -> Result<()> {
        if self.challenge.is_none() {
            return Err(CertAuthError::NoChallenge);
        }
        match &self.discovered {
            Some(d) if d.is_empty() => {
                self.accepted_empty = true;
                self.set_state(AuthState::CertificatesDiscovered);
                Ok(())
            }
            _ => Err(CertAuthError::InvalidState(self.state.name())),
        }
    }

    /// Selects the certificate to answer the live challenge with.
    ///
    /// This is also how a failed signature or export is retried.
    pub fn select_certificate(&mut self, identity: &str) -> Result<()> {
        if self.challenge.is_none() {
            return Err(CertAuthError::NoChallenge);
        }

        match &self.state {
            AuthState::CertificatesDiscovered => {}
            AuthState::Failed(Failure {
                kind: FailureKind::SigningError | FailureKind::ExportError,
                ..
            }) => {}
            s => return Err(CertAuthError::InvalidState(s.name())),
        }

        let identity = normalize_thumbprint(identity);
        if self
            .discovered
            .as_ref()
            .and_then(|d| d.find(&identity))
            .is_none()
        {
            return Err(CertAuthError::UnknownCertificate(identity));
        }

        debug!(%identity, "selected certificate");
        if let Some(c) = self.challenge.as_mut() {
            c.selected = Some(identity);
        }
        if self.state != AuthState::CertificatesDiscovered {
            self.set_state(AuthState::CertificatesDiscovered);
        }
        Ok(())
    }

    /// Signs the live challenge with the selected certificate, and submits it
    /// for verification.
    ///
    /// Returns the server's verdict if it accepted the signature.
    pub async fn sign_and_verify(&mut self) -> Result<AuthResult> {
        let (session_id, challenge, identity) = match &self.challenge {
            None => return Err(CertAuthError::NoChallenge),
            Some(ChallengeSession {
                selected: None, ..
            }) => return Err(CertAuthError::NoCertificateSelected),
            Some(ChallengeSession {
                session_id,
                challenge,
                selected: Some(identity),
            }) => (session_id.clone(), challenge.clone(), identity.clone()),
        };

        if self.state != AuthState::CertificatesDiscovered {
            return Err(CertAuthError::InvalidState(self.state.name()));
        }

        let handle = match self.discovered.as_ref().and_then(|d| d.find(&identity)) {
            Some(cert) => cert.handle().clone(),
            None => return Err(CertAuthError::UnknownCertificate(identity)),
        };

        self.set_state(AuthState::Signing);
        let r = self.gateway.sign(&handle, challenge.as_bytes()).await;
        let signature = match r {
            Ok(s) => s,
            Err(e) => {
                let se = signing_error(&e);
                let fault = Some(se.fault.clone());
                return Err(self.fail(CertAuthError::Signing(se), fault));
            }
        };

        let r = self.gateway.export_certificate(&handle).await;
        let certificate = match r {
            Ok(c) => c,
            Err(e) => {
                let fault = raw_fault(&e);
                return Err(self.fail(
                    CertAuthError::Export(fault.message.clone()),
                    Some(fault),
                ));
            }
        };

        // From here on the challenge is spent, whatever the outcome.
        self.challenge = None;
        self.set_state(AuthState::Verifying);

        let request = VerifyRequest {
            session_id,
            challenge,
            signature: signature.to_base64(),
            certificate: certificate.to_base64(),
        };

        let r = self.server.verify(&request).await;
        match r {
            Ok(r) if r.success => {
                info!(identity = %identity, "authenticated");
                self.set_state(AuthState::Succeeded {
                    message: r.message.clone(),
                });
                Ok(r)
            }
            Ok(r) => Err(self.fail(CertAuthError::VerificationRejected(r.message), None)),
            Err(e) => Err(self.fail(CertAuthError::Network(e.to_string()), None)),
        }
    }

    /// Discards the live challenge and returns to [AuthState::Idle].
    ///
    /// The last discovery result is kept.
    pub fn reset(&mut self) {
        self.challenge = None;
        self.set_state(AuthState::Idle);
    }
}
