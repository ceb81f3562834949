use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, CertAuthError>;

/// A raw error as reported by the signing provider.
///
/// `code` is the provider's numeric classification (an `HRESULT` for
/// CryptoAPI-style providers), when it gave one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFault {
    pub code: Option<u32>,
    pub message: String,
}

impl ProviderFault {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        ProviderFault {
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        ProviderFault {
            code: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for ProviderFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (0x{:08X})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

/// Errors raised by a [ProviderGateway][crate::provider::ProviderGateway].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("signing provider is not available")]
    NotAvailable,
    /// The store does not exist on this machine, or could not be opened.
    #[error("store {store} is unavailable: {fault}")]
    StoreUnavailable { store: String, fault: ProviderFault },
    #[error("signing failed: {0}")]
    SigningFailed(ProviderFault),
    #[error("certificate export failed: {0}")]
    ExportFailed(ProviderFault),
    /// The certificate behind a handle is no longer in its store.
    #[error("certificate is no longer present in store {0}")]
    CertificateNotFound(String),
    #[error("provider returned malformed data: {0}")]
    Malformed(String),
    /// A store enumeration panicked.
    #[error("store enumeration aborted: {0}")]
    Aborted(String),
    #[error("provider error: {0}")]
    Other(ProviderFault),
}

/// Stable classification of a signing failure, derived from the provider's
/// raw [ProviderFault].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningFailureKind {
    /// The certificate can't be used to produce signatures. Providers report
    /// this as "the parameter is incorrect".
    NotSigningCapable,
    /// There is no private key bound to the certificate.
    NoPrivateKey,
    /// The user dismissed the provider's PIN or confirmation prompt.
    Cancelled,
    WrongPin,
    /// The token holding the key was removed.
    TokenRemoved,
    CertificateExpired,
    Unknown,
}

const E_INVALIDARG: u32 = 0x8007_0057;
const NTE_NO_KEY: u32 = 0x8009_000D;
const NTE_BAD_KEYSET: u32 = 0x8009_0016;
const ERROR_CANCELLED: u32 = 0x8007_04C7;
const SCARD_W_CANCELLED_BY_USER: u32 = 0x8010_006E;
const SCARD_W_WRONG_CHV: u32 = 0x8010_006B;
const SCARD_E_NO_SMARTCARD: u32 = 0x8010_000C;
const SCARD_W_REMOVED_CARD: u32 = 0x8010_0069;
const CERT_E_EXPIRED: u32 = 0x800B_0101;

/// Message fragments for providers which only report text, in the locales
/// these providers are commonly deployed with.
const MESSAGE_PATTERNS: &[(&str, SigningFailureKind)] = &[
    ("parameter is incorrect", SigningFailureKind::NotSigningCapable),
    ("параметр задан неверно", SigningFailureKind::NotSigningCapable),
    ("keyset does not exist", SigningFailureKind::NoPrivateKey),
    ("key does not exist", SigningFailureKind::NoPrivateKey),
    ("набор ключей не существует", SigningFailureKind::NoPrivateKey),
    ("cancelled by the user", SigningFailureKind::Cancelled),
    ("canceled by the user", SigningFailureKind::Cancelled),
    ("operation was canceled", SigningFailureKind::Cancelled),
    ("отменена пользователем", SigningFailureKind::Cancelled),
    ("wrong pin", SigningFailureKind::WrongPin),
    ("неверный pin", SigningFailureKind::WrongPin),
    ("smart card has been removed", SigningFailureKind::TokenRemoved),
    ("no smart card", SigningFailureKind::TokenRemoved),
    ("certificate has expired", SigningFailureKind::CertificateExpired),
    ("истек срок действия", SigningFailureKind::CertificateExpired),
];

impl SigningFailureKind {
    pub fn from_fault(fault: &ProviderFault) -> Self {
        use SigningFailureKind::*;
        if let Some(code) = fault.code {
            let kind = match code {
                E_INVALIDARG => NotSigningCapable,
                NTE_NO_KEY | NTE_BAD_KEYSET => NoPrivateKey,
                ERROR_CANCELLED | SCARD_W_CANCELLED_BY_USER => Cancelled,
                SCARD_W_WRONG_CHV => WrongPin,
                SCARD_E_NO_SMARTCARD | SCARD_W_REMOVED_CARD => TokenRemoved,
                CERT_E_EXPIRED => CertificateExpired,
                _ => Unknown,
            };
            if kind != Unknown {
                return kind;
            }
        }

        let message = fault.message.to_lowercase();
        MESSAGE_PATTERNS
            .iter()
            .find(|(pattern, _)| message.contains(pattern))
            .map(|(_, kind)| *kind)
            .unwrap_or(Unknown)
    }

    /// A stable, human readable description of the failure.
    pub fn user_message(&self) -> &'static str {
        use SigningFailureKind::*;
        match self {
            NotSigningCapable => {
                "The selected certificate cannot be used for signing. Choose another certificate."
            }
            NoPrivateKey => "The private key for the selected certificate was not found.",
            Cancelled => "Signing was cancelled.",
            WrongPin => "The PIN entered for the token is incorrect.",
            TokenRemoved => "The token holding the key was removed. Insert it and try again.",
            CertificateExpired => "The selected certificate has expired.",
            Unknown => "The signing provider could not sign the challenge.",
        }
    }
}

/// A signing failure: the stable [SigningFailureKind] plus the provider's
/// raw fault, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningError {
    pub kind: SigningFailureKind,
    pub fault: ProviderFault,
}

impl From<ProviderFault> for SigningError {
    fn from(fault: ProviderFault) -> Self {
        SigningError {
            kind: SigningFailureKind::from_fault(&fault),
            fault,
        }
    }
}

impl fmt::Display for SigningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.user_message())
    }
}

/// The classification attached to a failed [AuthSession][crate::session::AuthSession].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ProviderUnavailable,
    ChallengeFetchError,
    SigningError,
    ExportError,
    VerificationRejected,
    NetworkError,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CertAuthError {
    /// The signing provider is not installed or not reachable. Checked before
    /// any store is opened.
    #[error("the signing provider is not installed or not reachable")]
    ProviderUnavailable,
    #[error("could not obtain a challenge: {0}")]
    ChallengeFetch(String),
    #[error("{0}")]
    Signing(SigningError),
    #[error("could not export the certificate: {0}")]
    Export(String),
    /// The server refused the signature. The message is the server's own.
    #[error("{}", .0.as_deref().unwrap_or("the server rejected the signature"))]
    VerificationRejected(Option<String>),
    #[error("network error: {0}")]
    Network(String),
    #[error("certificate {0} is not among the discovered certificates")]
    UnknownCertificate(String),
    #[error("no certificate has been selected")]
    NoCertificateSelected,
    /// There is no live challenge; a new one has to be requested.
    #[error("no challenge is available, request a new one")]
    NoChallenge,
    #[error("operation not permitted in state {0}")]
    InvalidState(&'static str),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CertAuthError {
    /// The [FailureKind] this error moves a session to, if any.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            CertAuthError::ProviderUnavailable => Some(FailureKind::ProviderUnavailable),
            CertAuthError::ChallengeFetch(_) => Some(FailureKind::ChallengeFetchError),
            CertAuthError::Signing(_) => Some(FailureKind::SigningError),
            CertAuthError::Export(_) => Some(FailureKind::ExportError),
            CertAuthError::VerificationRejected(_) => Some(FailureKind::VerificationRejected),
            CertAuthError::Network(_) => Some(FailureKind::NetworkError),
            CertAuthError::UnknownCertificate(_)
            | CertAuthError::NoCertificateSelected
            | CertAuthError::NoChallenge
            | CertAuthError::InvalidState(_)
            | CertAuthError::Config(_) => None,
        }
    }
}

impl From<SigningError> for CertAuthError {
    fn from(e: SigningError) -> Self {
        Self::Signing(e)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_signing_failure_classification() {
        use SigningFailureKind::*;
        let checks = vec![
            (ProviderFault::new(0x80070057, "The parameter is incorrect."), NotSigningCapable),
            (ProviderFault::message("Параметр задан неверно. (0x80070057)"), NotSigningCapable),
            (ProviderFault::new(0x8009000D, "Key does not exist."), NoPrivateKey),
            (ProviderFault::message("Keyset does not exist"), NoPrivateKey),
            (ProviderFault::new(0x8010006E, "The action was cancelled by the user."), Cancelled),
            (ProviderFault::new(0x800704C7, "The operation was canceled by the user."), Cancelled),
            (ProviderFault::new(0x8010006B, "The card cannot be accessed because the wrong PIN was presented."), WrongPin),
            (ProviderFault::new(0x80100069, "The smart card has been removed."), TokenRemoved),
            (ProviderFault::new(0x800B0101, "A required certificate is not within its validity period."), CertificateExpired),
            // An unknown code still falls back to the message.
            (ProviderFault::new(0x80004005, "The parameter is incorrect."), NotSigningCapable),
            (ProviderFault::new(0x80004005, "Unspecified error"), Unknown),
            (ProviderFault::message(""), Unknown),
        ];

        for (fault, expected) in checks.iter() {
            assert_eq!(*expected, SigningFailureKind::from_fault(fault), "{fault}");
        }
    }

    #[test]
    fn test_signing_error_display_is_translated() {
        let e = SigningError::from(ProviderFault::new(0x80070057, "The parameter is incorrect."));
        assert_eq!(e.kind, SigningFailureKind::NotSigningCapable);
        assert_eq!(
            e.to_string(),
            "The selected certificate cannot be used for signing. Choose another certificate."
        );
        // The raw fault is kept for display alongside.
        assert_eq!(e.fault.to_string(), "The parameter is incorrect. (0x80070057)");
    }

    #[test]
    fn test_verification_rejected_is_verbatim() {
        let e = CertAuthError::VerificationRejected(Some("Challenge expired".to_string()));
        assert_eq!(e.to_string(), "Challenge expired");
        assert_eq!(e.failure_kind(), Some(FailureKind::VerificationRejected));

        let e = CertAuthError::VerificationRejected(None);
        assert_eq!(e.to_string(), "the server rejected the signature");
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            CertAuthError::ProviderUnavailable.failure_kind(),
            Some(FailureKind::ProviderUnavailable)
        );
        assert_eq!(
            CertAuthError::ChallengeFetch("x".to_string()).failure_kind(),
            Some(FailureKind::ChallengeFetchError)
        );
        assert_eq!(
            CertAuthError::Network("x".to_string()).failure_kind(),
            Some(FailureKind::NetworkError)
        );
        assert_eq!(
            CertAuthError::UnknownCertificate("AB".to_string()).failure_kind(),
            None
        );
    }
}
