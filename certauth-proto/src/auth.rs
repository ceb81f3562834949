//! Types for the challenge and verify endpoints.

use serde::{Deserialize, Serialize};

/// The default base URL of the authentication API.
pub const DEFAULT_API_URL: &str = "http://localhost:8080/api/auth";

/// Path segment of the challenge endpoint, relative to the API base URL.
pub const CHALLENGE_PATH: &str = "challenge";

/// Path segment of the verify endpoint, relative to the API base URL.
pub const VERIFY_PATH: &str = "verify";

/// Query parameter carrying the session id on a challenge request.
pub const SESSION_ID_PARAM: &str = "sessionId";

/// A single-use challenge issued by the server for one session id.
///
/// The challenge is opaque: clients sign its exact bytes and echo it back in
/// a [VerifyRequest].
#[derive(Debug, Serialize, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    /// The challenge to be signed.
    pub challenge: String,
}

/// A signed challenge, submitted for verification.
#[derive(Debug, Serialize, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// The session id the challenge was requested for.
    pub session_id: String,
    /// The challenge, exactly as it was issued.
    pub challenge: String,
    /// Base64 encoded signature over the challenge.
    pub signature: String,
    /// Base64 encoded export of the signing certificate.
    pub certificate: String,
}

/// The server's verdict on a [VerifyRequest].
///
/// Servers return this body both for accepted and rejected attempts.
#[derive(Debug, Serialize, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    /// `true` if the signature was accepted and the user authenticated.
    pub success: bool,
    /// An optional human readable explanation, displayed verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthResult {
    /// Construct an accepting result.
    pub fn accepted(message: Option<String>) -> Self {
        AuthResult {
            success: true,
            message,
        }
    }

    /// Construct a rejecting result.
    pub fn rejected(message: impl Into<String>) -> Self {
        AuthResult {
            success: false,
            message: Some(message.into()),
        }
    }
}
