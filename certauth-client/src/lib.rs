//! certauth-client is a library for authenticating to a web service with a
//! locally installed certificate.
//!
//! The client requests a single-use challenge from the server, discovers the
//! certificates a local signing provider can use, signs the challenge with
//! the certificate the user picked, and submits the signature together with
//! the certificate for verification.
//!
//! The signing provider itself (a CryptoAPI-style provider, a browser
//! plug-in, a token middleware) is an external dependency. This library only
//! talks to it through the [ProviderGateway][provider::ProviderGateway]
//! abstraction, which has implementations for the two API dialects such
//! providers commonly expose.
//!
//! The flow is driven by an [AuthSession][session::AuthSession]:
//!
//! ```no_run
//! # async fn run() -> certauth_client::error::Result<()> {
//! use certauth_client::prelude::*;
//! # #[derive(Debug)]
//! # struct NoProvider;
//! # #[async_trait::async_trait]
//! # impl ProviderGateway for NoProvider {
//! #     async fn is_available(&self) -> bool { false }
//! #     fn list_stores(&self) -> Vec<StoreRef> { vec![] }
//! #     async fn open_and_enumerate(&self, _: &StoreRef) -> Result<Vec<Certificate>, ProviderError> { Err(ProviderError::NotAvailable) }
//! #     async fn sign(&self, _: &CertHandle, _: &[u8]) -> Result<Signature, ProviderError> { Err(ProviderError::NotAvailable) }
//! #     async fn export_certificate(&self, _: &CertHandle) -> Result<EncodedCertificate, ProviderError> { Err(ProviderError::NotAvailable) }
//! # }
//! # let gateway = NoProvider;
//! let config = ClientConfig::default();
//! let server = HttpServerClient::from_config(&config)?;
//! let ui = NoUi;
//! let mut session = AuthSession::new(gateway, server, &ui);
//!
//! session.check_availability().await?;
//! session.request_challenge().await?;
//! let outcome = session.discover_certificates().await?;
//! if let Some(cert) = outcome.certificates.first() {
//!     session.select_certificate(&cert.identity)?;
//!     session.sign_and_verify().await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! * `softstore`: [SoftStore][crate::softstore::SoftStore], a file-backed
//!   software key container (for demos and testing). Requires OpenSSL.
//! * `ui-cli`: [Cli][crate::ui::Cli] UI

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

#[macro_use]
extern crate tracing;

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;

pub mod prelude {
    pub use crate::config::ClientConfig;
    pub use crate::discovery::{CertificateDiscovery, DiscoveryOutcome, DiscoveryStatus};
    pub use crate::error::{
        CertAuthError, FailureKind, ProviderError, ProviderFault, SigningFailureKind,
    };
    pub use crate::provider::{AnyGateway, ProviderGateway};
    pub use crate::server::{HttpServerClient, ServerClient};
    pub use crate::session::{AuthSession, AuthState};
    pub use crate::types::{
        CertHandle, Certificate, EncodedCertificate, Signature, StoreRef,
    };
    pub use crate::ui::{NoUi, UiCallback};
    pub use certauth_proto::AuthResult;
}

pub mod config;
pub mod discovery;
pub mod error;
pub mod provider;
pub mod server;
pub mod session;
#[cfg(feature = "softstore")]
pub mod softstore;
pub mod types;
pub mod ui;
mod util;

#[cfg(test)]
mod testutil;
