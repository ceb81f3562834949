use std::fmt::Debug;
#[cfg(feature = "ui-cli")]
use std::io::{stderr, Write};

use crate::session::AuthState;

/// Presentation layer hooks for an [AuthSession][crate::session::AuthSession].
pub trait UiCallback: Sync + Send + Debug {
    /// Called after every state transition.
    fn state_changed(&self, state: &AuthState);

    /// Called when discovery found no certificates. The user should insert
    /// their token, or check the provider's configuration, then retry.
    fn request_token_insertion(&self);
}

/// [UiCallback] which ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoUi;

impl UiCallback for NoUi {
    fn state_changed(&self, _state: &AuthState) {}

    fn request_token_insertion(&self) {}
}

/// Basic CLI [UiCallback] implementation.
///
/// This sends messages to `stderr`.
///
/// This is only intended for testing, and doesn't implement much functionality (like localization).
#[cfg(feature = "ui-cli")]
#[derive(Debug)]
pub struct Cli {}

#[cfg(feature = "ui-cli")]
impl UiCallback for Cli {
    fn state_changed(&self, state: &AuthState) {
        let mut stderr = stderr();
        match state {
            AuthState::Failed(failure) => {
                writeln!(stderr, "Failed: {}", failure.message).ok();
                if let Some(fault) = &failure.fault {
                    writeln!(stderr, "  provider said: {fault}").ok();
                }
            }
            AuthState::Succeeded { message } => {
                writeln!(stderr, "Authenticated. {}", message.as_deref().unwrap_or("")).ok();
            }
            s => {
                writeln!(stderr, "{s}...").ok();
            }
        }
    }

    fn request_token_insertion(&self) {
        let mut stderr = stderr();
        writeln!(
            stderr,
            "No certificates found. Insert your token or smart card and try again."
        )
        .ok();
    }
}
