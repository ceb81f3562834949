use std::io::{stdin, stdout, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{debug, error, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

use certauth_client::config::ClientConfig;
use certauth_client::discovery::{CertificateDiscovery, DiscoveryOutcome, DiscoveryStatus};
use certauth_client::error::{CertAuthError, FailureKind};
use certauth_client::provider::{AnyGateway, ModernGateway, ProviderGateway};
use certauth_client::server::HttpServerClient;
use certauth_client::session::AuthSession;
use certauth_client::softstore::SoftStore;
use certauth_client::types::Certificate;
use certauth_client::ui::Cli;

#[derive(Debug, Args)]
pub struct ListOpt {
    /// Print the certificates as JSON rather than a table.
    #[clap(long, action = ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct LoginOpt {
    /// Thumbprint of the certificate to sign with. If omitted, you will be
    /// asked to pick one.
    #[clap(short, long)]
    pub thumbprint: Option<String>,
}

#[derive(Debug, Subcommand)]
#[clap(about = "certificate login tool")]
pub enum Opt {
    /// Checks whether a signing provider is available.
    Check,
    /// Lists the certificates found in every store.
    List(ListOpt),
    /// Requests a challenge, signs it and submits it for verification.
    Login(LoginOpt),
}

#[derive(Debug, clap::Parser)]
#[clap(about = "Certificate challenge-response login tool")]
pub struct CliParser {
    /// Path to the configuration file.
    #[clap(short, long, default_value = "certauth.toml")]
    pub config: PathBuf,

    /// Base URL of the authentication API. Overrides the configuration file
    /// and `CERTAUTH_API_URL`.
    #[clap(long)]
    pub api_url: Option<String>,

    /// Directory of a software key container to use as the signing provider.
    /// Overrides the configuration file and `CERTAUTH_SOFTSTORE`.
    #[clap(long)]
    pub softstore: Option<PathBuf>,

    #[clap(subcommand)]
    pub commands: Opt,
}

fn load_config(opt: &CliParser) -> Result<ClientConfig, CertAuthError> {
    let mut config = ClientConfig::load(&opt.config)?;
    config.apply_env()?;
    if let Some(api_url) = &opt.api_url {
        config.api_url = api_url.clone();
    }
    if let Some(root) = &opt.softstore {
        config.softstore_root = Some(root.clone());
    }
    config.validate()?;
    Ok(config)
}

async fn detect_gateway(config: &ClientConfig) -> AnyGateway {
    let mut candidates: Vec<Arc<dyn ProviderGateway>> = Vec::new();
    if let Some(root) = &config.softstore_root {
        debug!("using software key container at {}", root.display());
        candidates.push(Arc::new(ModernGateway::with_stores(
            SoftStore::new(root.clone()),
            config.stores.clone(),
        )));
    }
    AnyGateway::detect(candidates).await
}

fn print_table(certs: &[Certificate]) {
    let now = Utc::now();
    for (i, cert) in certs.iter().enumerate() {
        println!("[{i}] {}", cert.subject);
        println!("    thumbprint: {}", cert.identity);
        println!("    issuer:     {}", cert.issuer);
        println!(
            "    valid:      {} to {} ({:?})",
            cert.valid_from.format("%Y-%m-%d"),
            cert.valid_to.format("%Y-%m-%d"),
            cert.expiry_status(now),
        );
        println!("    store:      {}", cert.source_backend);
    }
}

fn report_partial(outcome: &DiscoveryOutcome) {
    if let DiscoveryStatus::Partial { failed_stores } = outcome.status() {
        warn!("some stores could not be searched: {}", failed_stores.join(", "));
    }
}

/// Asks the user to pick one of `certs` on stdin.
///
/// Returns `None` if the user entered nothing or stdin was closed.
fn pick_certificate(certs: &[Certificate]) -> Option<String> {
    if certs.is_empty() {
        return None;
    }
    print_table(certs);
    loop {
        print!("Select a certificate [0-{}]: ", certs.len() - 1);
        stdout().flush().ok();

        let mut buf = String::new();
        match stdin().read_line(&mut buf) {
            Ok(0) | Err(_) => return None,
            Ok(_) => (),
        }
        let buf = buf.trim();
        if buf.is_empty() {
            return None;
        }

        match buf.parse::<usize>().ok().and_then(|i| certs.get(i)) {
            Some(cert) => return Some(cert.identity.clone()),
            None => println!("Unexpected response {buf:?}, try again."),
        }
    }
}

async fn check(gateway: &AnyGateway) -> bool {
    if gateway.is_available().await {
        println!("Signing provider: {:?}", gateway.active());
        true
    } else {
        println!("No signing provider available!");
        false
    }
}

async fn list(gateway: &AnyGateway, opt: &ListOpt) -> Result<(), CertAuthError> {
    let outcome = CertificateDiscovery::new(gateway).discover().await?;
    report_partial(&outcome);

    if opt.json {
        match serde_json::to_string_pretty(&outcome.certificates) {
            Ok(j) => println!("{j}"),
            Err(e) => error!("could not serialise certificates: {e}"),
        }
    } else if outcome.is_empty() {
        println!("No certificates found.");
    } else {
        print_table(&outcome.certificates);
    }
    Ok(())
}

async fn login(
    gateway: AnyGateway,
    config: &ClientConfig,
    opt: &LoginOpt,
) -> Result<bool, CertAuthError> {
    let server = HttpServerClient::from_config(config)?;
    let ui = Cli {};
    let mut session = AuthSession::new(gateway, server, &ui);

    session.check_availability().await?;
    session.request_challenge().await?;
    let outcome = session.discover_certificates().await?;
    report_partial(&outcome);
    if outcome.is_empty() {
        return Ok(false);
    }

    let mut identity = match &opt.thumbprint {
        Some(t) => t.clone(),
        None => match pick_certificate(&outcome.certificates) {
            Some(i) => i,
            None => return Ok(false),
        },
    };

    loop {
        session.select_certificate(&identity)?;
        match session.sign_and_verify().await {
            Ok(r) => {
                if let Some(message) = r.message {
                    println!("{message}");
                }
                return Ok(true);
            }
            // The challenge survives signing failures, so an interactive user
            // can try a different certificate.
            Err(e)
                if opt.thumbprint.is_none()
                    && matches!(
                        e.failure_kind(),
                        Some(FailureKind::SigningError | FailureKind::ExportError)
                    ) =>
            {
                match pick_certificate(session.certificates()) {
                    Some(i) => identity = i,
                    None => return Ok(false),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let opt = CliParser::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .compact()
        .init();

    let config = match load_config(&opt) {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let gateway = detect_gateway(&config).await;

    let r = match &opt.commands {
        Opt::Check => Ok(check(&gateway).await),
        Opt::List(o) => list(&gateway, o).await.map(|_| true),
        Opt::Login(o) => login(gateway, &config, o).await,
    };

    match r {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
