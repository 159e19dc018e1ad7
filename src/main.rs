use anyhow::Context;
use aws_config::{BehaviorVersion, SdkConfig};
use clap::{Parser, Subcommand};
use edgecert::cli::{IssueCommand, ServeCommand, StatusCommand};
use edgecert::config::{self, Configuration};
use edgecert::import::CertificateImporter;
use edgecert::issuer::AcmeIssuer;
use edgecert::registry::CertificateRegistry;
use edgecert::renew::{RenewOutcome, RenewService, RenewalPolicy};
use edgecert::request::ChallengeTransport;
use edgecert::solver::object_storage::{ObjectStorageSolver, S3ObjectStorage};
use edgecert::solver::tls_alpn::TlsAlpnSolver;
use edgecert::solver::{ChallengeSolver, StoreSolver};
use edgecert::store::ChallengeStore;
use edgecert::store::dynamodb::DynamoDbStore;
use edgecert::time::{ParsedDuration, SystemClock, humanize_duration};
use edgecert::trust_store::TrustStore;
use edgecert::trust_store::acm::AcmTrustStore;
use edgecert::{CRATE_NAME, server};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const ENV_FILTER_NAME: &str = "EDGECERT_LOG";

#[derive(Debug, Parser)]
#[command(version, about, long_about = "")]
struct CommandLineArguments {
    /// Path to the configuration file
    #[arg(short, long, env = "EDGECERT_CONFIG", default_value_os_t = config::get_default_config_file())]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
    /// Shorthand option to enable debug logging (logging can be fine-tuned via `EDGECERT_LOG` environment variable)
    #[clap(long, short, action)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Issue or renew a certificate and import it into ACM
    Issue(IssueCommand),
    /// Show whether a certificate would be renewed, without issuing anything
    Status(StatusCommand),
    /// Serve HTTP-01 challenges from the challenge table
    Serve(ServeCommand),
}

fn renewal_window(
    config: &Configuration,
    cli_override: Option<ParsedDuration>,
) -> anyhow::Result<time::Duration> {
    cli_override
        .unwrap_or(config.renewal_window)
        .as_time()
        .context("Renewal window is too large")
}

fn renewal_policy(
    config: &Configuration,
    trust_store: Arc<dyn TrustStore>,
    cli_override: Option<ParsedDuration>,
) -> anyhow::Result<RenewalPolicy> {
    let registry = CertificateRegistry::new(
        trust_store,
        config.correlation_tag.clone(),
        Arc::new(SystemClock),
    );
    Ok(RenewalPolicy::new(
        registry,
        renewal_window(config, cli_override)?,
    ))
}

async fn issue(cmd: IssueCommand, config: Configuration, sdk_config: &SdkConfig) -> anyhow::Result<()> {
    let request = cmd.request.into_request()?;
    let trust_store: Arc<dyn TrustStore> =
        Arc::new(AcmTrustStore::new(aws_sdk_acm::Client::new(sdk_config)));
    let authority = Arc::new(AcmeIssuer::new(
        config.directory()?,
        config.contact_email.clone(),
        *config.issue_timeout,
    ));
    let service = RenewService::new(
        renewal_policy(&config, trust_store.clone(), cmd.renewal_window)?,
        CertificateImporter::new(trust_store.clone(), config.correlation_tag.clone()),
        authority,
        *config.issue_timeout,
    );
    let solver: Box<dyn ChallengeSolver> = match cmd.transport {
        ChallengeTransport::Http => {
            let table = cmd.table.unwrap_or_else(|| config.table_name.clone());
            Box::new(StoreSolver::new(DynamoDbStore::new(
                aws_sdk_dynamodb::Client::new(sdk_config),
                table,
            )))
        }
        ChallengeTransport::ObjectStorage => Box::new(
            ObjectStorageSolver::new(S3ObjectStorage::new(aws_sdk_s3::Client::new(sdk_config)))
                .with_delay(*config.object_storage_delay),
        ),
        ChallengeTransport::TlsAlpn => {
            if request.challenge_certificate_identity.is_none() {
                warn!("No placeholder certificate given, the TLS-ALPN proof is imported as a new certificate");
            }
            Box::new(
                TlsAlpnSolver::new(trust_store, request.challenge_certificate_identity.clone())
                    .with_settle_interval(*config.tls_alpn_settle),
            )
        }
    };
    info!("Using the {} to prove domain control", solver.long_name());

    match service.run(&request, solver.as_ref()).await? {
        RenewOutcome::Skipped(decision) => {
            println!(
                "Certificate {} is valid for another {}, nothing to do",
                decision.existing_identity.unwrap_or_default(),
                humanize_duration(decision.remaining_validity)
            );
        }
        RenewOutcome::Issued { identity, .. } => println!("{identity}"),
    }
    Ok(())
}

async fn status(cmd: StatusCommand, config: Configuration, sdk_config: &SdkConfig) -> anyhow::Result<()> {
    let request = cmd.request.into_request()?;
    let trust_store: Arc<dyn TrustStore> =
        Arc::new(AcmTrustStore::new(aws_sdk_acm::Client::new(sdk_config)));
    let policy = renewal_policy(&config, trust_store, cmd.renewal_window)?;
    let decision = policy.evaluate(&request).await?;
    match &decision.existing_identity {
        Some(identity) => println!(
            "Certificate: {identity}\nRemaining validity: {}",
            humanize_duration(decision.remaining_validity)
        ),
        None => println!("Certificate: none"),
    }
    println!(
        "Renewal window: {}\nWould issue: {}",
        humanize_duration(policy.renewal_window()),
        if decision.should_issue { "yes" } else { "no" }
    );
    Ok(())
}

async fn serve(cmd: ServeCommand, config: Configuration, sdk_config: &SdkConfig) -> anyhow::Result<()> {
    let table = cmd.table.unwrap_or(config.table_name);
    let store: Arc<dyn ChallengeStore> = Arc::new(DynamoDbStore::new(
        aws_sdk_dynamodb::Client::new(sdk_config),
        table,
    ));
    let listener = server::bind(cmd.listen.unwrap_or(config.listen_address)).await?;
    let cancellation_token = CancellationToken::new();
    tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => cancellation_token.cancel(),
                Err(e) => warn!("Unable to listen for shutdown signal: {e}"),
            }
        }
    });
    server::serve(listener, store, cancellation_token).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CommandLineArguments::parse();
    let filter = EnvFilter::try_from_env(ENV_FILTER_NAME).unwrap_or_else(|_| {
        EnvFilter::try_from_env("RUST_LOG")
            .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "edgecert=debug,info" } else { "info" }))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let config = config::load(&cli.config).context("Loading configuration failed")?;
    let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    info!("{CRATE_NAME} {}", env!("CARGO_PKG_VERSION"));
    match cli.command {
        Command::Issue(cmd) => issue(cmd, config, &sdk_config).await,
        Command::Status(cmd) => status(cmd, config, &sdk_config).await,
        Command::Serve(cmd) => serve(cmd, config, &sdk_config).await,
    }
}
