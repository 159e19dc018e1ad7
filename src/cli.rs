use crate::request::{ChallengeTransport, IssuanceRequest};
use crate::time::ParsedDuration;
use anyhow::Context;
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Describes which certificate to work on, either inline or as a JSON request document.
#[derive(Debug, Clone, Args, Default)]
pub struct RequestArguments {
    /// Correlation ID linking renewals to the same certificate. Without one, a new certificate
    /// is issued every time.
    #[clap(long, default_value = "")]
    pub id: String,
    /// Domain names to include in the certificate. The first one is the primary domain.
    #[clap(short, long, value_delimiter = ',', num_args = 1..)]
    pub domains: Vec<String>,
    /// Placeholder certificate the TLS-ALPN proof certificate is imported over
    #[clap(long)]
    pub challenge_certificate: Option<String>,
    /// Read the request as JSON (`{"id", "domains", "challengeCertificateArn"}`) from this
    /// file instead, or from standard input when `-` is given
    #[clap(long, conflicts_with_all = ["id", "domains", "challenge_certificate"])]
    pub request: Option<PathBuf>,
}

impl RequestArguments {
    pub fn into_request(self) -> anyhow::Result<IssuanceRequest> {
        let Some(path) = self.request else {
            return Ok(IssuanceRequest {
                id: self.id,
                domains: self.domains,
                challenge_certificate_identity: self.challenge_certificate,
            });
        };
        let document = if path.as_os_str() == "-" {
            std::io::read_to_string(std::io::stdin()).context("Reading request from stdin")?
        } else {
            std::fs::read_to_string(&path)
                .with_context(|| format!("Reading request file {}", path.display()))?
        };
        serde_json::from_str(&document).context("Parsing issuance request")
    }
}

#[derive(Debug, Args)]
pub struct IssueCommand {
    #[clap(flatten)]
    pub request: RequestArguments,
    /// How to prove control of the domains to the CA
    #[clap(short, long, value_enum, default_value_t = ChallengeTransport::Http)]
    pub transport: ChallengeTransport,
    /// DynamoDB table holding HTTP-01 challenges
    #[clap(long, env = "EDGECERT_TABLE")]
    pub table: Option<String>,
    /// Renew once the current certificate has at most this much validity left (e.g. `7d`)
    #[clap(long)]
    pub renewal_window: Option<ParsedDuration>,
}

#[derive(Debug, Args)]
pub struct StatusCommand {
    #[clap(flatten)]
    pub request: RequestArguments,
    #[clap(long)]
    pub renewal_window: Option<ParsedDuration>,
}

#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Address to listen on
    #[clap(short, long, env = "EDGECERT_LISTEN")]
    pub listen: Option<SocketAddr>,
    /// DynamoDB table holding HTTP-01 challenges
    #[clap(long, env = "EDGECERT_TABLE")]
    pub table: Option<String>,
}
