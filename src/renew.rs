use crate::error::{IssueContext, IssueResult};
use crate::import::CertificateImporter;
use crate::issuer::CertificateAuthority;
use crate::registry::CertificateRegistry;
use crate::request::IssuanceRequest;
use crate::solver::ChallengeSolver;
use crate::time::{humanize_duration, humanize_duration_core};
use anyhow::anyhow;
use std::sync::Arc;
use time::Duration;
use tracing::{debug, info};

/// Whether a certificate has to be issued now.
///
/// Requests without a correlation ID can not be matched to an existing certificate and always
/// issue. Otherwise issuance happens once the remaining validity drops to the renewal window.
pub fn should_issue(correlation_id: &str, remaining_validity: Duration, window: Duration) -> bool {
    correlation_id.is_empty() || remaining_validity <= window
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalDecision {
    pub existing_identity: Option<String>,
    pub remaining_validity: Duration,
    pub should_issue: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewOutcome {
    /// The current certificate still has enough runway
    Skipped(RenewalDecision),
    Issued {
        identity: String,
        decision: RenewalDecision,
    },
}

/// Decides whether a request needs a new certificate, without issuing anything.
pub struct RenewalPolicy {
    registry: CertificateRegistry,
    renewal_window: Duration,
}

impl RenewalPolicy {
    pub fn new(registry: CertificateRegistry, renewal_window: Duration) -> Self {
        Self {
            registry,
            renewal_window,
        }
    }

    pub fn renewal_window(&self) -> Duration {
        self.renewal_window
    }

    pub async fn evaluate(&self, request: &IssuanceRequest) -> IssueResult<RenewalDecision> {
        request.validate().validation_failure()?;
        let domain = request.primary_domain().validation_failure()?;
        let status = self.registry.lookup(domain, &request.id).await?;
        let should_issue = should_issue(&request.id, status.remaining_validity, self.renewal_window);
        debug!(
            "Renewal decision for {domain}: existing {:?}, renewal window {}, issue: {should_issue}",
            status.identity,
            humanize_duration(self.renewal_window)
        );
        Ok(RenewalDecision {
            existing_identity: status.identity,
            remaining_validity: status.remaining_validity,
            should_issue,
        })
    }
}

/// Drives one issuance attempt: look up, decide, issue, import.
pub struct RenewService {
    policy: RenewalPolicy,
    importer: CertificateImporter,
    authority: Arc<dyn CertificateAuthority>,
    issue_timeout: std::time::Duration,
}

impl RenewService {
    pub fn new(
        policy: RenewalPolicy,
        importer: CertificateImporter,
        authority: Arc<dyn CertificateAuthority>,
        issue_timeout: std::time::Duration,
    ) -> Self {
        Self {
            policy,
            importer,
            authority,
            issue_timeout,
        }
    }

    /// Issues a certificate for `request` unless the existing one is still good, proving
    /// domain control with `solver`.
    pub async fn run(
        &self,
        request: &IssuanceRequest,
        solver: &dyn ChallengeSolver,
    ) -> IssueResult<RenewOutcome> {
        let decision = self.policy.evaluate(request).await?;
        let names = request.domains.join(", ");
        if !decision.should_issue {
            info!(
                "Certificate for {names} is valid for another {}, not renewing",
                humanize_duration(decision.remaining_validity)
            );
            return Ok(RenewOutcome::Skipped(decision));
        }

        let attempt = async {
            let issued = self.authority.obtain(&request.domains, solver).await?;
            self.importer
                .import(&issued, &request.id, decision.existing_identity.as_deref())
                .await
        };
        let identity = match tokio::time::timeout(self.issue_timeout, attempt).await {
            Ok(result) => result?,
            Err(_elapsed) => {
                let timeout = humanize_duration_core(self.issue_timeout)
                    .unwrap_or_else(|_| format!("{:?}", self.issue_timeout));
                return anyhow!("Issuing certificate for {names} did not finish within {timeout}")
                    .upstream_failure();
            }
        };
        info!("Certificate for {names} is available as {identity}");
        Ok(RenewOutcome::Issued { identity, decision })
    }
}
