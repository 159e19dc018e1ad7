use crate::time::{Clock, humanize_duration};
use crate::trust_store::TrustStore;
use anyhow::Error;
use std::sync::Arc;
use time::Duration;
use tracing::{debug, info};

/// What the trust store knows about the certificate a caller correlates with an ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateStatus {
    /// Identity of the previously issued certificate, if any
    pub identity: Option<String>,
    /// Zero when there is no certificate, negative when it already expired
    pub remaining_validity: Duration,
}

impl CertificateStatus {
    pub fn absent() -> Self {
        Self {
            identity: None,
            remaining_validity: Duration::ZERO,
        }
    }
}

/// Finds previously issued certificates by domain and correlation tag.
pub struct CertificateRegistry {
    trust_store: Arc<dyn TrustStore>,
    correlation_tag: String,
    clock: Arc<dyn Clock>,
}

impl CertificateRegistry {
    pub fn new(
        trust_store: Arc<dyn TrustStore>,
        correlation_tag: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            trust_store,
            correlation_tag: correlation_tag.into(),
            clock,
        }
    }

    /// Looks up the certificate for `domain` tagged with `correlation_id`.
    ///
    /// Not finding one is a regular outcome. An empty correlation ID never matches anything,
    /// so requests without one always get a fresh certificate.
    pub async fn lookup(
        &self,
        domain: &str,
        correlation_id: &str,
    ) -> Result<CertificateStatus, Error> {
        if correlation_id.is_empty() {
            debug!("No correlation ID given, skipping certificate lookup for {domain}");
            return Ok(CertificateStatus::absent());
        }

        let mut next_token = None;
        let mut page_number = 0usize;
        loop {
            let page = self.trust_store.list_certificates(next_token).await?;
            page_number += 1;
            debug!(
                "Certificate listing page {page_number} has {} entries",
                page.certificates.len()
            );
            for summary in page.certificates {
                if summary.domain != domain {
                    continue;
                }
                let tags = self.trust_store.list_tags(&summary.identity).await?;
                let correlated = tags
                    .iter()
                    .any(|tag| tag.key == self.correlation_tag && tag.value == correlation_id);
                if !correlated {
                    continue;
                }
                let not_after = self.trust_store.not_after(&summary.identity).await?;
                let remaining_validity = not_after - self.clock.now();
                info!(
                    "Found certificate {} for {domain} ({correlation_id}), {} {}",
                    summary.identity,
                    humanize_duration(remaining_validity),
                    if remaining_validity.is_negative() {
                        "past expiry"
                    } else {
                        "remaining"
                    }
                );
                return Ok(CertificateStatus {
                    identity: Some(summary.identity),
                    remaining_validity,
                });
            }
            next_token = page.next_token;
            if next_token.is_none() {
                break;
            }
        }

        info!("No certificate for {domain} is tagged {}={correlation_id}", self.correlation_tag);
        Ok(CertificateStatus::absent())
    }
}
