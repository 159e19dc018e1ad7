use crate::crypto::sha256;
use crate::solver::{ChallengeKind, ChallengeSolver};
use crate::time::humanize_duration_core;
use crate::trust_store::{ImportRequest, TrustStore};
use anyhow::{Context, Error};
use async_trait::async_trait;
use rcgen::{CertificateParams, CustomExtension, KeyPair};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How long edge nodes are given to pick up a freshly imported certificate
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ProofCertificate {
    pub certificate_pem: String,
    pub private_key_pem: String,
}

/// Builds the self-signed TLS-ALPN-01 proof certificate for `domain`: a single SAN plus the
/// critical `acmeIdentifier` extension holding the SHA-256 digest of the key authorization.
pub fn proof_certificate(domain: &str, key_auth: &str) -> Result<ProofCertificate, Error> {
    let mut params = CertificateParams::new(vec![domain.to_string()])
        .with_context(|| format!("Invalid domain name {domain} for proof certificate"))?;
    params.custom_extensions = vec![CustomExtension::new_acme_identifier(&sha256(
        key_auth.as_bytes(),
    ))];
    let key_pair = KeyPair::generate().context("Generating proof certificate key failed")?;
    let certificate = params
        .self_signed(&key_pair)
        .context("Signing proof certificate failed")?;
    Ok(ProofCertificate {
        certificate_pem: certificate.pem(),
        private_key_pem: key_pair.serialize_pem(),
    })
}

/// TLS-ALPN-01 solver for domains served by edge infrastructure that takes its certificate
/// from the trust store. The proof certificate replaces a placeholder certificate that the
/// edge is already configured to serve.
pub struct TlsAlpnSolver {
    trust_store: Arc<dyn TrustStore>,
    placeholder: Option<String>,
    settle: Duration,
}

impl TlsAlpnSolver {
    pub fn new(trust_store: Arc<dyn TrustStore>, placeholder: Option<String>) -> Self {
        Self {
            trust_store,
            placeholder,
            settle: DEFAULT_SETTLE_INTERVAL,
        }
    }

    pub fn with_settle_interval(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

#[async_trait]
impl ChallengeSolver for TlsAlpnSolver {
    fn long_name(&self) -> &'static str {
        "trust store TLS-ALPN solver"
    }

    fn short_name(&self) -> &'static str {
        "tls-alpn"
    }

    fn challenge_kind(&self) -> ChallengeKind {
        ChallengeKind::TlsAlpn01
    }

    async fn present(&self, domain: &str, _token: &str, key_auth: &str) -> Result<(), Error> {
        let proof = proof_certificate(domain, key_auth)?;
        let identity = self
            .trust_store
            .import_certificate(ImportRequest {
                identity: self.placeholder.clone(),
                certificate: proof.certificate_pem,
                chain: None,
                private_key: proof.private_key_pem,
                tags: Vec::new(),
            })
            .await
            .with_context(|| format!("Importing TLS-ALPN proof certificate for {domain} failed"))?;
        info!("Imported TLS-ALPN proof certificate for {domain} as {identity}");
        if let Ok(settle) = humanize_duration_core(self.settle) {
            debug!("Waiting {settle} for the proof certificate to propagate");
        }
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    async fn clean_up(&self, _domain: &str, _token: &str, _key_auth: &str) -> Result<(), Error> {
        // The issued certificate is imported over the placeholder afterwards
        Ok(())
    }
}
