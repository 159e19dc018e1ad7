#![allow(dead_code)]

pub mod acme;

use anyhow::{Context, Error, bail};
use async_trait::async_trait;
use edgecert::issuer::{CertificateAuthority, IssuedCertificate};
use edgecert::server;
use edgecert::solver::ChallengeSolver;
use edgecert::store::ChallengeStore;
use parking_lot::Mutex;
use rcgen::{CertificateParams, KeyPair};
use std::net::SocketAddr;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const CORRELATION_TAG: &str = "Edgecert-Certificate-ID";

/// A leaf for `domains` bundled with a self-signed issuer, like CAs hand them out.
pub fn issue_certificate(
    domains: &[String],
    not_after: OffsetDateTime,
) -> anyhow::Result<IssuedCertificate> {
    let issuer_key = KeyPair::generate()?;
    let issuer = CertificateParams::new(vec!["Test Intermediate".to_string()])?
        .self_signed(&issuer_key)?
        .pem();
    let key = KeyPair::generate()?;
    let mut params = CertificateParams::new(domains.to_vec())?;
    params.not_after = not_after;
    let leaf = params.self_signed(&key)?.pem();
    Ok(IssuedCertificate {
        certificate: format!("{leaf}{issuer}"),
        chain: None,
        private_key: key.serialize_pem(),
    })
}

/// Challenge responder running on an ephemeral local port.
pub struct Responder {
    pub address: SocketAddr,
    cancellation_token: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl Responder {
    pub async fn spawn(store: Arc<dyn ChallengeStore>) -> anyhow::Result<Self> {
        let listener = server::bind(([127, 0, 0, 1], 0).into()).await?;
        let address = listener.local_addr()?;
        let cancellation_token = CancellationToken::new();
        let handle = tokio::spawn(server::serve(listener, store, cancellation_token.clone()));
        Ok(Self {
            address,
            cancellation_token,
            handle,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.address)
    }

    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.cancellation_token.cancel();
        self.handle.await?
    }
}

/// Fetches the HTTP-01 proof for `token` the way a CA does: addressed to `host`.
pub async fn fetch_proof(
    responder: SocketAddr,
    host: &str,
    token: &str,
) -> anyhow::Result<(reqwest::StatusCode, String)> {
    let response = reqwest::Client::new()
        .get(format!(
            "http://{responder}/.well-known/acme-challenge/{token}"
        ))
        .header(reqwest::header::HOST, host)
        .send()
        .await?;
    let status = response.status();
    Ok((status, response.text().await?))
}

/// A CA that validates HTTP-01 proofs against a local [`Responder`] and then issues a
/// self-signed certificate.
pub struct LocalAuthority {
    responder: SocketAddr,
    not_after: OffsetDateTime,
    orders: Mutex<usize>,
}

impl LocalAuthority {
    pub fn new(responder: SocketAddr, not_after: OffsetDateTime) -> Self {
        Self {
            responder,
            not_after,
            orders: Mutex::new(0),
        }
    }

    pub fn orders(&self) -> usize {
        *self.orders.lock()
    }
}

#[async_trait]
impl CertificateAuthority for LocalAuthority {
    async fn obtain(
        &self,
        domains: &[String],
        solver: &dyn ChallengeSolver,
    ) -> Result<IssuedCertificate, Error> {
        let order = {
            let mut orders = self.orders.lock();
            *orders += 1;
            *orders
        };
        let mut presented = Vec::new();
        let mut validation = Ok(());
        for (i, domain) in domains.iter().enumerate() {
            let token = format!("token-{order}-{i}");
            let key_auth = format!("{token}.thumbprint");
            if let Err(e) = solver.present(domain, &token, &key_auth).await {
                validation = Err(e);
                break;
            }
            presented.push((domain.clone(), token.clone(), key_auth.clone()));
            let (status, body) = fetch_proof(self.responder, domain, &token).await?;
            if status != reqwest::StatusCode::OK || body != key_auth {
                validation = Err(anyhow::anyhow!(
                    "Validation of {domain} failed: {status} {body}"
                ));
                break;
            }
        }
        for (domain, token, key_auth) in &presented {
            solver.clean_up(domain, token, key_auth).await?;
        }
        validation.context("Authorization failed")?;
        if domains.is_empty() {
            bail!("Order without identifiers");
        }
        issue_certificate(domains, self.not_after)
    }
}
