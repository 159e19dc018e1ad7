use crate::solver::{ChallengeKind, ChallengeSolver};
use crate::time::humanize_duration_core;
use anyhow::{Context, Error, anyhow, bail};
use async_trait::async_trait;
use http::Request;
use hyper::body::Bytes;
use instant_acme::{
    Account, AccountBuilder, AuthorizationStatus, BodyWrapper, BytesResponse, ChallengeType,
    HttpClient, Identifier, NewAccount, NewOrder, Order, OrderStatus, RetryPolicy,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

pub const LETS_ENCRYPT_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";

const INITIAL_POLL_DELAY: Duration = Duration::from_millis(250);
const MAX_POLL_DELAY: Duration = Duration::from_secs(5);

/// Material of a freshly issued certificate, all PEM encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// The leaf, possibly followed by the issuer chain
    pub certificate: String,
    pub chain: Option<String>,
    pub private_key: String,
}

/// Something that can issue certificates, proving control of the domains through `solver`.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn obtain(
        &self,
        domains: &[String],
        solver: &dyn ChallengeSolver,
    ) -> Result<IssuedCertificate, Error>;
}

/// A challenge that was successfully presented and must be cleaned up.
struct PresentedChallenge {
    domain: String,
    token: String,
    key_auth: String,
}

struct SharedHttpClient(Arc<dyn HttpClient>);

impl HttpClient for SharedHttpClient {
    fn request(
        &self,
        req: Request<BodyWrapper<Bytes>>,
    ) -> Pin<Box<dyn Future<Output = Result<BytesResponse, instant_acme::Error>> + Send>> {
        self.0.request(req)
    }
}

/// [`CertificateAuthority`] talking ACME through `instant-acme`.
pub struct AcmeIssuer {
    directory_url: Url,
    contact_email: Option<String>,
    poll_timeout: Duration,
    http_client: Option<Arc<dyn HttpClient>>,
    account: OnceCell<Account>,
}

impl AcmeIssuer {
    pub fn new(directory_url: Url, contact_email: Option<String>, poll_timeout: Duration) -> Self {
        Self {
            directory_url,
            contact_email,
            poll_timeout,
            http_client: None,
            account: OnceCell::new(),
        }
    }

    /// Talks to the CA through `http_client` instead of the built-in HTTPS client.
    pub fn with_http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    async fn account(&self) -> Result<&Account, Error> {
        self.account
            .get_or_try_init(|| async { self.create_account().await })
            .await
    }

    fn account_builder(&self) -> Result<AccountBuilder, Error> {
        match &self.http_client {
            Some(http_client) => Ok(Account::builder_with_http(Box::new(SharedHttpClient(
                http_client.clone(),
            )))),
            None => Account::builder().context("Setting up ACME HTTP client failed"),
        }
    }

    async fn create_account(&self) -> Result<Account, Error> {
        let contact = self
            .contact_email
            .as_ref()
            .map(|email| format!("mailto:{email}"));
        let contact_refs: Vec<&str> = contact.iter().map(String::as_str).collect();
        let new_account = NewAccount {
            contact: &contact_refs,
            terms_of_service_agreed: true,
            only_return_existing: false,
        };
        debug!("Registering ACME account at {}", self.directory_url);
        let (account, _credentials) = self
            .account_builder()?
            .create(&new_account, self.directory_url.to_string(), None)
            .await
            .with_context(|| format!("Creating ACME account at {} failed", self.directory_url))?;
        Ok(account)
    }

    /// Presents a challenge for every pending authorization, tells the CA to validate them and
    /// waits for the verdict. Successfully presented challenges are recorded in `presented`
    /// even when a later step fails.
    ///
    /// TLS-ALPN-01 proofs of all domains go through the same placeholder certificate, so each
    /// one has to be validated before the next one replaces it.
    async fn authorize(
        &self,
        order: &mut Order,
        solver: &dyn ChallengeSolver,
        presented: &mut Vec<PresentedChallenge>,
    ) -> Result<(), Error> {
        let one_at_a_time = solver.challenge_kind() == ChallengeKind::TlsAlpn01;
        while let Some(domain) = present_next(order, solver, presented).await? {
            if one_at_a_time {
                self.await_authorization(order, &domain).await?;
            }
        }

        let retry_policy = RetryPolicy::new().timeout(self.poll_timeout);
        let status = order
            .poll_ready(&retry_policy)
            .await
            .context("Waiting for the order to become ready failed")?;
        match status {
            OrderStatus::Ready | OrderStatus::Valid => {
                info!("Finished authorizing all identifiers");
                Ok(())
            }
            status => bail!("Order has unacceptable status {status:?} after validation"),
        }
    }

    /// Polls the order until the CA has decided on the authorization for `domain`.
    async fn await_authorization(&self, order: &mut Order, domain: &str) -> Result<(), Error> {
        let deadline = Instant::now() + self.poll_timeout;
        let mut delay = INITIAL_POLL_DELAY;
        loop {
            tokio::time::sleep(delay).await;
            order
                .refresh()
                .await
                .with_context(|| format!("Refreshing order while validating {domain} failed"))?;
            match authorization_status(order, domain).await? {
                AuthorizationStatus::Valid => {
                    info!("Authorization for {domain} is valid");
                    return Ok(());
                }
                AuthorizationStatus::Pending => {
                    debug!("Authorization for {domain} is still pending");
                }
                status => bail!("Authorization for {domain} failed with status {status:?}"),
            }
            delay = (delay * 2).min(MAX_POLL_DELAY);
            if Instant::now() + delay > deadline {
                let timeout = humanize_duration_core(self.poll_timeout)
                    .unwrap_or_else(|_| format!("{:?}", self.poll_timeout));
                bail!("CA did not validate {domain} within {timeout}");
            }
        }
    }
}

/// Presents the challenge of the first pending authorization that has not been presented yet
/// and asks the CA to validate it. Returns the domain, or `None` when nothing is left.
async fn present_next(
    order: &mut Order,
    solver: &dyn ChallengeSolver,
    presented: &mut Vec<PresentedChallenge>,
) -> Result<Option<String>, Error> {
    let challenge_type = match solver.challenge_kind() {
        ChallengeKind::Http01 => ChallengeType::Http01,
        ChallengeKind::TlsAlpn01 => ChallengeType::TlsAlpn01,
    };
    let mut authorizations = order.authorizations();
    while let Some(authorization) = authorizations.next().await {
        let mut authorization = authorization.context("Retrieving authorization failed")?;
        let domain = match authorization.identifier().identifier {
            Identifier::Dns(domain) => domain.clone(),
            other => bail!("Order contains unsupported identifier {other:?}"),
        };
        if presented.iter().any(|challenge| challenge.domain == domain) {
            continue;
        }
        match authorization.status {
            AuthorizationStatus::Valid => {
                debug!("Authorization for {domain} already valid");
                continue;
            }
            AuthorizationStatus::Pending => {
                info!("Found pending authorization for {domain}, trying to authorize");
            }
            status => bail!("Authorization for {domain} has unacceptable status {status:?}"),
        }
        let mut challenge = authorization.challenge(challenge_type.clone()).ok_or(anyhow!(
            "Authorization for {domain} did not offer a {} challenge",
            solver.challenge_kind()
        ))?;
        let key_auth = challenge.key_authorization().as_str().to_string();
        let token = challenge.token.clone();
        solver
            .present(&domain, &token, &key_auth)
            .await
            .with_context(|| {
                format!(
                    "Presenting challenge for {domain} with {} failed",
                    solver.long_name()
                )
            })?;
        presented.push(PresentedChallenge {
            domain: domain.clone(),
            token,
            key_auth,
        });
        debug!(
            "{} presented challenge for {domain}, asking the CA to validate",
            solver.short_name()
        );
        challenge
            .set_ready()
            .await
            .with_context(|| format!("Requesting validation for {domain} failed"))?;
        return Ok(Some(domain));
    }
    Ok(None)
}

async fn authorization_status(order: &mut Order, domain: &str) -> Result<AuthorizationStatus, Error> {
    let mut authorizations = order.authorizations();
    while let Some(authorization) = authorizations.next().await {
        let authorization = authorization.context("Retrieving authorization failed")?;
        if matches!(authorization.identifier().identifier, Identifier::Dns(name) if name == domain) {
            return Ok(authorization.status);
        }
    }
    bail!("Order has no authorization for {domain}")
}

#[async_trait]
impl CertificateAuthority for AcmeIssuer {
    async fn obtain(
        &self,
        domains: &[String],
        solver: &dyn ChallengeSolver,
    ) -> Result<IssuedCertificate, Error> {
        let names = domains.join(", ");
        info!(
            "Issuing certificate for {names} at {} using {}",
            self.directory_url,
            solver.long_name()
        );
        let account = self.account().await?;
        let identifiers = domains
            .iter()
            .map(|domain| Identifier::Dns(domain.clone()))
            .collect::<Vec<_>>();
        let mut order = account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .context("Error creating new order")?;

        let mut presented = Vec::new();
        let authorized = self.authorize(&mut order, solver, &mut presented).await;
        for challenge in &presented {
            if let Err(e) = solver
                .clean_up(&challenge.domain, &challenge.token, &challenge.key_auth)
                .await
            {
                warn!(
                    "Challenge solver {} for {} encountered an error during cleanup: {e:#}",
                    solver.long_name(),
                    challenge.domain
                );
            }
        }
        authorized.context("Error authorizing certificate issuance")?;

        let private_key = order.finalize().await.context("Error finalizing order")?;
        let retry_policy = RetryPolicy::new().timeout(self.poll_timeout);
        let certificate = order
            .poll_certificate(&retry_policy)
            .await
            .context("Downloading certificate failed")?;
        info!("Successfully issued a certificate for {names}");
        Ok(IssuedCertificate {
            certificate,
            chain: None,
            private_key,
        })
    }
}
