use crate::store::{Challenge, ChallengeStore};
use anyhow::{Context, Error};
use async_trait::async_trait;
use std::fmt::{Display, Formatter};
use tracing::{debug, info};

pub mod object_storage;
pub mod tls_alpn;

/// Directory under which HTTP-01 proofs are expected, relative to the domain's web root.
pub const WELL_KNOWN_PREFIX: &str = ".well-known/acme-challenge/";

/// Object key (or URL path without the leading slash) of the HTTP-01 proof for `token`.
pub fn challenge_path(token: &str) -> String {
    format!("{WELL_KNOWN_PREFIX}{token}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeKind {
    Http01,
    TlsAlpn01,
}

impl Display for ChallengeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChallengeKind::Http01 => write!(f, "http-01"),
            ChallengeKind::TlsAlpn01 => write!(f, "tls-alpn-01"),
        }
    }
}

/// Two-phase challenge-provider contract driven by the ACME client.
///
/// `present` must make the proof observable to the CA before returning. Its errors abort the
/// attempt. `clean_up` is called once per presented challenge after the attempt concludes,
/// whatever the outcome; callers log its errors instead of propagating them.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    fn long_name(&self) -> &'static str;
    fn short_name(&self) -> &'static str;
    fn challenge_kind(&self) -> ChallengeKind;
    async fn present(&self, domain: &str, token: &str, key_auth: &str) -> Result<(), Error>;
    async fn clean_up(&self, domain: &str, token: &str, key_auth: &str) -> Result<(), Error>;
}

/// HTTP-01 solver that hands the challenge to a [`ChallengeStore`], from where a separately
/// running responder serves it.
#[derive(Debug)]
pub struct StoreSolver<S> {
    store: S,
}

impl<S: ChallengeStore> StoreSolver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: ChallengeStore> ChallengeSolver for StoreSolver<S> {
    fn long_name(&self) -> &'static str {
        "challenge store solver"
    }

    fn short_name(&self) -> &'static str {
        "store"
    }

    fn challenge_kind(&self) -> ChallengeKind {
        ChallengeKind::Http01
    }

    async fn present(&self, domain: &str, token: &str, key_auth: &str) -> Result<(), Error> {
        info!("Presenting HTTP-01 challenge for {domain} with token {token}");
        self.store
            .put(&Challenge::new(domain, token, key_auth))
            .await
            .with_context(|| format!("Storing challenge {token} for {domain} failed"))
    }

    async fn clean_up(&self, domain: &str, token: &str, _key_auth: &str) -> Result<(), Error> {
        match self.store.delete(token).await {
            Ok(()) => {
                info!("Removed HTTP-01 challenge for {domain} with token {token}");
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                debug!("Challenge {token} was already gone");
                Ok(())
            }
            Err(err) => Err(Error::new(err)
                .context(format!("Removing challenge {token} for {domain} failed"))),
        }
    }
}
