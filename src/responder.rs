use crate::error::StoreError;
use crate::store::ChallengeStore;
use http::StatusCode;
use tracing::{debug, error, info, warn};

pub const NOT_FOUND_BODY: &str = "Challenge not found";
pub const RATE_LIMITED_BODY: &str = "Please try again soon";
pub const INTERNAL_ERROR_BODY: &str = "Unexpected error";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ChallengeResponse {
    fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Answers the CA's HTTP-01 validation request for `token` arriving for `host`.
///
/// The proof is only served when `host` is exactly the domain the challenge was presented
/// for. A mismatch looks the same as an unknown token. Only reads the store.
pub async fn respond(store: &dyn ChallengeStore, host: &str, token: &str) -> ChallengeResponse {
    let challenge = match store.get(token).await {
        Ok(challenge) => challenge,
        Err(StoreError::NotFound) => {
            info!("No challenge stored for token {token}");
            return ChallengeResponse::new(StatusCode::NOT_FOUND, NOT_FOUND_BODY);
        }
        Err(StoreError::RateLimited) => {
            warn!("Challenge store is rate limiting, asking the CA to retry");
            return ChallengeResponse::new(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_BODY);
        }
        Err(err) => {
            error!("Reading challenge {token} failed: {err}");
            return ChallengeResponse::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY);
        }
    };

    if challenge.domain != host {
        debug!(
            "Token {token} belongs to {}, but the request was for {host}",
            challenge.domain
        );
        return ChallengeResponse::new(StatusCode::NOT_FOUND, NOT_FOUND_BODY);
    }

    info!("Serving challenge {token} for {host}");
    ChallengeResponse::new(StatusCode::OK, challenge.key_auth)
}
