use anyhow::{Error, anyhow, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A request to issue (or renew) the certificate correlated with `id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceRequest {
    /// Correlation ID. Empty means the certificate is not tracked across renewals.
    #[serde(default)]
    pub id: String,
    pub domains: Vec<String>,
    /// Placeholder certificate to import TLS-ALPN proofs over
    #[serde(
        default,
        rename = "challengeCertificateIdentity",
        alias = "challengeCertificateArn",
        alias = "challengeCertificateARN",
        skip_serializing_if = "Option::is_none"
    )]
    pub challenge_certificate_identity: Option<String>,
}

impl IssuanceRequest {
    pub fn validate(&self) -> Result<(), Error> {
        if self.domains.is_empty() {
            bail!("At least one domain is required");
        }
        if let Some(empty) = self.domains.iter().position(|domain| domain.trim().is_empty()) {
            bail!("Domain #{} is empty", empty + 1);
        }
        Ok(())
    }

    /// The domain the certificate is listed under in the trust store.
    pub fn primary_domain(&self) -> Result<&str, Error> {
        self.domains
            .first()
            .map(String::as_str)
            .ok_or(anyhow!("At least one domain is required"))
    }
}

/// How domain control is proven to the CA.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChallengeTransport {
    /// HTTP-01 through the challenge store and the responder
    #[default]
    Http,
    /// HTTP-01 through a bucket named after the domain
    ObjectStorage,
    /// TLS-ALPN-01 through the trust store
    TlsAlpn,
}

impl Display for ChallengeTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChallengeTransport::Http => write!(f, "http"),
            ChallengeTransport::ObjectStorage => write!(f, "object-storage"),
            ChallengeTransport::TlsAlpn => write!(f, "tls-alpn"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(r#"{"id":"123","domains":["a.com","www.a.com"],"challengeCertificateIdentity":"arn:placeholder"}"#)]
    #[case(r#"{"id":"123","domains":["a.com","www.a.com"],"challengeCertificateArn":"arn:placeholder"}"#)]
    #[case(r#"{"id":"123","domains":["a.com","www.a.com"],"challengeCertificateARN":"arn:placeholder"}"#)]
    fn test_deserialize_request(#[case] json: &str) {
        let request: IssuanceRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            request,
            IssuanceRequest {
                id: "123".to_string(),
                domains: vec!["a.com".to_string(), "www.a.com".to_string()],
                challenge_certificate_identity: Some("arn:placeholder".to_string()),
            }
        );
        assert_eq!(request.primary_domain().unwrap(), "a.com");
        request.validate().unwrap();
    }

    #[test]
    fn test_optional_fields() {
        let request: IssuanceRequest = serde_json::from_str(r#"{"domains":["a.com"]}"#).unwrap();
        assert!(request.id.is_empty());
        assert!(request.challenge_certificate_identity.is_none());
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec!["a.com".to_string(), " ".to_string()])]
    fn test_validate_rejects(#[case] domains: Vec<String>) {
        let request = IssuanceRequest {
            domains,
            ..Default::default()
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_transport_names() {
        assert_eq!(
            ChallengeTransport::from_str("object-storage", false).unwrap(),
            ChallengeTransport::ObjectStorage
        );
        assert_eq!(ChallengeTransport::TlsAlpn.to_string(), "tls-alpn");
    }
}
