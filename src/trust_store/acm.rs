use crate::trust_store::{CertificatePage, CertificateSummary, ImportRequest, Tag, TrustStore};
use anyhow::{Context, Error, anyhow};
use async_trait::async_trait;
use aws_sdk_acm::Client;
use aws_sdk_acm::primitives::Blob;
use aws_sdk_acm::types::{Filters, KeyAlgorithm};
use time::OffsetDateTime;
use tracing::debug;

/// ACM lists only RSA_2048 certificates unless told otherwise, and ACME CAs commonly
/// issue ECDSA.
const LISTED_KEY_TYPES: [KeyAlgorithm; 6] = [
    KeyAlgorithm::Rsa2048,
    KeyAlgorithm::Rsa3072,
    KeyAlgorithm::Rsa4096,
    KeyAlgorithm::EcPrime256v1,
    KeyAlgorithm::EcSecp384r1,
    KeyAlgorithm::EcSecp521r1,
];

/// [`TrustStore`] backed by AWS Certificate Manager. Identities are certificate ARNs.
#[derive(Debug, Clone)]
pub struct AcmTrustStore {
    client: Client,
}

impl AcmTrustStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TrustStore for AcmTrustStore {
    async fn list_certificates(&self, next_token: Option<String>) -> Result<CertificatePage, Error> {
        let filters = Filters::builder()
            .set_key_types(Some(LISTED_KEY_TYPES.to_vec()))
            .build();
        let output = self
            .client
            .list_certificates()
            .includes(filters)
            .set_next_token(next_token)
            .send()
            .await
            .context("Listing ACM certificates failed")?;
        let certificates = output
            .certificate_summary_list()
            .iter()
            .filter_map(|summary| {
                Some(CertificateSummary {
                    identity: summary.certificate_arn()?.to_string(),
                    domain: summary.domain_name()?.to_string(),
                })
            })
            .collect::<Vec<_>>();
        debug!("ACM returned a page of {} certificates", certificates.len());
        Ok(CertificatePage {
            certificates,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn list_tags(&self, identity: &str) -> Result<Vec<Tag>, Error> {
        let output = self
            .client
            .list_tags_for_certificate()
            .certificate_arn(identity)
            .send()
            .await
            .with_context(|| format!("Listing tags of {identity} failed"))?;
        Ok(output
            .tags()
            .iter()
            .map(|tag| Tag::new(tag.key(), tag.value().unwrap_or_default()))
            .collect())
    }

    async fn not_after(&self, identity: &str) -> Result<OffsetDateTime, Error> {
        let output = self
            .client
            .describe_certificate()
            .certificate_arn(identity)
            .send()
            .await
            .with_context(|| format!("Describing certificate {identity} failed"))?;
        let not_after = output
            .certificate()
            .and_then(|detail| detail.not_after())
            .ok_or_else(|| anyhow!("ACM did not report an expiry for {identity}"))?;
        OffsetDateTime::from_unix_timestamp(not_after.secs())
            .with_context(|| format!("Expiry of {identity} is out of range"))
    }

    async fn import_certificate(&self, request: ImportRequest) -> Result<String, Error> {
        let tags = request
            .tags
            .into_iter()
            .map(|tag| {
                aws_sdk_acm::types::Tag::builder()
                    .key(tag.key)
                    .value(tag.value)
                    .build()
                    .context("Building ACM tag failed")
            })
            .collect::<Result<Vec<_>, _>>()?;
        let output = self
            .client
            .import_certificate()
            .set_certificate_arn(request.identity)
            .certificate(Blob::new(request.certificate))
            .set_certificate_chain(request.chain.map(Blob::new))
            .private_key(Blob::new(request.private_key))
            .set_tags((!tags.is_empty()).then_some(tags))
            .send()
            .await
            .context("Importing certificate into ACM failed")?;
        output
            .certificate_arn()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("ACM did not return the imported certificate's ARN"))
    }
}
