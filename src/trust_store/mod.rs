//! The certificate manager that edge services pull their certificates from.

use anyhow::Error;
use async_trait::async_trait;
use std::sync::Arc;
use time::OffsetDateTime;

pub mod acm;
pub mod memory;

pub use memory::MemoryTrustStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSummary {
    /// Stable handle of the certificate (an ARN for ACM)
    pub identity: String,
    pub domain: String,
}

/// One page of a certificate listing. `next_token` is `None` on the last page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificatePage {
    pub certificates: Vec<CertificateSummary>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    /// Import over this existing certificate instead of creating a new one
    pub identity: Option<String>,
    pub certificate: String,
    pub chain: Option<String>,
    pub private_key: String,
    /// Only allowed for new certificates
    pub tags: Vec<Tag>,
}

#[async_trait]
pub trait TrustStore: Send + Sync {
    async fn list_certificates(&self, next_token: Option<String>) -> Result<CertificatePage, Error>;
    async fn list_tags(&self, identity: &str) -> Result<Vec<Tag>, Error>;
    async fn not_after(&self, identity: &str) -> Result<OffsetDateTime, Error>;
    /// Returns the identity of the imported certificate, which equals `request.identity` when set.
    async fn import_certificate(&self, request: ImportRequest) -> Result<String, Error>;
}

#[async_trait]
impl<T: TrustStore + ?Sized> TrustStore for Arc<T> {
    async fn list_certificates(&self, next_token: Option<String>) -> Result<CertificatePage, Error> {
        (**self).list_certificates(next_token).await
    }

    async fn list_tags(&self, identity: &str) -> Result<Vec<Tag>, Error> {
        (**self).list_tags(identity).await
    }

    async fn not_after(&self, identity: &str) -> Result<OffsetDateTime, Error> {
        (**self).not_after(identity).await
    }

    async fn import_certificate(&self, request: ImportRequest) -> Result<String, Error> {
        (**self).import_certificate(request).await
    }
}
