use crate::cert::leaf_and_chain;
use crate::issuer::IssuedCertificate;
use crate::trust_store::{ImportRequest, Tag, TrustStore};
use anyhow::{Context, Error};
use std::sync::Arc;
use tracing::info;

/// Commits issued certificates to the trust store, rotating them in place when a previous
/// certificate exists so everything referencing its identity picks up the new one.
pub struct CertificateImporter {
    trust_store: Arc<dyn TrustStore>,
    tag_key: String,
}

impl CertificateImporter {
    pub fn new(trust_store: Arc<dyn TrustStore>, tag_key: impl Into<String>) -> Self {
        Self {
            trust_store,
            tag_key: tag_key.into(),
        }
    }

    /// Imports `issued` and returns the identity it is stored under.
    ///
    /// With an `existing` identity, the certificate replaces that one and keeps its tags.
    /// Otherwise a new certificate is created and tagged with `correlation_id`.
    pub async fn import(
        &self,
        issued: &IssuedCertificate,
        correlation_id: &str,
        existing: Option<&str>,
    ) -> Result<String, Error> {
        let (certificate, chain) = leaf_and_chain(&issued.certificate, issued.chain.as_deref())
            .context("Isolating leaf certificate failed")?;
        let tags = match existing {
            // Tags can not be passed when reimporting
            Some(_) => Vec::new(),
            None => vec![Tag::new(&self.tag_key, correlation_id)],
        };
        let identity = self
            .trust_store
            .import_certificate(ImportRequest {
                identity: existing.map(str::to_string),
                certificate,
                chain,
                private_key: issued.private_key.clone(),
                tags,
            })
            .await?;
        match existing {
            Some(_) => info!("Rotated certificate {identity} in place"),
            None => info!("Imported new certificate {identity} tagged {}={correlation_id}", self.tag_key),
        }
        Ok(identity)
    }
}
