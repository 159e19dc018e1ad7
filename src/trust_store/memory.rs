use crate::cert::load_certificates_from_memory;
use crate::trust_store::{CertificatePage, CertificateSummary, ImportRequest, Tag, TrustStore};
use anyhow::{Context, Error, anyhow, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCertificate {
    pub identity: String,
    pub domain: String,
    pub tags: Vec<Tag>,
    pub not_after: OffsetDateTime,
    pub certificate: String,
    pub chain: Option<String>,
    pub private_key: String,
}

#[derive(Debug, Default)]
struct Inner {
    certificates: Vec<StoredCertificate>,
    next_id: usize,
    pages_served: usize,
}

/// In-process trust store that behaves like ACM where it matters: listings are paginated in
/// insertion order, domain and expiry are read from the leaf, and tags can not be changed by
/// a reimport.
#[derive(Debug)]
pub struct MemoryTrustStore {
    inner: Mutex<Inner>,
    page_size: usize,
}

impl Default for MemoryTrustStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            inner: Mutex::default(),
            page_size: page_size.max(1),
        }
    }

    /// Records a certificate without any PEM material, for seeding listings.
    pub fn insert(&self, domain: &str, tags: Vec<Tag>, not_after: OffsetDateTime) -> String {
        let mut inner = self.inner.lock();
        let identity = Self::next_identity(&mut inner);
        inner.certificates.push(StoredCertificate {
            identity: identity.clone(),
            domain: domain.to_string(),
            tags,
            not_after,
            certificate: String::new(),
            chain: None,
            private_key: String::new(),
        });
        identity
    }

    /// Records a certificate under a caller-chosen identity.
    pub fn insert_with_identity(
        &self,
        identity: &str,
        domain: &str,
        tags: Vec<Tag>,
        not_after: OffsetDateTime,
    ) {
        self.inner.lock().certificates.push(StoredCertificate {
            identity: identity.to_string(),
            domain: domain.to_string(),
            tags,
            not_after,
            certificate: String::new(),
            chain: None,
            private_key: String::new(),
        });
    }

    pub fn get(&self, identity: &str) -> Option<StoredCertificate> {
        self.inner
            .lock()
            .certificates
            .iter()
            .find(|cert| cert.identity == identity)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().certificates.is_empty()
    }

    /// Number of listing pages handed out so far
    pub fn pages_served(&self) -> usize {
        self.inner.lock().pages_served
    }

    fn next_identity(inner: &mut Inner) -> String {
        inner.next_id += 1;
        format!("arn:memory:acm:certificate/{}", inner.next_id)
    }
}

#[async_trait]
impl TrustStore for MemoryTrustStore {
    async fn list_certificates(&self, next_token: Option<String>) -> Result<CertificatePage, Error> {
        let start = match next_token {
            Some(token) => token
                .parse::<usize>()
                .with_context(|| format!("Invalid pagination token {token}"))?,
            None => 0,
        };
        let mut inner = self.inner.lock();
        inner.pages_served += 1;
        let end = (start + self.page_size).min(inner.certificates.len());
        let certificates = inner
            .certificates
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|cert| CertificateSummary {
                identity: cert.identity.clone(),
                domain: cert.domain.clone(),
            })
            .collect();
        let next_token = (end < inner.certificates.len()).then(|| end.to_string());
        Ok(CertificatePage {
            certificates,
            next_token,
        })
    }

    async fn list_tags(&self, identity: &str) -> Result<Vec<Tag>, Error> {
        self.get(identity)
            .map(|cert| cert.tags)
            .ok_or_else(|| anyhow!("Certificate {identity} does not exist"))
    }

    async fn not_after(&self, identity: &str) -> Result<OffsetDateTime, Error> {
        self.get(identity)
            .map(|cert| cert.not_after)
            .ok_or_else(|| anyhow!("Certificate {identity} does not exist"))
    }

    async fn import_certificate(&self, request: ImportRequest) -> Result<String, Error> {
        let leaf = load_certificates_from_memory(&request.certificate, Some(1))
            .context("Parsing imported certificate failed")?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Imported certificate contains no PEM block"))?;
        let domain = leaf
            .primary_domain()
            .ok_or_else(|| anyhow!("Imported certificate has no domain name"))?
            .to_string();
        let not_after = leaf.validity.not_after;

        let mut inner = self.inner.lock();
        match request.identity {
            Some(identity) => {
                if !request.tags.is_empty() {
                    bail!("Tags can not be changed when reimporting certificate {identity}");
                }
                let existing = inner
                    .certificates
                    .iter_mut()
                    .find(|cert| cert.identity == identity)
                    .ok_or_else(|| anyhow!("Certificate {identity} does not exist"))?;
                existing.domain = domain;
                existing.not_after = not_after;
                existing.certificate = request.certificate;
                existing.chain = request.chain;
                existing.private_key = request.private_key;
                Ok(identity)
            }
            None => {
                let identity = Self::next_identity(&mut inner);
                inner.certificates.push(StoredCertificate {
                    identity: identity.clone(),
                    domain,
                    tags: request.tags,
                    not_after,
                    certificate: request.certificate,
                    chain: request.chain,
                    private_key: request.private_key,
                });
                Ok(identity)
            }
        }
    }
}
