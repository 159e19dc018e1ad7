use anyhow::{Context, Error, bail};
use std::io::{BufRead, Cursor, Seek};
use tracing::warn;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::pem::Pem;
use x509_parser::prelude::FromDer;

const PEM_CERTIFICATE_TAG: &str = "CERTIFICATE";
const END_CERTIFICATE: &str = "-----END CERTIFICATE-----";

/// The maximum number of certificates we will parse in a PEM-array of certificates by default
const DEFAULT_MAX_CERTIFICATE_CHAIN_LENGTH: usize = 100;

/// Splits a PEM bundle into its leaf (the first complete certificate block) and whatever
/// follows it. Some CAs hand out the whole chain where a single certificate was asked for.
pub fn split_leaf(bundle: &str) -> Result<(&str, &str), Error> {
    let Some(end) = bundle.find(END_CERTIFICATE) else {
        bail!("PEM bundle does not contain a certificate");
    };
    let (leaf, remainder) = bundle.split_at(end + END_CERTIFICATE.len());
    let leaf = leaf.trim_start();
    let parsed = pem::parse(leaf).context("Leaf certificate is not valid PEM")?;
    if parsed.tag() != PEM_CERTIFICATE_TAG {
        bail!(
            "Expected a {PEM_CERTIFICATE_TAG} block as first PEM entry, found {}",
            parsed.tag()
        );
    }
    Ok((leaf, remainder.trim()))
}

/// Determines the leaf certificate and issuer chain to hand to the trust store.
///
/// A separately supplied chain always wins, and anything bundled after the leaf is discarded.
/// Without one, the bundle remainder (if any) becomes the chain.
pub fn leaf_and_chain(certificate: &str, chain: Option<&str>) -> Result<(String, Option<String>), Error> {
    let (leaf, remainder) = split_leaf(certificate)?;
    let chain = match chain {
        Some(chain) if !chain.trim().is_empty() => Some(chain.to_string()),
        _ if !remainder.is_empty() => Some(remainder.to_string()),
        _ => None,
    };
    Ok((leaf.to_string(), chain))
}

pub fn load_certificates_from_memory<B: AsRef<[u8]>>(
    pem_bytes: B,
    limit: Option<usize>,
) -> anyhow::Result<Vec<ParsedX509Certificate>> {
    let reader = Cursor::new(pem_bytes);
    load_certificates_from_reader(reader, limit)
}

fn load_certificates_from_reader<R: BufRead + Seek>(
    reader: R,
    limit: Option<usize>,
) -> anyhow::Result<Vec<ParsedX509Certificate>> {
    let mut certificates = Vec::new();
    for pem in
        Pem::iter_from_reader(reader).take(limit.unwrap_or(DEFAULT_MAX_CERTIFICATE_CHAIN_LENGTH))
    {
        let pem = pem.context("Reading PEM block failed")?;
        let parsed_x509 = ParsedX509Certificate::try_from(pem.contents)?;
        certificates.push(parsed_x509);
    }
    Ok(certificates)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedX509Certificate {
    pub common_name: Option<String>,
    pub validity: Validity,
    pub dns_names: Vec<String>,
}

impl TryFrom<Vec<u8>> for ParsedX509Certificate {
    type Error = Error;

    fn try_from(der_bytes: Vec<u8>) -> anyhow::Result<ParsedX509Certificate> {
        let (_extra_bytes, cert) = x509_parser::certificate::X509Certificate::from_der(&der_bytes)
            .context("Reading X.509 structure: Decoding DER failed")?;
        let common_name = cert
            .subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);
        let validity = (&cert.validity).into();
        let mut dns_names = Vec::new();
        for extension in cert.extensions() {
            if let ParsedExtension::SubjectAlternativeName(san) = extension.parsed_extension() {
                for general_name in &san.general_names {
                    match general_name {
                        GeneralName::DNSName(dns_name) => dns_names.push((*dns_name).to_string()),
                        unsupported => {
                            warn!("Ignoring unsupported general name {unsupported} in certificate");
                        }
                    }
                }
            }
        }
        Ok(Self {
            common_name,
            validity,
            dns_names,
        })
    }
}

impl ParsedX509Certificate {
    /// The name a certificate manager lists this certificate under: the first DNS SAN,
    /// falling back to the subject common name.
    pub fn primary_domain(&self) -> Option<&str> {
        self.dns_names
            .first()
            .or(self.common_name.as_ref())
            .map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validity {
    pub not_before: time::OffsetDateTime,
    pub not_after: time::OffsetDateTime,
}

impl From<&x509_parser::certificate::Validity> for Validity {
    fn from(value: &x509_parser::certificate::Validity) -> Self {
        Self {
            not_before: value.not_before.to_datetime(),
            not_after: value.not_after.to_datetime(),
        }
    }
}
