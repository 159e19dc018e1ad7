use crate::config::{ConfigBackend, Configuration};
use crate::issuer::LETS_ENCRYPT_DIRECTORY;
use crate::solver::tls_alpn::DEFAULT_SETTLE_INTERVAL;
use crate::time::ParsedDuration;
use anyhow::Error;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_TABLE_NAME: &str = "edgecert-challenges";
pub const DEFAULT_CORRELATION_TAG: &str = "Edgecert-Certificate-ID";
const DEFAULT_RENEWAL_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_ISSUE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const DEFAULT_LISTEN_PORT: u16 = 8080;

#[derive(Debug, Clone, Default)]
pub struct DefaultConfig {}

impl DefaultConfig {
    pub fn get_config(&self) -> Configuration {
        Configuration {
            directory_url: LETS_ENCRYPT_DIRECTORY.to_string(),
            contact_email: None,
            table_name: DEFAULT_TABLE_NAME.to_string(),
            correlation_tag: DEFAULT_CORRELATION_TAG.to_string(),
            renewal_window: ParsedDuration::from(DEFAULT_RENEWAL_WINDOW),
            object_storage_delay: ParsedDuration::from(Duration::ZERO),
            tls_alpn_settle: ParsedDuration::from(DEFAULT_SETTLE_INTERVAL),
            issue_timeout: ParsedDuration::from(DEFAULT_ISSUE_TIMEOUT),
            listen_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_LISTEN_PORT)),
        }
    }
}

impl ConfigBackend for DefaultConfig {
    fn load<P: AsRef<Path>>(_file: P) -> Result<Configuration, Error> {
        Ok(Self::default().get_config())
    }
}
