use crate::config::default::DefaultConfig;
use crate::config::toml::TomlConfiguration;
use crate::time::ParsedDuration;
use anyhow::Context;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

mod default;
mod toml;

pub const DEFAULT_CONFIG_FILE: &str = "edgecert.toml";

pub fn get_default_config_file() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Settings shared by all commands. Every field is optional in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    /// ACME directory of the CA to issue from
    pub directory_url: String,
    pub contact_email: Option<String>,
    /// DynamoDB table holding HTTP-01 challenges
    pub table_name: String,
    /// Trust store tag key carrying the correlation ID
    pub correlation_tag: String,
    /// Renew once the current certificate has at most this much validity left
    pub renewal_window: ParsedDuration,
    /// Wait after uploading a proof to object storage
    pub object_storage_delay: ParsedDuration,
    /// Wait after importing a TLS-ALPN proof certificate
    pub tls_alpn_settle: ParsedDuration,
    /// Upper bound for one complete issuance attempt
    pub issue_timeout: ParsedDuration,
    /// Address the challenge responder listens on
    pub listen_address: SocketAddr,
}

impl Default for Configuration {
    fn default() -> Self {
        DefaultConfig::default().get_config()
    }
}

impl Configuration {
    pub fn directory(&self) -> anyhow::Result<Url> {
        Url::parse(&self.directory_url)
            .with_context(|| format!("Invalid ACME directory URL {}", self.directory_url))
    }
}

pub trait ConfigBackend {
    fn load<P: AsRef<Path>>(file: P) -> Result<Configuration, anyhow::Error>;
}

/// Loads the configuration from `file`, falling back to built-in defaults if it does not exist.
pub fn load<P: AsRef<Path>>(file: P) -> Result<Configuration, anyhow::Error> {
    let file = file.as_ref();
    let config = if file.exists() {
        debug!("Loading configuration from {}", file.display());
        TomlConfiguration::load(file)
            .with_context(|| format!("Loading configuration file {} failed", file.display()))?
    } else {
        info!(
            "Configuration file {} does not exist, using defaults",
            file.display()
        );
        DefaultConfig::load(file)?
    };
    config.directory()?;
    Ok(config)
}
