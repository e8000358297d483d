use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ProxyError;

pub const DEFAULT_PORT: u16 = 8899;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProxyConfig {
    pub listen: ListenConfig,
    pub tls: TlsMitmConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
    /// Ports probed upwards from `port` before giving up on a bind conflict.
    pub max_port_attempts: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TlsMitmConfig {
    pub ca_common_name: String,
    /// Defaults to the per-user data directory when unset.
    pub ca_cert_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventsConfig {
    pub capacity: usize,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_port_attempts: 20,
        }
    }
}

impl Default for TlsMitmConfig {
    fn default() -> Self {
        Self {
            ca_common_name: tapline_net::DEFAULT_CA_COMMON_NAME.to_string(),
            ca_cert_dir: None,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

impl ProxyConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProxyError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|err| ProxyError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ProxyError> {
        let config: Self =
            toml::from_str(contents).map_err(|err| ProxyError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.listen.host.trim().is_empty() {
            return Err(ProxyError::Config("listen.host is empty".to_string()));
        }
        if self.events.capacity == 0 {
            return Err(ProxyError::Config(
                "events.capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn authority(&self) -> Result<tapline_net::CertificateAuthority, ProxyError> {
        let common_name = self.tls.ca_common_name.clone();
        match &self.tls.ca_cert_dir {
            Some(dir) => Ok(tapline_net::CertificateAuthority::new(dir, common_name)),
            None => Ok(tapline_net::CertificateAuthority::with_default_dir(
                common_name,
            )?),
        }
    }
}
