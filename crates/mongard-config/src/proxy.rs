//! Download proxy descriptors.
//!
//! Binary downloads may need to traverse an HTTP proxy. A proxy applies to
//! a download URL only when its protocol matches and the download host is
//! not on the exclusion list — the same matching the build tool's own
//! proxy settings perform.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// A configured download proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySpec {
    /// Protocol the proxy serves, e.g. `http` or `https`.
    pub protocol: String,
    /// Proxy host name.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Hosts that must be reached directly, bypassing the proxy.
    #[serde(default)]
    pub non_proxy_hosts: Vec<String>,
}

impl ProxySpec {
    /// Whether this proxy applies to the given download URL.
    #[must_use]
    pub fn applies_to(&self, download_url: &Url) -> bool {
        if !self.protocol.eq_ignore_ascii_case(download_url.scheme()) {
            return false;
        }
        let Some(host) = download_url.host_str() else {
            return false;
        };
        !self
            .non_proxy_hosts
            .iter()
            .any(|excluded| excluded.eq_ignore_ascii_case(host))
    }
}

impl fmt::Display for ProxySpec {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl FromStr for ProxySpec {
    type Err = ProxyParseError;

    /// Parses a proxy from URL form, e.g. `http://proxy.internal:3128`.
    /// The exclusion list is only settable through the configuration file.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        let host = url
            .host_str()
            .ok_or_else(|| ProxyParseError::MissingHost(input.to_owned()))?;
        let port = url
            .port()
            .ok_or_else(|| ProxyParseError::MissingPort(input.to_owned()))?;
        Ok(Self {
            protocol: url.scheme().to_owned(),
            host: host.to_owned(),
            port,
            non_proxy_hosts: Vec::new(),
        })
    }
}

/// Errors encountered while parsing a [`ProxySpec`] from text.
#[derive(Debug, Error)]
pub enum ProxyParseError {
    /// Proxy host name was missing.
    #[error("missing proxy host in '{0}'")]
    MissingHost(String),
    /// Proxy port was missing.
    #[error("missing proxy port in '{0}'")]
    MissingPort(String),
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
