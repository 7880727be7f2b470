//! Proxy endpoints and per-attempt selection
//!
//! The pool is loaded once and never mutated. There is no health tracking:
//! a proxy that just failed can be picked again straight away.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::infrastructure::config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScheme {
    Http,
    Https,
}

impl ProxyScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// A proxy literal such as `10.0.0.1:8080` or `https://user:pw@host:443`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    raw: String,
    scheme: ProxyScheme,
}

impl ProxyEndpoint {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into().trim().to_string();
        let scheme = if raw.contains("https://") {
            ProxyScheme::Https
        } else {
            ProxyScheme::Http
        };
        Self { raw, scheme }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> ProxyScheme {
        self.scheme
    }

    /// Proxy URL handed to the HTTP client. A literal that already carries a
    /// scheme keeps only its address part so it is not prefixed twice.
    pub fn proxy_url(&self) -> String {
        let address = self
            .raw
            .strip_prefix("https://")
            .or_else(|| self.raw.strip_prefix("http://"))
            .unwrap_or(&self.raw);
        format!("{}://{}", self.scheme.as_str(), address)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxySelection {
    /// Uniform random choice, independent across calls
    #[default]
    Random,
    /// Cycle through the list in order
    RoundRobin,
}

/// Immutable set of proxies shared by all workers
#[derive(Debug)]
pub struct ProxyPool {
    endpoints: Vec<ProxyEndpoint>,
    selection: ProxySelection,
    cursor: AtomicUsize,
}

impl ProxyPool {
    pub fn new(endpoints: Vec<ProxyEndpoint>, selection: ProxySelection) -> Result<Self, ConfigError> {
        if endpoints.is_empty() {
            return Err(ConfigError::MissingInput {
                message: "proxy pool is empty".to_string(),
            });
        }
        Ok(Self {
            endpoints,
            selection,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn random(endpoints: Vec<ProxyEndpoint>) -> Result<Self, ConfigError> {
        Self::new(endpoints, ProxySelection::Random)
    }

    pub fn round_robin(endpoints: Vec<ProxyEndpoint>) -> Result<Self, ConfigError> {
        Self::new(endpoints, ProxySelection::RoundRobin)
    }

    /// Pick the proxy for the next attempt
    pub fn select(&self) -> &ProxyEndpoint {
        let index = match self.selection {
            ProxySelection::Random => fastrand::usize(..self.endpoints.len()),
            ProxySelection::RoundRobin => {
                self.cursor.fetch_add(1, Ordering::Relaxed) % self.endpoints.len()
            }
        };
        &self.endpoints[index]
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[ProxyEndpoint] {
        &self.endpoints
    }
}
