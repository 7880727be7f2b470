//! Run inputs: the product link list and the proxy list
//!
//! Both files must exist. A bad entry in the link list is logged and skipped
//! without affecting the rest; an empty proxy list is a configuration error.

use std::io::ErrorKind;
use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};

use crate::domain::SourceItem;
use crate::infrastructure::config::ConfigError;
use crate::infrastructure::proxy_pool::ProxyEndpoint;

async fn read_input(path: &Path, what: &str) -> Result<String, ConfigError> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        let message = if e.kind() == ErrorKind::NotFound {
            format!("{what} file not found: {}", path.display())
        } else {
            format!("cannot read {what} file {}: {e}", path.display())
        };
        ConfigError::MissingInput { message }
    })
}

/// Parse a JSON array of relative product paths into source items
pub fn parse_source_items(content: &str, site_base_url: &str) -> Result<Vec<SourceItem>, ConfigError> {
    let entries: Vec<Value> = serde_json::from_str(content).map_err(|e| ConfigError::Validation {
        message: format!("product links must be a JSON array of paths: {e}"),
    })?;

    let mut items = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let Some(path) = entry.as_str() else {
            warn!("Skipping product link #{}: not a string ({})", index, entry);
            continue;
        };
        match SourceItem::from_path(site_base_url, path) {
            Ok(item) => items.push(item),
            Err(e) => warn!("Skipping product link #{}: {}", index, e),
        }
    }
    Ok(items)
}

pub async fn load_source_items(path: &Path, site_base_url: &str) -> Result<Vec<SourceItem>, ConfigError> {
    let content = read_input(path, "product links").await?;
    let items = parse_source_items(&content, site_base_url)?;
    info!("📋 Loaded {} product links from {}", items.len(), path.display());
    Ok(items)
}

/// One proxy per line; blank lines and `#` comments are ignored
pub fn parse_proxies(content: &str) -> Vec<ProxyEndpoint> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ProxyEndpoint::new)
        .collect()
}

pub async fn load_proxies(path: &Path) -> Result<Vec<ProxyEndpoint>, ConfigError> {
    let content = read_input(path, "proxy").await?;
    let proxies = parse_proxies(&content);
    if proxies.is_empty() {
        return Err(ConfigError::MissingInput {
            message: format!("no proxies listed in {}", path.display()),
        });
    }
    info!("🔀 Loaded {} proxies from {}", proxies.len(), path.display());
    Ok(proxies)
}
