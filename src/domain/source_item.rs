//! Source items: one product page to harvest
//!
//! A source item pairs the numeric product identifier parsed from the
//! relative URL path with the absolute URL that will be fetched.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use url::Url;

static PRODUCT_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/products/(\d+)").expect("static product id pattern"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceItemError {
    #[error("No /products/<id> segment in path: {path}")]
    MissingProductId { path: String },

    #[error("Cannot build URL from base {base} and path {path}: {reason}")]
    InvalidUrl {
        base: String,
        path: String,
        reason: String,
    },
}

/// A single product page to fetch, immutable once read from input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceItem {
    id: String,
    url: String,
}

impl SourceItem {
    /// Build an item from a relative path such as `/groceries/en-GB/products/123`
    pub fn from_path(site_base_url: &str, path: &str) -> Result<Self, SourceItemError> {
        let id = extract_product_id(path)?;

        let base = Url::parse(site_base_url).map_err(|e| SourceItemError::InvalidUrl {
            base: site_base_url.to_string(),
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let url = base.join(path).map_err(|e| SourceItemError::InvalidUrl {
            base: site_base_url.to_string(),
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            id,
            url: url.to_string(),
        })
    }

    /// Build an item from parts that are already known
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Pull the digits of the first `/products/<digits>` segment out of a path
pub fn extract_product_id(path: &str) -> Result<String, SourceItemError> {
    PRODUCT_ID_PATTERN
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| SourceItemError::MissingProductId {
            path: path.to_string(),
        })
}
