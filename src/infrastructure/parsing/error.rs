//! Extraction error types
//!
//! Every variant means "this page had no usable data". None of them is fatal
//! to a run: the item is skipped and stays eligible for the next one.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Invalid CSS selector: {selector} - {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("No data carrier element in document")]
    CarrierMissing,

    #[error("Data carrier element is empty")]
    EmptyCarrier,

    #[error("Data carrier is not valid JSON: {reason}")]
    MalformedPayload { reason: String },

    #[error("Embedded payload has no entity cache")]
    MissingCache,

    #[error("Cache entry '{key}' not found")]
    MissingProduct { key: String },

    #[error("Cache entry '{key}' is not an object")]
    MalformedEntry { key: String },

    #[error("Promotion entry '{key}' has no usable id")]
    PromotionWithoutId { key: String },
}

impl ExtractionError {
    pub fn malformed_payload(reason: impl ToString) -> Self {
        Self::MalformedPayload {
            reason: reason.to_string(),
        }
    }

    pub fn malformed_entry(key: &str) -> Self {
        Self::MalformedEntry {
            key: key.to_string(),
        }
    }

    /// The page simply did not carry the embedded payload, as opposed to
    /// carrying one we could not read
    pub fn is_carrier_missing(&self) -> bool {
        matches!(self, Self::CarrierMissing)
    }
}

pub type ExtractionResult<T> = Result<T, ExtractionError>;
