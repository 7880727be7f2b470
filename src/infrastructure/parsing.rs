//! Document parsing
//!
//! Product pages embed their data as a JSON payload inside a script element.
//! The extractor finds that element and projects a fixed set of fields.

pub mod discover_extractor;
pub mod error;

pub use discover_extractor::DocumentExtractor;
pub use error::{ExtractionError, ExtractionResult};
