//! promo-harvester: resumable product and promotion harvesting
//!
//! Product pages are fetched through a rotating proxy pool, the embedded
//! data payload is projected into a compact record, and results are
//! checkpointed to one JSON file that also drives resumption.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{HarvestService, RunReport};
pub use infrastructure::AppConfig;
