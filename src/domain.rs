//! Domain module - core entities of a harvest run
//!
//! Each module is its own file in the domain/ directory; commonly used items
//! are re-exported here.

pub mod outcome;
pub mod result_record;
pub mod source_item;

pub use outcome::{ItemOutcome, SkipReason};
pub use result_record::{CompletedIdSet, PriceData, ProductData, PromotionData, ResultRecord, ResultStore};
pub use source_item::{SourceItem, SourceItemError};
