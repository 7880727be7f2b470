//! Per-item processing outcome
//!
//! Makes the three ways an item can end explicit instead of collapsing them
//! into "no result": data extracted, item skipped (retry on a later run), or
//! a broken setup that should stop the run.

use std::fmt;

use super::result_record::ResultRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Identifier already present in the loaded checkpoint
    AlreadyCompleted,
    /// Page was fetched but had no usable structured data
    NoData(String),
    /// Fetch gave up (retry limit, deadline, or cancellation)
    FetchAbandoned(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyCompleted => write!(f, "already completed"),
            Self::NoData(reason) => write!(f, "no data: {reason}"),
            Self::FetchAbandoned(reason) => write!(f, "fetch abandoned: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Extracted(ResultRecord),
    Skipped(SkipReason),
    Fatal(String),
}

impl ItemOutcome {
    pub fn is_extracted(&self) -> bool {
        matches!(self, Self::Extracted(_))
    }
}
