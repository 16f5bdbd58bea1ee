//! Type definitions for routestat

mod error;
mod report;
mod usage;

pub use error::*;
pub use report::*;
pub use usage::*;

/// Snapshot loading warning types
#[derive(Debug, Clone, PartialEq)]
pub enum CacheWarning {
    /// Failed to open or read snapshot file
    LoadFailed(String),
    /// Snapshot file was corrupted (invalid JSON)
    Corrupted(String),
}
