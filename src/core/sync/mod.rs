//! Sync orchestration and reporting

pub mod coordinator;
pub mod summary;

pub use coordinator::{SyncCoordinator, SyncMode};
pub use summary::{SyncError, SyncErrorType, SyncSummary};
