#![forbid(unsafe_code)]

pub mod capture;
pub mod conflict;
pub mod scheduler;
pub mod sync;

pub use capture::{CaptureError, CaptureOutcome, CaptureRuntime};
pub use conflict::{ConflictChecker, ConflictError, ConflictOutcome, ConflictSource};
pub use scheduler::{SchedulerConfig, SyncScheduler, SyncTrigger, TriggerTime};
pub use sync::{CollectionCounters, RetryReport, SyncError, SyncManager, SyncReport, SyncStatus};
