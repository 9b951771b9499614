//! Sync sessions, single-flight coordination and background refresh.

mod coordinator;
mod retry;
mod session;

pub use coordinator::{BackgroundTask, KindState, KindStatus, SyncCoordinator, SyncHandle};
pub use retry::{retry_async, RetryStats};
pub use session::{SessionState, SessionSubscriber, SyncSession};
