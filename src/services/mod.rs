mod daemon;
pub mod retry;

pub use daemon::DaemonHandle;
pub use retry::{RetryError, RetryPolicy};
