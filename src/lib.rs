pub mod domain;
pub mod infra;
pub mod services;

// Mock runtimes, public so the integration tests under tests/ can drive them
pub mod test_support;

pub use domain::{
    ContainerRuntime, DindError, Endpoint, ErrorKind, LifecycleState, RuntimeConnector,
    RuntimeError,
};
pub use infra::config::DEFAULT_VERSION;
pub use infra::{BollardConnector, BollardRuntime, DaemonConfig};
pub use services::{DaemonHandle, RetryError, RetryPolicy};
