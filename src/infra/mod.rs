pub mod bollard_adapter;
pub mod config;

pub use bollard_adapter::{BollardConnector, BollardRuntime};
pub use config::DaemonConfig;
