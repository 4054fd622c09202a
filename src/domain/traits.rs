use super::error::RuntimeError;
use super::{ContainerDetails, ContainerSpec, Endpoint, ImageRef, RegistryAuth};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// Operations consumed from a docker engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync + Debug {
    /// Liveness probe
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// Fetch an image, optionally with registry credentials
    async fn pull_image(
        &self,
        image: &ImageRef,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), RuntimeError>;

    /// Create a container and return its id
    async fn create_container(&self, spec: &ContainerSpec<'_>) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError>;
}

/// Builds runtimes pointed at a TCP endpoint (the nested daemon).
pub trait RuntimeConnector: Send + Sync + Debug {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn ContainerRuntime>, RuntimeError>;
}
