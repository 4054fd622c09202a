use crate::domain::{
    ContainerDetails, ContainerRuntime, ContainerSpec, ContainerState, Endpoint, ImageRef,
    PortBinding, PortMap, RegistryAuth, RuntimeConnector, RuntimeError,
};
use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerStateStatusEnum, HostConfig};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Request timeout for clients built against a nested daemon, in seconds.
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// [`ContainerRuntime`] backed by the docker engine API.
#[derive(Debug, Clone)]
pub struct BollardRuntime {
    docker: Docker,
}

impl BollardRuntime {
    /// Connects to the outer daemon described by the environment
    /// (`DOCKER_HOST`, `DOCKER_CERT_PATH`, ...), falling back to the local socket.
    pub fn from_env() -> Result<Self, RuntimeError> {
        Ok(Self {
            docker: Docker::connect_with_defaults()?,
        })
    }

    /// Client for a daemon listening on a plain TCP endpoint.
    pub fn connect(endpoint: &Endpoint) -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_http(
            &endpoint.address(),
            CLIENT_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )?;
        Ok(Self { docker })
    }

    pub fn into_docker(self) -> Docker {
        self.docker
    }
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map(|_| ())?;
        Ok(())
    }

    async fn pull_image(
        &self,
        image: &ImageRef,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), RuntimeError> {
        let options = CreateImageOptions {
            from_image: image.repository.clone(),
            tag: image.tag.clone(),
            ..Default::default()
        };

        let mut stream =
            Box::pin(
                self.docker
                    .create_image(Some(options), None, auth.map(credentials)),
            );

        while let Some(progress) = stream.next().await {
            let info = progress?;
            if let Some(status) = info.status {
                debug!(
                    image = %image,
                    status = %status,
                    progress = info.progress.as_deref().unwrap_or(""),
                    "pull progress"
                );
            }
        }

        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec<'_>) -> Result<String, RuntimeError> {
        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(spec.published_port.to_string(), HashMap::new());

        let config = Config {
            image: Some(spec.image.to_string()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                privileged: Some(spec.privileged),
                port_bindings: Some(to_bollard_ports(spec.port_bindings())),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;

        for warning in &response.warnings {
            debug!(id = %response.id, warning = %warning, "create warning");
        }

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;

        let state = container_state(
            response
                .state
                .as_ref()
                .and_then(|state| state.status.as_ref()),
        );
        let ports = response
            .network_settings
            .and_then(|settings| settings.ports)
            .map(from_bollard_ports);

        Ok(ContainerDetails { state, ports })
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }
}

/// Connects [`BollardRuntime`]s to nested daemons over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct BollardConnector;

impl RuntimeConnector for BollardConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn ContainerRuntime>, RuntimeError> {
        Ok(Arc::new(BollardRuntime::connect(endpoint)?))
    }
}

fn credentials(auth: &RegistryAuth) -> DockerCredentials {
    DockerCredentials {
        username: Some(auth.username.clone()),
        password: Some(auth.password.clone()),
        serveraddress: auth.server.clone(),
        ..Default::default()
    }
}

fn container_state(status: Option<&ContainerStateStatusEnum>) -> ContainerState {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => ContainerState::Created,
        Some(ContainerStateStatusEnum::RUNNING)
        | Some(ContainerStateStatusEnum::RESTARTING)
        | Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Running,
        Some(ContainerStateStatusEnum::EXITED) | Some(ContainerStateStatusEnum::DEAD) => {
            ContainerState::Exited
        }
        _ => ContainerState::Unknown,
    }
}

fn to_bollard_ports(ports: PortMap) -> bollard::models::PortMap {
    ports
        .into_iter()
        .map(|(key, bindings)| {
            let bindings = bindings.map(|list| {
                list.into_iter()
                    .map(|b| bollard::models::PortBinding {
                        host_ip: b.host_ip,
                        host_port: b.host_port,
                    })
                    .collect()
            });
            (key, bindings)
        })
        .collect()
}

fn from_bollard_ports(ports: bollard::models::PortMap) -> PortMap {
    ports
        .into_iter()
        .map(|(key, bindings)| {
            let bindings = bindings.map(|list| {
                list.into_iter()
                    .map(|b| PortBinding {
                        host_ip: b.host_ip,
                        host_port: b.host_port,
                    })
                    .collect()
            });
            (key, bindings)
        })
        .collect()
}
