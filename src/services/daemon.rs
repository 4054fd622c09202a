use crate::domain::{
    ContainerRuntime, ContainerSpec, DindError, Endpoint, ImageRef, InspectFailure,
    LifecycleState, RuntimeConnector, RuntimeError,
};
use crate::infra::{BollardConnector, BollardRuntime, DaemonConfig};
use crate::services::retry::{RetryError, RetryPolicy};
use bollard::Docker;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where bollard looks for the outer daemon when `DOCKER_HOST` is unset.
const DEFAULT_DOCKER_SOCKET: &str = "unix:///var/run/docker.sock";

/// Address of the outer daemon as the environment describes it.
fn outer_daemon_address(lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup("DOCKER_HOST")
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| DEFAULT_DOCKER_SOCKET.to_string())
}

/// One throwaway Docker-in-Docker daemon.
///
/// The handle owns exactly one container on the outer daemon. It moves
/// through [`LifecycleState`] once: a started handle cannot be restarted and
/// a closed handle cannot be reused.
#[derive(Debug)]
pub struct DaemonHandle {
    config: DaemonConfig,
    outer: Arc<dyn ContainerRuntime>,
    connector: Arc<dyn RuntimeConnector>,
    state: LifecycleState,
}

impl DaemonHandle {
    /// Starts a nested daemon on the docker host named by the environment.
    ///
    /// Returns only once the nested daemon answers a ping.
    pub async fn new(config: DaemonConfig) -> Result<Self, DindError> {
        let mut daemon = Self::connect(config)?;
        daemon.start().await?;
        Ok(daemon)
    }

    /// [`DaemonHandle::new`] with the default config running `version`.
    pub async fn new_version(version: &str) -> Result<Self, DindError> {
        Self::new(DaemonConfig::default().with_version(version)).await
    }

    /// Connects to the outer daemon without starting anything.
    pub fn connect(config: DaemonConfig) -> Result<Self, DindError> {
        let outer = BollardRuntime::from_env().map_err(|source| DindError::Connection {
            endpoint: outer_daemon_address(|key| std::env::var(key).ok()),
            source,
        })?;
        Ok(Self::with_runtime(
            config,
            Arc::new(outer),
            Arc::new(BollardConnector),
        ))
    }

    /// Empty handle over arbitrary runtimes.
    pub fn with_runtime(
        config: DaemonConfig,
        outer: Arc<dyn ContainerRuntime>,
        connector: Arc<dyn RuntimeConnector>,
    ) -> Self {
        Self {
            config,
            outer,
            connector,
            state: LifecycleState::Empty,
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn id(&self) -> Option<&str> {
        self.state.id()
    }

    pub fn port(&self) -> Option<u16> {
        self.state.port()
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.config.host_ip.clone(), self.port().unwrap_or(0))
    }

    /// Where clients reach the nested daemon: `tcp://127.0.0.1:<port>/`.
    pub fn url(&self) -> String {
        self.endpoint().url()
    }

    /// A fresh client connected to the nested daemon.
    pub fn client(&self) -> Result<Docker, DindError> {
        let endpoint = self.endpoint();
        BollardRuntime::connect(&endpoint)
            .map(BollardRuntime::into_docker)
            .map_err(|source| DindError::Connection {
                endpoint: endpoint.url(),
                source,
            })
    }

    /// Pull, create, start, inspect and wait for the nested daemon.
    pub async fn start(&mut self) -> Result<(), DindError> {
        self.start_with_cancel(&CancellationToken::new()).await
    }

    /// [`DaemonHandle::start`] whose readiness wait stops when `cancel` fires.
    ///
    /// On failure the container reached so far is removed without force; if
    /// that removal fails too, both errors come back as [`DindError::Cleanup`].
    pub async fn start_with_cancel(&mut self, cancel: &CancellationToken) -> Result<(), DindError> {
        if let Some(id) = self.state.id() {
            return Err(DindError::AlreadyRunning { id: id.to_string() });
        }
        self.config.validate()?;

        match self.advance(cancel).await {
            Ok(()) => Ok(()),
            Err(error) => Err(self.teardown_after_failure(error).await),
        }
    }

    /// Force-removes the container. A handle that never created one has
    /// nothing to remove.
    pub async fn close(&mut self) -> Result<(), DindError> {
        let Some(id) = self.state.id().map(str::to_string) else {
            debug!(state = self.state.name(), "nothing to remove");
            return Ok(());
        };

        self.remove(&id, true).await?;
        info!(id = %id, "nested daemon removed");
        self.state = LifecycleState::Removed { id };
        Ok(())
    }

    async fn advance(&mut self, cancel: &CancellationToken) -> Result<(), DindError> {
        let image = self.config.image();
        self.pull(&image).await?;
        self.state = LifecycleState::ImagePulled;

        let image_name = image.to_string();
        let published_port = self.config.api_port_key();
        let request = ContainerSpec {
            image: &image_name,
            privileged: self.config.privileged,
            published_port: &published_port,
            host_ip: &self.config.host_ip,
        };

        let id = self
            .outer
            .create_container(&request)
            .await
            .map_err(|source| DindError::Create {
                image: image_name.clone(),
                source,
            })?;
        info!(id = %id, image = %image_name, "container created");
        self.state = LifecycleState::Created { id: id.clone() };

        self.outer
            .start_container(&id)
            .await
            .map_err(|source| DindError::Start {
                image: image_name.clone(),
                id: id.clone(),
                source,
            })?;
        self.state = LifecycleState::Started { id: id.clone() };

        let details = self
            .outer
            .inspect_container(&id)
            .await
            .map_err(|source| DindError::Inspect {
                id: id.clone(),
                source: InspectFailure::Runtime(source),
            })?;
        let port = details
            .host_port(&published_port)
            .map_err(|source| DindError::Inspect {
                id: id.clone(),
                source,
            })?;
        info!(id = %id, port, state = ?details.state, "nested daemon published");
        self.state = LifecycleState::Inspected {
            id: id.clone(),
            port,
        };

        self.wait(cancel).await?;
        info!(id = %id, url = %self.url(), "nested daemon ready");
        self.state = LifecycleState::Ready { id, port };
        Ok(())
    }

    async fn pull(&self, image: &ImageRef) -> Result<(), DindError> {
        info!(image = %image, "pulling image");
        self.outer
            .pull_image(image, self.config.auth.as_ref())
            .await
            .map_err(|source| DindError::Pull {
                image: image.to_string(),
                source,
            })
    }

    /// Pings the nested daemon until it answers or the readiness budget runs out.
    async fn wait(&self, cancel: &CancellationToken) -> Result<(), DindError> {
        let endpoint = self.endpoint();
        let url = endpoint.url();
        let client = self
            .connector
            .connect(&endpoint)
            .map_err(|source| DindError::Connection {
                endpoint: url.clone(),
                source,
            })?;

        let policy = RetryPolicy::new(
            self.config.readiness.attempts,
            self.config.readiness.interval(),
        );

        let interval = policy.interval;
        policy
            .run(cancel, |attempt| {
                let client = client.clone();
                let url = url.clone();
                async move {
                    debug!(attempt, url = %url, "pinging nested daemon");
                    tokio::time::timeout(interval, client.ping())
                        .await
                        .unwrap_or_else(|_| {
                            Err(RuntimeError::message(format!(
                                "no answer from {url} within {}ms",
                                interval.as_millis()
                            )))
                        })
                }
            })
            .await
            .map_err(|err| match err {
                RetryError::Exhausted { attempts, last } => DindError::ReadinessTimeout {
                    url: url.clone(),
                    attempts,
                    source: last,
                },
                RetryError::Cancelled => DindError::Cancelled { url: url.clone() },
                RetryError::NoAttempts => {
                    DindError::Config("readiness.attempts must be at least 1".into())
                }
            })
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), DindError> {
        self.outer
            .remove_container(id, force)
            .await
            .map_err(|source| DindError::Removal {
                id: id.to_string(),
                source,
            })
    }

    /// Removes whatever container the failed start left behind, without force.
    async fn teardown_after_failure(&mut self, error: DindError) -> DindError {
        let Some(id) = self.state.id().map(str::to_string) else {
            return error;
        };

        debug!(id = %id, state = self.state.name(), error = %error, "start failed, removing container");
        match self.remove(&id, false).await {
            Ok(()) => {
                self.state = LifecycleState::Removed { id };
                error
            }
            Err(cleanup) => {
                warn!(id = %id, error = %cleanup, "cleanup after failed start did not remove container");
                DindError::Cleanup {
                    error: Box::new(error),
                    cleanup: Box::new(cleanup),
                }
            }
        }
    }
}
