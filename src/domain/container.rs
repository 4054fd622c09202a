use super::error::InspectFailure;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Exited,
    Unknown,
}

/// Host side of a published container port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortBinding {
    pub host_ip: Option<String>,
    pub host_port: Option<String>,
}

/// Container port (`"2375/tcp"`) to host bindings, as the engine reports it.
pub type PortMap = HashMap<String, Option<Vec<PortBinding>>>;

/// What the outer runtime needs to create the nested daemon container.
#[derive(Debug, Clone)]
pub struct ContainerSpec<'a> {
    pub image: &'a str,
    pub privileged: bool,
    /// Container port to publish, e.g. `"2375/tcp"`.
    pub published_port: &'a str,
    pub host_ip: &'a str,
}

impl ContainerSpec<'_> {
    /// Port bindings requesting any free host port on `host_ip`.
    pub fn port_bindings(&self) -> PortMap {
        let mut bindings = PortMap::new();
        bindings.insert(
            self.published_port.to_string(),
            Some(vec![PortBinding {
                host_ip: Some(self.host_ip.to_string()),
                host_port: Some("0".to_string()),
            }]),
        );
        bindings
    }
}

#[derive(Debug, Clone)]
pub struct ContainerDetails {
    pub state: ContainerState,
    pub ports: Option<PortMap>,
}

impl ContainerDetails {
    /// Host port bound to `key`, taken from the first binding.
    pub fn host_port(&self, key: &str) -> Result<u16, InspectFailure> {
        let missing = || InspectFailure::MissingBinding {
            key: key.to_string(),
        };

        let raw = self
            .ports
            .as_ref()
            .and_then(|ports| ports.get(key))
            .and_then(|bindings| bindings.as_ref())
            .and_then(|bindings| bindings.first())
            .and_then(|binding| binding.host_port.as_deref())
            .ok_or_else(missing)?;

        let port: u16 = raw
            .trim()
            .parse()
            .map_err(|source| InspectFailure::InvalidPort {
                value: raw.to_string(),
                source,
            })?;

        if port == 0 {
            return Err(InspectFailure::UnassignedPort {
                key: key.to_string(),
            });
        }

        Ok(port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// TCP endpoint of a docker API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Client-facing form, `tcp://127.0.0.1:<port>/`.
    pub fn url(&self) -> String {
        format!("tcp://{}:{}/", self.host, self.port)
    }

    /// Address handed to HTTP clients (no trailing slash).
    pub fn address(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

/// Registry credentials passed through to image pulls.
#[derive(Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub server: Option<String>,
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("server", &self.server)
            .finish()
    }
}

/// Progress of a nested daemon through its start sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Empty,
    ImagePulled,
    Created {
        id: String,
    },
    Started {
        id: String,
    },
    Inspected {
        id: String,
        port: u16,
    },
    Ready {
        id: String,
        port: u16,
    },
    Removed {
        id: String,
    },
}

impl LifecycleState {
    /// Container id, present once a container has been created.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Empty | Self::ImagePulled => None,
            Self::Created { id }
            | Self::Started { id }
            | Self::Inspected { id, .. }
            | Self::Ready { id, .. }
            | Self::Removed { id } => Some(id),
        }
    }

    /// Host port, present once the running container has been inspected.
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Inspected { port, .. } | Self::Ready { port, .. } => Some(*port),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::ImagePulled => "image-pulled",
            Self::Created { .. } => "created",
            Self::Started { .. } => "started",
            Self::Inspected { .. } => "inspected",
            Self::Ready { .. } => "ready",
            Self::Removed { .. } => "removed",
        }
    }
}
