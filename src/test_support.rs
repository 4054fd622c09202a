use crate::domain::{
    ContainerDetails, ContainerRuntime, ContainerSpec, ContainerState, Endpoint, ImageRef,
    PortBinding, PortMap, RegistryAuth, RuntimeConnector, RuntimeError,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// First host port handed out by [`MockRuntime`].
pub const MOCK_FIRST_PORT: u16 = 32768;

const PING_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Api-Version: 1.47\r\n\
Content-Length: 2\r\n\
\r\n\
OK";

/// Inspect port map publishing the nested API port on loopback `port`.
pub fn published_api_port(port: u16) -> PortMap {
    HashMap::from([(
        "2375/tcp".to_string(),
        Some(vec![PortBinding {
            host_ip: Some("127.0.0.1".to_string()),
            host_port: Some(port.to_string()),
        }]),
    )])
}

/// Loopback listener that accepts connections and never answers.
pub async fn spawn_silent_listener() -> io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    let port = listener.local_addr()?.port();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    Ok(port)
}

/// Loopback listener answering every request with the engine's `/_ping` reply.
pub async fn spawn_ping_responder() -> io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    let port = listener.local_addr()?.port();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            if socket.write_all(PING_RESPONSE).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    Ok(port)
}

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub image: String,
    pub state: ContainerState,
    pub privileged: bool,
    pub requested_ports: PortMap,
    pub host_port: Option<u16>,
}

/// In-memory outer daemon. Records every call as `"<op>:<arg>"`.
///
/// Behaves like the engine where it matters here: non-forced removal of a
/// running container is refused, removing an unknown id is a not-found error.
#[derive(Debug)]
pub struct MockRuntime {
    containers: RwLock<HashMap<String, MockContainer>>,
    commands: RwLock<Vec<String>>,
    fail_on: RwLock<Option<String>>,
    missing_images: RwLock<HashSet<String>>,
    inspect_ports: RwLock<Option<Option<PortMap>>>,
    pulled_with_auth: RwLock<Vec<Option<String>>>,
    unresponsive: AtomicBool,
    ping_failures: AtomicU64,
    next_id: AtomicU64,
    next_port: AtomicU16,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            commands: RwLock::new(Vec::new()),
            fail_on: RwLock::new(None),
            missing_images: RwLock::new(HashSet::new()),
            inspect_ports: RwLock::new(None),
            pulled_with_auth: RwLock::new(Vec::new()),
            unresponsive: AtomicBool::new(false),
            ping_failures: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            next_port: AtomicU16::new(MOCK_FIRST_PORT),
        }
    }

    /// Makes the named operation (`pull`, `create`, `start`, `inspect`,
    /// `remove`) fail.
    pub fn set_fail_on(&self, operation: &str) {
        *self.fail_on.write().unwrap() = Some(operation.to_string());
    }

    pub fn clear_fail_on(&self) {
        *self.fail_on.write().unwrap() = None;
    }

    /// Pulls of `image` (`repo:tag`) fail with not-found.
    pub fn set_missing_image(&self, image: &str) {
        self.missing_images
            .write()
            .unwrap()
            .insert(image.to_string());
    }

    /// Replaces the port map returned by inspect (`None` = no ports at all).
    pub fn set_inspect_ports(&self, ports: Option<PortMap>) {
        *self.inspect_ports.write().unwrap() = Some(ports);
    }

    /// Nested daemons never answer pings.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.unresponsive.store(unresponsive, Ordering::SeqCst);
    }

    /// The next `count` pings fail before nested daemons start answering.
    pub fn set_ping_failures(&self, count: u64) {
        self.ping_failures.store(count, Ordering::SeqCst);
    }

    pub fn get_commands(&self) -> Vec<String> {
        self.commands.read().unwrap().clone()
    }

    pub fn get_container(&self, id: &str) -> Option<MockContainer> {
        self.containers.read().unwrap().get(id).cloned()
    }

    pub fn container_count(&self) -> usize {
        self.containers.read().unwrap().len()
    }

    /// Usernames sent with each pull, in order.
    pub fn pull_auth(&self) -> Vec<Option<String>> {
        self.pulled_with_auth.read().unwrap().clone()
    }

    fn record_command(&self, cmd: String) {
        self.commands.write().unwrap().push(cmd);
    }

    fn check_fail(&self, operation: &str) -> Result<(), RuntimeError> {
        if let Some(ref fail_on) = *self.fail_on.read().unwrap() {
            if fail_on == operation {
                return Err(RuntimeError::message(format!("Mock failure on: {operation}")));
            }
        }
        Ok(())
    }

    fn serves_port(&self, port: u16) -> bool {
        self.containers
            .read()
            .unwrap()
            .values()
            .any(|c| c.state == ContainerState::Running && c.host_port == Some(port))
    }

    fn ping_nested(&self, port: u16) -> Result<(), RuntimeError> {
        self.record_command(format!("ping:{port}"));

        if self.unresponsive.load(Ordering::SeqCst) {
            return Err(RuntimeError::message("connection refused"));
        }
        let pending = self
            .ping_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(RuntimeError::message("connection reset by peer"));
        }
        if !self.serves_port(port) {
            return Err(RuntimeError::message(format!(
                "nothing listening on 127.0.0.1:{port}"
            )));
        }
        Ok(())
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.record_command("ping:outer".to_string());
        self.check_fail("ping")
    }

    async fn pull_image(
        &self,
        image: &ImageRef,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), RuntimeError> {
        self.record_command(format!("pull:{image}"));
        self.pulled_with_auth
            .write()
            .unwrap()
            .push(auth.map(|a| a.username.clone()));
        self.check_fail("pull")?;

        if self.missing_images.read().unwrap().contains(&image.to_string()) {
            return Err(RuntimeError::not_found(format!(
                "manifest for {image} not found"
            )));
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec<'_>) -> Result<String, RuntimeError> {
        self.record_command(format!("create:{}", spec.image));
        self.check_fail("create")?;

        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.containers.write().unwrap().insert(
            id.clone(),
            MockContainer {
                id: id.clone(),
                image: spec.image.to_string(),
                state: ContainerState::Created,
                privileged: spec.privileged,
                requested_ports: spec.port_bindings(),
                host_port: None,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record_command(format!("start:{id}"));
        self.check_fail("start")?;

        let mut containers = self.containers.write().unwrap();
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::not_found(format!("No such container: {id}")))?;

        let dynamic = container
            .requested_ports
            .values()
            .flatten()
            .flatten()
            .any(|b| b.host_port.as_deref() == Some("0"));
        if dynamic {
            container.host_port = Some(self.next_port.fetch_add(1, Ordering::SeqCst));
        }
        container.state = ContainerState::Running;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError> {
        self.record_command(format!("inspect:{id}"));
        self.check_fail("inspect")?;

        let container = self
            .get_container(id)
            .ok_or_else(|| RuntimeError::not_found(format!("No such container: {id}")))?;

        if let Some(ports) = self.inspect_ports.read().unwrap().clone() {
            return Ok(ContainerDetails {
                state: container.state,
                ports,
            });
        }

        let ports = container
            .requested_ports
            .iter()
            .map(|(key, requested)| {
                let bindings = requested.as_ref().map(|list| {
                    list.iter()
                        .map(|b| PortBinding {
                            host_ip: b.host_ip.clone(),
                            host_port: container.host_port.map(|p| p.to_string()),
                        })
                        .collect()
                });
                (key.clone(), bindings)
            })
            .collect();

        Ok(ContainerDetails {
            state: container.state,
            ports: Some(ports),
        })
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        self.record_command(if force {
            format!("remove:{id}:force")
        } else {
            format!("remove:{id}")
        });
        self.check_fail("remove")?;

        let mut containers = self.containers.write().unwrap();
        let running = match containers.get(id) {
            Some(c) => c.state == ContainerState::Running,
            None => return Err(RuntimeError::not_found(format!("No such container: {id}"))),
        };
        if running && !force {
            return Err(RuntimeError::message(format!(
                "You cannot remove a running container {id}. Stop the container before attempting removal or force remove"
            )));
        }

        containers.remove(id);
        Ok(())
    }
}

/// Connects to the nested daemons of a [`MockRuntime`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    outer: Arc<MockRuntime>,
}

impl MockConnector {
    pub fn new(outer: Arc<MockRuntime>) -> Self {
        Self { outer }
    }
}

impl RuntimeConnector for MockConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn ContainerRuntime>, RuntimeError> {
        Ok(Arc::new(MockNestedDaemon {
            outer: self.outer.clone(),
            port: endpoint.port,
        }))
    }
}

/// Client view of a nested daemon: answers pings while its container runs.
#[derive(Debug)]
pub struct MockNestedDaemon {
    outer: Arc<MockRuntime>,
    port: u16,
}

impl MockNestedDaemon {
    fn unsupported(&self, operation: &str) -> RuntimeError {
        RuntimeError::message(format!(
            "{operation} not supported by mock nested daemon on port {}",
            self.port
        ))
    }
}

#[async_trait]
impl ContainerRuntime for MockNestedDaemon {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.outer.ping_nested(self.port)
    }

    async fn pull_image(
        &self,
        _image: &ImageRef,
        _auth: Option<&RegistryAuth>,
    ) -> Result<(), RuntimeError> {
        Err(self.unsupported("pull"))
    }

    async fn create_container(&self, _spec: &ContainerSpec<'_>) -> Result<String, RuntimeError> {
        Err(self.unsupported("create"))
    }

    async fn start_container(&self, _id: &str) -> Result<(), RuntimeError> {
        Err(self.unsupported("start"))
    }

    async fn inspect_container(&self, _id: &str) -> Result<ContainerDetails, RuntimeError> {
        Err(self.unsupported("inspect"))
    }

    async fn remove_container(&self, _id: &str, _force: bool) -> Result<(), RuntimeError> {
        Err(self.unsupported("remove"))
    }
}
