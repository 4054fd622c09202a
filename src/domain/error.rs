use std::num::ParseIntError;
use thiserror::Error;

/// Failure reported by a [`ContainerRuntime`](super::ContainerRuntime) implementation.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),

    #[error("{message}")]
    Other { message: String, not_found: bool },
}

impl RuntimeError {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
            not_found: false,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
            not_found: true,
        }
    }

    /// True when the remote daemon answered 404 (no such container/image).
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Docker(bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                ..
            }) => true,
            Self::Docker(_) => false,
            Self::Other { not_found, .. } => *not_found,
        }
    }
}

/// Why the published API port could not be read from an inspect response.
#[derive(Debug, Error)]
pub enum InspectFailure {
    #[error(transparent)]
    Runtime(RuntimeError),

    #[error("no host binding published for {key}")]
    MissingBinding { key: String },

    #[error("unable to convert port {value} to integer")]
    InvalidPort {
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("host port for {key} is unassigned (0)")]
    UnassignedPort { key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Pull,
    Create,
    Start,
    Inspect,
    AlreadyRunning,
    ReadinessTimeout,
    Removal,
    Config,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum DindError {
    #[error("unable to connect to docker at {endpoint}")]
    Connection {
        endpoint: String,
        #[source]
        source: RuntimeError,
    },

    #[error("unable to pull image {image}")]
    Pull {
        image: String,
        #[source]
        source: RuntimeError,
    },

    #[error("unable to create {image}")]
    Create {
        image: String,
        #[source]
        source: RuntimeError,
    },

    #[error("unable to start {image} ({id})")]
    Start {
        image: String,
        id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("unable to inspect {id}")]
    Inspect {
        id: String,
        #[source]
        source: InspectFailure,
    },

    #[error("daemon already running at {id}")]
    AlreadyRunning { id: String },

    #[error("daemon at {url} not reachable after {attempts} attempts")]
    ReadinessTimeout {
        url: String,
        attempts: u32,
        #[source]
        source: RuntimeError,
    },

    #[error("unable to remove container {id}")]
    Removal {
        id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("readiness wait for {url} cancelled")]
    Cancelled { url: String },

    /// A start step failed and the cleanup removal that followed failed too.
    /// The start failure is the source.
    #[error("start failed and cleanup failed: {cleanup}{}", reason(.cleanup))]
    Cleanup {
        #[source]
        error: Box<DindError>,
        cleanup: Box<DindError>,
    },
}

/// `": <source>"` for errors that carry one.
fn reason(err: &DindError) -> String {
    std::error::Error::source(err)
        .map(|source| format!(": {source}"))
        .unwrap_or_default()
}

impl DindError {
    /// Kind of the original failure. A failed cleanup does not change it.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Pull { .. } => ErrorKind::Pull,
            Self::Create { .. } => ErrorKind::Create,
            Self::Start { .. } => ErrorKind::Start,
            Self::Inspect { .. } => ErrorKind::Inspect,
            Self::AlreadyRunning { .. } => ErrorKind::AlreadyRunning,
            Self::ReadinessTimeout { .. } => ErrorKind::ReadinessTimeout,
            Self::Removal { .. } => ErrorKind::Removal,
            Self::Config(_) => ErrorKind::Config,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Cleanup { error, .. } => error.kind(),
        }
    }

    /// The failure that aborted the operation, unwrapping any cleanup chain.
    pub fn primary(&self) -> &DindError {
        match self {
            Self::Cleanup { error, .. } => error.primary(),
            other => other,
        }
    }

    /// The removal failure that followed the primary error, if any.
    pub fn cleanup_error(&self) -> Option<&DindError> {
        match self {
            Self::Cleanup { cleanup, .. } => Some(cleanup),
            _ => None,
        }
    }
}
