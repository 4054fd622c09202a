mod container;
pub mod error;
pub mod traits;

pub use container::{
    ContainerDetails, ContainerSpec, ContainerState, Endpoint, ImageRef, LifecycleState,
    PortBinding, PortMap, RegistryAuth,
};
pub use error::{DindError, ErrorKind, InspectFailure, RuntimeError};
pub use traits::{ContainerRuntime, RuntimeConnector};
