use crate::instance::InstanceId;

/// Domain errors for the registry core
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Missing service name")]
    MissingName,

    #[error("Missing address")]
    MissingAddress,

    #[error("Instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("Service not registered: {0}")]
    ServiceNotFound(String),

    #[error("Cannot determine peer address")]
    NoPeerAddress,

    #[error("Not registering at loopback address {0}: no local address available")]
    LoopbackUnresolvable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    PeerIdentity,
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::MissingName | RegistryError::MissingAddress => ErrorKind::Validation,
            RegistryError::InstanceNotFound(_) | RegistryError::ServiceNotFound(_) => ErrorKind::NotFound,
            RegistryError::NoPeerAddress | RegistryError::LoopbackUnresolvable(_) => ErrorKind::PeerIdentity,
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
