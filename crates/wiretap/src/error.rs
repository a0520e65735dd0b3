use thiserror::Error;
use wiretap_protocol_core::{RegistryError, VersionDescriptor, VersionError};

#[derive(Debug, Error)]
pub enum WiretapError {
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("Process already runs as {installed}, cannot intercept as {requested}")]
    VersionMismatch {
        installed: VersionDescriptor,
        requested: VersionDescriptor,
    },
    #[error("Interception has been shut down")]
    ShutDown,
}
