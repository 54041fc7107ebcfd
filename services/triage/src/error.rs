use crate::gateway::GatewayError;
use crate::trim::TrimError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a disposition or approval operation
#[derive(Error, Debug)]
pub enum DispositionError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Trim(#[from] TrimError),

    #[error("Local storage error at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Action event carries no video")]
    MissingVideo,
}

pub type Result<T, E = DispositionError> = std::result::Result<T, E>;
