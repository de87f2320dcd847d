use thiserror::Error;

use transport::TransportError;

pub type FabricResult<T> = Result<T, FabricError>;

#[derive(Debug, Error)]
pub enum FabricError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("executor `{0}` is shut down")]
    ShutDown(String),

    #[error("failed to spawn executor thread `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid fabric configuration: {0}")]
    InvalidConfig(&'static str),
}
