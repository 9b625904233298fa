use thiserror::Error;

/// Error taxonomy for the core domain. Gate decisions (§4.6) are never
/// represented here — a blocked outflow is a successful `GateOutcome`,
/// not an `Err`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation:{field}")]
    Validation { field: String },

    #[error("auth invalid")]
    AuthInvalid,

    #[error("auth stale")]
    AuthStale,

    #[error("auth replay")]
    AuthReplay,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("chain config error: {0}")]
    ChainConfig(String),

    #[error("chain tx error: {0}")]
    ChainTx(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),

    #[cfg(feature = "postgres")]
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl Error {
    pub fn validation(field: impl Into<String>) -> Self {
        Error::Validation { field: field.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
