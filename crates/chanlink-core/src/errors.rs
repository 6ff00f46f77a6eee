use std::time::Duration;

/// Core error type.
///
/// Adapter crates map their platform errors into this type so the relay and
/// command layers can tell user-facing failures from infrastructure ones.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("platform error: {0}")]
    Platform(String),

    #[error("no free pairing code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: usize },

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Classified failure of a single delivery through an endpoint.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The endpoint was revoked or no longer exists; worth recreating.
    #[error("endpoint not found or revoked: {0}")]
    EndpointGone(String),

    #[error("permission denied: {0}")]
    Forbidden(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("delivery timed out after {0:?}")]
    TimedOut(Duration),

    /// Endpoint could not be obtained for the peer at all.
    #[error("endpoint unavailable: {0}")]
    Unavailable(String),

    #[error("delivery failed: {0}")]
    Other(String),
}

impl DeliveryError {
    pub fn is_endpoint_gone(&self) -> bool {
        matches!(self, DeliveryError::EndpointGone(_))
    }
}
