use thiserror::Error;

/// Unified error type for the Swivel control layer
#[derive(Error, Debug)]
pub enum SwivelError {
    // Precondition errors
    #[error("Service not initialized: no engine service started yet")]
    NotInitialized,

    #[error("Engine already running; shut it down before starting again")]
    AlreadyRunning,

    #[error("No engine instance available")]
    NotRunning,

    // Configuration errors
    #[error("Parse config: {0}")]
    ParseConfig(#[source] anyhow::Error),

    // Transitional failures (old instance already retired)
    #[error("Create engine instance: {0}")]
    CreateInstance(#[source] anyhow::Error),

    #[error("Start engine instance: {0}")]
    StartInstance(#[source] anyhow::Error),

    // Egress resolution
    #[error("Egress not found: {0}")]
    EgressNotFound(String),

    // Request errors
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Non-success status: {0}")]
    BadStatus(u16),

    #[error("Operation timed out")]
    Timeout,

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Swivel operations
pub type Result<T> = std::result::Result<T, SwivelError>;

impl SwivelError {
    /// Whether the failure left the service without a running instance.
    ///
    /// After a transitional failure the old instance has already been
    /// retired, so the caller's only recourse is to retry the reload.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            SwivelError::CreateInstance(_) | SwivelError::StartInstance(_)
        )
    }

    /// Whether the failure occurred before any mutation of the live service.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SwivelError::NotInitialized
                | SwivelError::AlreadyRunning
                | SwivelError::NotRunning
                | SwivelError::ParseConfig(_)
        )
    }
}
