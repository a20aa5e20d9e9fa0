use kaivalya_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Unexpected response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Telemetry already initialised: {0}")]
    Telemetry(String),

    #[error(transparent)]
    Currency(#[from] kaivalya_catalog::CurrencyError),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Status { status, message } => CoreError::Rejected { status, message },
            StoreError::Http(e) => CoreError::NetworkError(e.to_string()),
            e @ StoreError::Decode { .. } => CoreError::NetworkError(e.to_string()),
            e @ (StoreError::Io(_) | StoreError::Json(_)) => CoreError::StorageError(e.to_string()),
            e @ (StoreError::Config(_) | StoreError::Telemetry(_) | StoreError::Currency(_)) => {
                CoreError::InternalError(e.to_string())
            }
        }
    }
}
