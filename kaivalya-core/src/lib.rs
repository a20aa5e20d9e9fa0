pub mod backend;
pub mod events;
pub mod payment;
pub mod preferences;

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Gateway error: {0}")]
    GatewayError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl CoreError {
    /// Transport and timeout failures of a backend round trip, plus server-side
    /// statuses worth retrying. A 4xx answer means the backend was reached and said no.
    pub fn is_network(&self) -> bool {
        match self {
            CoreError::NetworkError(_) | CoreError::Timeout(_) => true,
            CoreError::Rejected { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Bound a backend call. Elapsed deadlines surface as `CoreError::Timeout` so callers
/// can offer a retry instead of waiting forever.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> CoreResult<T>
where
    F: std::future::Future<Output = CoreResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::Timeout(limit)),
    }
}
