use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::StoreError;

pub const DEFAULT_FILTER: &str = "kaivalya=debug";

/// Install the global subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init(default_filter: &str) -> Result<(), StoreError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| StoreError::Telemetry(e.to_string()))
}
