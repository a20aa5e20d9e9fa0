use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kaivalya_core::events::EventSink;
use kaivalya_core::CoreResult;
use kaivalya_shared::models::events::CheckoutEvent;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::error::StoreError;

#[derive(Debug, Serialize, Deserialize)]
pub struct EventRecord {
    pub recorded_at: DateTime<Utc>,
    pub event: CheckoutEvent,
}

/// Append-only JSON Lines log of checkout events. Operators read reconciliation
/// gaps from here.
#[derive(Debug)]
pub struct JsonlEventSink {
    path: PathBuf,
    write: Mutex<()>,
}

impl JsonlEventSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, event: &CheckoutEvent) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(&EventRecord {
            recorded_at: Utc::now(),
            event: event.clone(),
        })?;
        line.push('\n');

        let _guard = self.write.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(order_id = %event.order_id(), kind = event.kind(), "Event appended to {}", self.path.display());
        Ok(())
    }

    /// Every record in the log, oldest first. A missing log is empty.
    pub async fn read_all(&self) -> Result<Vec<EventRecord>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl EventSink for JsonlEventSink {
    async fn publish(&self, event: &CheckoutEvent) -> CoreResult<()> {
        self.append(event).await.map_err(|e| {
            error!(order_id = %event.order_id(), kind = event.kind(), "Failed to record event: {}", e);
            e.into()
        })
    }
}
