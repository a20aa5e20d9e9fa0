use kaivalya_core::preferences::PreferenceStore;
use kaivalya_core::{CoreError, CoreResult};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::warn;

use crate::error::StoreError;

/// Preferences kept in a small JSON object on disk.
///
/// Every `set` rewrites the whole file through a temporary sibling and a rename, so
/// a crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    values: RwLock<HashMap<String, String>>,
}

impl FilePreferenceStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => HashMap::new(),
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!("Ignoring unreadable preferences at {}: {}", path.display(), e);
                HashMap::new()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &HashMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        let previous = values.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&values) {
            // Keep memory and disk in agreement
            match previous {
                Some(old) => values.insert(key.to_string(), old),
                None => values.remove(key),
            };
            return Err(CoreError::from(e));
        }
        Ok(())
    }
}
