//! Dataset store — owns the loaded snapshot.
//!
//! RULE: Only the store builds datasets from a source.
//! Everything else receives an `Arc<Dataset>` and treats it as read-only.
//!
//! The store is constructed explicitly by the composition root and injected
//! where it is needed. Loading happens once (or on an explicit forced
//! reload) under a construction guard; concurrent callers share the same
//! snapshot.

use crate::{
    dataset::Dataset,
    error::{InsightError, InsightResult},
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

/// Where the store reads its table from.
#[derive(Debug, Clone)]
pub enum DataSource {
    CsvFile(PathBuf),
    CsvText(String),
}

impl DataSource {
    fn read(&self) -> InsightResult<Dataset> {
        match self {
            DataSource::CsvFile(path) => Dataset::from_csv_path(path),
            DataSource::CsvText(text) => Dataset::from_csv_str(text),
        }
    }

    fn describe(&self) -> String {
        match self {
            DataSource::CsvFile(path) => path.display().to_string(),
            DataSource::CsvText(_)    => "<inline csv>".to_string(),
        }
    }
}

pub struct DatasetStore {
    source:   Option<DataSource>,
    snapshot: RwLock<Option<Arc<Dataset>>>,
    guard:    Mutex<()>,
}

impl DatasetStore {
    pub fn new(source: DataSource) -> Self {
        Self {
            source:   Some(source),
            snapshot: RwLock::new(None),
            guard:    Mutex::new(()),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(DataSource::CsvFile(path.into()))
    }

    /// A store holding an already-built dataset (fixtures, synthetic runs).
    /// Forced reloads keep the same snapshot since there is no source.
    pub fn preloaded(dataset: Dataset) -> Self {
        Self {
            source:   None,
            snapshot: RwLock::new(Some(Arc::new(dataset))),
            guard:    Mutex::new(()),
        }
    }

    /// Return the shared snapshot, reading the source on first use or
    /// when `force_reload` is set.
    pub fn load(&self, force_reload: bool) -> InsightResult<Arc<Dataset>> {
        if !force_reload {
            if let Some(current) = self.current() {
                return Ok(current);
            }
        }

        let _guard = self
            .guard
            .lock()
            .map_err(|_| InsightError::DataLoad("dataset load guard poisoned".to_string()))?;

        // Another caller may have finished loading while we waited.
        if !force_reload {
            if let Some(current) = self.current() {
                return Ok(current);
            }
        }

        let Some(source) = &self.source else {
            return self
                .current()
                .ok_or_else(|| InsightError::DataLoad("no data source configured".to_string()));
        };

        log::info!("Loading transaction data from {}", source.describe());
        let dataset = Arc::new(source.read()?);
        log::info!("Loaded {} transactions", dataset.len());

        let mut slot = self
            .snapshot
            .write()
            .map_err(|_| InsightError::DataLoad("dataset snapshot lock poisoned".to_string()))?;
        *slot = Some(Arc::clone(&dataset));
        Ok(dataset)
    }

    /// The current snapshot without triggering a load.
    pub fn current(&self) -> Option<Arc<Dataset>> {
        self.snapshot.read().ok().and_then(|slot| slot.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.current().is_some()
    }
}
