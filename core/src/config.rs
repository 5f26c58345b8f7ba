use crate::capability::CallPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runtime configuration. Every field has a default, so a config file
/// only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
    /// Source table. Relative paths resolve against the working directory.
    pub data_path:      Option<PathBuf>,
    /// Prior turns handed to the intent producer and the narrator.
    pub history_window: usize,
    pub intent_call:    CallPolicy,
    pub narration_call: CallPolicy,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            data_path:      None,
            history_window: 3,
            intent_call:    CallPolicy::default(),
            narration_call: CallPolicy::default(),
        }
    }
}

impl InsightConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
        let config: InsightConfig = serde_json::from_str(&content)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Short timeouts and a single retry, for tests.
    pub fn default_test() -> Self {
        let quick = CallPolicy { timeout_ms: 500, max_attempts: 2, backoff_ms: 0 };
        Self {
            data_path:      None,
            history_window: 3,
            intent_call:    quick.clone(),
            narration_call: quick,
        }
    }
}
