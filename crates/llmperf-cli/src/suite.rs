//! Scenario suite files.

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, File};
use llmperf_core::Scenario;
use serde::{Deserialize, Serialize};

/// A suite file: YAML, TOML or JSON with a top-level `scenarios` array.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteFile {
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
}

impl SuiteFile {
    pub fn load(path: &Path) -> Result<Self> {
        let suite: SuiteFile = Config::builder()
            .add_source(File::from(path))
            .build()
            .with_context(|| format!("failed to read suite file {}", path.display()))?
            .try_deserialize()
            .with_context(|| format!("failed to parse suite file {}", path.display()))?;

        Ok(suite)
    }
}
