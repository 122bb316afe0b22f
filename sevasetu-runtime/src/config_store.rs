use anyhow::Context;
use std::path::{Path, PathBuf};

use sevasetu_core::AppSettings;

use crate::fs::write_atomic;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> anyhow::Result<AppSettings> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("read settings: {}", self.path.display()))?;
        let settings: AppSettings =
            serde_json::from_slice(&bytes).context("decode settings JSON")?;
        Ok(settings)
    }

    /// Missing file means defaults; a file that exists but does not parse is an error.
    pub fn load_or_default(&self) -> anyhow::Result<AppSettings> {
        if !self.path.exists() {
            return Ok(AppSettings::default());
        }
        self.load()
    }

    pub fn save(&self, settings: &AppSettings) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(settings).context("encode settings JSON")?;
        write_atomic(&self.path, &json)
    }
}
