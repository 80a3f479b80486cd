mod env;
mod types;


pub use types::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Check every option up front so components never see an invalid value.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid option.
    pub fn validate(&self) -> anyhow::Result<()> {
        let c = &self.chunking;
        if c.chunk_size == 0 {
            bail!("chunking.chunk_size must be positive");
        }
        if c.overlap >= c.chunk_size {
            bail!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                c.overlap,
                c.chunk_size
            );
        }

        let r = &self.retrieval;
        if r.k == 0 {
            bail!("retrieval.k must be positive");
        }
        if !(0.0..=1.0).contains(&r.score_threshold) {
            bail!("retrieval.score_threshold must be within [0, 1]");
        }

        let t = self.storage.compaction_threshold;
        if !(t > 0.0 && t <= 1.0) {
            bail!("storage.compaction_threshold must be within (0, 1]");
        }
        if self.storage.data_dir.trim().is_empty() {
            bail!("storage.data_dir must not be empty");
        }

        let e = &self.embedding;
        if e.batch_size == 0 {
            bail!("embedding.batch_size must be positive");
        }
        if e.dimensions == Some(0) {
            bail!("embedding.dimensions must be positive when set");
        }
        if e.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        if e.provider == EmbeddingProviderKind::OpenAi && e.base_url.trim().is_empty() {
            bail!("embedding.base_url is required for the openai provider");
        }

        let i = &self.ingest;
        if i.max_file_size == 0 {
            bail!("ingest.max_file_size must be positive");
        }
        if i.timeout_secs == 0 {
            bail!("ingest.timeout_secs must be positive");
        }
        if i.max_concurrent == 0 {
            bail!("ingest.max_concurrent must be positive");
        }
        if i.queue_capacity == 0 {
            bail!("ingest.queue_capacity must be positive");
        }
        Ok(())
    }
}

/// Config path: `--config <path>`, then `THUTO_CONFIG`, then `config/default.toml`.
#[must_use]
pub fn resolve_config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("THUTO_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}
