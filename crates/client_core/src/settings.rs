use std::{collections::HashMap, time::Duration};

use anyhow::Context;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub server_url: String,
    /// Quiescence window for high-frequency (text) edits.
    pub debounce_ms: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8188".into(),
            debounce_ms: 300,
            retry_attempts: 3,
            retry_base_delay_ms: 200,
        }
    }
}

impl SyncSettings {
    /// Reads `nodesync.toml` from the working directory when present, then
    /// `NODESYNC__*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let builder = Config::builder()
            .add_source(File::with_name("nodesync").required(false))
            .add_source(env_source(None));
        finish(builder)
    }

    pub fn load_from(
        file_contents: Option<&str>,
        env: HashMap<String, String>,
    ) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(raw) = file_contents {
            builder = builder.add_source(File::from_str(raw, FileFormat::Toml));
        }
        finish(builder.add_source(env_source(Some(env))))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }
}

fn env_source(source: Option<HashMap<String, String>>) -> Environment {
    Environment::with_prefix("NODESYNC")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .source(source)
}

fn finish(builder: ConfigBuilder<config::builder::DefaultState>) -> anyhow::Result<SyncSettings> {
    builder
        .build()
        .context("failed to read sync settings")?
        .try_deserialize()
        .context("invalid sync settings")
}

#[cfg(test)]
#[path = "tests/settings_tests.rs"]
mod tests;
