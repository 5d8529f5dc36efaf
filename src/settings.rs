//! Runtime settings, layered from defaults, an optional TOML file and
//! `IMGCLASS_*` environment variables

use crate::config::*;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Path to the TorchScript classifier
    pub model_path: String,

    /// Optional label file, one label per model output. ImageNet classes
    /// are used when absent
    pub labels_path: Option<String>,

    pub input_width: u32,
    pub input_height: u32,

    /// How many ranked predictions to keep
    pub top_n: usize,

    /// Run on CPU even when an accelerator is present
    pub cpu_only: bool,

    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            model_path: MODEL_FILE.into(),
            labels_path: None,
            input_width: INPUT_WIDTH,
            input_height: INPUT_HEIGHT,
            top_n: TOP_N,
            cpu_only: true,
            log_level: RUST_LOG.into(),
        }
    }
}

impl Settings {
    /// Load settings from `file` (if it exists) and the environment
    pub fn load<P: AsRef<Path>>(file: P) -> Result<Self> {
        let settings: Settings = ::config::Config::builder()
            .add_source(::config::File::from(file.as_ref()).required(false))
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_width == 0 || self.input_height == 0 {
            return Err(anyhow!(
                "input size must be non-zero, got {}x{}",
                self.input_width,
                self.input_height
            ));
        }
        if self.input_width > MAX_INPUT_SIDE || self.input_height > MAX_INPUT_SIDE {
            return Err(anyhow!(
                "input size {}x{} exceeds {MAX_INPUT_SIDE}x{MAX_INPUT_SIDE}",
                self.input_width,
                self.input_height
            ));
        }
        if self.top_n == 0 {
            return Err(anyhow!("top_n must be at least 1"));
        }
        if self.model_path.is_empty() {
            return Err(anyhow!("model_path must be set"));
        }
        Ok(())
    }
}
