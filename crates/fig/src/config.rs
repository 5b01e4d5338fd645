//! Configuration
//!
//! Defaults, overridden by a TOML file, overridden by `FIG_` environment
//! variables (`__` separates nested keys, e.g. `FIG_SCRIPT__TIMEOUT_MS`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use fig_script::{EngineLimits, LoopGuardConfig};
use fig_verification::VerificationConfig;

/// Config file looked for in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "fig.toml";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "FIG_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),
}

/// Loop guard settings plus how long idle client history is kept
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopGuardSection {
    #[serde(flatten)]
    pub guard: LoopGuardConfig,

    pub idle_eviction_secs: u64,
}

impl Default for LoopGuardSection {
    fn default() -> Self {
        Self {
            guard: LoopGuardConfig::default(),
            idle_eviction_secs: 3_600,
        }
    }
}

impl LoopGuardSection {
    pub fn idle_eviction(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_secs)
    }
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FigConfig {
    /// Tracing filter used when `RUST_LOG` is not set
    pub log_filter: String,

    /// Display script interpreter limits. Memory and stack limits also apply
    /// to dynamic verifications.
    pub script: EngineLimits,

    pub loop_guard: LoopGuardSection,

    pub verification: VerificationConfig,
}

impl Default for FigConfig {
    fn default() -> Self {
        Self {
            log_filter: "fig=info".to_string(),
            script: EngineLimits::default(),
            loop_guard: LoopGuardSection::default(),
            verification: VerificationConfig::default(),
        }
    }
}

impl FigConfig {
    /// Layered providers: defaults, then the file (if present), then env
    pub fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(FigConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `fig.toml` in the working
    /// directory is used if present and defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config: FigConfig = Self::figment(&file).extract().map_err(Box::new)?;
        tracing::debug!(file = %file.display(), "Loaded configuration");
        Ok(config)
    }
}
