use anomaly_engine::{ForestParams, ModelStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file looked up when `ANOMALY_NODE_CONFIG` is not set (extension optional)
///
/// Tried relative to the working directory first, then next to the
/// executable, the same directory the default model artifact lives in.
pub const DEFAULT_CONFIG_PATH: &str = "config/detector";

/// Hard floor for `training.min_samples`
pub const MIN_TRAINING_SAMPLES: usize = 10;

/// Extensions the `config` crate tries for a file named without one
const CONFIG_EXTENSIONS: [&str; 7] = ["toml", "json", "yaml", "yml", "ini", "ron", "json5"];

/// Environment variable naming an alternative config file
pub const CONFIG_PATH_ENV: &str = "ANOMALY_NODE_CONFIG";

/// Prefix for environment overrides, e.g. `DETECTOR__FOREST__SEED=7`
pub const ENV_PREFIX: &str = "DETECTOR";

/// Main configuration for the anomaly node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Isolation Forest hyper-parameters
    pub forest: ForestParams,
    /// Training admission rules
    pub training: TrainingConfig,
    /// Model persistence
    pub store: StoreConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Training admission rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Minimum number of feature vectors accepted by `train`
    pub min_samples: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_samples: MIN_TRAINING_SAMPLES,
        }
    }
}

/// Model persistence configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Artifact location; defaults to a file next to the executable
    pub model_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level used when RUST_LOG is not set
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl DetectorConfig {
    /// Load configuration from an optional file plus `DETECTOR__*` overrides
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    /// Load from `ANOMALY_NODE_CONFIG` or the default location
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = resolve_config_path();
        Self::from_file(&path.to_string_lossy())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.forest.validate().map_err(|e| e.to_string())?;

        if self.training.min_samples < MIN_TRAINING_SAMPLES {
            return Err(format!(
                "training.min_samples must be at least {}, got {}",
                MIN_TRAINING_SAMPLES, self.training.min_samples
            ));
        }

        if let Some(path) = &self.store.model_path {
            if path.as_os_str().is_empty() {
                return Err("store.model_path cannot be empty".to_string());
            }
        }

        Ok(())
    }

    /// Model store at the configured path, or next to the executable
    pub fn model_store(&self) -> anomaly_engine::Result<ModelStore> {
        match &self.store.model_path {
            Some(path) => Ok(ModelStore::new(path.clone())),
            None => ModelStore::default_location(),
        }
    }
}

/// Config file used by [`DetectorConfig::load`]
///
/// `ANOMALY_NODE_CONFIG` wins. Otherwise `config/detector` under the working
/// directory is used if present, then `config/detector` beside the executable.
/// When neither exists the working-directory path is returned and loading
/// falls back to defaults.
pub fn resolve_config_path() -> PathBuf {
    let explicit = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    resolve_from(explicit, exe_dir.as_deref())
}

fn resolve_from(explicit: Option<PathBuf>, exe_dir: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }

    let local = PathBuf::from(DEFAULT_CONFIG_PATH);
    if config_file_exists(&local) {
        return local;
    }

    exe_dir
        .map(|dir| dir.join(DEFAULT_CONFIG_PATH))
        .filter(|candidate| config_file_exists(candidate))
        .unwrap_or(local)
}

fn config_file_exists(base: &Path) -> bool {
    base.is_file()
        || CONFIG_EXTENSIONS
            .iter()
            .any(|ext| base.with_extension(ext).is_file())
}
