use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, FileFormat};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::RwLock;

use super::error::Result;

/// Prefix for environment overrides, e.g. `MODELSYNC_MIRROR__CONCURRENCY=8`.
pub const ENV_PREFIX: &str = "MODELSYNC";

// The builder is kept (not the built Config) so later sources and overrides
// can still be layered on top after init.
lazy_static! {
    static ref BUILDER: RwLock<ConfigBuilder<DefaultState>> = RwLock::new(Config::builder());
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    /// Empty means `logs/` next to the executable
    pub dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub from_path: String,
    pub to_path: String,
    pub concurrency: usize,
    pub prune_empty_dirs: bool,
    pub progress_interval_secs: u64,
    /// Empty means `<log dir>/manifests`
    pub manifest_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub root: String,
    pub allowed_folders: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    pub days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub log: LogConfig,
    pub mirror: MirrorConfig,
    pub models: ModelsConfig,
    pub cleanup: CleanupConfig,
}

impl AppConfig {
    /// Initialize AppConfig from the embedded defaults plus environment overrides.
    pub fn init(default_config: Option<&str>) -> Result<()> {
        let mut builder = Config::builder();

        // Embed file into executable
        if let Some(config_contents) = default_config {
            builder = builder.add_source(config::File::from_str(config_contents, FileFormat::Toml));
        }

        // Merge settings with env variables
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        {
            let mut w = BUILDER.write()?;
            *w = builder;
        }

        Ok(())
    }

    /// Merge a user supplied configuration file (TOML or JSON, by extension).
    pub fn merge_config(config_file: Option<&Path>) -> Result<()> {
        if let Some(config_file_path) = config_file {
            let source = config::File::from(config_file_path.to_path_buf()).required(true);
            let mut w = BUILDER.write()?;
            *w = w.clone().add_source(source);
        }

        Ok(())
    }

    /// Override a single value, e.g. from a command line flag.
    pub fn set(key: &str, value: &str) -> Result<()> {
        let mut w = BUILDER.write()?;
        *w = w.clone().set_override(key, value)?;

        Ok(())
    }

    /// Get a single value
    pub fn get<'de, T>(key: &'de str) -> Result<T>
    where
        T: serde::Deserialize<'de>,
    {
        Ok(BUILDER.read()?.clone().build()?.get::<T>(key)?)
    }

    /// Build a snapshot of the current configuration.
    ///
    /// The snapshot does not follow later `set`/`merge_config` calls; fetch
    /// again after changing the configuration.
    pub fn fetch() -> Result<AppConfig> {
        let r = BUILDER.read()?;
        let config_clone = r.clone().build()?;
        let app_config: AppConfig = config_clone.try_deserialize()?;

        Ok(app_config)
    }
}
