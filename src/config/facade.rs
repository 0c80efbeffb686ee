//! Config loader: assembles the layered sources and validates the result.

use super::merge::builder_with_defaults;
use super::sources::{env, global_file, project_file};
use super::BulkConfig;
use crate::error::BulkError;
use config::builder::DefaultState;
use config::{ConfigBuilder, File};
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load defaults, the global file, the project file under `project_root`
    /// and environment overrides.
    pub fn load(project_root: &Path) -> Result<BulkConfig, BulkError> {
        let builder = builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = project_file::add_to_builder(builder, project_root)?;
        Self::finish(builder)
    }

    /// Load defaults, one explicit file (which must exist) and environment
    /// overrides. Used for `--config`.
    pub fn load_from_file(path: &Path) -> Result<BulkConfig, BulkError> {
        if !path.exists() {
            return Err(BulkError::ConfigError(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let builder = builder_with_defaults()?.add_source(File::from(path).required(true));
        Self::finish(builder)
    }

    /// `load_from_file` when a path is given, `load` otherwise.
    pub fn load_with_override(
        project_root: &Path,
        config_file: Option<&Path>,
    ) -> Result<BulkConfig, BulkError> {
        match config_file {
            Some(path) => Self::load_from_file(path),
            None => Self::load(project_root),
        }
    }

    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }

    pub fn project_config_path(project_root: &Path) -> PathBuf {
        project_file::project_config_path(project_root)
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<BulkConfig, BulkError> {
        let config: BulkConfig = env::add_to_builder(builder)?.build()?.try_deserialize()?;
        config.validate().map_err(|errors| {
            BulkError::ConfigError(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })?;
        Ok(config)
    }
}
