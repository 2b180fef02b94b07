//! Configuration loader with multi-source merging

use crate::{LockstepConfig, Paths};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "LOCKSTEP".to_string(),
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "LOCKSTEP")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Config files in ascending precedence: user, project, then local.
    ///
    /// The user file is skipped when no home directory can be resolved.
    pub fn layered_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = Paths::new().user_config_file().into_iter().collect();
        files.push(Paths::project_config_file(&self.project_dir));
        files.push(Paths::local_config_file(&self.project_dir));
        files
    }

    /// Merges defaults, every existing layered file and `<PREFIX>_*`
    /// environment variables, then validates the result.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `LOCKSTEP_CHANNEL__BUFFER_SIZE=4096`.
    pub fn load(self) -> Result<LockstepConfig> {
        let defaults = config::Config::try_from(&LockstepConfig::default())?;
        let builder = self
            .layered_files()
            .into_iter()
            .filter(|file| file.exists())
            .fold(config::Config::builder().add_source(defaults), |builder, file| {
                builder.add_source(
                    config::File::from(file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                )
            })
            .add_source(
                config::Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let merged: LockstepConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        merged
            .validate()
            .context("Configuration failed validation")?;
        Ok(merged)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> LockstepConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_types::EndianMode;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .with_env_prefix("LOCKSTEP_TEST_DEFAULTS")
            .load()
            .expect("Failed to load config");

        assert_eq!(config, LockstepConfig::default());
    }

    #[test]
    fn test_load_project_config() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_content = r#"
[channel]
buffer_size = 4096
read_order = "little"

[file]
buffer_size = 2048

[group]
packet_size = 8192
"#;
        fs::write(project_dir.join("lockstep.toml"), config_content)
            .expect("Failed to write config");

        let config = ConfigLoader::new()
            .with_project_dir(project_dir)
            .with_env_prefix("LOCKSTEP_TEST_PROJECT")
            .load()
            .expect("Failed to load config");

        assert_eq!(config.channel.buffer_size, 4096);
        assert_eq!(config.channel.read_order, EndianMode::Little);
        assert_eq!(config.channel.write_order, EndianMode::Automatic);
        assert_eq!(config.file.buffer_size, 2048);
        assert_eq!(config.group.packet_size, 8192);
    }

    #[test]
    fn test_local_overrides() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("lockstep.toml"),
            "[channel]\nbuffer_size = 1024\n",
        )
        .expect("Failed to write project config");
        fs::write(
            project_dir.join("lockstep.local.toml"),
            "[channel]\nbuffer_size = 512\n",
        )
        .expect("Failed to write local config");

        let config = ConfigLoader::new()
            .with_project_dir(project_dir)
            .with_env_prefix("LOCKSTEP_TEST_LOCAL")
            .load()
            .expect("Failed to load config");

        // Local config should override project config
        assert_eq!(config.channel.buffer_size, 512);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        fs::write(
            temp_dir.path().join("lockstep.toml"),
            "[group]\npacket_size = 1024\n",
        )
        .expect("Failed to write config");

        let result = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .with_env_prefix("LOCKSTEP_TEST_INVALID")
            .load();
        assert!(result.is_err(), "8 KiB buffers cannot fit a 1 KiB packet");
    }

    #[test]
    fn test_layered_files_end_with_project_then_local() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let files = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .layered_files();

        let tail = &files[files.len() - 2..];
        assert_eq!(tail[0], temp_dir.path().join("lockstep.toml"));
        assert_eq!(tail[1], temp_dir.path().join("lockstep.local.toml"));
    }
}
