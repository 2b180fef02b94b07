//! Configuration management for Lockstep
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (LOCKSTEP_* prefix, `__` between sections)
//! 2. lockstep.local.toml (gitignored, local overrides)
//! 3. lockstep.toml (git-tracked, project config)
//! 4. ~/.config/lockstep/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)
//!
//! All members of a cluster must run with the same `channel`, `file` and
//! `group` sections: buffer sizes decide where outcome boundaries fall, and
//! every node has to agree on them.

use anyhow::Result;
use lockstep_types::{DATA_HEADER_SIZE, EndianMode, MAX_CONTROL_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Lockstep configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockstepConfig {
    pub channel: ChannelConfig,
    pub file: FileConfig,
    pub group: GroupConfig,
}

/// Replicated byte-stream settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Capacity of each transfer buffer (read side and write side).
    pub buffer_size: usize,
    /// Byte order of data arriving from the peer.
    pub read_order: EndianMode,
    /// Byte order of data sent to the peer.
    pub write_order: EndianMode,
    /// Replicate the outcome of every real send to the slaves.
    pub replicate_writes: bool,
    /// Value exchanged during the automatic byte-order handshake.
    pub handshake_magic: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            buffer_size: 8192,
            read_order: EndianMode::Automatic,
            write_order: EndianMode::Automatic,
            replicate_writes: false,
            handshake_magic: 0x1234_5678,
        }
    }
}

/// Replicated file settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Largest extent the master reads and replicates in one outcome.
    pub buffer_size: usize,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self { buffer_size: 8192 }
    }
}

/// Group transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Capacity of every packet and framed message.
    pub packet_size: usize,
    /// Idle packets kept per member for reuse.
    pub pool_slots: usize,
    /// How long a slave waits for the next outcome. Unset waits forever.
    pub receive_timeout_ms: Option<u64>,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            packet_size: 16 * 1024,
            pool_slots: 64,
            receive_timeout_ms: None,
        }
    }
}

impl GroupConfig {
    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout_ms.map(Duration::from_millis)
    }
}

impl LockstepConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Parse a single TOML file without layering.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every buffer fits into one group packet and that the
    /// handshake magic can reveal a byte swap.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group.packet_size < MAX_CONTROL_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "group.packet_size = {} cannot carry a {MAX_CONTROL_SIZE}-byte failure outcome",
                self.group.packet_size
            )));
        }
        if self.group.pool_slots == 0 {
            return Err(ConfigError::ValidationError(
                "group.pool_slots must be positive".to_string(),
            ));
        }
        let magic = self.channel.handshake_magic;
        if magic == magic.swap_bytes() {
            return Err(ConfigError::ValidationError(format!(
                "channel.handshake_magic {magic:#010x} reads the same in both byte orders"
            )));
        }
        let limit = self.group.packet_size - DATA_HEADER_SIZE;
        for (name, size) in [
            ("channel.buffer_size", self.channel.buffer_size),
            ("file.buffer_size", self.file.buffer_size),
        ] {
            if size == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be positive"
                )));
            }
            if size > limit {
                return Err(ConfigError::ValidationError(format!(
                    "{name} = {size} does not fit into a {} byte packet (limit {limit})",
                    self.group.packet_size
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LockstepConfig::default();
        assert_eq!(config.channel.buffer_size, 8192);
        assert_eq!(config.channel.read_order, EndianMode::Automatic);
        assert!(!config.channel.replicate_writes);
        assert_eq!(config.group.receive_timeout(), None);
        config.validate().unwrap();
    }

    #[test]
    fn test_buffer_must_fit_packet() {
        let mut config = LockstepConfig::default();
        config.file.buffer_size = config.group.packet_size;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("file.buffer_size"));

        config.file.buffer_size = config.group.packet_size - DATA_HEADER_SIZE;
        config.validate().unwrap();
    }

    #[test]
    fn test_packet_must_hold_failure_outcome() {
        let mut config = LockstepConfig::default();
        config.group.packet_size = 64;
        config.channel.buffer_size = 32;
        config.file.buffer_size = 32;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("group.packet_size"));

        config.group.packet_size = MAX_CONTROL_SIZE;
        config.validate().unwrap();
    }

    #[test]
    fn test_symmetric_magic_rejected() {
        let mut config = LockstepConfig::default();
        config.channel.handshake_magic = 0xABCD_CDAB;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("handshake_magic"));
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let mut config = LockstepConfig::default();
        config.channel.buffer_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_from_toml_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("cluster.toml");
        std::fs::write(
            &path,
            r#"
[channel]
read_order = "big"
write_order = "native"
replicate_writes = true

[group]
receive_timeout_ms = 250
"#,
        )
        .unwrap();

        let config = LockstepConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.channel.read_order, EndianMode::Big);
        assert_eq!(config.channel.write_order, EndianMode::Native);
        assert!(config.channel.replicate_writes);
        assert_eq!(
            config.group.receive_timeout(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(config.file.buffer_size, 8192);
    }

    #[test]
    fn test_from_toml_file_reports_parse_errors() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("broken.toml");
        std::fs::write(&path, "[channel\nbuffer_size = ").unwrap();

        assert!(matches!(
            LockstepConfig::from_toml_file(&path),
            Err(ConfigError::ParseError { .. })
        ));
        assert!(matches!(
            LockstepConfig::from_toml_file(temp_dir.path().join("missing.toml")),
            Err(ConfigError::ReadError { .. })
        ));
    }
}
