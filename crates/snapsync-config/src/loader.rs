//! Configuration loader utilities

use crate::{Config, ConfigBuilder, ConfigError, ConfigResult, ENV_PREFIX};
use std::path::{Path, PathBuf};

/// Configuration loader with common loading patterns
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the first file found in the default locations
    pub fn load_default() -> ConfigResult<Config> {
        let mut builder = ConfigBuilder::new().add_defaults();

        if let Some(path) = Self::config_exists() {
            builder = builder.add_source_file(path);
        }

        builder.add_env_prefix(ENV_PREFIX).build()
    }

    /// Load configuration from a specific file, which must exist
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Configuration file not found",
                ),
            });
        }

        ConfigBuilder::new()
            .add_defaults()
            .add_source_file(path)
            .add_env_prefix(ENV_PREFIX)
            .build()
    }

    /// Save configuration to a file, format picked by extension
    pub fn save_to_file<P: AsRef<Path>>(config: &Config, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = Self::render(config, path.extension().and_then(|ext| ext.to_str()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Render a configuration as YAML, TOML or JSON
    pub fn render(config: &Config, format: Option<&str>) -> ConfigResult<String> {
        match format {
            Some("toml") => toml::to_string_pretty(config).map_err(|e| ConfigError::Serialization {
                message: format!("Failed to serialize to TOML: {}", e),
            }),
            Some("json") => {
                serde_json::to_string_pretty(config).map_err(|e| ConfigError::Serialization {
                    message: format!("Failed to serialize to JSON: {}", e),
                })
            }
            _ => serde_yaml::to_string(config).map_err(|e| ConfigError::Serialization {
                message: format!("Failed to serialize to YAML: {}", e),
            }),
        }
    }

    /// Generate a default configuration file
    pub fn generate_default_config<P: AsRef<Path>>(path: P) -> ConfigResult<()> {
        Self::save_to_file(&Config::default(), path)
    }

    /// Default configuration file paths in order of preference
    fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("snapsync.yaml"),
            PathBuf::from("snapsync.yml"),
            PathBuf::from("snapsync.toml"),
        ];

        // User config directory
        if let Some(config_dir) = dirs::config_dir() {
            let snapsync_dir = config_dir.join("snapsync");
            paths.push(snapsync_dir.join("config.yaml"));
            paths.push(snapsync_dir.join("config.toml"));
        }

        paths.push(PathBuf::from("/etc/snapsync/config.yaml"));
        paths.push(PathBuf::from("/etc/snapsync/config.toml"));

        paths
    }

    /// First configuration file present in the default locations
    pub fn config_exists() -> Option<PathBuf> {
        Self::default_config_paths()
            .into_iter()
            .find(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeRole;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.yaml");

        let mut original_config = Config::default();
        original_config.volume.path = PathBuf::from("/data");
        original_config.node.role = NodeRole::Server;
        ConfigLoader::save_to_file(&original_config, &config_path).unwrap();

        let loaded_config = ConfigLoader::load_from_file(&config_path).unwrap();
        assert_eq!(loaded_config.volume.path, PathBuf::from("/data"));
        assert_eq!(loaded_config.node.role, NodeRole::Server);
    }

    #[test]
    fn test_save_and_load_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let mut original_config = Config::default();
        original_config.timeouts.command_timeout = 45;
        ConfigLoader::save_to_file(&original_config, &config_path).unwrap();

        let loaded_config = ConfigLoader::load_from_file(&config_path).unwrap();
        assert_eq!(loaded_config.timeouts.command_timeout, 45);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let error = ConfigLoader::load_from_file(temp_dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(error, ConfigError::Io { .. }));
    }

    #[test]
    fn test_generate_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("default.yaml");

        ConfigLoader::generate_default_config(&config_path).unwrap();
        assert!(config_path.exists());

        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("snapshot_dir: .snapshots"));
        assert!(content.contains("role: client"));
    }

    #[test]
    fn test_render_json() {
        let rendered = ConfigLoader::render(&Config::default(), Some("json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["node"]["peer_port"], 8000);
    }

    #[test]
    fn test_default_paths_use_platform_config_dir() {
        let paths = ConfigLoader::default_config_paths();
        assert_eq!(paths[0], PathBuf::from("snapsync.yaml"));

        if let Some(config_dir) = dirs::config_dir() {
            assert!(paths.contains(&config_dir.join("snapsync").join("config.yaml")));
        }
        assert_eq!(
            paths.last(),
            Some(&PathBuf::from("/etc/snapsync/config.toml"))
        );
    }
}
