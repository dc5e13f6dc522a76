//! Configuration system
//!
//! File-backed configuration for renderer settings and shader declarations.
//! RON is the primary on-disk format; TOML is accepted for flat settings
//! files.

pub use serde::{Serialize, Deserialize};

/// Configuration trait for types loadable from RON or TOML files
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file, dispatching on the file extension
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file, dispatching on the file extension
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize, Default)]
    struct Sample {
        name: String,
        frames: u32,
    }

    impl Config for Sample {}

    #[test]
    fn test_ron_round_trip_through_files() {
        let sample = Sample { name: "world".to_string(), frames: 2 };
        let path = std::env::temp_dir().join("prism_config_test.ron");
        let path = path.to_str().unwrap();

        sample.save_to_file(path).unwrap();
        let loaded = Sample::load_from_file(path).unwrap();
        assert_eq!(loaded, sample);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let result = Sample::load_from_file("settings.yaml");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_missing_file_reports_io_error() {
        let result = Sample::load_from_file("does_not_exist.ron");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
