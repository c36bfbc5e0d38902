//! CLI configuration management.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Where jobs that name a container run.
    #[serde(default)]
    pub runner: RunnerKind,
    /// Default checkout for `run`; the current directory when unset.
    #[serde(default)]
    pub workspace: Option<PathBuf>,
    /// Upper bound for a single step.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_minutes: u32,
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,
}

fn default_step_timeout() -> u32 {
    60
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            runner: RunnerKind::default(),
            workspace: None,
            step_timeout_minutes: default_step_timeout(),
            output_format: OutputFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    Host,
    #[default]
    Container,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

impl CliConfig {
    /// Load configuration from file.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::config_path()?;
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let dirs = directories::ProjectDirs::from("dev", "crossci", "crossci")
            .ok_or("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "runner" => {
                self.runner = match value {
                    "host" => RunnerKind::Host,
                    "container" => RunnerKind::Container,
                    _ => return Err(format!("Invalid runner: {}", value)),
                };
            }
            "workspace" => {
                self.workspace = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "step_timeout_minutes" => {
                self.step_timeout_minutes = match value.parse::<u32>() {
                    Ok(minutes) if minutes > 0 => minutes,
                    _ => return Err(format!("Invalid timeout in minutes: {}", value)),
                };
            }
            "output_format" => {
                self.output_format = match value {
                    "table" => OutputFormat::Table,
                    "json" => OutputFormat::Json,
                    "yaml" => OutputFormat::Yaml,
                    _ => return Err(format!("Invalid output format: {}", value)),
                };
            }
            _ => return Err(format!("Unknown config key: {}", key)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config: CliConfig = serde_yaml::from_str("output_format: json\n").unwrap();
        assert_eq!(config.output_format, OutputFormat::Json);
        assert_eq!(config.runner, RunnerKind::Container);
        assert_eq!(config.step_timeout_minutes, 60);
        assert_eq!(config.workspace, None);
    }

    #[test]
    fn test_set_valid_values() {
        let mut config = CliConfig::default();
        config.set("runner", "host").unwrap();
        config.set("workspace", "/src/meson").unwrap();
        config.set("step_timeout_minutes", "90").unwrap();
        config.set("output_format", "yaml").unwrap();

        assert_eq!(config.runner, RunnerKind::Host);
        assert_eq!(config.workspace, Some(PathBuf::from("/src/meson")));
        assert_eq!(config.step_timeout_minutes, 90);
        assert_eq!(config.output_format, OutputFormat::Yaml);

        config.set("workspace", "").unwrap();
        assert_eq!(config.workspace, None);
    }

    #[test]
    fn test_set_rejects_bad_input() {
        let mut config = CliConfig::default();
        assert!(config.set("runner", "vm").is_err());
        assert!(config.set("step_timeout_minutes", "0").is_err());
        assert!(config.set("step_timeout_minutes", "soon").is_err());
        assert!(config.set("output_format", "xml").is_err());
        assert!(config.set("api_url", "http://localhost").is_err());
    }
}
