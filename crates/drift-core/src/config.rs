use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

/// Tuning for the related-track search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// How many results to request from yt-dlp per search.
    #[serde(default = "default_result_count")]
    pub result_count: u32,
    /// The winner is drawn at random from the first `shortlist` usable
    /// results, so playback stays close to the most relevant matches.
    #[serde(default = "default_shortlist")]
    pub shortlist: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Play-history file. Defaults to `<data_dir>/history.json`.
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            result_count: default_result_count(),
            shortlist: default_shortlist(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            history_file: default_history_file(),
        }
    }
}

fn default_volume() -> f32 {
    0.5
}

fn default_result_count() -> u32 {
    5
}

fn default_shortlist() -> usize {
    3
}

fn default_history_file() -> PathBuf {
    platform::data_dir().join("history.json")
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.discovery.result_count, 5);
        assert_eq!(config.discovery.shortlist, 3);
        assert_eq!(config.mpv.default_volume, 0.5);
        assert!(config.paths.history_file.ends_with("history.json"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str("[discovery]\nresult_count = 8\n").unwrap();
        assert_eq!(config.discovery.result_count, 8);
        assert_eq!(config.discovery.shortlist, 3);
        assert_eq!(config.mpv.default_volume, 0.5);
    }
}
