use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;

/// User-level defaults, read from `config.toml` in the platform config directory.
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Number of alignments between progress log lines.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Default aggregator settings, using the same keys accepted by `--setting`.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

fn default_progress_interval() -> u64 {
    25_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            progress_interval: default_progress_interval(),
            settings: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn path() -> Option<PathBuf> {
        ProjectDirs::from("org", "labkey", "sequence-analysis")
            .map(|proj_dirs| proj_dirs.config_dir().join("config.toml"))
    }

    pub fn load() -> Self {
        if let Some(config_path) = Self::path() {
            if config_path.exists() {
                match fs::read_to_string(&config_path) {
                    Ok(content) => match toml::from_str(&content) {
                        Ok(config) => return config,
                        Err(e) => log::warn!("Ignoring malformed config {}: {}", config_path.display(), e),
                    },
                    Err(e) => log::warn!("Unable to read config {}: {}", config_path.display(), e),
                }
            }
        }
        Config::default()
    }

    pub fn save(&self) -> anyhow::Result<PathBuf> {
        let config_path = Self::path()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine a config directory"))?;
        if let Some(config_dir) = config_path.parent() {
            fs::create_dir_all(config_dir)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Config defaults overlaid with command line `key=value` pairs; later pairs win.
    pub fn merged_settings(&self, overrides: &[(String, String)]) -> HashMap<String, String> {
        let mut merged: HashMap<String, String> = self
            .settings
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}
