use log::{info, warn};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://api.pinpack.app/rest/v1";
pub const DEFAULT_PLACEHOLDER_URL: &str = "placeholder://pack-cover";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    pub api_key: Option<String>,
    pub search_debounce_ms: u64,
    pub buffer_rows: usize,
    /// Leading result positions whose covers load eagerly.
    pub priority_count: usize,
    /// Grid geometry, in the renderer's units (terminal rows).
    pub intersection_margin: f64,
    pub item_height: f64,
    pub gap: f64,
    /// 0 keeps a snapshot until it is refreshed or cleared.
    pub cache_ttl_secs: u64,
    pub max_concurrent_images: usize,
    pub placeholder_url: String,
    pub suggestion_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            search_debounce_ms: 300,
            buffer_rows: 2,
            priority_count: 4,
            intersection_margin: 4.0,
            item_height: 12.0,
            gap: 1.0,
            cache_ttl_secs: 300,
            max_concurrent_images: 6,
            placeholder_url: DEFAULT_PLACEHOLDER_URL.to_string(),
            suggestion_limit: 6,
        }
    }
}

fn get_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pinpack")
        .join("config.json")
}

impl Config {
    /// Reads the config file if present, then applies environment overrides.
    pub fn load() -> Self {
        let path = get_config_path();
        let mut config = match fs::read_to_string(&path) {
            Ok(content) => Self::from_json(&content).unwrap_or_else(|e| {
                warn!("ignoring malformed config {}: {}", path.display(), e);
                Config::default()
            }),
            Err(_) => Config::default(),
        };

        if let Ok(url) = std::env::var("PINPACK_API_URL") {
            config.api_url = url;
        }
        if let Ok(key) = std::env::var("PINPACK_API_KEY") {
            config.api_key = Some(key);
        }

        info!("using catalog api at {}", config.api_url);
        config
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs))
    }
}
