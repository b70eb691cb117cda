use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Monitor configuration, read once at startup and handed to each component.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telegram_token: String,
    pub chat_id: String,

    /// Site origin, also used to resolve relative links
    pub base_url: String,
    pub search_path: String,
    pub keywords: Vec<String>,
    /// Region filter, empty means all regions
    pub regions: Vec<String>,

    pub check_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,

    pub user_agents: Vec<String>,
    pub proxies: Vec<String>,
    pub accept_language: String,

    pub notification_cooldown_ms: u64,
    pub pending_limit: usize,
    pub recency_markers: Vec<String>,

    /// Log lines are appended here as well as printed to the console
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram_token: String::new(),
            chat_id: String::new(),
            base_url: "https://www.ouedkniss.com".to_string(),
            search_path: "/automobiles_vehicules/1".to_string(),
            keywords: [
                "Transporter",
                "Multivan",
                "Transporteur",
                "Caravelle",
                "Kombi",
                "طروسبورتار",
                "ميلتيفان",
                "T5",
                "T6",
                "T6.1",
                "طرانسبورتاو",
                "golf",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            regions: Vec::new(),
            check_interval_secs: 5 * 60,
            request_timeout_secs: 25,
            max_retries: 3,
            user_agents: [
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Safari/605.1.15",
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
                "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            proxies: Vec::new(),
            accept_language: "ar,fr-FR;q=0.9,fr;q=0.8,en-US;q=0.7,en;q=0.6".to_string(),
            notification_cooldown_ms: 2000,
            pending_limit: crate::db::DEFAULT_PENDING_LIMIT,
            recency_markers: crate::extract::DEFAULT_RECENCY_MARKERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load from an optional JSON file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid config file: {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_env_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = var("TELEGRAM_BOT_TOKEN") {
            self.telegram_token = token.trim().to_string();
        }
        if let Some(chat_id) = var("TELEGRAM_CHAT_ID") {
            self.chat_id = chat_id.trim().to_string();
        }
        if let Some(keywords) = var("LISTING_WATCH_KEYWORDS") {
            let keywords: Vec<String> = keywords
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !keywords.is_empty() {
                self.keywords = keywords;
            }
        }
        if let Some(path) = var("LISTING_WATCH_LOG_FILE") {
            let path = path.trim();
            if !path.is_empty() {
                self.log_file = Some(PathBuf::from(path));
            }
        }
    }

    pub fn validate(&self, require_channel: bool) -> Result<()> {
        if self.keywords.is_empty() {
            bail!("No keywords configured");
        }
        if self.check_interval_secs == 0 {
            bail!("check_interval_secs must be greater than zero");
        }
        if url::Url::parse(&self.base_url).is_err() {
            bail!("base_url is not a valid URL: {}", self.base_url);
        }
        if require_channel {
            if self.telegram_token.is_empty() {
                bail!("Telegram token not set. Set TELEGRAM_BOT_TOKEN or telegram_token in the config file");
            }
            if self.chat_id.is_empty() {
                bail!("Telegram chat id not set. Set TELEGRAM_CHAT_ID or chat_id in the config file");
            }
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn notification_cooldown(&self) -> Duration {
        Duration::from_millis(self.notification_cooldown_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.keywords.len(), 12);
        assert_eq!(config.keywords[0], "Transporter");
        assert_eq!(config.check_interval(), Duration::from_secs(300));
        assert_eq!(config.request_timeout(), Duration::from_secs(25));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.notification_cooldown(), Duration::from_secs(2));
        assert_eq!(config.pending_limit, 10);
        assert!(config.regions.is_empty());
        assert!(config.proxies.is_empty());
        assert_eq!(config.user_agents.len(), 4);
        assert_eq!(config.log_file, None);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"keywords": ["golf"], "regions": ["16", "31"]}"#).unwrap();
        assert_eq!(config.keywords, vec!["golf"]);
        assert_eq!(config.regions, vec!["16", "31"]);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_url, "https://www.ouedkniss.com");

        let config: Config = serde_json::from_str(r#"{"log_file": "monitor.log"}"#).unwrap();
        assert_eq!(config.log_file, Some(PathBuf::from("monitor.log")));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TELEGRAM_BOT_TOKEN", " 123:abc \n"),
            ("TELEGRAM_CHAT_ID", "5686"),
            ("LISTING_WATCH_KEYWORDS", "Kombi, T5,,"),
            ("LISTING_WATCH_LOG_FILE", "/var/log/listing-watch.log"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.telegram_token, "123:abc");
        assert_eq!(config.chat_id, "5686");
        assert_eq!(config.keywords, vec!["Kombi", "T5"]);
        assert_eq!(config.log_file, Some(PathBuf::from("/var/log/listing-watch.log")));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate(false).is_ok());
        assert!(config.validate(true).is_err());

        config.telegram_token = "token".to_string();
        config.chat_id = "chat".to_string();
        assert!(config.validate(true).is_ok());

        config.keywords.clear();
        assert!(config.validate(false).is_err());

        let config = Config {
            check_interval_secs: 0,
            ..Config::default()
        };
        assert!(config.validate(false).is_err());
    }
}
