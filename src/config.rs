use crate::resource::ResourceInit;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub feed: FeedSettings,
    pub publishing: PublishingConfig,
    pub monitoring: MonitoringConfig,
    /// Resources registered at startup (their initial REST payloads).
    #[serde(default)]
    pub resources: Vec<ResourceInit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSettings {
    /// Max queued commands (events, registrations, queries) before senders wait.
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            command_capacity: default_command_capacity(),
        }
    }
}

fn default_command_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishingConfig {
    /// Max notifications buffered for /ws/notifications (slow clients may lag).
    pub broadcast_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// How often to log feed stats at INFO level.
    pub stats_log_interval_secs: u64,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(!self.server.host.is_empty(), "server.host must be non-empty");
        anyhow::ensure!(
            self.feed.command_capacity > 0,
            "feed.command_capacity must be > 0, got {}",
            self.feed.command_capacity
        );
        anyhow::ensure!(
            self.publishing.broadcast_capacity > 0,
            "publishing.broadcast_capacity must be > 0, got {}",
            self.publishing.broadcast_capacity
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        let mut seen = std::collections::HashSet::new();
        for init in &self.resources {
            let key = init.key();
            anyhow::ensure!(
                seen.insert(key.clone()),
                "resources: {} is listed more than once",
                key
            );
        }
        Ok(())
    }
}
