use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Which transport feeds the status model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[serde(alias = "long-poll")]
    LongPoll,
    #[serde(alias = "websocket")]
    Push,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Base URL of the backup server, e.g. `http://127.0.0.1:8200`.
    pub server_url: String,
    pub transport: TransportKind,
    /// How long the server may hold a long-poll request open.
    pub longpoll_hold_secs: u64,
    /// Consecutive transport failures before the status turns `disconnected`.
    pub failure_threshold: u32,
    pub retry_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub reconnect_delay_secs: u64,
    pub progress_interval_ms: u64,
    pub request_timeout_secs: u64,
    /// Loopback address the UI talks to.
    pub listen_addr: String,
    /// Optional static bearer credential. Never logged.
    pub access_token: Option<String>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8200".to_string(),
            transport: TransportKind::LongPoll,
            longpoll_hold_secs: 29,
            failure_threshold: 3,
            retry_delay_ms: 500,
            retry_max_delay_ms: 10_000,
            reconnect_delay_secs: 5,
            progress_interval_ms: 1_000,
            request_timeout_secs: 60,
            listen_addr: "127.0.0.1:7879".to_string(),
            access_token: None,
        }
    }
}

impl ConsoleConfig {
    /// Reads `config.json`, writing the defaults on first run.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save()?;
                return Ok(config);
            }
            Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
        };
        let mut config: ConsoleConfig =
            serde_json::from_str(&content).with_context(|| format!("parse {}", path.display()))?;
        config.enforce_invariants();
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path()?;
        let dir = path.parent().context("config path has no parent")?;
        fs::create_dir_all(dir).context("create config dir")?;
        let content = serde_json::to_vec_pretty(self).context("serialize config")?;
        fs::write(&path, content).with_context(|| format!("write {}", path.display()))
    }

    pub fn config_path() -> anyhow::Result<PathBuf> {
        let proj = ProjectDirs::from("com", "aegis", "Aegis Console").context("resolve config dir")?;
        Ok(proj.config_dir().join("config.json"))
    }

    pub fn enforce_invariants(&mut self) {
        self.failure_threshold = self.failure_threshold.max(1);
        self.longpoll_hold_secs = self.longpoll_hold_secs.clamp(1, 300);
        self.progress_interval_ms = self.progress_interval_ms.max(100);
        self.retry_delay_ms = self.retry_delay_ms.max(1);
        self.retry_max_delay_ms = self.retry_max_delay_ms.max(self.retry_delay_ms);
        self.reconnect_delay_secs = self.reconnect_delay_secs.max(1);
        // The request timeout must outlive a held long-poll, or every poll would fail.
        self.request_timeout_secs = self.request_timeout_secs.max(self.longpoll_hold_secs + 5);
        while self.server_url.ends_with('/') {
            self.server_url.pop();
        }
    }

    pub fn longpoll_hold(&self) -> Duration {
        Duration::from_secs(self.longpoll_hold_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
