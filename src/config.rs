use dotenvy::dotenv;
use serde::{Deserialize, Deserializer};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub discord_token: Option<String>,
    pub guild_id: Option<u64>,
    pub digest_channel_id: Option<u64>,
    pub database_url: String,
    pub time_window_hours: i64,
    pub top_n_convos: usize,
    pub llm_url: Option<String>,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub llm_timeout_secs: u64,
    pub progress_log_path: String,
    pub run_id: Option<String>,
    pub schedule_interval: Duration,
    pub indexer: IndexerSettings,
}

/// Tuning for the message indexer. Every field can be overridden from the
/// `[indexer]` table of the TOML config file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexerSettings {
    /// Channels fetched at once in incremental mode.
    pub concurrency: usize,
    pub page_size: u8,
    #[serde(deserialize_with = "humantime_duration")]
    pub pacing: Duration,
    /// Wait used when a rate limit response carries no retry-after.
    #[serde(deserialize_with = "humantime_duration")]
    pub rate_limit_default: Duration,
    #[serde(deserialize_with = "humantime_duration")]
    pub rate_limit_jitter: Duration,
    #[serde(deserialize_with = "humantime_duration")]
    pub backoff_base: Duration,
    #[serde(deserialize_with = "humantime_duration")]
    pub backoff_cap: Duration,
    pub max_retries: u32,
    /// Lookback for channels that have never been indexed.
    pub lookback_hours: i64,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            page_size: 100,
            pacing: Duration::from_millis(250),
            rate_limit_default: Duration::from_secs(3),
            rate_limit_jitter: Duration::from_millis(500),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            max_retries: 5,
            lookback_hours: 72,
        }
    }
}

fn humantime_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    indexer: Option<IndexerSettings>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let time_window_hours = env::var("TIME_WINDOW_HOURS")
            .unwrap_or_else(|_| "72".to_string())
            .parse()
            .unwrap_or(72);

        let config_path = env::var("DIGEST_CONFIG").unwrap_or_else(|_| "digest.toml".to_string());
        let mut indexer = Self::load_indexer_settings(Path::new(&config_path))?;
        if env::var("TIME_WINDOW_HOURS").is_ok() {
            indexer.lookback_hours = time_window_hours;
        }

        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .or_else(|_| env::var("TOKEN"))
                .ok()
                .filter(|t| !t.trim().is_empty()),
            guild_id: env::var("GUILD_ID").ok().and_then(|id| id.parse().ok()),
            digest_channel_id: env::var("DIGEST_CHANNEL_ID")
                .ok()
                .and_then(|id| id.parse().ok()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/digest.db".to_string()),
            time_window_hours,
            top_n_convos: env::var("TOP_N_CONVOS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            llm_url: env::var("LLM_URL").ok().filter(|u| !u.trim().is_empty()),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "local-model".to_string()),
            llm_api_key: env::var("LLM_API_KEY").ok(),
            llm_timeout_secs: env::var("LLM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            progress_log_path: env::var("PROGRESS_LOG_PATH")
                .unwrap_or_else(|_| "data/index_progress.jsonl".to_string()),
            run_id: env::var("DIGEST_RUN_ID").ok(),
            schedule_interval: env::var("SCHEDULE_INTERVAL")
                .ok()
                .and_then(|raw| humantime::parse_duration(&raw).ok())
                .unwrap_or(Duration::from_secs(24 * 3600)),
            indexer,
        })
    }

    /// Reads the `[indexer]` table when the file exists. A missing file
    /// means defaults; a malformed one is an error.
    pub fn load_indexer_settings(path: &Path) -> anyhow::Result<IndexerSettings> {
        let Ok(content) = fs::read_to_string(path) else {
            return Ok(IndexerSettings::default());
        };
        let file: FileConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config file {}: {}", path.display(), e))?;
        Ok(file.indexer.unwrap_or_default())
    }

    pub fn require_token(&self) -> anyhow::Result<&str> {
        self.discord_token
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("DISCORD_TOKEN (or TOKEN) must be set"))
    }

    pub fn require_guild(&self) -> anyhow::Result<u64> {
        self.guild_id
            .ok_or_else(|| anyhow::anyhow!("GUILD_ID must be set to a valid guild id"))
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field(
                "discord_token",
                &self.discord_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("guild_id", &self.guild_id)
            .field("digest_channel_id", &self.digest_channel_id)
            .field("database_url", &self.database_url)
            .field("time_window_hours", &self.time_window_hours)
            .field("top_n_convos", &self.top_n_convos)
            .field("llm_url", &self.llm_url)
            .field("llm_model", &self.llm_model)
            .field(
                "llm_api_key",
                &self.llm_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("llm_timeout_secs", &self.llm_timeout_secs)
            .field("progress_log_path", &self.progress_log_path)
            .field("run_id", &self.run_id)
            .field("schedule_interval", &self.schedule_interval)
            .field("indexer", &self.indexer)
            .finish()
    }
}

/// Discord message limit is 2000 characters; digests stay well under it.
pub const DIGEST_BLOCK_LIMIT: usize = 1800;
