//! Configuration for the Gateway Service

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    // Database
    pub database_url: Option<String>,

    // Redis
    pub redis_url: Option<String>,
    #[serde(default = "default_mq_maxlen")]
    pub redis_stream_mq_maxlen: u64,
    #[serde(default = "default_mq_ttl")]
    pub redis_stream_mq_ttl_seconds: u64,
    #[serde(default = "default_mq_block_ms")]
    pub redis_stream_mq_block_ms: u64,
    #[serde(default = "default_mq_read_count")]
    pub redis_stream_mq_read_count: usize,
    #[serde(default = "default_mq_prefix")]
    pub redis_stream_mq_prefix: String,
    #[serde(default = "default_buffer_prefix")]
    pub redis_stream_buffer_prefix: String,
    #[serde(default = "default_group_prefix")]
    pub redis_stream_mq_group_prefix: String,

    // Agent runtime
    #[serde(default = "default_agent_api")]
    pub agent_api_url: String,
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,

    // Attachment fetch
    #[serde(default = "default_fetch_timeout")]
    pub attachment_fetch_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    33001
}

fn default_mq_maxlen() -> u64 {
    10_000 // production deployments raise this to 1_000_000 via env
}

fn default_mq_ttl() -> u64 {
    3600 // 1 hour in development; production uses 300 to bound memory
}

fn default_mq_block_ms() -> u64 {
    15_000
}

fn default_mq_read_count() -> usize {
    10
}

fn default_mq_prefix() -> String {
    "mq:channel:".to_string()
}

fn default_buffer_prefix() -> String {
    "rsbuf:".to_string()
}

fn default_group_prefix() -> String {
    "mq-consumer".to_string()
}

fn default_agent_api() -> String {
    "http://localhost:8123".to_string()
}

fn default_agent_timeout() -> u64 {
    30
}

fn default_fetch_timeout() -> u64 {
    30
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file
        dotenvy::dotenv().ok();

        // Build config from environment
        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.redis_stream_mq_maxlen == 0 {
            anyhow::bail!("REDIS_STREAM_MQ_MAXLEN must be greater than zero");
        }
        if self.redis_stream_mq_ttl_seconds == 0 {
            anyhow::bail!("REDIS_STREAM_MQ_TTL_SECONDS must be greater than zero");
        }
        Ok(())
    }

    /// Checks if the database is configured
    pub fn has_database(&self) -> bool {
        self.database_url.is_some()
    }

    /// Checks if Redis is configured
    pub fn has_redis(&self) -> bool {
        self.redis_url.is_some()
    }

    /// Socket address the HTTP server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> Config {
        Config {
            host: default_host(),
            port: default_port(),
            database_url: None,
            redis_url: None,
            redis_stream_mq_maxlen: default_mq_maxlen(),
            redis_stream_mq_ttl_seconds: default_mq_ttl(),
            redis_stream_mq_block_ms: default_mq_block_ms(),
            redis_stream_mq_read_count: default_mq_read_count(),
            redis_stream_mq_prefix: default_mq_prefix(),
            redis_stream_buffer_prefix: default_buffer_prefix(),
            redis_stream_mq_group_prefix: default_group_prefix(),
            agent_api_url: default_agent_api(),
            agent_timeout_secs: default_agent_timeout(),
            attachment_fetch_timeout_secs: default_fetch_timeout(),
        }
    }

    #[test]
    fn test_default_values() {
        let config = default_config();

        assert_eq!(config.redis_stream_mq_maxlen, 10_000);
        assert_eq!(config.redis_stream_mq_ttl_seconds, 3600);
        assert_eq!(config.redis_stream_mq_block_ms, 15_000);
        assert_eq!(config.redis_stream_mq_prefix, "mq:channel:");
        assert_eq!(config.redis_stream_buffer_prefix, "rsbuf:");
        assert_eq!(config.bind_addr(), "0.0.0.0:33001");
    }

    #[test]
    fn test_validate_rejects_zero_maxlen() {
        let mut config = default_config();
        config.redis_stream_mq_maxlen = 0;
        assert!(config.validate().is_err());
    }
}
