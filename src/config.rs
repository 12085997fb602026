//! # Configuration Management
//!
//! Loads the service configuration from several layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` next to the binary
//! - Environment variables with the `APP__` prefix (e.g. `APP__EXAM__HISTORY_WINDOW=12`)
//! - The platform-style `HOST` / `PORT` variables
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT`
//! 2. `APP__*` environment variables
//! 3. `config.toml`
//! 4. Defaults
//!
//! Nested keys use a double underscore separator because several field names
//! (`history_window`, `base_url`, ...) already contain single underscores.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Root configuration for the examination service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub exam: ExamConfig,
    pub ai: AiServiceConfig,
    pub performance: PerformanceConfig,
}

/// Where the HTTP / WebSocket server listens.
///
/// - `host = "127.0.0.1"`: localhost only (development)
/// - `host = "0.0.0.0"`: every interface (containers, production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Examination protocol tuning.
///
/// ## Fields:
/// - `history_window`: how many recent turns the Responder sees per request
/// - `question_pool_capacity`: fingerprints kept before the pool resets itself
/// - `question_attempts`: candidates requested before accepting a repeat
/// - `send_greeting`: open every connection with an examiner greeting turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamConfig {
    pub history_window: usize,
    pub question_pool_capacity: usize,
    pub question_attempts: u32,
    pub send_greeting: bool,
}

/// The external AI service that backs transcription, examiner replies,
/// speech synthesis and evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiServiceConfig {
    pub base_url: String,
    /// Upper bound for any single collaborator call
    pub timeout_secs: u64,
}

/// Capacity and connection-health limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    /// Inbound frames buffered per connection while a turn is being processed
    pub inbound_queue_size: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            exam: ExamConfig {
                history_window: 10,
                question_pool_capacity: 200,
                question_attempts: 5,
                send_greeting: true,
            },
            ai: AiServiceConfig {
                base_url: "http://127.0.0.1:5000".to_string(),
                timeout_secs: 30,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 100,
                inbound_queue_size: 32,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP__SERVER__PORT=3000`
    /// - `APP__AI__BASE_URL=https://speaking-ai.internal`
    /// - `APP__PERFORMANCE__MAX_CONCURRENT_SESSIONS=250`
    /// - `PORT=3000` (deployment platforms)
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.exam.history_window == 0 {
            return Err(anyhow::anyhow!("History window must be greater than 0"));
        }

        if self.exam.question_pool_capacity == 0 {
            return Err(anyhow::anyhow!("Question pool capacity must be greater than 0"));
        }

        if self.exam.question_attempts == 0 {
            return Err(anyhow::anyhow!("Question attempts must be greater than 0"));
        }

        if self.ai.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("AI service base URL cannot be empty"));
        }

        if self.ai.timeout_secs == 0 {
            return Err(anyhow::anyhow!("AI service timeout must be greater than 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.performance.inbound_queue_size == 0 {
            return Err(anyhow::anyhow!("Inbound queue size must be greater than 0"));
        }

        if self.performance.client_timeout_secs <= self.performance.heartbeat_interval_secs {
            return Err(anyhow::anyhow!(
                "Client timeout must be longer than the heartbeat interval"
            ));
        }

        Ok(())
    }

    /// Timeout applied to every collaborator call.
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.ai.timeout_secs)
    }

    /// Apply a partial JSON update (used by `PUT /api/v1/config`).
    ///
    /// Only the fields present in the payload change; e.g.
    /// `{"exam": {"history_window": 6}}` leaves everything else untouched.
    /// The result is validated before returning.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Port {} is out of range", port))?;
            }
        }

        if let Some(exam) = partial_config.get("exam") {
            if let Some(window) = exam.get("history_window").and_then(|v| v.as_u64()) {
                self.exam.history_window = window as usize;
            }
            if let Some(capacity) = exam.get("question_pool_capacity").and_then(|v| v.as_u64()) {
                self.exam.question_pool_capacity = capacity as usize;
            }
            if let Some(attempts) = exam.get("question_attempts").and_then(|v| v.as_u64()) {
                self.exam.question_attempts = attempts as u32;
            }
            if let Some(greeting) = exam.get("send_greeting").and_then(|v| v.as_bool()) {
                self.exam.send_greeting = greeting;
            }
        }

        if let Some(ai) = partial_config.get("ai") {
            if let Some(base_url) = ai.get("base_url").and_then(|v| v.as_str()) {
                self.ai.base_url = base_url.to_string();
            }
            if let Some(timeout) = ai.get("timeout_secs").and_then(|v| v.as_u64()) {
                self.ai.timeout_secs = timeout;
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance.get("max_concurrent_sessions").and_then(|v| v.as_u64()) {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
            if let Some(queue) = performance.get("inbound_queue_size").and_then(|v| v.as_u64()) {
                self.performance.inbound_queue_size = queue as usize;
            }
            if let Some(interval) = performance.get("heartbeat_interval_secs").and_then(|v| v.as_u64()) {
                self.performance.heartbeat_interval_secs = interval;
            }
            if let Some(timeout) = performance.get("client_timeout_secs").and_then(|v| v.as_u64()) {
                self.performance.client_timeout_secs = timeout;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.exam.history_window, 10);
        assert_eq!(config.exam.question_pool_capacity, 200);
        assert_eq!(config.exam.question_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.ai.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.client_timeout_secs = config.performance.heartbeat_interval_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"exam": {"history_window": 6}, "ai": {"timeout_secs": 5}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.exam.history_window, 6);
        assert_eq!(config.ai.timeout_secs, 5);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"server": {"port": 70000}}"#).is_err());
        assert!(config.update_from_json(r#"{"exam": {"question_attempts": 0}}"#).is_err());
    }

    #[test]
    fn test_config_from_toml_file_contents() {
        let raw = r#"
[server]
host = "0.0.0.0"
port = 9000

[exam]
history_window = 8
question_pool_capacity = 50
question_attempts = 3
send_greeting = false

[ai]
base_url = "http://speaking-ai:5000"
timeout_secs = 12

[performance]
max_concurrent_sessions = 4
inbound_queue_size = 8
heartbeat_interval_secs = 10
client_timeout_secs = 25
"#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.collaborator_timeout(), Duration::from_secs(12));
        assert!(!config.exam.send_greeting);
    }
}
