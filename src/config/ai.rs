// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

pub const DEFAULT_AI_CONFIG_PATH: &str = "config/ai.json";
pub const ENV_AI_CONFIG_PATH: &str = "AI_CONFIG_PATH";

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_daily_limit() -> u32 {
    500
}
fn default_cache_expiry_secs() -> u64 {
    86_400
}
fn default_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub enabled: bool,
    /// Only "openai" is wired; anything else builds a disabled model.
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Real upstream calls per UTC day. Cache hits are free.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    /// "ENV" means: read from OPENAI_API_KEY
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_cache_expiry_secs")]
    pub cache_expiry_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "openai".to_string(),
            model: default_model(),
            daily_limit: default_daily_limit(),
            api_key: String::new(),
            cache_expiry_secs: default_cache_expiry_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl AiConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> anyhow::Result<Self> {
        let mut cfg: AiConfig = serde_json::from_str(data)?;

        // Normalize provider
        cfg.provider = cfg.provider.trim().to_lowercase();

        // Resolve api key if "ENV"
        if cfg.api_key.trim().eq_ignore_ascii_case("env") {
            cfg.api_key = match cfg.provider.as_str() {
                "openai" => env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?,
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
        }

        if cfg.model.trim().is_empty() {
            cfg.model = default_model();
        }
        if cfg.timeout_secs == 0 {
            cfg.timeout_secs = default_timeout_secs();
        }

        Ok(cfg)
    }

    /// `$AI_CONFIG_PATH`, else `config/ai.json`. Any failure falls back to a disabled model
    /// config; the service keeps running with placeholder summaries.
    pub fn load_default() -> Self {
        let path = env::var(ENV_AI_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_AI_CONFIG_PATH.into());
        match Self::load_from_file(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = %e, path = %path, "ai config not loaded, model disabled");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[serial_test::serial]
    #[test]
    fn env_key_is_resolved_from_environment() {
        env::set_var("OPENAI_API_KEY", "sk-test");
        let cfg = AiConfig::from_json_str(
            r#"{"enabled": true, "provider": "OpenAI", "api_key": "ENV"}"#,
        )
        .unwrap();
        assert_eq!(cfg.provider, "openai");
        assert_eq!(cfg.api_key, "sk-test");
        assert_eq!(cfg.model, "gpt-3.5-turbo");
        assert_eq!(cfg.cache_expiry_secs, 86_400);
        env::remove_var("OPENAI_API_KEY");
    }

    #[serial_test::serial]
    #[test]
    fn missing_env_key_is_an_error() {
        env::remove_var("OPENAI_API_KEY");
        let err = AiConfig::from_json_str(
            r#"{"enabled": true, "provider": "openai", "api_key": "env"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
