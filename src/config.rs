use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_ORDER_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_SEAL_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub assets_dir: PathBuf,
    pub api_key: Option<String>,
    pub gemini_base_url: String,
    pub order_model: String,
    pub seal_model: String,
    pub llm_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            assets_dir: PathBuf::from("assets"),
            api_key: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            order_model: DEFAULT_ORDER_MODEL.to_string(),
            seal_model: DEFAULT_SEAL_MODEL.to_string(),
            llm_timeout: Duration::from_secs(120),
            max_upload_bytes: 32 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick
    /// up a `.env` file.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let timeout_secs: u64 =
            parse_var(&get, "LLM_TIMEOUT_SECS", defaults.llm_timeout.as_secs())?;
        let max_upload_mb: usize =
            parse_var(&get, "MAX_UPLOAD_MB", defaults.max_upload_bytes / (1024 * 1024))?;

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_var(&get, "PORT", defaults.port)?,
            assets_dir: get("ASSETS_DIR").map(PathBuf::from).unwrap_or(defaults.assets_dir),
            api_key: get("GOOGLE_API_KEY"),
            gemini_base_url: get("GEMINI_BASE_URL").unwrap_or(defaults.gemini_base_url),
            order_model: get("ORDER_MODEL").unwrap_or(defaults.order_model),
            seal_model: get("SEAL_MODEL").unwrap_or(defaults.seal_model),
            llm_timeout: Duration::from_secs(timeout_secs),
            max_upload_bytes: max_upload_mb * 1024 * 1024,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw.parse().with_context(|| format!("invalid {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_variables() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8000");
        assert_eq!(config.assets_dir, PathBuf::from("assets"));
        assert_eq!(config.api_key, None);
        assert_eq!(config.order_model, DEFAULT_ORDER_MODEL);
        assert_eq!(config.seal_model, DEFAULT_SEAL_MODEL);
        assert_eq!(config.max_upload_bytes, 32 * 1024 * 1024);
    }

    #[test]
    fn variables_override_defaults() {
        let config = config_from(&[
            ("PORT", "9000"),
            ("ASSETS_DIR", "/srv/assets"),
            ("GOOGLE_API_KEY", " secret "),
            ("LLM_TIMEOUT_SECS", "30"),
            ("MAX_UPLOAD_MB", "4"),
        ])
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.assets_dir, PathBuf::from("/srv/assets"));
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.llm_timeout, Duration::from_secs(30));
        assert_eq!(config.max_upload_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        assert_eq!(config_from(&[("GOOGLE_API_KEY", "  ")]).unwrap().api_key, None);
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = config_from(&[("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("invalid PORT"));
    }
}
