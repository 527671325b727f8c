use reqwest::Url;

use crate::adapters::backend::DEFAULT_REQUEST_TIMEOUT;
use crate::adapters::live_channel::DEFAULT_RECONNECT_DELAY;
use crate::app::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub device_id: String,
    pub backend_api_url: String,
    pub backend_ws_url: String,
    pub http_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub http_bind: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        if let Err(error) = dotenvy::dotenv()
            && !error.not_found()
        {
            return Err(AppError::config(format!("failed to read .env file: {error}")));
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend_api_url = string_or_default(&lookup, "BACKEND_API_URL", "http://127.0.0.1:9000");
        require_url(&backend_api_url, "BACKEND_API_URL", &["http", "https"])?;

        let backend_ws_url = string_or_default(&lookup, "BACKEND_WS_URL", "ws://127.0.0.1:9000");
        require_url(&backend_ws_url, "BACKEND_WS_URL", &["ws"])?;

        Ok(Self {
            device_id: string_or_default(&lookup, "DEVICE_ID", "EV001"),
            backend_api_url,
            backend_ws_url,
            http_timeout_ms: parse_or_default(
                &lookup,
                "HTTP_TIMEOUT_MS",
                DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            )?,
            reconnect_delay_ms: parse_or_default(
                &lookup,
                "RECONNECT_DELAY_MS",
                DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            )?,
            http_bind: string_or_default(&lookup, "HTTP_BIND", "127.0.0.1:8080"),
        })
    }
}

fn string_or_default<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn require_url(value: &str, key: &str, schemes: &[&str]) -> Result<(), AppError> {
    let url = Url::parse(value).map_err(|_| AppError::config(format!("{key} must be a valid url")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(AppError::config(format!(
            "{key} must use one of: {}",
            schemes.join(", ")
        )));
    }
    Ok(())
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}
