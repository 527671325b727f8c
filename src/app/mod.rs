mod config;
pub mod controller;
mod error;
mod logging;
mod runtime;

pub use error::AppError;

pub fn run() -> Result<(), AppError> {
    logging::init()?;

    let config = config::AppConfig::from_env()?;

    tracing::info!(
        device_id = %config.device_id,
        backend_api_url = %config.backend_api_url,
        backend_ws_url = %config.backend_ws_url,
        http_timeout_ms = config.http_timeout_ms,
        reconnect_delay_ms = config.reconnect_delay_ms,
        http_bind = %config.http_bind,
        "application bootstrap initialized"
    );

    runtime::run(config)
}

pub fn run_live_tail() -> Result<(), AppError> {
    logging::init()?;

    let config = config::AppConfig::from_env()?;

    tracing::info!(
        device_id = %config.device_id,
        backend_ws_url = %config.backend_ws_url,
        reconnect_delay_ms = config.reconnect_delay_ms,
        "live tail initialized"
    );

    runtime::run_live_tail(config)
}
