use std::pin::pin;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::backend::HttpChargingBackend;
use crate::adapters::live_channel::{LiveChannel, LiveChannelConfig, LiveEvent};
use crate::app::config::AppConfig;
use crate::app::controller::DashboardController;
use crate::app::error::AppError;

fn live_config(config: &AppConfig) -> LiveChannelConfig {
    LiveChannelConfig {
        ws_base_url: config.backend_ws_url.clone(),
        reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        handshake_timeout: Duration::from_millis(config.http_timeout_ms),
    }
}

pub fn run(config: AppConfig) -> Result<(), AppError> {
    let backend = HttpChargingBackend::new(
        &config.backend_api_url,
        Duration::from_millis(config.http_timeout_ms),
    )
    .map_err(AppError::config)?;
    tracing::info!(base_url = %backend.base_url(), "backend client ready");
    let live = live_config(&config);

    actix_web::rt::System::new().block_on(async move {
        let controller = DashboardController::new(backend, config.device_id.clone());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(controller.view_state().clone());
        let controller_handle =
            actix_web::rt::spawn(controller.run(live, command_rx, state_tx));

        let api_state = ApiState {
            commands: command_tx,
            view: state_rx,
        };

        tracing::info!(bind = %config.http_bind, "http server starting");

        let server_result = match HttpServer::new(move || {
            App::new()
                .wrap(
                    Cors::default()
                        .allow_any_origin()
                        .allow_any_header()
                        .allowed_methods(["GET", "POST", "PUT"]),
                )
                .app_data(web::Data::new(api_state.clone()))
                .configure(configure_routes)
        })
        .bind(&config.http_bind)
        {
            Ok(server) => server.run().await,
            Err(error) => Err(error),
        };

        // Controller exits once the server drops the last command sender.
        if controller_handle.await.is_err() {
            return Err(AppError::runtime("dashboard controller panicked"));
        }

        server_result.map_err(AppError::runtime)
    })
}

pub fn run_live_tail(config: AppConfig) -> Result<(), AppError> {
    let live = live_config(&config);
    let channel = LiveChannel::connect(&live, &config.device_id).map_err(AppError::config)?;

    actix_web::rt::System::new().block_on(async move {
        let mut events = pin!(channel.into_events());
        while let Some(event) = events.next().await {
            match event {
                LiveEvent::Connected { attempt } => {
                    tracing::info!(device_id = %config.device_id, attempt, "connected");
                }
                LiveEvent::Message(message) => {
                    tracing::info!(
                        device_id = %config.device_id,
                        kind = message.kind.as_str(),
                        timestamp = message.timestamp.as_deref().unwrap_or("-"),
                        payload = %message.payload,
                        "live message"
                    );
                }
                LiveEvent::Disconnected { attempt, reason } => {
                    tracing::warn!(device_id = %config.device_id, attempt, reason = %reason, "disconnected");
                }
            }
        }
        Ok(())
    })
}
