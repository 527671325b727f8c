use futures_util::future::LocalBoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::adapters::backend::{BackendError, ChargingBackend};
use crate::adapters::live_channel::{LiveChannel, LiveChannelConfig, LiveEvent};
use crate::domain::live_message::LiveMessage;
use crate::domain::models::{ChargingSession, ChargingStatus, MeterValue};
use crate::domain::view_state::ViewState;

pub const LOAD_ERROR_MESSAGE: &str = "Failed to load data. Please check if the backend is running.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardCommand {
    SelectDevice(String),
    Refresh,
    SelectSession(i64),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("session {0} is not in the current session list")]
    UnknownSession(i64),
}

/// Identifies the load a request belongs to. A response is applied only
/// while its tag is still the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RequestTag {
    device_id: String,
    generation: u64,
}

enum FetchOutcome {
    InitialLoad {
        tag: RequestTag,
        status: Result<Option<ChargingStatus>, BackendError>,
        sessions: Result<Vec<ChargingSession>, BackendError>,
    },
    Status {
        tag: RequestTag,
        result: Result<Option<ChargingStatus>, BackendError>,
    },
    MeterValues {
        tag: RequestTag,
        session_id: i64,
        result: Result<Vec<MeterValue>, BackendError>,
    },
}

enum Wake {
    Command(Option<DashboardCommand>),
    Live(LiveEvent),
    Fetched(FetchOutcome),
}

pub struct DashboardController<B> {
    backend: B,
    state: ViewState,
    generation: u64,
    in_flight: FuturesUnordered<LocalBoxFuture<'static, FetchOutcome>>,
}

impl<B: ChargingBackend> DashboardController<B> {
    pub fn new(backend: B, device_id: impl Into<String>) -> Self {
        let mut controller = Self {
            backend,
            state: ViewState::new(device_id),
            generation: 0,
            in_flight: FuturesUnordered::new(),
        };
        controller.start_load();
        controller
    }

    pub fn view_state(&self) -> &ViewState {
        &self.state
    }

    #[cfg(test)]
    pub(crate) fn has_pending_fetches(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn select_device(&mut self, device_id: impl Into<String>) {
        let device_id = device_id.into();
        if device_id == self.state.device_id {
            tracing::debug!(device_id = %device_id, "device already selected");
            return;
        }

        tracing::info!(
            previous = %self.state.device_id,
            device_id = %device_id,
            "switching device"
        );
        self.state.device_id = device_id;
        self.state.live_connected = false;
        self.state.clear_data();
        self.start_load();
    }

    pub fn refresh(&mut self) {
        tracing::info!(device_id = %self.state.device_id, "refreshing dashboard");
        self.state.clear_data();
        self.start_load();
    }

    pub fn select_session(&mut self, session_id: i64) -> Result<(), ControllerError> {
        let session = self
            .state
            .find_session(session_id)
            .cloned()
            .ok_or(ControllerError::UnknownSession(session_id))?;

        self.state.selected_session = Some(session);
        self.state.meter_values.clear();
        self.fetch_meter_values(session_id);
        Ok(())
    }

    pub fn on_live_message(&mut self, message: &LiveMessage) {
        tracing::debug!(
            device_id = %self.state.device_id,
            kind = message.kind.as_str(),
            "live message received, refreshing status"
        );
        self.fetch_status();
    }

    pub fn set_live_connected(&mut self, connected: bool) {
        if self.state.live_connected != connected {
            tracing::info!(device_id = %self.state.device_id, connected, "live connectivity changed");
        }
        self.state.live_connected = connected;
    }

    pub async fn settle(&mut self) {
        while let Some(outcome) = self.in_flight.next().await {
            self.apply(outcome);
        }
    }

    pub async fn run(
        mut self,
        live_config: LiveChannelConfig,
        mut commands: mpsc::UnboundedReceiver<DashboardCommand>,
        state_tx: watch::Sender<ViewState>,
    ) {
        let mut channel = open_channel(&live_config, &self.state.device_id);
        state_tx.send_replace(self.state.clone());

        loop {
            let wake = tokio::select! {
                command = commands.recv() => Wake::Command(command),
                event = next_live_event(&mut channel) => Wake::Live(event),
                Some(outcome) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    Wake::Fetched(outcome)
                }
            };

            match wake {
                Wake::Command(None) => break,
                Wake::Command(Some(command)) => {
                    let previous_device = self.state.device_id.clone();
                    self.handle_command(command);
                    if self.state.device_id != previous_device {
                        if let Some(old) = channel.as_mut() {
                            old.close().await;
                        }
                        channel = open_channel(&live_config, &self.state.device_id);
                    }
                }
                Wake::Live(event) => {
                    if let LiveEvent::Message(message) = &event {
                        self.on_live_message(message);
                    }
                    let connected = channel.as_ref().is_some_and(LiveChannel::is_connected);
                    self.set_live_connected(connected);
                }
                Wake::Fetched(outcome) => self.apply(outcome),
            }

            state_tx.send_replace(self.state.clone());
        }

        if let Some(mut channel) = channel {
            channel.close().await;
        }
        tracing::info!(device_id = %self.state.device_id, "dashboard controller stopped");
    }

    fn handle_command(&mut self, command: DashboardCommand) {
        match command {
            DashboardCommand::SelectDevice(device_id) => self.select_device(device_id),
            DashboardCommand::Refresh => self.refresh(),
            DashboardCommand::SelectSession(session_id) => {
                if let Err(error) = self.select_session(session_id) {
                    tracing::warn!(error = %error, "session selection ignored");
                }
            }
        }
    }

    fn current_tag(&self) -> RequestTag {
        RequestTag {
            device_id: self.state.device_id.clone(),
            generation: self.generation,
        }
    }

    fn start_load(&mut self) {
        self.generation += 1;
        self.state.loading = true;
        self.state.error = None;

        let tag = self.current_tag();
        let backend = self.backend.clone();
        tracing::debug!(device_id = %tag.device_id, generation = tag.generation, "initial load started");

        self.in_flight.push(Box::pin(async move {
            let (status, sessions) = tokio::join!(
                backend.get_current_status(&tag.device_id),
                backend.get_sessions(&tag.device_id)
            );
            FetchOutcome::InitialLoad {
                tag,
                status,
                sessions,
            }
        }));
    }

    fn fetch_status(&mut self) {
        let tag = self.current_tag();
        let backend = self.backend.clone();
        self.in_flight.push(Box::pin(async move {
            let result = backend.get_current_status(&tag.device_id).await;
            FetchOutcome::Status { tag, result }
        }));
    }

    fn fetch_meter_values(&mut self, session_id: i64) {
        let tag = self.current_tag();
        let backend = self.backend.clone();
        self.in_flight.push(Box::pin(async move {
            let result = backend.get_meter_values(session_id).await;
            FetchOutcome::MeterValues {
                tag,
                session_id,
                result,
            }
        }));
    }

    fn is_current(&self, tag: &RequestTag) -> bool {
        let current = tag.device_id == self.state.device_id && tag.generation == self.generation;
        if !current {
            tracing::debug!(
                device_id = %tag.device_id,
                generation = tag.generation,
                "discarding stale response"
            );
        }
        current
    }

    fn apply(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::InitialLoad {
                tag,
                status,
                sessions,
            } => {
                if !self.is_current(&tag) {
                    return;
                }

                let mut failed = false;
                match status {
                    Ok(status) => self.state.current_status = status,
                    Err(error) => {
                        log_fetch_failure("current status", &tag.device_id, &error);
                        self.state.current_status = None;
                        failed = true;
                    }
                }
                match sessions {
                    Ok(sessions) => self.state.sessions = sessions,
                    Err(error) => {
                        log_fetch_failure("sessions", &tag.device_id, &error);
                        self.state.sessions.clear();
                        failed = true;
                    }
                }

                if failed {
                    self.state.error = Some(LOAD_ERROR_MESSAGE.to_string());
                }
                self.state.loading = false;
                self.auto_select_first_session();
            }
            FetchOutcome::Status { tag, result } => {
                if !self.is_current(&tag) {
                    return;
                }
                match result {
                    Ok(status) => self.state.current_status = status,
                    Err(error) => {
                        log_fetch_failure("current status", &tag.device_id, &error);
                        self.state.current_status = None;
                    }
                }
            }
            FetchOutcome::MeterValues {
                tag,
                session_id,
                result,
            } => {
                if !self.is_current(&tag) || self.state.selected_session_id() != Some(session_id) {
                    return;
                }
                match result {
                    Ok(values) => {
                        tracing::debug!(session_id, count = values.len(), "meter values loaded");
                        self.state.meter_values = values;
                    }
                    Err(error) => {
                        log_fetch_failure("meter values", &tag.device_id, &error);
                        self.state.meter_values.clear();
                    }
                }
            }
        }
    }

    fn auto_select_first_session(&mut self) {
        if self.state.selected_session.is_some() {
            return;
        }
        let Some(first) = self.state.sessions.first().cloned() else {
            return;
        };

        tracing::debug!(session_id = first.id, "auto-selecting most recent session");
        let session_id = first.id;
        self.state.selected_session = Some(first);
        self.state.meter_values.clear();
        self.fetch_meter_values(session_id);
    }
}

fn open_channel(config: &LiveChannelConfig, device_id: &str) -> Option<LiveChannel> {
    match LiveChannel::connect(config, device_id) {
        Ok(channel) => Some(channel),
        Err(error) => {
            tracing::error!(device_id, error = %error, "live channel unavailable");
            None
        }
    }
}

async fn next_live_event(channel: &mut Option<LiveChannel>) -> LiveEvent {
    match channel {
        Some(channel) => channel.next_event().await,
        None => std::future::pending().await,
    }
}

fn log_fetch_failure(resource: &str, device_id: &str, error: &BackendError) {
    tracing::warn!(
        resource,
        device_id,
        timeout = error.is_timeout(),
        error = %error,
        "fetch failed"
    );
}
