use crate::domain::models::{ChargingSession, ChargingStatus, MeterValue};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewState {
    pub device_id: String,
    pub live_connected: bool,
    pub current_status: Option<ChargingStatus>,
    pub sessions: Vec<ChargingSession>,
    pub selected_session: Option<ChargingSession>,
    pub meter_values: Vec<MeterValue>,
    pub loading: bool,
    pub error: Option<String>,
}

impl ViewState {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    pub fn clear_data(&mut self) {
        self.current_status = None;
        self.sessions.clear();
        self.selected_session = None;
        self.meter_values.clear();
    }

    pub fn selected_session_id(&self) -> Option<i64> {
        self.selected_session.as_ref().map(|session| session.id)
    }

    pub fn find_session(&self, session_id: i64) -> Option<&ChargingSession> {
        self.sessions.iter().find(|session| session.id == session_id)
    }
}
