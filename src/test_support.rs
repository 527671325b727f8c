use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use crate::adapters::backend::{BackendError, ChargingBackend};
use crate::domain::models::{ChargingSession, ChargingStatus, MeterValue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CurrentStatus(String),
    Sessions(String),
    MeterValues(i64),
}

#[derive(Default)]
struct FakeBackendState {
    statuses: HashMap<String, ChargingStatus>,
    sessions: HashMap<String, Vec<ChargingSession>>,
    meter_values: HashMap<i64, Vec<MeterValue>>,
    failing_status: HashSet<String>,
    failing_sessions: HashSet<String>,
    calls: Vec<BackendCall>,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    inner: Rc<RefCell<FakeBackendState>>,
}

impl FakeBackend {
    pub fn with_status(self, status: ChargingStatus) -> Self {
        self.inner
            .borrow_mut()
            .statuses
            .insert(status.device_id.clone(), status);
        self
    }

    pub fn with_sessions(self, device_id: &str, sessions: Vec<ChargingSession>) -> Self {
        self.set_sessions(device_id, sessions);
        self
    }

    pub fn with_meter_values(self, session_id: i64, values: Vec<MeterValue>) -> Self {
        self.inner
            .borrow_mut()
            .meter_values
            .insert(session_id, values);
        self
    }

    pub fn with_failing_status(self, device_id: &str) -> Self {
        self.inner
            .borrow_mut()
            .failing_status
            .insert(device_id.to_string());
        self
    }

    pub fn with_failing_sessions(self, device_id: &str) -> Self {
        self.inner
            .borrow_mut()
            .failing_sessions
            .insert(device_id.to_string());
        self
    }

    pub fn set_sessions(&self, device_id: &str, sessions: Vec<ChargingSession>) {
        self.inner
            .borrow_mut()
            .sessions
            .insert(device_id.to_string(), sessions);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.inner.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.borrow_mut().calls.clear();
    }

    fn unavailable(path: String) -> BackendError {
        BackendError::Status {
            url: format!("http://fake-backend{path}"),
            status: 503,
        }
    }
}

impl ChargingBackend for FakeBackend {
    async fn get_current_status(
        &self,
        device_id: &str,
    ) -> Result<Option<ChargingStatus>, BackendError> {
        let mut state = self.inner.borrow_mut();
        state
            .calls
            .push(BackendCall::CurrentStatus(device_id.to_string()));
        if state.failing_status.contains(device_id) {
            return Err(Self::unavailable(format!("/status/current/{device_id}")));
        }
        Ok(state.statuses.get(device_id).cloned())
    }

    async fn get_sessions(&self, device_id: &str) -> Result<Vec<ChargingSession>, BackendError> {
        let mut state = self.inner.borrow_mut();
        state.calls.push(BackendCall::Sessions(device_id.to_string()));
        if state.failing_sessions.contains(device_id) {
            return Err(Self::unavailable(format!("/status/sessions/{device_id}")));
        }
        Ok(state.sessions.get(device_id).cloned().unwrap_or_default())
    }

    async fn get_meter_values(&self, session_id: i64) -> Result<Vec<MeterValue>, BackendError> {
        let mut state = self.inner.borrow_mut();
        state.calls.push(BackendCall::MeterValues(session_id));
        Ok(state
            .meter_values
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }
}

pub fn sample_session(id: i64, device_id: &str, end_time: Option<&str>) -> ChargingSession {
    ChargingSession {
        id,
        device_id: device_id.to_string(),
        connector_id: 1,
        start_time: "2025-01-10T08:00:00".to_string(),
        end_time: end_time.map(ToString::to_string),
        start_meter: 1000.0,
        end_meter: end_time.map(|_| 1024.5),
        start_soc: Some(20.0),
        end_soc: end_time.map(|_| 80.0),
    }
}

pub fn sample_status(device_id: &str, session_id: i64, current_soc: f64) -> ChargingStatus {
    ChargingStatus {
        device_id: device_id.to_string(),
        session_id,
        start_time: "2025-01-10T08:00:00".to_string(),
        current_time: "2025-01-10T08:30:00".to_string(),
        current_soc,
        remaining_percent: 100.0 - current_soc,
        power_kw: Some(7.4),
        voltage: Some(230.0),
        current: Some(32.0),
    }
}

pub fn sample_meter_value(id: i64, session_id: i64, soc: f64) -> MeterValue {
    MeterValue {
        id,
        session_id,
        timestamp: format!("2025-01-10T08:{:02}:00", id % 60),
        voltage: Some(230.0),
        current: Some(16.0),
        power_kw: Some(3.7),
        soc: Some(soc),
    }
}

pub async fn ws_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("ws listener should bind");
    let addr = listener.local_addr().expect("addr should be available");
    (listener, format!("ws://{addr}"))
}

pub async fn accept_ws(listener: &TcpListener) -> (WebSocketStream<TcpStream>, String) {
    let (stream, _) = listener.accept().await.expect("client should connect");
    let mut path = String::new();
    let record_path = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        path = request.uri().path().to_string();
        Ok(response)
    };
    let socket = tokio_tungstenite::accept_hdr_async(stream, record_path)
        .await
        .expect("websocket handshake should succeed");
    (socket, path)
}

pub fn unused_ws_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("port should bind");
    let addr = listener.local_addr().expect("addr should be available");
    drop(listener);
    format!("ws://{addr}")
}
