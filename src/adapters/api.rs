use actix_web::{HttpResponse, Responder, get, post, put, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::app::controller::DashboardCommand;
use crate::domain::models::{ChargingSession, ChargingStatus, MeterValue};
use crate::domain::presentation::{
    SocBand, chart_summary, reported_soc, session_duration_ms, session_energy_delta,
};
use crate::domain::view_state::ViewState;

#[derive(Clone)]
pub struct ApiState {
    pub commands: mpsc::UnboundedSender<DashboardCommand>,
    pub view: watch::Receiver<ViewState>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub device_id: String,
    pub live_connected: bool,
    pub loading: bool,
    pub error: Option<String>,
    pub current_status: Option<StatusResponse>,
    pub sessions: Vec<SessionResponse>,
    pub selected_session_id: Option<i64>,
    pub meter_values: Vec<MeterValueResponse>,
    pub chart: Option<ChartResponse>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub session_id: i64,
    pub start_time: String,
    pub current_time: String,
    pub current_soc: f64,
    pub remaining_percent: f64,
    pub soc_band: SocBand,
    pub power_kw: Option<f64>,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: i64,
    pub connector_id: i64,
    pub start_time: String,
    pub end_time: Option<String>,
    pub active: bool,
    pub duration_ms: Option<i64>,
    pub start_meter: f64,
    pub end_meter: Option<f64>,
    pub energy_delta: Option<f64>,
    pub start_soc: Option<f64>,
    pub end_soc: Option<f64>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MeterValueResponse {
    pub id: i64,
    pub timestamp: String,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power_kw: Option<f64>,
    pub soc: Option<f64>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartResponse {
    pub points: usize,
    pub average_soc: f64,
    pub average_power_kw: f64,
    pub max_voltage: f64,
    pub max_current: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectDeviceRequest {
    pub device_id: String,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(get_dashboard_endpoint)
        .service(select_device_endpoint)
        .service(refresh_endpoint)
        .service(select_session_endpoint);
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[get("/dashboard")]
async fn get_dashboard_endpoint(state: web::Data<ApiState>) -> impl Responder {
    let view = state.view.borrow().clone();
    HttpResponse::Ok().json(render_dashboard(&view))
}

#[put("/dashboard/device")]
async fn select_device_endpoint(
    state: web::Data<ApiState>,
    body: web::Json<SelectDeviceRequest>,
) -> impl Responder {
    let device_id = body.device_id.trim();
    if device_id.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "deviceId must not be empty"
        }));
    }

    dispatch(&state, DashboardCommand::SelectDevice(device_id.to_string()))
}

#[post("/dashboard/refresh")]
async fn refresh_endpoint(state: web::Data<ApiState>) -> impl Responder {
    dispatch(&state, DashboardCommand::Refresh)
}

#[post("/dashboard/sessions/{session_id}/select")]
async fn select_session_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<i64>,
) -> impl Responder {
    let session_id = path.into_inner();
    let known = state.view.borrow().find_session(session_id).is_some();
    if !known {
        return HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("session {session_id} is not in the current session list")
        }));
    }

    dispatch(&state, DashboardCommand::SelectSession(session_id))
}

fn dispatch(state: &ApiState, command: DashboardCommand) -> HttpResponse {
    match state.commands.send(command) {
        Ok(()) => HttpResponse::Accepted().finish(),
        Err(_) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "error": "dashboard controller is not running"
        })),
    }
}

pub fn render_dashboard(view: &ViewState) -> DashboardResponse {
    let now = Utc::now();

    DashboardResponse {
        device_id: view.device_id.clone(),
        live_connected: view.live_connected,
        loading: view.loading,
        error: view.error.clone(),
        current_status: view.current_status.as_ref().map(render_status),
        sessions: view
            .sessions
            .iter()
            .map(|session| render_session(session, now))
            .collect(),
        selected_session_id: view.selected_session_id(),
        meter_values: view.meter_values.iter().map(render_meter_value).collect(),
        chart: chart_summary(&view.meter_values).map(|summary| ChartResponse {
            points: summary.points,
            average_soc: summary.average_soc,
            average_power_kw: summary.average_power_kw,
            max_voltage: summary.max_voltage,
            max_current: summary.max_current,
        }),
    }
}

fn render_status(status: &ChargingStatus) -> StatusResponse {
    StatusResponse {
        session_id: status.session_id,
        start_time: status.start_time.clone(),
        current_time: status.current_time.clone(),
        current_soc: status.current_soc,
        remaining_percent: status.remaining_percent,
        soc_band: SocBand::from_soc(status.current_soc),
        power_kw: status.power_kw,
        voltage: status.voltage,
        current: status.current,
    }
}

fn render_session(session: &ChargingSession, now: chrono::DateTime<Utc>) -> SessionResponse {
    SessionResponse {
        id: session.id,
        connector_id: session.connector_id,
        start_time: session.start_time.clone(),
        end_time: session.end_time.clone(),
        active: session.is_active(),
        duration_ms: session_duration_ms(session, now),
        start_meter: session.start_meter,
        end_meter: session.end_meter,
        energy_delta: session_energy_delta(session),
        start_soc: reported_soc(session.start_soc),
        end_soc: reported_soc(session.end_soc),
    }
}

fn render_meter_value(value: &MeterValue) -> MeterValueResponse {
    MeterValueResponse {
        id: value.id,
        timestamp: value.timestamp.clone(),
        voltage: value.voltage,
        current: value.current,
        power_kw: value.power_kw,
        soc: value.soc,
    }
}
