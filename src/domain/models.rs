use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingSession {
    pub id: i64,
    #[serde(rename = "ev_id")]
    pub device_id: String,
    pub connector_id: i64,
    pub start_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
    pub start_meter: f64,
    #[serde(default)]
    pub end_meter: Option<f64>,
    #[serde(default)]
    pub start_soc: Option<f64>,
    #[serde(default)]
    pub end_soc: Option<f64>,
}

impl ChargingSession {
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterValue {
    pub id: i64,
    pub session_id: i64,
    pub timestamp: String,
    #[serde(default)]
    pub voltage: Option<f64>,
    #[serde(default)]
    pub current: Option<f64>,
    #[serde(default)]
    pub power_kw: Option<f64>,
    #[serde(default)]
    pub soc: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingStatus {
    #[serde(rename = "ev_id")]
    pub device_id: String,
    pub session_id: i64,
    pub start_time: String,
    pub current_time: String,
    pub current_soc: f64,
    pub remaining_percent: f64,
    #[serde(default)]
    pub power_kw: Option<f64>,
    #[serde(default)]
    pub voltage: Option<f64>,
    #[serde(default)]
    pub current: Option<f64>,
}
