use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

use crate::domain::models::{ChargingSession, MeterValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SocBand {
    High,
    Medium,
    Low,
}

impl SocBand {
    pub fn from_soc(soc: f64) -> Self {
        if soc >= 80.0 {
            Self::High
        } else if soc >= 50.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartSummary {
    pub points: usize,
    pub average_soc: f64,
    pub average_power_kw: f64,
    pub max_voltage: f64,
    pub max_current: f64,
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn session_duration_ms(session: &ChargingSession, now: DateTime<Utc>) -> Option<i64> {
    let start = parse_timestamp(&session.start_time)?;
    let end = match session.end_time.as_deref() {
        Some(end_time) => parse_timestamp(end_time)?,
        None => now,
    };

    Some((end - start).num_milliseconds().max(0))
}

pub fn session_energy_delta(session: &ChargingSession) -> Option<f64> {
    session
        .end_meter
        .map(|end_meter| (end_meter - session.start_meter).max(0.0))
}

pub fn reported_soc(soc: Option<f64>) -> Option<f64> {
    soc.filter(|value| *value > 0.0)
}

pub fn chart_summary(values: &[MeterValue]) -> Option<ChartSummary> {
    if values.is_empty() {
        return None;
    }

    let points = values.len();
    let soc_sum: f64 = values.iter().map(|value| value.soc.unwrap_or(0.0)).sum();
    let power_sum: f64 = values
        .iter()
        .map(|value| value.power_kw.unwrap_or(0.0))
        .sum();

    let max_voltage = values
        .iter()
        .map(|value| value.voltage.unwrap_or(0.0))
        .fold(f64::NEG_INFINITY, f64::max);
    let max_current = values
        .iter()
        .map(|value| value.current.unwrap_or(0.0))
        .fold(f64::NEG_INFINITY, f64::max);

    Some(ChartSummary {
        points,
        average_soc: (soc_sum / points as f64).round(),
        average_power_kw: (power_sum / points as f64 * 10.0).round() / 10.0,
        max_voltage,
        max_current,
    })
}
