use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveMessageKind {
    StatusUpdate,
    MeterValue,
    SessionStart,
    SessionEnd,
    Connection,
    Other(String),
    Untyped,
}

impl LiveMessageKind {
    fn from_type_field(value: Option<&str>) -> Self {
        match value {
            Some("status_update") => Self::StatusUpdate,
            Some("meter_value") => Self::MeterValue,
            Some("session_start") => Self::SessionStart,
            Some("session_end") => Self::SessionEnd,
            Some("connection") => Self::Connection,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Untyped,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::StatusUpdate => "status_update",
            Self::MeterValue => "meter_value",
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::Connection => "connection",
            Self::Other(other) => other,
            Self::Untyped => "untyped",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveMessage {
    pub kind: LiveMessageKind,
    pub payload: Value,
    pub timestamp: Option<String>,
    pub raw: Value,
}

impl LiveMessage {
    pub fn parse(frame: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice::<Value>(frame).map(Self::from_value)
    }

    pub fn from_value(raw: Value) -> Self {
        let kind = LiveMessageKind::from_type_field(raw.get("type").and_then(Value::as_str));
        let payload = raw.get("data").cloned().unwrap_or(Value::Null);
        let timestamp = raw
            .get("timestamp")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        Self {
            kind,
            payload,
            timestamp,
            raw,
        }
    }

    pub fn is_connection_confirmation(&self) -> bool {
        self.kind == LiveMessageKind::Connection
            && self.raw.get("status").and_then(Value::as_str) == Some("connected")
    }
}
