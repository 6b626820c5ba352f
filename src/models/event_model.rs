use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::models::result_model::ResultRecord;

/// Tipo de evento registrado en el historial de una campaña.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Sent,
    Opened,
    Clicked,
    DataSubmit,
    Reported,
    SendingError,
    Deferred,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Sent => "Email Sent",
            EventKind::Opened => "Email Opened",
            EventKind::Clicked => "Clicked Link",
            EventKind::DataSubmit => "Submitted Data",
            EventKind::Reported => "Email Reported",
            EventKind::SendingError => "Error Sending Email",
            EventKind::Deferred => "Sending Deferred",
        }
    }
}

/// Entrada inmutable del historial. Nunca se modifica una vez creada.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: i64,
    pub campaign_id: i64,
    pub r_id: String,
    pub email: String,
    pub time: DateTime<Utc>,
    pub message: String,
    pub details: Option<Value>,
}

/// Evento aún no persistido
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub campaign_id: i64,
    pub r_id: String,
    pub email: String,
    pub kind: EventKind,
    pub details: Option<Value>,
}

impl NewEvent {
    pub fn for_result(result: &ResultRecord, kind: EventKind, details: Option<Value>) -> Self {
        NewEvent {
            campaign_id: result.campaign_id,
            r_id: result.r_id.clone(),
            email: result.recipient.email.clone(),
            kind,
            details,
        }
    }
}
