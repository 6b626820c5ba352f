use std::str::FromStr;

use anyhow::{anyhow, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::entry_model::Recipient;

/// Estado de interacción de un destinatario.
///
/// `Sent < Opened < Clicked < DataSubmit` es la cadena de progreso; el resto son
/// estados laterales (programado, enviando, error, reintento).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    Scheduled,
    Sending,
    Sent,
    Opened,
    Clicked,
    DataSubmit,
    Error,
    Retry,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Scheduled => "Scheduled",
            ResultStatus::Sending => "Sending",
            ResultStatus::Sent => "Email Sent",
            ResultStatus::Opened => "Email Opened",
            ResultStatus::Clicked => "Clicked Link",
            ResultStatus::DataSubmit => "Submitted Data",
            ResultStatus::Error => "Error",
            ResultStatus::Retry => "Retrying",
        }
    }

    /// Posición en la cadena de progreso (None = fuera de la cadena).
    pub fn progress_rank(&self) -> Option<u8> {
        match self {
            ResultStatus::Sent => Some(1),
            ResultStatus::Opened => Some(2),
            ResultStatus::Clicked => Some(3),
            ResultStatus::DataSubmit => Some(4),
            _ => None,
        }
    }

    /// Regla de monotonicidad: solo se avanza a un estado estrictamente mayor,
    /// o desde un estado que no está en la cadena.
    pub fn can_advance_to(&self, next: ResultStatus) -> bool {
        match (self.progress_rank(), next.progress_rank()) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(current), Some(next)) => next > current,
        }
    }
}

impl FromStr for ResultStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Scheduled" => Ok(ResultStatus::Scheduled),
            "Sending" => Ok(ResultStatus::Sending),
            "Email Sent" => Ok(ResultStatus::Sent),
            "Email Opened" => Ok(ResultStatus::Opened),
            "Clicked Link" => Ok(ResultStatus::Clicked),
            "Submitted Data" => Ok(ResultStatus::DataSubmit),
            "Error" => Ok(ResultStatus::Error),
            "Retrying" => Ok(ResultStatus::Retry),
            other => Err(anyhow!("Estado de resultado desconocido: {other}")),
        }
    }
}

/// Registro durable de interacción de un destinatario dentro de una campaña.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub campaign_id: i64,
    #[serde(skip)]
    pub user_id: i64,
    #[serde(rename = "id")]
    pub r_id: String,
    #[serde(flatten)]
    pub recipient: Recipient,
    pub status: ResultStatus,
    pub ip: String,
    pub latitude: f64,
    pub longitude: f64,
    pub send_date: DateTime<Utc>,
    pub reported: bool,
    pub modified_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Resultado de intentar una transición sobre un `ResultRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Applied,
    Unchanged,
}
