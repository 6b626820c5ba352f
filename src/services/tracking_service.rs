//! services/tracking_service.rs
//! Máquina de estados de `ResultRecord`: la usan los workers (enviado, error,
//! reintento) y los handlers de seguimiento (abierto, click, datos, reporte).

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::models::event_model::{Event, EventKind, NewEvent};
use crate::models::result_model::{GeoPoint, ResultRecord, ResultStatus, Transition};
use crate::services::event_service::EventLog;
use crate::services::result_locks::ResultLocks;
use crate::services::result_service::ResultStore;

/// No existe un resultado con ese token.
#[derive(Debug, thiserror::Error)]
#[error("Result not found: {0}")]
pub struct ResultNotFound(pub String);

#[derive(Clone)]
pub struct TrackingService {
    results: Arc<dyn ResultStore>,
    events: Arc<dyn EventLog>,
    locks: Arc<ResultLocks>,
}

impl TrackingService {
    pub fn new(results: Arc<dyn ResultStore>, events: Arc<dyn EventLog>) -> Self {
        TrackingService {
            results,
            events,
            locks: Arc::new(ResultLocks::new()),
        }
    }

    pub async fn get_result(&self, r_id: &str) -> Result<ResultRecord> {
        self.results
            .find(r_id)
            .await?
            .ok_or_else(|| ResultNotFound(r_id.to_string()).into())
    }

    pub async fn list_events(&self, r_id: &str) -> Result<Vec<Event>> {
        self.events.list_for_result(r_id).await
    }

    pub async fn mark_sent(&self, r_id: &str) -> Result<Transition> {
        self.transition(r_id, EventKind::Sent, None, |result, time| {
            if !result.status.can_advance_to(ResultStatus::Sent) {
                return false;
            }
            result.status = ResultStatus::Sent;
            result.send_date = time;
            true
        })
        .await
    }

    pub async fn mark_opened(&self, r_id: &str, details: Option<Value>) -> Result<Transition> {
        self.advance(r_id, EventKind::Opened, ResultStatus::Opened, details)
            .await
    }

    pub async fn mark_clicked(&self, r_id: &str, details: Option<Value>) -> Result<Transition> {
        self.advance(r_id, EventKind::Clicked, ResultStatus::Clicked, details)
            .await
    }

    pub async fn mark_data_submitted(
        &self,
        r_id: &str,
        details: Option<Value>,
    ) -> Result<Transition> {
        self.advance(r_id, EventKind::DataSubmit, ResultStatus::DataSubmit, details)
            .await
    }

    /// El reporte no toca el estado: solo levanta el flag y la fecha de modificación.
    pub async fn mark_reported(&self, r_id: &str, details: Option<Value>) -> Result<Transition> {
        self.transition(r_id, EventKind::Reported, details, |result, _| {
            result.reported = true;
            true
        })
        .await
    }

    pub async fn mark_error(&self, r_id: &str, error: &str) -> Result<Transition> {
        self.transition(
            r_id,
            EventKind::SendingError,
            Some(json!({ "error": error })),
            |result, _| {
                result.status = ResultStatus::Error;
                true
            },
        )
        .await
    }

    pub async fn mark_retry(
        &self,
        r_id: &str,
        error: &str,
        next_send: DateTime<Utc>,
    ) -> Result<Transition> {
        self.transition(
            r_id,
            EventKind::SendingError,
            Some(json!({ "error": error, "next_send_date": next_send })),
            move |result, _| {
                result.status = ResultStatus::Retry;
                result.send_date = next_send;
                true
            },
        )
        .await
    }

    /// El lote no llegó a intentar este envío (sesión caída, config inválida):
    /// queda el evento en el historial, el resultado no cambia.
    pub async fn record_deferral(
        &self,
        r_id: &str,
        error: &str,
        next_send: DateTime<Utc>,
    ) -> Result<Event> {
        let result = self.get_result(r_id).await?;
        self.events
            .append(NewEvent::for_result(
                &result,
                EventKind::Deferred,
                Some(json!({ "error": error, "next_send_date": next_send })),
            ))
            .await
    }

    pub async fn update_geo(
        &self,
        r_id: &str,
        address: &str,
        point: Option<GeoPoint>,
    ) -> Result<Transition> {
        let _turn = self.locks.lock(r_id).await;
        let mut result = self.get_result(r_id).await?;
        result.ip = address.to_string();
        if let Some(point) = point {
            result.latitude = point.latitude;
            result.longitude = point.longitude;
        }
        self.results.save(&result).await?;
        Ok(Transition::Applied)
    }

    async fn advance(
        &self,
        r_id: &str,
        kind: EventKind,
        next: ResultStatus,
        details: Option<Value>,
    ) -> Result<Transition> {
        self.transition(r_id, kind, details, move |result, _| {
            if !result.status.can_advance_to(next) {
                return false;
            }
            result.status = next;
            true
        })
        .await
    }

    /// Registra el evento y después, con el turno del destinatario tomado,
    /// relee el resultado y aplica `apply`. Si `apply` devuelve `false` no se guarda nada.
    async fn transition<F>(
        &self,
        r_id: &str,
        kind: EventKind,
        details: Option<Value>,
        apply: F,
    ) -> Result<Transition>
    where
        F: FnOnce(&mut ResultRecord, DateTime<Utc>) -> bool + Send,
    {
        let result = self.get_result(r_id).await?;
        let event = self
            .events
            .append(NewEvent::for_result(&result, kind, details))
            .await?;

        let _turn = self.locks.lock(r_id).await;
        let mut current = self.get_result(r_id).await?;
        let previous = current.status;

        if !apply(&mut current, event.time) {
            log::debug!(
                "(transition) r_id={} '{}' ignorado, estado actual {}",
                r_id,
                kind.as_str(),
                previous.as_str()
            );
            return Ok(Transition::Unchanged);
        }

        current.modified_date = event.time;
        self.results.save(&current).await?;
        log::info!(
            "(transition) r_id={} {} -> {} ({})",
            r_id,
            previous.as_str(),
            current.status.as_str(),
            kind.as_str()
        );
        Ok(Transition::Applied)
    }
}
