//! services/outcome_service.rs
//! Aplica el resultado de cada envío sobre el entry y el resultado del destinatario.
//! Los fallos de persistencia se registran en el log; el lote sigue con el próximo.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::entry_model::Entry;
use crate::services::backoff::BackoffPolicy;
use crate::services::channel_service::DeliveryError;
use crate::services::entry_service::EntryStore;
use crate::services::message_service::OutboundMessage;
use crate::services::tracking_service::TrackingService;

#[derive(Clone)]
pub struct OutcomeRecorder {
    entries: Arc<dyn EntryStore>,
    tracking: TrackingService,
    backoff: Arc<dyn BackoffPolicy>,
    max_send_attempts: u32,
}

impl OutcomeRecorder {
    pub fn new(
        entries: Arc<dyn EntryStore>,
        tracking: TrackingService,
        backoff: Arc<dyn BackoffPolicy>,
        max_send_attempts: u32,
    ) -> Self {
        OutcomeRecorder {
            entries,
            tracking,
            backoff,
            max_send_attempts: max_send_attempts.max(1),
        }
    }

    pub async fn success(&self, message: &OutboundMessage) {
        let entry = message.entry();
        if let Err(e) = self.tracking.mark_sent(&entry.r_id).await {
            log::error!("(success) No se pudo marcar enviado r_id={}: {:?}", entry.r_id, e);
        }
        if let Err(e) = self.entries.complete(entry).await {
            log::error!("(success) No se pudo cerrar entry {}: {:?}", entry.id, e);
        }
    }

    /// Fallo transitorio: nueva fecha según la política y resultado en `Retry`.
    /// Agotados los intentos, pasa a error definitivo.
    pub async fn backoff(&self, message: &OutboundMessage, error: &DeliveryError) {
        let entry = message.entry();
        if self.attempts_exhausted(message) {
            self.exhausted(message, error).await;
            return;
        }

        let next = self
            .backoff
            .next_send_date(entry.send_date, entry.send_attempt, Utc::now());
        log::warn!(
            "(backoff) entry {} r_id={} intento {} falló: {}. Próximo envío {}",
            entry.id,
            entry.r_id,
            entry.send_attempt + 1,
            error,
            next
        );

        if !self.reschedule_or_release("backoff", entry, next).await {
            return;
        }
        if let Err(e) = self
            .tracking
            .mark_retry(&entry.r_id, &error.to_string(), next)
            .await
        {
            log::error!("(backoff) No se pudo marcar reintento r_id={}: {:?}", entry.r_id, e);
        }
    }

    pub async fn terminal(&self, message: &OutboundMessage, reason: &str) {
        let entry = message.entry();
        log::error!(
            "(terminal) entry {} r_id={} descartado: {}",
            entry.id,
            entry.r_id,
            reason
        );
        if let Err(e) = self.tracking.mark_error(&entry.r_id, reason).await {
            log::error!("(terminal) No se pudo marcar error r_id={}: {:?}", entry.r_id, e);
        }
        if let Err(e) = self.entries.complete(entry).await {
            log::error!("(terminal) No se pudo cerrar entry {}: {:?}", entry.id, e);
        }
    }

    /// El envío no se llegó a intentar (sesión o configuración). Se reprograma
    /// y queda un evento, pero el estado del resultado no cambia.
    pub async fn defer(&self, message: &OutboundMessage, error: &DeliveryError) {
        let entry = message.entry();
        if self.attempts_exhausted(message) {
            self.exhausted(message, error).await;
            return;
        }

        let next = self
            .backoff
            .next_send_date(entry.send_date, entry.send_attempt, Utc::now());
        log::warn!(
            "(defer) entry {} r_id={} diferido hasta {}: {}",
            entry.id,
            entry.r_id,
            next,
            error
        );

        if !self.reschedule_or_release("defer", entry, next).await {
            return;
        }
        if let Err(e) = self
            .tracking
            .record_deferral(&entry.r_id, &error.to_string(), next)
            .await
        {
            log::error!("(defer) No se pudo registrar el evento r_id={}: {:?}", entry.r_id, e);
        }
    }

    /// Devuelve el entry a la cola sin tocar fecha ni intentos.
    pub async fn release(&self, message: &OutboundMessage) {
        let entry = message.entry();
        if let Err(e) = self.entries.release(entry).await {
            log::error!("(release) No se pudo liberar entry {}: {:?}", entry.id, e);
        }
    }

    /// Si la base no acepta la nueva fecha, el entry igual se desbloquea para
    /// que el próximo tick lo vuelva a tomar.
    async fn reschedule_or_release(
        &self,
        caller: &str,
        entry: &Entry,
        next: DateTime<Utc>,
    ) -> bool {
        match self.entries.reschedule(entry, next).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("({caller}) No se pudo reprogramar entry {}: {:?}", entry.id, e);
                if let Err(e) = self.entries.release(entry).await {
                    log::error!("({caller}) Tampoco se pudo liberar entry {}: {:?}", entry.id, e);
                }
                false
            }
        }
    }

    fn attempts_exhausted(&self, message: &OutboundMessage) -> bool {
        message.entry().send_attempt + 1 >= self.max_send_attempts
    }

    async fn exhausted(&self, message: &OutboundMessage, error: &DeliveryError) {
        let reason = format!(
            "max send attempts exceeded ({}): {}",
            self.max_send_attempts, error
        );
        self.terminal(message, &reason).await;
    }
}
