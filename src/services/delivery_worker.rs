//! services/delivery_worker.rs
//! Worker por canal: consume lotes de una cola acotada y corre una tarea por
//! lote, con un máximo de lotes en vuelo. Dentro del lote los envíos son en
//! serie sobre una misma sesión.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::delivery_config::DeliveryConfig;
use crate::models::campaign_model::{CampaignContext, ChannelKind};
use crate::models::entry_model::Recipient;
use crate::services::channel_service::{ChannelSession, DeliveryError, SessionFactory};
use crate::services::message_service::OutboundMessage;
use crate::services::outcome_service::OutcomeRecorder;

/// Envíos de una campaña para un canal, ya bloqueados y con el contexto cacheado.
#[derive(Debug, Clone)]
pub struct DispatchBatch {
    pub campaign: Arc<CampaignContext>,
    pub channel: ChannelKind,
    pub messages: Vec<OutboundMessage>,
}

/// Lado emisor de la cola de un worker.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    channel: ChannelKind,
    sender: mpsc::Sender<DispatchBatch>,
}

impl DispatchQueue {
    pub fn new(channel: ChannelKind, capacity: usize) -> (Self, mpsc::Receiver<DispatchBatch>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (DispatchQueue { channel, sender }, receiver)
    }

    pub fn channel(&self) -> ChannelKind {
        self.channel
    }

    /// Espera lugar en la cola, no el envío. Si el worker ya no existe devuelve el lote.
    pub async fn submit(&self, batch: DispatchBatch) -> Result<(), DispatchBatch> {
        self.sender.send(batch).await.map_err(|rejected| rejected.0)
    }
}

/// Conteo de lo que pasó con un lote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
    pub deferred: usize,
    pub released: usize,
    pub sessions_opened: u32,
}

#[derive(Clone)]
pub struct DeliveryWorker {
    channel: ChannelKind,
    sessions: Arc<dyn SessionFactory>,
    outcomes: OutcomeRecorder,
    permits: Arc<Semaphore>,
    max_concurrent_batches: usize,
    send_timeout: Duration,
    max_reconnect_attempts: u32,
}

impl DeliveryWorker {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        outcomes: OutcomeRecorder,
        config: &DeliveryConfig,
    ) -> Self {
        let max_concurrent_batches = config.max_concurrent_batches.max(1);
        DeliveryWorker {
            channel: sessions.kind(),
            sessions,
            outcomes,
            permits: Arc::new(Semaphore::new(max_concurrent_batches)),
            max_concurrent_batches,
            send_timeout: config.send_timeout(),
            max_reconnect_attempts: config.max_reconnect_attempts.max(1),
        }
    }

    pub fn spawn(
        self,
        receiver: mpsc::Receiver<DispatchBatch>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(receiver, cancel).await })
    }

    /// Consume la cola hasta la cancelación o hasta que se cierre. Al salir
    /// libera lo que quedó encolado y espera a los lotes en curso.
    pub async fn run(&self, mut receiver: mpsc::Receiver<DispatchBatch>, cancel: CancellationToken) {
        log::info!(
            "(run) worker {} iniciado, {} lotes en paralelo",
            self.channel,
            self.max_concurrent_batches
        );

        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                batch = receiver.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.release_all(batch.messages).await;
                    break;
                }
                permit = self.permits.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                self.release_all(batch.messages).await;
                break;
            };

            let worker = self.clone();
            let batch_cancel = cancel.clone();
            tokio::spawn(async move {
                let campaign_id = batch.campaign.id;
                let report = worker.process_batch(batch, &batch_cancel).await;
                log::info!(
                    "(run) lote {} de campaña {} terminado: {:?}",
                    worker.channel,
                    campaign_id,
                    report
                );
                drop(permit);
            });
        }

        receiver.close();
        while let Ok(batch) = receiver.try_recv() {
            self.release_all(batch.messages).await;
        }

        let in_flight = u32::try_from(self.max_concurrent_batches).unwrap_or(u32::MAX);
        if self.permits.acquire_many(in_flight).await.is_err() {
            log::error!("(run) worker {}: semáforo cerrado", self.channel);
        }
        log::info!("(run) worker {} detenido", self.channel);
    }

    /// Envía cada mensaje del lote en orden. La sesión se abre al primer envío
    /// y se reabre si se cae, hasta el límite de aperturas por lote.
    pub async fn process_batch(
        &self,
        batch: DispatchBatch,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        let mut messages = batch.messages.into_iter();

        let mut session: Option<Box<dyn ChannelSession>> = None;

        while let Some(message) = messages.next() {
            if cancel.is_cancelled() {
                log::warn!(
                    "(process_batch) cancelado, liberando el resto del lote de campaña {}",
                    batch.campaign.id
                );
                report.released += 1 + messages.len();
                self.outcomes.release(&message).await;
                self.release_all(messages.by_ref()).await;
                break;
            }

            let payload = match message.build_payload() {
                Ok(payload) => payload,
                Err(e) if e.is_permanent() => {
                    self.outcomes.terminal(&message, &e.to_string()).await;
                    report.failed += 1;
                    continue;
                }
                Err(e) => {
                    self.outcomes.defer(&message, &e).await;
                    report.deferred += 1;
                    continue;
                }
            };

            let mut active = match session.take() {
                Some(active) => active,
                None => {
                    if report.sessions_opened >= self.max_reconnect_attempts {
                        let error = DeliveryError::ConnectionLost(format!(
                            "límite de {} aperturas de sesión alcanzado",
                            self.max_reconnect_attempts
                        ));
                        let rest = std::iter::once(message).chain(messages.by_ref());
                        report.deferred += self.defer_all(rest, &error).await;
                        break;
                    }

                    let opened = match message.channel_config() {
                        Ok(config) => {
                            report.sessions_opened += 1;
                            tokio::time::timeout(self.send_timeout, self.sessions.open(&config))
                                .await
                                .unwrap_or(Err(DeliveryError::Timeout(self.send_timeout)))
                        }
                        Err(e) => Err(e),
                    };
                    match opened {
                        Ok(active) => active,
                        Err(e) => {
                            log::error!(
                                "(process_batch) No se pudo abrir sesión {} para campaña {}: {}",
                                self.channel,
                                batch.campaign.id,
                                e
                            );
                            let rest = std::iter::once(message).chain(messages.by_ref());
                            report.deferred += self.defer_all(rest, &e).await;
                            break;
                        }
                    }
                }
            };

            let sent = tokio::time::timeout(self.send_timeout, active.send(&payload))
                .await
                .unwrap_or(Err(DeliveryError::Timeout(self.send_timeout)));

            match sent {
                Ok(()) => {
                    session = Some(active);
                    log::info!(
                        "(process_batch) {} enviado a {} (r_id={})",
                        self.channel,
                        message.destination().unwrap_or_default(),
                        message.entry().r_id
                    );
                    self.outcomes.success(&message).await;
                    report.sent += 1;
                }
                Err(e) => {
                    if !e.drops_session() {
                        session = Some(active);
                    }
                    match e {
                        DeliveryError::Permanent(_) => {
                            self.outcomes.terminal(&message, &e.to_string()).await;
                            report.failed += 1;
                        }
                        DeliveryError::Configuration(_) => {
                            self.outcomes.defer(&message, &e).await;
                            report.deferred += 1;
                        }
                        _ => {
                            self.outcomes.backoff(&message, &e).await;
                            report.retried += 1;
                        }
                    }
                }
            }
        }

        report
    }

    /// Envío de prueba fuera de la cola. Usa el mismo armado, la misma sesión y
    /// los mismos plazos que un lote, y devuelve el error ya clasificado en vez
    /// de reprogramar: no hay entry ni resultado detrás.
    pub async fn send_test(
        &self,
        campaign: Arc<CampaignContext>,
        recipient: Recipient,
    ) -> Result<(), DeliveryError> {
        let _permit = self.permits.acquire().await.map_err(|_| {
            DeliveryError::Transient(format!("worker {} detenido", self.channel))
        })?;

        let message = OutboundMessage::preview(self.channel, campaign, recipient);
        let payload = message.build_payload()?;
        let config = message.channel_config()?;
        let destination = message.destination()?;

        let mut session = tokio::time::timeout(self.send_timeout, self.sessions.open(&config))
            .await
            .unwrap_or(Err(DeliveryError::Timeout(self.send_timeout)))?;
        let sent = tokio::time::timeout(self.send_timeout, session.send(&payload))
            .await
            .unwrap_or(Err(DeliveryError::Timeout(self.send_timeout)));

        match &sent {
            Ok(()) => log::info!("(send_test) {} de prueba enviado a {}", self.channel, destination),
            Err(e) => log::warn!(
                "(send_test) {} de prueba a {} falló: {}",
                self.channel,
                destination,
                e
            ),
        }
        sent
    }

    async fn defer_all(
        &self,
        messages: impl Iterator<Item = OutboundMessage>,
        error: &DeliveryError,
    ) -> usize {
        let mut deferred = 0;
        for message in messages {
            self.outcomes.defer(&message, error).await;
            deferred += 1;
        }
        deferred
    }

    async fn release_all(&self, messages: impl IntoIterator<Item = OutboundMessage>) {
        for message in messages {
            self.outcomes.release(&message).await;
        }
    }
}
