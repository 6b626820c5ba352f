//! services/scheduler_service.rs
//! Pasada periódica: toma los envíos vencidos, los bloquea, los agrupa por
//! campaña y canal y los entrega a la cola del worker correspondiente.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::models::campaign_model::{CampaignStatus, ChannelKind};
use crate::models::entry_model::Entry;
use crate::services::campaign_service::CampaignContextProvider;
use crate::services::context_cache::CampaignContextCache;
use crate::services::delivery_worker::{DispatchBatch, DispatchQueue};
use crate::services::entry_service::EntryStore;
use crate::services::message_service::OutboundMessage;

/// Resumen de una pasada (o de un lanzamiento).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub claimed: usize,
    pub skipped: usize,
    pub batches: usize,
    pub campaigns_started: usize,
}

#[derive(Clone)]
pub struct SchedulerService {
    entries: Arc<dyn EntryStore>,
    campaigns: Arc<dyn CampaignContextProvider>,
    email_queue: DispatchQueue,
    chat_queue: DispatchQueue,
}

impl SchedulerService {
    pub fn new(
        entries: Arc<dyn EntryStore>,
        campaigns: Arc<dyn CampaignContextProvider>,
        email_queue: DispatchQueue,
        chat_queue: DispatchQueue,
    ) -> Self {
        SchedulerService {
            entries,
            campaigns,
            email_queue,
            chat_queue,
        }
    }

    /// Una pasada por tick hasta la cancelación. Un error en una pasada se
    /// registra y la siguiente corre igual.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("(run) scheduler iniciado, intervalo {:?}", interval);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.process_campaigns(Utc::now()).await {
                Ok(summary) if summary.claimed > 0 => {
                    log::info!("(run) pasada terminada: {:?}", summary)
                }
                Ok(_) => log::debug!("(run) sin envíos pendientes"),
                Err(e) => log::error!("(run) Error en la pasada del scheduler: {:?}", e),
            }
        }

        log::info!("(run) scheduler detenido");
    }

    pub async fn process_campaigns(&self, now: DateTime<Utc>) -> Result<PassSummary> {
        let due = self.entries.list_due(now).await?;
        if due.is_empty() {
            return Ok(PassSummary::default());
        }
        log::debug!("(process_campaigns) {} envíos vencidos", due.len());
        self.dispatch(due, now).await
    }

    /// Despacha ya los envíos de una campaña, fuera del tick. Los programados
    /// a futuro quedan para su fecha.
    pub async fn launch_campaign(&self, campaign_id: i64) -> Result<PassSummary> {
        let now = Utc::now();
        let pending: Vec<Entry> = self
            .entries
            .list_for_campaign(campaign_id)
            .await?
            .into_iter()
            .filter(|entry| !entry.processing)
            .collect();

        log::info!(
            "(launch_campaign) campaña {}: {} envíos sin bloquear",
            campaign_id,
            pending.len()
        );
        self.dispatch(pending, now).await
    }

    fn queue_for(&self, channel: ChannelKind) -> &DispatchQueue {
        match channel {
            ChannelKind::Email => &self.email_queue,
            ChannelKind::Chat => &self.chat_queue,
        }
    }

    async fn dispatch(&self, candidates: Vec<Entry>, now: DateTime<Utc>) -> Result<PassSummary> {
        let mut summary = PassSummary::default();

        let claimed = self.entries.claim(candidates).await?;
        summary.claimed = claimed.len();

        // La fecha se relee en el claim: pudo haberse reprogramado entre la consulta y el bloqueo
        let mut by_campaign: BTreeMap<i64, Vec<Entry>> = BTreeMap::new();
        for entry in claimed {
            if entry.send_date > now {
                summary.skipped += 1;
                self.release_entry(&entry).await;
                continue;
            }
            by_campaign.entry(entry.campaign_id).or_default().push(entry);
        }

        let mut cache = CampaignContextCache::new(self.campaigns.clone());
        let mut groups = by_campaign.into_iter();

        while let Some((campaign_id, entries)) = groups.next() {
            let user_id = entries.first().map(|entry| entry.user_id).unwrap_or_default();

            let context = match cache.get_or_load(campaign_id, user_id).await {
                Ok(context) => context,
                Err(e) => {
                    log::error!(
                        "(dispatch) Abortando pasada en campaña {}, liberando envíos pendientes",
                        campaign_id
                    );
                    self.release_remaining(entries, groups.by_ref()).await;
                    return Err(e);
                }
            };

            if context.status == CampaignStatus::Queued {
                match self.campaigns.mark_in_progress(campaign_id).await {
                    Ok(true) => {
                        log::info!("(dispatch) campaña {} en progreso", campaign_id);
                        summary.campaigns_started += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        self.release_remaining(entries, groups.by_ref()).await;
                        return Err(e);
                    }
                }
            }

            let mut by_channel: BTreeMap<ChannelKind, Vec<OutboundMessage>> = BTreeMap::new();
            for mut entry in entries {
                entry.cache_campaign(context.clone());
                by_channel
                    .entry(entry.channel)
                    .or_default()
                    .push(OutboundMessage::from_entry(entry));
            }

            for (channel, messages) in by_channel {
                let count = messages.len();
                let batch = DispatchBatch {
                    campaign: context.clone(),
                    channel,
                    messages,
                };

                let queue = self.queue_for(channel);
                match queue.submit(batch).await {
                    Ok(()) => {
                        summary.batches += 1;
                        log::debug!(
                            "(dispatch) lote {} de campaña {} con {} envíos encolado",
                            channel,
                            campaign_id,
                            count
                        );
                    }
                    Err(rejected) => {
                        log::error!(
                            "(dispatch) cola {} cerrada, liberando {} envíos de la campaña {}",
                            queue.channel(),
                            count,
                            campaign_id
                        );
                        for message in rejected.messages {
                            self.release_entry(message.entry()).await;
                        }
                    }
                }
            }
        }

        log::debug!("(dispatch) {} campañas cacheadas en la pasada", cache.len());
        Ok(summary)
    }

    /// Libera el grupo actual y todos los que no se llegaron a encolar.
    async fn release_remaining(
        &self,
        current: Vec<Entry>,
        rest: impl Iterator<Item = (i64, Vec<Entry>)>,
    ) {
        let pending = current.into_iter().chain(rest.flat_map(|(_, group)| group));
        for entry in pending {
            self.release_entry(&entry).await;
        }
    }

    async fn release_entry(&self, entry: &Entry) {
        if let Err(e) = self.entries.release(entry).await {
            log::error!("(release_entry) No se pudo liberar entry {}: {:?}", entry.id, e);
        }
    }
}
