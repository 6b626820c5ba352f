//! tests/support.rs
//! Base SQLite temporal, fixtures de campañas/destinatarios y sesiones falsas.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::config::delivery_config::DeliveryConfig;
use crate::database;
use crate::models::campaign_model::{
    CampaignTemplate, ChannelConfig, ChannelKind, NewCampaign, NewChatProfile, NewSmtpProfile,
};
use crate::models::entry_model::{Entry, NewEntry, Recipient};
use crate::models::result_model::ResultRecord;
use crate::services::backoff::ExponentialBackoff;
use crate::services::campaign_service::{CampaignContextProvider, CampaignService};
use crate::services::channel_service::{ChannelSession, DeliveryError, Payload, SessionFactory};
use crate::services::delivery_worker::DispatchBatch;
use crate::services::entry_service::{EntryService, EntryStore};
use crate::services::event_service::EventService;
use crate::services::message_service::OutboundMessage;
use crate::services::outcome_service::OutcomeRecorder;
use crate::services::result_service::ResultService;
use crate::services::tracking_service::TrackingService;

pub const USER_ID: i64 = 1;

/// Base de datos propia de cada test; se borra al soltar `_dir`.
pub struct Fixture {
    _dir: TempDir,
    pub pool: Pool<Sqlite>,
    pub entries: Arc<EntryService>,
    pub campaigns: Arc<CampaignService>,
    pub results: Arc<ResultService>,
    pub tracking: TrackingService,
}

impl Fixture {
    pub async fn new() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite:{}", dir.path().join("campaigns.db").display());
        let pool = database::connect(&url).await.expect("connect");
        database::run_migrations(&pool).await.expect("migrations");

        let results = Arc::new(ResultService::new(pool.clone()));
        let tracking = TrackingService::new(
            results.clone(),
            Arc::new(EventService::new(pool.clone())),
        );

        Fixture {
            _dir: dir,
            entries: Arc::new(EntryService::new(pool.clone())),
            campaigns: Arc::new(CampaignService::new(pool.clone())),
            results,
            tracking,
            pool,
        }
    }

    /// Campaña en `Queued` con los perfiles pedidos.
    pub async fn create_campaign(&self, smtp: bool, chat: bool) -> i64 {
        let smtp_id = if smtp {
            Some(
                self.campaigns
                    .create_smtp_profile(&NewSmtpProfile {
                        user_id: USER_ID,
                        name: "relay".to_string(),
                        host: "smtp.example.com".to_string(),
                        port: 587,
                        username: String::new(),
                        password: String::new(),
                        from_address: "Soporte <soporte@example.com>".to_string(),
                        ignore_cert_errors: false,
                    })
                    .await
                    .expect("smtp profile"),
            )
        } else {
            None
        };
        let chat_id = if chat {
            Some(
                self.campaigns
                    .create_chat_profile(&NewChatProfile {
                        user_id: USER_ID,
                        name: "chat".to_string(),
                        number: "+54 11 5555-0000".to_string(),
                        number_id: "10987654321".to_string(),
                        auth_token: "token".to_string(),
                    })
                    .await
                    .expect("chat profile"),
            )
        } else {
            None
        };

        self.campaigns
            .create_campaign(&NewCampaign {
                user_id: USER_ID,
                name: "Campaña de prueba".to_string(),
                url: "https://landing.example.com".to_string(),
                template: CampaignTemplate {
                    subject: "Hola {{.FirstName}}".to_string(),
                    html: "<a href='{{.URL}}'>ver</a>{{.Tracker}}".to_string(),
                    text: "Ver {{.URL}}".to_string(),
                },
                smtp_id,
                chat_id,
            })
            .await
            .expect("campaign")
    }

    /// Resultado + entry para un destinatario nuevo.
    pub async fn add_recipient(
        &self,
        campaign_id: i64,
        channel: ChannelKind,
        send_date: DateTime<Utc>,
    ) -> (ResultRecord, i64) {
        self.add_recipient_for(campaign_id, USER_ID, channel, send_date)
            .await
    }

    pub async fn add_recipient_for(
        &self,
        campaign_id: i64,
        user_id: i64,
        channel: ChannelKind,
        send_date: DateTime<Utc>,
    ) -> (ResultRecord, i64) {
        let n = uuid::Uuid::new_v4().simple().to_string();
        let recipient = Recipient {
            email: format!("user-{}@example.com", &n[..8]),
            first_name: "Ana".to_string(),
            last_name: "Gómez".to_string(),
            position: "Finanzas".to_string(),
            phone: "+54 9 11 4444-5555".to_string(),
        };
        let result = self
            .results
            .create_result(campaign_id, user_id, &recipient, send_date)
            .await
            .expect("result");
        let entry_id = self
            .entries
            .create_entry(&NewEntry {
                campaign_id,
                user_id,
                r_id: result.r_id.clone(),
                channel,
                send_date,
            })
            .await
            .expect("entry");
        (result, entry_id)
    }

    /// Bloquea los envíos de la campaña para un canal y arma el lote como lo haría el scheduler.
    pub async fn claimed_batch(&self, campaign_id: i64, channel: ChannelKind) -> DispatchBatch {
        let candidates = self
            .entries
            .list_for_campaign(campaign_id)
            .await
            .expect("list")
            .into_iter()
            .filter(|entry| entry.channel == channel)
            .collect();
        let claimed = self.entries.claim(candidates).await.expect("claim");
        let context = Arc::new(
            self.campaigns
                .load_context(campaign_id, USER_ID)
                .await
                .expect("context"),
        );

        let messages = claimed
            .into_iter()
            .map(|mut entry| {
                entry.cache_campaign(context.clone());
                OutboundMessage::from_entry(entry)
            })
            .collect();

        DispatchBatch {
            campaign: context,
            channel,
            messages,
        }
    }

    pub fn outcomes(&self, max_send_attempts: u32) -> OutcomeRecorder {
        self.outcomes_with(self.entries.clone(), max_send_attempts)
    }

    pub fn outcomes_with(
        &self,
        entries: Arc<dyn EntryStore>,
        max_send_attempts: u32,
    ) -> OutcomeRecorder {
        OutcomeRecorder::new(
            entries,
            self.tracking.clone(),
            Arc::new(ExponentialBackoff::new(
                Duration::from_secs(60),
                Duration::from_secs(3600),
            )),
            max_send_attempts,
        )
    }

    pub async fn processing_flag(&self, entry_id: i64) -> Option<bool> {
        self.entries
            .get_entry(entry_id)
            .await
            .expect("get entry")
            .map(|entry| entry.processing)
    }
}

pub fn test_config() -> DeliveryConfig {
    DeliveryConfig {
        max_concurrent_batches: 2,
        send_timeout_secs: 5,
        max_send_attempts: 8,
        max_reconnect_attempts: 3,
        ..DeliveryConfig::default()
    }
}

/// Resultado guionado para un open o un send de las sesiones falsas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Ok,
    Transient,
    Permanent,
    ConnectionLost,
    Misconfigured,
}

impl Step {
    fn into_result(self) -> Result<(), DeliveryError> {
        match self {
            Step::Ok => Ok(()),
            Step::Transient => Err(DeliveryError::Transient("421 try again later".into())),
            Step::Permanent => Err(DeliveryError::Permanent("550 mailbox unavailable".into())),
            Step::ConnectionLost => Err(DeliveryError::ConnectionLost("connection reset".into())),
            Step::Misconfigured => Err(DeliveryError::Configuration("bad credentials".into())),
        }
    }
}

#[derive(Default)]
struct Script {
    opens: VecDeque<Step>,
    sends: VecDeque<Step>,
    delivered: Vec<Payload>,
    cancel_after_sends: Option<(usize, CancellationToken)>,
}

/// Fábrica falsa: cada open/send consume el próximo paso del guion (Ok si se acabó).
#[derive(Clone)]
pub struct FakeSessions {
    kind: ChannelKind,
    opened: Arc<AtomicU32>,
    script: Arc<Mutex<Script>>,
}

impl FakeSessions {
    pub fn new(kind: ChannelKind) -> Self {
        FakeSessions {
            kind,
            opened: Arc::new(AtomicU32::new(0)),
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    pub fn with_opens(self, steps: &[Step]) -> Self {
        self.script.lock().unwrap().opens.extend(steps.iter().copied());
        self
    }

    pub fn with_sends(self, steps: &[Step]) -> Self {
        self.script.lock().unwrap().sends.extend(steps.iter().copied());
        self
    }

    /// Cancela `token` después de `sends` envíos exitosos.
    pub fn cancel_after(self, sends: usize, token: CancellationToken) -> Self {
        self.script.lock().unwrap().cancel_after_sends = Some((sends, token));
        self
    }

    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<Payload> {
        self.script.lock().unwrap().delivered.clone()
    }
}

#[async_trait]
impl SessionFactory for FakeSessions {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn open(&self, config: &ChannelConfig) -> Result<Box<dyn ChannelSession>, DeliveryError> {
        assert_eq!(config.kind(), self.kind);
        self.opened.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().opens.pop_front().unwrap_or(Step::Ok);
        step.into_result()?;
        Ok(Box::new(FakeSession {
            script: self.script.clone(),
        }))
    }
}

struct FakeSession {
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl ChannelSession for FakeSession {
    async fn send(&mut self, payload: &Payload) -> Result<(), DeliveryError> {
        let mut script = self.script.lock().unwrap();
        let step = script.sends.pop_front().unwrap_or(Step::Ok);
        if step == Step::Ok {
            script.delivered.push(payload.clone());
            let delivered = script.delivered.len();
            if let Some((after, token)) = &script.cancel_after_sends {
                if delivered >= *after {
                    token.cancel();
                }
            }
        }
        step.into_result()
    }
}

/// Almacén real salvo `reschedule`, que siempre falla.
pub struct RescheduleFails {
    inner: Arc<EntryService>,
}

impl RescheduleFails {
    pub fn new(inner: Arc<EntryService>) -> Self {
        RescheduleFails { inner }
    }
}

#[async_trait]
impl EntryStore for RescheduleFails {
    async fn list_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Entry>> {
        self.inner.list_due(now).await
    }

    async fn list_for_campaign(&self, campaign_id: i64) -> anyhow::Result<Vec<Entry>> {
        self.inner.list_for_campaign(campaign_id).await
    }

    async fn claim(&self, entries: Vec<Entry>) -> anyhow::Result<Vec<Entry>> {
        self.inner.claim(entries).await
    }

    async fn release(&self, entry: &Entry) -> anyhow::Result<()> {
        self.inner.release(entry).await
    }

    async fn reschedule(&self, entry: &Entry, _send_date: DateTime<Utc>) -> anyhow::Result<()> {
        Err(anyhow!("database is locked (entry {})", entry.id))
    }

    async fn complete(&self, entry: &Entry) -> anyhow::Result<()> {
        self.inner.complete(entry).await
    }
}
