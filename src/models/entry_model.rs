use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::campaign_model::{CampaignContext, ChannelKind};

/// Datos del destinatario (vienen de la fila `results`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Recipient {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub position: String,
    pub phone: String,
}

/// Un envío programado: (campaña, destinatario) con su fecha y el flag de bloqueo.
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub id: i64,
    pub campaign_id: i64,
    pub user_id: i64,
    pub r_id: String,
    pub channel: ChannelKind,
    pub send_date: DateTime<Utc>,
    pub send_attempt: u32,
    pub processing: bool,
    pub recipient: Recipient,
    /// Contexto de la campaña, se llena justo antes de despachar (no se persiste).
    #[serde(skip)]
    pub context: Option<Arc<CampaignContext>>,
}

impl Entry {
    pub fn cache_campaign(&mut self, context: Arc<CampaignContext>) {
        self.context = Some(context);
    }
}

/// Alta de un envío (la hace la capa que lanza campañas)
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub campaign_id: i64,
    pub user_id: i64,
    pub r_id: String,
    pub channel: ChannelKind,
    pub send_date: DateTime<Utc>,
}
