use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::entry_model::Recipient;

/// Estado de la campaña. El motor solo escribe `InProgress`, y solo desde `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CampaignStatus {
    Queued,
    InProgress,
    Sent,
    Completed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Queued => "Queued",
            CampaignStatus::InProgress => "In progress",
            CampaignStatus::Sent => "Emails Sent",
            CampaignStatus::Completed => "Completed",
        }
    }
}

impl FromStr for CampaignStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Queued" => Ok(CampaignStatus::Queued),
            "In progress" => Ok(CampaignStatus::InProgress),
            "Emails Sent" => Ok(CampaignStatus::Sent),
            "Completed" => Ok(CampaignStatus::Completed),
            other => Err(anyhow!("Estado de campaña desconocido: {other}")),
        }
    }
}

/// Canal por el que sale un envío.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelKind {
    Email,
    Chat,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Chat => "chat",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(ChannelKind::Email),
            "chat" => Ok(ChannelKind::Chat),
            other => Err(anyhow!("Canal no soportado: {other}")),
        }
    }
}

/// Perfil SMTP de envío
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpProfile {
    #[serde(default)]
    pub id: i64,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    pub from_address: String,
    #[serde(default)]
    pub ignore_cert_errors: bool,
}

/// Perfil de la API de chat (número emisor + token)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatProfile {
    pub id: i64,
    pub number: String,
    pub number_id: String,
    #[serde(skip_serializing)]
    pub auth_token: String,
}

/// Credenciales de un canal concreto, lo que necesita la fábrica de sesiones.
#[derive(Debug, Clone)]
pub enum ChannelConfig {
    Smtp(SmtpProfile),
    Chat(ChatProfile),
}

impl ChannelConfig {
    pub fn kind(&self) -> ChannelKind {
        match self {
            ChannelConfig::Smtp(_) => ChannelKind::Email,
            ChannelConfig::Chat(_) => ChannelKind::Chat,
        }
    }
}

/// Plantilla ya asociada a la campaña (el render real es externo).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignTemplate {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Contexto de una campaña: todo lo necesario para armar y despachar sus envíos.
/// Se carga una vez por pasada del scheduler.
#[derive(Debug, Clone)]
pub struct CampaignContext {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub status: CampaignStatus,
    pub url: String,
    pub template: CampaignTemplate,
    pub smtp: Option<SmtpProfile>,
    pub chat: Option<ChatProfile>,
    pub launch_date: DateTime<Utc>,
}

impl CampaignContext {
    pub fn channel_config(&self, kind: ChannelKind) -> Option<ChannelConfig> {
        match kind {
            ChannelKind::Email => self.smtp.clone().map(ChannelConfig::Smtp),
            ChannelKind::Chat => self.chat.clone().map(ChannelConfig::Chat),
        }
    }

    /// Dirección "From" para plantillas (si no hay SMTP, el número del chat).
    pub fn from_address(&self) -> &str {
        match (&self.smtp, &self.chat) {
            (Some(smtp), _) => &smtp.from_address,
            (None, Some(chat)) => &chat.number,
            (None, None) => "",
        }
    }
}

/// Datos para registrar una campaña (lo usa la capa de gestión y los tests)
#[derive(Debug, Clone, Deserialize)]
pub struct NewCampaign {
    pub user_id: i64,
    pub name: String,
    pub url: String,
    pub template: CampaignTemplate,
    pub smtp_id: Option<i64>,
    pub chat_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSmtpProfile {
    pub user_id: i64,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub ignore_cert_errors: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewChatProfile {
    pub user_id: i64,
    pub name: String,
    pub number: String,
    pub number_id: String,
    pub auth_token: String,
}

/// Email de prueba: perfil, plantilla y destinatario vienen en el pedido, no de la base.
#[derive(Debug, Clone, Deserialize)]
pub struct TestEmailRequest {
    pub url: String,
    pub template: CampaignTemplate,
    pub smtp: SmtpProfile,
    pub recipient: Recipient,
}

impl TestEmailRequest {
    /// Contexto de campaña efímero para armar el mensaje con el mismo código que un lote.
    pub fn into_context(self) -> (CampaignContext, Recipient) {
        let context = CampaignContext {
            id: 0,
            user_id: 0,
            name: "Email de prueba".to_string(),
            status: CampaignStatus::Queued,
            url: self.url,
            template: self.template,
            smtp: Some(self.smtp),
            chat: None,
            launch_date: Utc::now(),
        };
        (context, self.recipient)
    }
}
