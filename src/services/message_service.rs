//! services/message_service.rs
//! Mensaje saliente por destinatario: variante por canal con destino y payload.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::Address;
use serde_json::json;
use uuid::Uuid;

use crate::models::campaign_model::{CampaignContext, ChannelConfig, ChannelKind};
use crate::models::entry_model::{Entry, Recipient};
use crate::services::channel_service::{DeliveryError, Payload};
use crate::services::template_service::TemplateContext;

/// Mínimo de dígitos para considerar válido un número de destino
const MIN_PHONE_DIGITS: usize = 8;

/// Token de los mensajes de prueba; no corresponde a ningún resultado.
pub const PREVIEW_RID: &str = "preview";

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub entry: Entry,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub entry: Entry,
}

#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Email(EmailMessage),
    Chat(ChatMessage),
}

impl OutboundMessage {
    pub fn from_entry(entry: Entry) -> Self {
        match entry.channel {
            ChannelKind::Email => OutboundMessage::Email(EmailMessage { entry }),
            ChannelKind::Chat => OutboundMessage::Chat(ChatMessage { entry }),
        }
    }

    /// Mensaje suelto, sin fila en `entries` ni resultado detrás.
    pub fn preview(
        channel: ChannelKind,
        campaign: Arc<CampaignContext>,
        recipient: Recipient,
    ) -> Self {
        OutboundMessage::from_entry(Entry {
            id: 0,
            campaign_id: campaign.id,
            user_id: campaign.user_id,
            r_id: PREVIEW_RID.to_string(),
            channel,
            send_date: Utc::now(),
            send_attempt: 0,
            processing: false,
            recipient,
            context: Some(campaign),
        })
    }

    pub fn entry(&self) -> &Entry {
        match self {
            OutboundMessage::Email(message) => &message.entry,
            OutboundMessage::Chat(message) => &message.entry,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            OutboundMessage::Email(_) => ChannelKind::Email,
            OutboundMessage::Chat(_) => ChannelKind::Chat,
        }
    }

    fn context(&self) -> Result<&CampaignContext, DeliveryError> {
        self.entry().context.as_deref().ok_or_else(|| {
            DeliveryError::Configuration(format!(
                "entry {} sin contexto de campaña cacheado",
                self.entry().id
            ))
        })
    }

    /// Perfil del canal de este mensaje, tomado del contexto de la campaña.
    pub fn channel_config(&self) -> Result<ChannelConfig, DeliveryError> {
        let context = self.context()?;
        context.channel_config(self.kind()).ok_or_else(|| {
            DeliveryError::Configuration(format!(
                "la campaña {} no tiene perfil de {}",
                context.id,
                self.kind()
            ))
        })
    }

    pub fn destination(&self) -> Result<String, DeliveryError> {
        match self {
            OutboundMessage::Email(message) => message.mailbox().map(|m| m.to_string()),
            OutboundMessage::Chat(message) => message.phone_number(),
        }
    }

    pub fn build_payload(&self) -> Result<Payload, DeliveryError> {
        let context = self.context()?;
        let template = TemplateContext::new(context, self.entry())
            .map_err(|e| DeliveryError::Permanent(format!("{e:#}")))?;

        match self {
            OutboundMessage::Email(message) => message.build(context, &template),
            OutboundMessage::Chat(message) => message.build(context, &template),
        }
    }
}

impl EmailMessage {
    fn mailbox(&self) -> Result<Mailbox, DeliveryError> {
        let recipient = &self.entry.recipient;
        let address: Address = recipient.email.trim().parse().map_err(|e| {
            DeliveryError::Permanent(format!("Invalid recipient address '{}': {e}", recipient.email))
        })?;

        let name = format!("{} {}", recipient.first_name, recipient.last_name)
            .trim()
            .to_string();
        Ok(Mailbox::new((!name.is_empty()).then_some(name), address))
    }

    fn build(
        &self,
        context: &CampaignContext,
        template: &TemplateContext,
    ) -> Result<Payload, DeliveryError> {
        let smtp = context.smtp.as_ref().ok_or_else(|| {
            DeliveryError::Configuration(format!("la campaña {} no tiene perfil SMTP", context.id))
        })?;
        let from: Mailbox = smtp
            .from_address
            .parse()
            .map_err(|e| DeliveryError::Permanent(format!("Invalid from address: {e}")))?;
        let domain = from.email.domain().to_string();

        let subject = template.render(&context.template.subject);
        let html = template.render(&context.template.html);
        let text = template.render(&context.template.text);

        let builder = lettre::Message::builder()
            .from(from)
            .to(self.mailbox()?)
            .subject(subject)
            .message_id(Some(format!("<{}@{}>", Uuid::new_v4(), domain)));

        let message = match (html.is_empty(), text.is_empty()) {
            (false, false) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(text))
                    .singlepart(SinglePart::html(html)),
            ),
            (false, true) => builder.header(ContentType::TEXT_HTML).body(html),
            (true, _) => builder.header(ContentType::TEXT_PLAIN).body(text),
        }
        .map_err(|e| DeliveryError::Permanent(format!("Failed to build email: {e}")))?;

        Ok(Payload::Email {
            envelope: message.envelope().clone(),
            raw: message.formatted(),
        })
    }
}

impl ChatMessage {
    /// Solo dígitos, como los espera la API (`+54 9 11-1234` -> `549111234`).
    fn phone_number(&self) -> Result<String, DeliveryError> {
        let digits: String = self
            .entry
            .recipient
            .phone
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        if digits.len() < MIN_PHONE_DIGITS {
            return Err(DeliveryError::Permanent(format!(
                "Invalid destination number '{}'",
                self.entry.recipient.phone
            )));
        }
        Ok(digits)
    }

    fn build(
        &self,
        context: &CampaignContext,
        template: &TemplateContext,
    ) -> Result<Payload, DeliveryError> {
        let chat = context.chat.as_ref().ok_or_else(|| {
            DeliveryError::Configuration(format!(
                "la campaña {} no tiene perfil de chat",
                context.id
            ))
        })?;

        let text = if context.template.text.is_empty() {
            template.render(&context.template.subject)
        } else {
            template.render(&context.template.text)
        };

        let body = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": self.phone_number()?,
            "type": "text",
            "text": {
                "preview_url": true,
                "body": text,
            }
        });
        let body = serde_json::to_vec(&body)
            .map_err(|e| DeliveryError::Permanent(format!("Failed to encode chat body: {e}")))?;

        Ok(Payload::Chat {
            number_id: chat.number_id.clone(),
            body: Bytes::from(body),
        })
    }
}
