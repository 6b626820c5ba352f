//! services/chat_service.rs
//! Canal de chat sobre la Graph API (reqwest). La sesión reutiliza el cliente
//! HTTP y el token ya validado.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::models::campaign_model::{ChannelConfig, ChannelKind, ChatProfile};
use crate::services::channel_service::{ChannelSession, DeliveryError, Payload, SessionFactory};

/// Formato aceptado para el número emisor del perfil: `+54 11 5555-0000`
const SENDER_NUMBER_PATTERN: &str = r"^[+][0-9]{2}[ ]?([0-9]+(-| )?)+$";

#[derive(Debug, Clone)]
pub struct ChatSessionFactory {
    client: Client,
    api_base: String,
    sender_number: Regex,
}

impl ChatSessionFactory {
    pub fn new(api_base: &str, send_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(send_timeout)
            .build()
            .context("No se pudo crear el cliente HTTP de chat")?;
        let sender_number =
            Regex::new(SENDER_NUMBER_PATTERN).context("Patrón de número inválido")?;

        Ok(ChatSessionFactory {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            sender_number,
        })
    }

    /// Número con formato válido y token presente.
    pub fn validate_profile(&self, profile: &ChatProfile) -> Result<(), DeliveryError> {
        if !self.sender_number.is_match(profile.number.trim()) {
            return Err(DeliveryError::Configuration(format!(
                "Número emisor inválido: '{}'",
                profile.number
            )));
        }
        if profile.number_id.trim().is_empty() {
            return Err(DeliveryError::Configuration(
                "Falta el identificador del número".to_string(),
            ));
        }
        if profile.auth_token.trim().is_empty() {
            return Err(DeliveryError::Configuration(
                "Falta el token de autenticación".to_string(),
            ));
        }
        Ok(())
    }

    /// Consulta el número emisor con el token; un 401/403 invalida el perfil.
    async fn check_token(&self, profile: &ChatProfile) -> Result<(), DeliveryError> {
        let url = format!(
            "{}/{}",
            self.api_base,
            urlencoding::encode(&profile.number_id)
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&profile.auth_token)
            .send()
            .await
            .map_err(|e| DeliveryError::ConnectionLost(format!("GET {url} falló: {e}")))?;

        let status = resp.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(DeliveryError::Configuration(
                format!("Token rechazado para el número {}", profile.number_id),
            )),
            s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => Err(
                DeliveryError::Transient(format!("La API de chat respondió {s} al validar")),
            ),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl SessionFactory for ChatSessionFactory {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Chat
    }

    async fn open(&self, config: &ChannelConfig) -> Result<Box<dyn ChannelSession>, DeliveryError> {
        let ChannelConfig::Chat(profile) = config else {
            return Err(DeliveryError::Configuration(format!(
                "se esperaba perfil de chat, llegó {}",
                config.kind()
            )));
        };

        self.validate_profile(profile)?;
        self.check_token(profile).await?;
        log::debug!("(open) sesión de chat lista para {}", profile.number_id);

        Ok(Box::new(ChatSession {
            client: self.client.clone(),
            api_base: self.api_base.clone(),
            auth_token: profile.auth_token.clone(),
        }))
    }
}

pub struct ChatSession {
    client: Client,
    api_base: String,
    auth_token: String,
}

#[async_trait]
impl ChannelSession for ChatSession {
    async fn send(&mut self, payload: &Payload) -> Result<(), DeliveryError> {
        let Payload::Chat { number_id, body } = payload else {
            return Err(DeliveryError::Configuration(format!(
                "la sesión de chat no envía payloads de {}",
                payload.kind()
            )));
        };

        let url = format!(
            "{}/{}/messages",
            self.api_base,
            urlencoding::encode(number_id)
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.auth_token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    DeliveryError::Transient(format!("Request inválido: {e}"))
                } else {
                    DeliveryError::ConnectionLost(format!("POST {url} falló: {e}"))
                }
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| DeliveryError::ConnectionLost(format!("Respuesta cortada: {e}")))?;
        log::debug!("(send) chat -> status={}", status);

        classify_chat_response(status, &text)
    }
}

/// La API puede responder 200 con un campo `error`: eso también es un fallo.
pub fn classify_chat_response(status: StatusCode, body: &str) -> Result<(), DeliveryError> {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(DeliveryError::Transient(format!("HTTP {status}: {body}")));
    }

    let json: Value = serde_json::from_str(body).map_err(|_| {
        DeliveryError::Permanent(format!("Respuesta no JSON (HTTP {status}): {body}"))
    })?;

    if let Some(error) = json.get("error") {
        return Err(DeliveryError::Permanent(format!(
            "La API de chat devolvió error (HTTP {status}): {error}"
        )));
    }

    if !status.is_success() {
        return Err(DeliveryError::Permanent(format!("HTTP {status}: {body}")));
    }

    Ok(())
}
