//! services/channel_service.rs
//! Contrato común de los canales: sesión reutilizable, payload y clasificación de errores.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lettre::address::Envelope;

use crate::models::campaign_model::{ChannelConfig, ChannelKind};

/// Error de envío ya clasificado. El worker decide con esto entre backoff y error definitivo.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Invalid channel configuration: {0}")]
    Configuration(String),
    #[error("Transient send failure: {0}")]
    Transient(String),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Send timed out after {0:?}")]
    Timeout(Duration),
    #[error("Permanent send failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Permanent(_))
    }

    /// La sesión ya no sirve y hay que reabrirla antes del siguiente envío.
    pub fn drops_session(&self) -> bool {
        matches!(
            self,
            DeliveryError::ConnectionLost(_) | DeliveryError::Timeout(_)
        )
    }
}

/// Lo que viaja por el cable, ya armado.
#[derive(Debug, Clone)]
pub enum Payload {
    Email { envelope: Envelope, raw: Vec<u8> },
    Chat { number_id: String, body: Bytes },
}

impl Payload {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Payload::Email { .. } => ChannelKind::Email,
            Payload::Chat { .. } => ChannelKind::Chat,
        }
    }
}

/// Conexión abierta contra el canal; se usa en serie, un envío a la vez.
#[async_trait]
pub trait ChannelSession: Send {
    async fn send(&mut self, payload: &Payload) -> Result<(), DeliveryError>;
}

/// Abre sesiones para un tipo de canal. Abrir es caro (TLS, validación de token).
#[async_trait]
pub trait SessionFactory: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn open(&self, config: &ChannelConfig) -> Result<Box<dyn ChannelSession>, DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_errors_drop_the_session() {
        assert!(DeliveryError::ConnectionLost("reset".into()).drops_session());
        assert!(DeliveryError::Timeout(Duration::from_secs(30)).drops_session());
        assert!(!DeliveryError::Transient("421".into()).drops_session());
        assert!(!DeliveryError::Permanent("550".into()).drops_session());
        assert!(DeliveryError::Permanent("550".into()).is_permanent());
        assert!(!DeliveryError::Configuration("sin token".into()).is_permanent());
    }
}
