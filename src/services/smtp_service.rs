//! services/smtp_service.rs
//! Canal de email sobre SMTP (lettre). Una sesión = un transporte abierto y probado.

use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};

use crate::models::campaign_model::{ChannelConfig, ChannelKind, SmtpProfile};
use crate::services::channel_service::{ChannelSession, DeliveryError, Payload, SessionFactory};

/// Puerto de SMTP sobre TLS implícito
const SMTPS_PORT: u16 = 465;

#[derive(Debug, Clone)]
pub struct SmtpSessionFactory {
    send_timeout: Duration,
}

impl SmtpSessionFactory {
    pub fn new(send_timeout: Duration) -> Self {
        SmtpSessionFactory { send_timeout }
    }

    fn transport(&self, profile: &SmtpProfile) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
        let tls_params = TlsParameters::builder(profile.host.clone())
            .dangerous_accept_invalid_certs(profile.ignore_cert_errors)
            .build()
            .map_err(|e| DeliveryError::Configuration(format!("TLS inválido para {}: {e}", profile.host)))?;

        let tls = if profile.port == SMTPS_PORT {
            Tls::Wrapper(tls_params)
        } else {
            Tls::Opportunistic(tls_params)
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&profile.host)
            .port(profile.port)
            .tls(tls)
            .timeout(Some(self.send_timeout));

        if !profile.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                profile.username.clone(),
                profile.password.clone(),
            ));
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl SessionFactory for SmtpSessionFactory {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn open(&self, config: &ChannelConfig) -> Result<Box<dyn ChannelSession>, DeliveryError> {
        let ChannelConfig::Smtp(profile) = config else {
            return Err(DeliveryError::Configuration(format!(
                "se esperaba perfil SMTP, llegó {}",
                config.kind()
            )));
        };

        let transport = self.transport(profile)?;
        match transport.test_connection().await {
            Ok(true) => {
                log::debug!("(open) sesión SMTP abierta con {}:{}", profile.host, profile.port);
                Ok(Box::new(SmtpSession { transport }))
            }
            Ok(false) => Err(DeliveryError::ConnectionLost(format!(
                "{}:{} no respondió al NOOP",
                profile.host, profile.port
            ))),
            // Credenciales rechazadas: reintentar no sirve hasta corregir el perfil
            Err(e) if e.is_permanent() => Err(DeliveryError::Configuration(format!(
                "SMTP {} rechazó la sesión: {e}",
                profile.host
            ))),
            Err(e) => Err(DeliveryError::ConnectionLost(format!(
                "No se pudo conectar a {}:{}: {e}",
                profile.host, profile.port
            ))),
        }
    }
}

pub struct SmtpSession {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

#[async_trait]
impl ChannelSession for SmtpSession {
    async fn send(&mut self, payload: &Payload) -> Result<(), DeliveryError> {
        let Payload::Email { envelope, raw } = payload else {
            return Err(DeliveryError::Configuration(format!(
                "la sesión SMTP no envía payloads de {}",
                payload.kind()
            )));
        };

        self.transport
            .send_raw(envelope, raw)
            .await
            .map(|_| ())
            .map_err(|e| classify_smtp_error(&e))
    }
}

/// 5xx -> definitivo, 4xx -> transitorio; el resto (red, TLS) invalida la sesión.
fn classify_smtp_error(error: &lettre::transport::smtp::Error) -> DeliveryError {
    if error.is_permanent() {
        DeliveryError::Permanent(error.to_string())
    } else if error.is_transient() {
        DeliveryError::Transient(error.to_string())
    } else {
        DeliveryError::ConnectionLost(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::campaign_model::ChatProfile;

    #[actix_rt::test]
    async fn rejects_foreign_profile() {
        let factory = SmtpSessionFactory::new(Duration::from_secs(1));
        let config = ChannelConfig::Chat(ChatProfile {
            id: 1,
            number: "+54 11 5555-0000".to_string(),
            number_id: "1".to_string(),
            auth_token: "t".to_string(),
        });

        let err = factory.open(&config).await.err().unwrap();
        assert!(matches!(err, DeliveryError::Configuration(_)));
    }

    #[actix_rt::test]
    async fn unreachable_server_is_connection_lost() {
        let factory = SmtpSessionFactory::new(Duration::from_secs(2));
        let config = ChannelConfig::Smtp(SmtpProfile {
            id: 1,
            host: "127.0.0.1".to_string(),
            port: 1,
            username: String::new(),
            password: String::new(),
            from_address: "it@example.com".to_string(),
            ignore_cert_errors: true,
        });

        let err = factory.open(&config).await.err().unwrap();
        assert!(matches!(err, DeliveryError::ConnectionLost(_)), "{err}");
    }
}
