//! config/delivery_config.rs
//! Configuración global del motor de envíos (intervalos, límites, reintentos).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Configuración del scheduler y de los workers, con valores por defecto
/// (se sobreescriben con variables de entorno / .env).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub database_url: Option<String>,
    pub bind_address: String,
    pub bind_port: u16,
    pub scheduler_interval_secs: u64, // cada cuánto corre una pasada
    pub max_concurrent_batches: usize, // lotes en vuelo por worker
    pub worker_queue_capacity: usize,
    pub send_timeout_secs: u64, // límite por envío individual
    pub max_send_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    pub chat_api_base: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        DeliveryConfig {
            database_url: None,
            bind_address: "0.0.0.0".to_string(),
            bind_port: 5022,
            scheduler_interval_secs: 60,
            max_concurrent_batches: 8,
            worker_queue_capacity: 64,
            send_timeout_secs: 30,
            max_send_attempts: 8,
            max_reconnect_attempts: 10,
            backoff_base_secs: 60,
            backoff_max_secs: 6 * 60 * 60,
            chat_api_base: "https://graph.facebook.com/v21.0".to_string(),
        }
    }
}

impl DeliveryConfig {
    /// Lee la configuración del entorno. Las variables ausentes toman el default;
    /// las presentes pero mal formadas son error.
    pub fn from_env() -> Result<Self> {
        let defaults = DeliveryConfig::default();
        Ok(DeliveryConfig {
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            bind_address: env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            bind_port: parse_var("BIND_PORT", defaults.bind_port)?,
            scheduler_interval_secs: parse_var(
                "SCHEDULER_INTERVAL_SECS",
                defaults.scheduler_interval_secs,
            )?,
            max_concurrent_batches: parse_var(
                "MAX_CONCURRENT_BATCHES",
                defaults.max_concurrent_batches,
            )?
            .max(1),
            worker_queue_capacity: parse_var(
                "WORKER_QUEUE_CAPACITY",
                defaults.worker_queue_capacity,
            )?
            .max(1),
            send_timeout_secs: parse_var("SEND_TIMEOUT_SECS", defaults.send_timeout_secs)?,
            max_send_attempts: parse_var("MAX_SEND_ATTEMPTS", defaults.max_send_attempts)?,
            max_reconnect_attempts: parse_var(
                "MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            )?,
            backoff_base_secs: parse_var("BACKOFF_BASE_SECS", defaults.backoff_base_secs)?
                .max(1),
            backoff_max_secs: parse_var("BACKOFF_MAX_SECS", defaults.backoff_max_secs)?,
            chat_api_base: env::var("CHAT_API_BASE").unwrap_or(defaults.chat_api_base),
        })
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs.max(1))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs.max(1))
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs.max(1))
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs.max(self.backoff_base_secs.max(1)))
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow!("Valor inválido para {name}: '{raw}'")),
        _ => Ok(default),
    }
}
