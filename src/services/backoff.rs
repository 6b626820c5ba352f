//! services/backoff.rs
//! Política de reintento para fallos transitorios.

use std::time::Duration;

use chrono::{DateTime, Utc};

pub trait BackoffPolicy: Send + Sync {
    /// Espera antes del reintento número `attempt` (0 = primer fallo).
    /// Debe ser positiva y no decreciente en `attempt`.
    fn delay(&self, attempt: u32) -> Duration;

    /// Nueva fecha de envío: siempre estrictamente posterior a la fecha previa y a `now`.
    fn next_send_date(
        &self,
        previous: DateTime<Utc>,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay(attempt))
            .unwrap_or_else(|_| chrono::Duration::days(1))
            .max(chrono::Duration::seconds(1));
        previous.max(now) + delay
    }
}

/// `base * 2^attempt`, con tope.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_secs(1));
        ExponentialBackoff {
            base,
            max: max.max(base),
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }
}
