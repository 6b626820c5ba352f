//! services/event_service.rs
//! Historial de eventos de campaña (solo inserción).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};

use crate::database::{from_db_time, to_db_time};
use crate::models::event_model::{Event, NewEvent};

#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, event: NewEvent) -> Result<Event>;

    /// Eventos de un destinatario en orden de inserción.
    async fn list_for_result(&self, r_id: &str) -> Result<Vec<Event>>;
}

#[derive(Debug, Clone)]
pub struct EventService {
    db_pool: Pool<Sqlite>,
}

impl EventService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        EventService { db_pool }
    }
}

#[async_trait]
impl EventLog for EventService {
    async fn append(&self, event: NewEvent) -> Result<Event> {
        let time = Utc::now();
        let details = event
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("No se pudo serializar el detalle del evento")?;

        let done = sqlx::query(
            r#"
            INSERT INTO events (campaign_id, r_id, email, time, message, details)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(event.campaign_id)
        .bind(&event.r_id)
        .bind(&event.email)
        .bind(to_db_time(&time))
        .bind(event.kind.as_str())
        .bind(details)
        .execute(&self.db_pool)
        .await
        .context("Error insertando evento")?;

        Ok(Event {
            id: done.last_insert_rowid(),
            campaign_id: event.campaign_id,
            r_id: event.r_id,
            email: event.email,
            time,
            message: event.kind.as_str().to_string(),
            details: event.details,
        })
    }

    async fn list_for_result(&self, r_id: &str) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            r#"
            SELECT id, campaign_id, r_id, email, time, message, details
            FROM events
            WHERE r_id = ?1
            ORDER BY id
            "#,
        )
        .bind(r_id)
        .fetch_all(&self.db_pool)
        .await
        .context("Error listando eventos")?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let time: String = row.try_get("time")?;
            let details: Option<String> = row.try_get("details")?;
            events.push(Event {
                id: row.try_get("id")?,
                campaign_id: row.try_get("campaign_id")?,
                r_id: row.try_get("r_id")?,
                email: row.try_get("email")?,
                time: from_db_time(&time)?,
                message: row.try_get("message")?,
                details: details
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .context("Detalle de evento corrupto")?,
            });
        }
        Ok(events)
    }
}
