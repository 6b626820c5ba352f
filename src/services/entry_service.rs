//! services/entry_service.rs
//! Almacén de envíos programados (tabla `entries`) y el claim/lock de cada fila.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

use crate::database::{from_db_time, to_db_time};
use crate::models::entry_model::{Entry, NewEntry, Recipient};

/// Operaciones que el scheduler y los workers necesitan sobre los envíos.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Envíos con `send_date <= now` y sin bloquear.
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Entry>>;

    async fn list_for_campaign(&self, campaign_id: i64) -> Result<Vec<Entry>>;

    /// Bloquea cada envío de forma exclusiva. Devuelve solo los que se pudieron
    /// bloquear, con la fecha y el intento releídos de la base.
    async fn claim(&self, entries: Vec<Entry>) -> Result<Vec<Entry>>;

    async fn release(&self, entry: &Entry) -> Result<()>;

    /// Nueva fecha de envío, intento +1 y desbloqueo.
    async fn reschedule(&self, entry: &Entry, send_date: DateTime<Utc>) -> Result<()>;

    /// El envío terminó (enviado o error definitivo); la fila se borra.
    async fn complete(&self, entry: &Entry) -> Result<()>;
}

const ENTRY_SELECT: &str = r#"
    SELECT e.id, e.campaign_id, e.user_id, e.r_id, e.channel, e.send_date,
           e.send_attempt, e.processing,
           r.email, r.first_name, r.last_name, r.position, r.phone
    FROM entries e
    JOIN results r ON r.r_id = e.r_id
"#;

#[derive(Debug, Clone)]
pub struct EntryService {
    db_pool: Pool<Sqlite>,
}

impl EntryService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        EntryService { db_pool }
    }

    pub async fn create_entry(&self, new_entry: &NewEntry) -> Result<i64> {
        let send_date = to_db_time(&new_entry.send_date);
        let done = sqlx::query(
            r#"
            INSERT INTO entries (campaign_id, user_id, r_id, channel, send_date, send_attempt, processing)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, 0)
            "#,
        )
        .bind(new_entry.campaign_id)
        .bind(new_entry.user_id)
        .bind(&new_entry.r_id)
        .bind(new_entry.channel.as_str())
        .bind(send_date)
        .execute(&self.db_pool)
        .await
        .context("Error insertando entry")?;

        Ok(done.last_insert_rowid())
    }

    pub async fn get_entry(&self, entry_id: i64) -> Result<Option<Entry>> {
        let sql = format!("{ENTRY_SELECT} WHERE e.id = ?1");
        let row = sqlx::query(&sql)
            .bind(entry_id)
            .fetch_optional(&self.db_pool)
            .await
            .context("Error leyendo entry")?;

        row.as_ref().map(entry_from_row).transpose()
    }

    /// `None` si otro llamador ya la tenía bloqueada.
    async fn claim_one(&self, mut entry: Entry) -> Result<Option<Entry>> {
        // El UPDATE condicional es el lock: solo un llamador ve processing = 0
        let row = sqlx::query(
            r#"
            UPDATE entries SET processing = 1
            WHERE id = ?1 AND processing = 0
            RETURNING send_date, send_attempt
            "#,
        )
        .bind(entry.id)
        .fetch_optional(&self.db_pool)
        .await
        .with_context(|| format!("Error bloqueando entry {}", entry.id))?;

        let Some(row) = row else {
            log::debug!("(claim) entry {} ya estaba bloqueada, se omite", entry.id);
            return Ok(None);
        };

        let reread = row
            .try_get::<String, _>("send_date")
            .map_err(anyhow::Error::from)
            .and_then(|send_date| from_db_time(&send_date))
            .and_then(|send_date| {
                let send_attempt: i64 = row.try_get("send_attempt")?;
                Ok((send_date, send_attempt))
            });

        match reread {
            Ok((send_date, send_attempt)) => {
                entry.send_date = send_date;
                entry.send_attempt = send_attempt.max(0) as u32;
                entry.processing = true;
                Ok(Some(entry))
            }
            Err(e) => {
                self.release(&entry).await?;
                Err(e.context(format!("Fila bloqueada ilegible, entry {}", entry.id)))
            }
        }
    }
}

#[async_trait]
impl EntryStore for EntryService {
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Entry>> {
        let sql = format!(
            "{ENTRY_SELECT} WHERE e.send_date <= ?1 AND e.processing = 0 ORDER BY e.send_date, e.id"
        );
        let rows = sqlx::query(&sql)
            .bind(to_db_time(&now))
            .fetch_all(&self.db_pool)
            .await
            .context("Error listando entries pendientes")?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn list_for_campaign(&self, campaign_id: i64) -> Result<Vec<Entry>> {
        let sql = format!("{ENTRY_SELECT} WHERE e.campaign_id = ?1 ORDER BY e.send_date, e.id");
        let rows = sqlx::query(&sql)
            .bind(campaign_id)
            .fetch_all(&self.db_pool)
            .await
            .context("Error listando entries de la campaña")?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn claim(&self, entries: Vec<Entry>) -> Result<Vec<Entry>> {
        let mut claimed = Vec::with_capacity(entries.len());

        for entry in entries {
            match self.claim_one(entry).await {
                Ok(Some(entry)) => claimed.push(entry),
                Ok(None) => {}
                Err(e) => {
                    // Lo bloqueado en esta llamada vuelve a la cola antes de cortar
                    for locked in &claimed {
                        if let Err(release_err) = self.release(locked).await {
                            log::error!(
                                "(claim) No se pudo liberar entry {}: {:?}",
                                locked.id,
                                release_err
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }

        Ok(claimed)
    }

    async fn release(&self, entry: &Entry) -> Result<()> {
        sqlx::query("UPDATE entries SET processing = 0 WHERE id = ?1")
            .bind(entry.id)
            .execute(&self.db_pool)
            .await
            .with_context(|| format!("Error liberando entry {}", entry.id))?;
        Ok(())
    }

    async fn reschedule(&self, entry: &Entry, send_date: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE entries
            SET send_date = ?1,
                send_attempt = send_attempt + 1,
                processing = 0
            WHERE id = ?2
            "#,
        )
        .bind(to_db_time(&send_date))
        .bind(entry.id)
        .execute(&self.db_pool)
        .await
        .with_context(|| format!("Error reprogramando entry {}", entry.id))?;
        Ok(())
    }

    async fn complete(&self, entry: &Entry) -> Result<()> {
        sqlx::query("DELETE FROM entries WHERE id = ?1")
            .bind(entry.id)
            .execute(&self.db_pool)
            .await
            .with_context(|| format!("Error cerrando entry {}", entry.id))?;
        Ok(())
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<Entry> {
    let channel: String = row.try_get("channel")?;
    let send_date: String = row.try_get("send_date")?;
    let send_attempt: i64 = row.try_get("send_attempt")?;
    let processing: i64 = row.try_get("processing")?;

    Ok(Entry {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        user_id: row.try_get("user_id")?,
        r_id: row.try_get("r_id")?,
        channel: channel.parse()?,
        send_date: from_db_time(&send_date)?,
        send_attempt: send_attempt.max(0) as u32,
        processing: processing != 0,
        recipient: Recipient {
            email: row.try_get("email")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            position: row.try_get("position")?,
            phone: row.try_get("phone")?,
        },
        context: None,
    })
}
