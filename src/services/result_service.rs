//! services/result_service.rs
//! Persistencia de resultados por destinatario (tabla `results`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

use crate::database::{from_db_time, to_db_time};
use crate::models::entry_model::Recipient;
use crate::models::result_model::{ResultRecord, ResultStatus};

const RID_LENGTH: usize = 7;

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn find(&self, r_id: &str) -> Result<Option<ResultRecord>>;

    async fn save(&self, result: &ResultRecord) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ResultService {
    db_pool: Pool<Sqlite>,
}

impl ResultService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        ResultService { db_pool }
    }

    /// Crea el resultado en `Scheduled` con un token nuevo y lo devuelve.
    pub async fn create_result(
        &self,
        campaign_id: i64,
        user_id: i64,
        recipient: &Recipient,
        send_date: DateTime<Utc>,
    ) -> Result<ResultRecord> {
        let r_id = self.generate_rid().await?;
        let now = Utc::now();

        let done = sqlx::query(
            r#"
            INSERT INTO results (
                campaign_id, user_id, r_id, email, first_name, last_name, position, phone,
                status, send_date, reported, modified_date
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11)
            "#,
        )
        .bind(campaign_id)
        .bind(user_id)
        .bind(&r_id)
        .bind(&recipient.email)
        .bind(&recipient.first_name)
        .bind(&recipient.last_name)
        .bind(&recipient.position)
        .bind(&recipient.phone)
        .bind(ResultStatus::Scheduled.as_str())
        .bind(to_db_time(&send_date))
        .bind(to_db_time(&now))
        .execute(&self.db_pool)
        .await
        .context("Error insertando resultado")?;

        Ok(ResultRecord {
            id: done.last_insert_rowid(),
            campaign_id,
            user_id,
            r_id,
            recipient: recipient.clone(),
            status: ResultStatus::Scheduled,
            ip: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            send_date,
            reported: false,
            modified_date: now,
        })
    }

    /// Token opaco de 7 caracteres; se regenera hasta que no choque con otro.
    async fn generate_rid(&self) -> Result<String> {
        loop {
            let candidate = new_rid();
            let taken: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM results WHERE r_id = ?1")
                .bind(&candidate)
                .fetch_one(&self.db_pool)
                .await
                .context("Error verificando unicidad del r_id")?;
            if taken == 0 {
                return Ok(candidate);
            }
        }
    }
}

fn new_rid() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(RID_LENGTH)
        .map(char::from)
        .collect()
}

#[async_trait]
impl ResultStore for ResultService {
    async fn find(&self, r_id: &str) -> Result<Option<ResultRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, campaign_id, user_id, r_id, email, first_name, last_name, position,
                   phone, status, ip, latitude, longitude, send_date, reported, modified_date
            FROM results
            WHERE r_id = ?1
            "#,
        )
        .bind(r_id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Error leyendo resultado")?;

        row.as_ref().map(result_from_row).transpose()
    }

    async fn save(&self, result: &ResultRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE results
            SET status = ?1,
                ip = ?2,
                latitude = ?3,
                longitude = ?4,
                send_date = ?5,
                reported = ?6,
                modified_date = ?7
            WHERE r_id = ?8
            "#,
        )
        .bind(result.status.as_str())
        .bind(&result.ip)
        .bind(result.latitude)
        .bind(result.longitude)
        .bind(to_db_time(&result.send_date))
        .bind(result.reported)
        .bind(to_db_time(&result.modified_date))
        .bind(&result.r_id)
        .execute(&self.db_pool)
        .await
        .with_context(|| format!("Error guardando resultado {}", result.r_id))?;
        Ok(())
    }
}

fn result_from_row(row: &SqliteRow) -> Result<ResultRecord> {
    let status: String = row.try_get("status")?;
    let send_date: String = row.try_get("send_date")?;
    let modified_date: String = row.try_get("modified_date")?;

    Ok(ResultRecord {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        user_id: row.try_get("user_id")?,
        r_id: row.try_get("r_id")?,
        recipient: Recipient {
            email: row.try_get("email")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            position: row.try_get("position")?,
            phone: row.try_get("phone")?,
        },
        status: status.parse()?,
        ip: row.try_get("ip")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        send_date: from_db_time(&send_date)?,
        reported: row.try_get("reported")?,
        modified_date: from_db_time(&modified_date)?,
    })
}
