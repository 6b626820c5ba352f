//! services/campaign_service.rs
//! Lectura del contexto de campaña (perfiles de canal + plantilla) y su estado.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};

use crate::database::{from_db_time, to_db_time};
use crate::models::campaign_model::{
    CampaignContext, CampaignStatus, CampaignTemplate, ChatProfile, NewCampaign, NewChatProfile,
    NewSmtpProfile, SmtpProfile,
};

#[async_trait]
pub trait CampaignContextProvider: Send + Sync {
    async fn load_context(&self, campaign_id: i64, user_id: i64) -> Result<CampaignContext>;

    /// `Queued -> InProgress`. Devuelve `true` solo si esta llamada hizo el cambio.
    async fn mark_in_progress(&self, campaign_id: i64) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct CampaignService {
    db_pool: Pool<Sqlite>,
}

impl CampaignService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        CampaignService { db_pool }
    }

    pub async fn create_smtp_profile(&self, profile: &NewSmtpProfile) -> Result<i64> {
        let now = to_db_time(&Utc::now());
        let done = sqlx::query(
            r#"
            INSERT INTO smtp_profiles (
                user_id, name, host, port, username, password,
                from_address, ignore_cert_errors, modified_date
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(profile.user_id)
        .bind(&profile.name)
        .bind(&profile.host)
        .bind(i64::from(profile.port))
        .bind(&profile.username)
        .bind(&profile.password)
        .bind(&profile.from_address)
        .bind(profile.ignore_cert_errors)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Error creando perfil SMTP")?;

        Ok(done.last_insert_rowid())
    }

    pub async fn create_chat_profile(&self, profile: &NewChatProfile) -> Result<i64> {
        let now = to_db_time(&Utc::now());
        let done = sqlx::query(
            r#"
            INSERT INTO chat_profiles (user_id, name, number, number_id, auth_token, modified_date)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(profile.user_id)
        .bind(&profile.name)
        .bind(&profile.number)
        .bind(&profile.number_id)
        .bind(&profile.auth_token)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Error creando perfil de chat")?;

        Ok(done.last_insert_rowid())
    }

    /// Registra la campaña en estado `Queued`.
    pub async fn create_campaign(&self, campaign: &NewCampaign) -> Result<i64> {
        let now = to_db_time(&Utc::now());
        let done = sqlx::query(
            r#"
            INSERT INTO campaigns (
                user_id, name, status, url, template_subject, template_html,
                template_text, smtp_id, chat_id, created_date, launch_date
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            "#,
        )
        .bind(campaign.user_id)
        .bind(&campaign.name)
        .bind(CampaignStatus::Queued.as_str())
        .bind(&campaign.url)
        .bind(&campaign.template.subject)
        .bind(&campaign.template.html)
        .bind(&campaign.template.text)
        .bind(campaign.smtp_id)
        .bind(campaign.chat_id)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Error creando campaña")?;

        Ok(done.last_insert_rowid())
    }

    pub async fn get_status(&self, campaign_id: i64) -> Result<CampaignStatus> {
        let status: String = sqlx::query_scalar("SELECT status FROM campaigns WHERE id = ?1")
            .bind(campaign_id)
            .fetch_one(&self.db_pool)
            .await
            .context("No se encontró la campaña")?;
        status.parse()
    }

    async fn load_smtp(&self, smtp_id: i64, user_id: i64) -> Result<SmtpProfile> {
        let row = sqlx::query(
            r#"
            SELECT id, host, port, username, password, from_address, ignore_cert_errors
            FROM smtp_profiles
            WHERE id = ?1 AND user_id = ?2
            "#,
        )
        .bind(smtp_id)
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Error leyendo perfil SMTP")?
        .ok_or_else(|| anyhow!("Perfil SMTP {smtp_id} no encontrado"))?;

        let port: i64 = row.try_get("port")?;
        Ok(SmtpProfile {
            id: row.try_get("id")?,
            host: row.try_get("host")?,
            port: u16::try_from(port).context("Puerto SMTP fuera de rango")?,
            username: row.try_get("username")?,
            password: row.try_get("password")?,
            from_address: row.try_get("from_address")?,
            ignore_cert_errors: row.try_get("ignore_cert_errors")?,
        })
    }

    async fn load_chat(&self, chat_id: i64, user_id: i64) -> Result<ChatProfile> {
        let row = sqlx::query(
            r#"
            SELECT id, number, number_id, auth_token
            FROM chat_profiles
            WHERE id = ?1 AND user_id = ?2
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Error leyendo perfil de chat")?
        .ok_or_else(|| anyhow!("Perfil de chat {chat_id} no encontrado"))?;

        Ok(ChatProfile {
            id: row.try_get("id")?,
            number: row.try_get("number")?,
            number_id: row.try_get("number_id")?,
            auth_token: row.try_get("auth_token")?,
        })
    }
}

#[async_trait]
impl CampaignContextProvider for CampaignService {
    async fn load_context(&self, campaign_id: i64, user_id: i64) -> Result<CampaignContext> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, name, status, url, template_subject, template_html,
                   template_text, smtp_id, chat_id, launch_date
            FROM campaigns
            WHERE id = ?1 AND user_id = ?2
            "#,
        )
        .bind(campaign_id)
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Error leyendo campaña")?
        .ok_or_else(|| anyhow!("Campaña {campaign_id} no encontrada"))?;

        let status: String = row.try_get("status")?;
        let launch_date: String = row.try_get("launch_date")?;
        let smtp_id: Option<i64> = row.try_get("smtp_id")?;
        let chat_id: Option<i64> = row.try_get("chat_id")?;

        let smtp = match smtp_id {
            Some(id) => Some(self.load_smtp(id, user_id).await?),
            None => None,
        };
        let chat = match chat_id {
            Some(id) => Some(self.load_chat(id, user_id).await?),
            None => None,
        };

        Ok(CampaignContext {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            status: status.parse()?,
            url: row.try_get("url")?,
            template: CampaignTemplate {
                subject: row.try_get("template_subject")?,
                html: row.try_get("template_html")?,
                text: row.try_get("template_text")?,
            },
            smtp,
            chat,
            launch_date: from_db_time(&launch_date)?,
        })
    }

    async fn mark_in_progress(&self, campaign_id: i64) -> Result<bool> {
        let done = sqlx::query("UPDATE campaigns SET status = ?1 WHERE id = ?2 AND status = ?3")
            .bind(CampaignStatus::InProgress.as_str())
            .bind(campaign_id)
            .bind(CampaignStatus::Queued.as_str())
            .execute(&self.db_pool)
            .await
            .context("Failed to update campaign status")?;

        Ok(done.rows_affected() == 1)
    }
}
