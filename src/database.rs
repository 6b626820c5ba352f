//! database.rs
//! Conexión SQLite, migraciones y formato de fechas en la base.

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{Pool, Sqlite};

use crate::config::delivery_config::DeliveryConfig;

/// Abre (o crea) la base indicada por la config.
/// Si no hay `DATABASE_URL`, se usa ./data/campaigns.db
pub async fn setup_database(config: &DeliveryConfig) -> Result<Pool<Sqlite>> {
    let db_url = match &config.database_url {
        Some(url) => url.clone(),
        None => {
            std::fs::create_dir_all("data").context("No se pudo crear directorio 'data'")?;
            let db_path = std::env::current_dir()
                .context("No se pudo obtener el current_dir")?
                .join("data")
                .join("campaigns.db");
            format!("sqlite:{}", db_path.to_string_lossy())
        }
    };

    log::info!("Conectando a SQLite en {}", db_url);
    connect(&db_url).await
}

pub async fn connect(db_url: &str) -> Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("DATABASE_URL inválida: {db_url}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    Pool::<Sqlite>::connect_with(options)
        .await
        .context("No se pudo conectar a la base de datos SQLite")
}

pub async fn run_migrations(db_pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(db_pool)
        .await
        .context("Failed to run campaign delivery migrations")?;
    Ok(())
}

/// Las fechas se guardan como RFC 3339 UTC de ancho fijo (microsegundos, sufijo Z),
/// así la comparación de texto en SQL coincide con la cronológica.
pub fn to_db_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn from_db_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Fecha inválida en la base: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn db_time_orders_lexically() {
        let early = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let late = early + Duration::milliseconds(1500);
        assert!(to_db_time(&early) < to_db_time(&late));
        assert_eq!(from_db_time(&to_db_time(&late)).unwrap(), late);
    }
}
