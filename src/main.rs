use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use tokio_util::sync::CancellationToken;

use crate::config::delivery_config::DeliveryConfig;
use crate::handlers::campaign_handler::EmailTester;
use crate::logger::init_logger;
use crate::models::campaign_model::ChannelKind;
use crate::services::backoff::ExponentialBackoff;
use crate::services::campaign_service::CampaignService;
use crate::services::chat_service::ChatSessionFactory;
use crate::services::delivery_worker::{DeliveryWorker, DispatchQueue};
use crate::services::entry_service::EntryService;
use crate::services::event_service::EventService;
use crate::services::outcome_service::OutcomeRecorder;
use crate::services::result_service::ResultService;
use crate::services::scheduler_service::SchedulerService;
use crate::services::smtp_service::SmtpSessionFactory;
use crate::services::tracking_service::TrackingService;

mod app;
mod config;
mod database;
mod handlers;
mod logger;
mod models;
mod services;

#[cfg(test)]
mod tests;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok(); // Cargar .env al inicio
    init_logger();

    let config = DeliveryConfig::from_env()?;

    // Conectarnos a la DB y aplicar el esquema
    let db_pool = database::setup_database(&config).await?;
    database::run_migrations(&db_pool).await?;

    let entry_service = Arc::new(EntryService::new(db_pool.clone()));
    let campaign_service = Arc::new(CampaignService::new(db_pool.clone()));
    let tracking_service = TrackingService::new(
        Arc::new(ResultService::new(db_pool.clone())),
        Arc::new(EventService::new(db_pool.clone())),
    );

    let outcomes = OutcomeRecorder::new(
        entry_service.clone(),
        tracking_service.clone(),
        Arc::new(ExponentialBackoff::new(
            config.backoff_base(),
            config.backoff_max(),
        )),
        config.max_send_attempts,
    );

    // Un worker por canal, cada uno con su cola
    let cancel = CancellationToken::new();
    let (email_queue, email_rx) =
        DispatchQueue::new(ChannelKind::Email, config.worker_queue_capacity);
    let (chat_queue, chat_rx) = DispatchQueue::new(ChannelKind::Chat, config.worker_queue_capacity);

    let email_delivery = DeliveryWorker::new(
        Arc::new(SmtpSessionFactory::new(config.send_timeout())),
        outcomes.clone(),
        &config,
    );
    let email_tester = EmailTester(email_delivery.clone());
    let email_worker = email_delivery.spawn(email_rx, cancel.clone());
    let chat_worker = DeliveryWorker::new(
        Arc::new(ChatSessionFactory::new(
            &config.chat_api_base,
            config.send_timeout(),
        )?),
        outcomes,
        &config,
    )
    .spawn(chat_rx, cancel.clone());

    let scheduler = SchedulerService::new(
        entry_service,
        campaign_service,
        email_queue,
        chat_queue,
    );
    let ticker = {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        let interval = config.scheduler_interval();
        tokio::spawn(async move { scheduler.run(interval, cancel).await })
    };

    // Levantar servidor
    log::info!(
        "Levantando servidor en {}:{}",
        config.bind_address,
        config.bind_port
    );
    let served = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(tracking_service.clone()))
            .app_data(web::Data::new(scheduler.clone()))
            .app_data(web::Data::new(email_tester.clone()))
            .configure(app::init_app)
    })
    .bind((config.bind_address.as_str(), config.bind_port))
    .with_context(|| {
        format!(
            "No se pudo escuchar en {}:{}",
            config.bind_address, config.bind_port
        )
    })?
    .run()
    .await;

    // El servidor paró: cortar el scheduler y esperar a que los workers liberen lo pendiente
    log::info!("Servidor detenido, cancelando scheduler y workers");
    cancel.cancel();
    for (name, handle) in [
        ("scheduler", ticker),
        ("email", email_worker),
        ("chat", chat_worker),
    ] {
        if let Err(e) = handle.await {
            log::error!("La tarea {} terminó con error: {:?}", name, e);
        }
    }
    db_pool.close().await;

    served.context("Error en el servidor HTTP")
}
