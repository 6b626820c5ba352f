//! handlers/campaign_handler.rs

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::models::campaign_model::TestEmailRequest;
use crate::services::channel_service::DeliveryError;
use crate::services::delivery_worker::DeliveryWorker;
use crate::services::scheduler_service::SchedulerService;

/// Worker de email que atiende los envíos de prueba.
#[derive(Clone)]
pub struct EmailTester(pub DeliveryWorker);

/// POST /api/campaigns/{id}/launch
/// Despacha ya los envíos vencidos de la campaña, sin esperar al próximo tick.
pub async fn launch_campaign_endpoint(
    scheduler: web::Data<SchedulerService>,
    path: web::Path<i64>,
) -> HttpResponse {
    let campaign_id = path.into_inner();

    match scheduler.launch_campaign(campaign_id).await {
        Ok(summary) => HttpResponse::Ok().json(json!({
            "success": true,
            "campaign_id": campaign_id,
            "claimed": summary.claimed,
            "skipped": summary.skipped,
            "batches": summary.batches,
        })),
        Err(e) => {
            log::error!("(launch_campaign_endpoint) campaña {}: {:?}", campaign_id, e);
            HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": e.to_string()
            }))
        }
    }
}

/// POST /api/campaigns/test-email
/// Manda un email suelto con el perfil y la plantilla del pedido y espera el resultado.
pub async fn send_test_email_endpoint(
    tester: web::Data<EmailTester>,
    body: web::Json<TestEmailRequest>,
) -> HttpResponse {
    let (context, recipient) = body.into_inner().into_context();
    let email = recipient.email.clone();

    match tester.0.send_test(Arc::new(context), recipient).await {
        Ok(()) => HttpResponse::Ok().json(json!({
            "success": true,
            "message": format!("Email de prueba enviado a {email}")
        })),
        Err(e) => {
            log::error!("(send_test_email_endpoint) Error enviando a {}: {}", email, e);
            let mut response = match e {
                DeliveryError::Configuration(_) | DeliveryError::Permanent(_) => {
                    HttpResponse::BadRequest()
                }
                _ => HttpResponse::BadGateway(),
            };
            response.json(json!({
                "success": false,
                "error": e.to_string()
            }))
        }
    }
}
