//! handlers/result_handler.rs

use actix_web::{web, HttpResponse};

use crate::handlers::tracking_handler::error_response;
use crate::models::tracking_model::ResultStatusResponse;
use crate::services::tracking_service::TrackingService;

/// GET /api/results/{rid}
/// Estado actual del destinatario y su historial de eventos.
pub async fn result_status_endpoint(
    tracking: web::Data<TrackingService>,
    path: web::Path<String>,
) -> HttpResponse {
    let rid = path.into_inner();

    let result = match tracking.get_result(&rid).await {
        Ok(result) => result,
        Err(e) => return error_response("result_status_endpoint", &rid, e),
    };

    match tracking.list_events(&rid).await {
        Ok(events) => HttpResponse::Ok().json(ResultStatusResponse {
            success: true,
            result,
            events,
        }),
        Err(e) => error_response("result_status_endpoint", &rid, e),
    }
}
