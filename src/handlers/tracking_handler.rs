//! handlers/tracking_handler.rs
//! Callbacks de seguimiento: pixel de apertura, click, datos enviados y reporte.

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::{json, Value};

use crate::models::result_model::Transition;
use crate::models::tracking_model::{SubmitRequest, TrackingQuery, TrackingResponse};
use crate::services::tracking_service::{ResultNotFound, TrackingService};

/// GIF transparente de 1x1
const TRACKING_PIXEL: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// GET /track?rid=...
pub async fn open_pixel_endpoint(
    tracking: web::Data<TrackingService>,
    req: HttpRequest,
    query: web::Query<TrackingQuery>,
) -> HttpResponse {
    let rid = query.into_inner().rid;
    let details = browser_details(&req, Value::Null);

    match tracking.mark_opened(&rid, Some(details)).await {
        Ok(_) => {
            record_client(&tracking, &rid, &req).await;
            HttpResponse::Ok()
                .content_type("image/gif")
                .insert_header(("Cache-Control", "no-store"))
                .body(TRACKING_PIXEL)
        }
        Err(e) => error_response("open_pixel_endpoint", &rid, e),
    }
}

/// GET /api/track/{rid}/click
pub async fn click_endpoint(
    tracking: web::Data<TrackingService>,
    req: HttpRequest,
    path: web::Path<String>,
) -> HttpResponse {
    let rid = path.into_inner();
    let details = browser_details(&req, Value::Null);
    let outcome = tracking.mark_clicked(&rid, Some(details)).await;
    respond(&tracking, &req, rid, outcome, "click_endpoint").await
}

/// POST /api/track/{rid}/submit
pub async fn submit_endpoint(
    tracking: web::Data<TrackingService>,
    req: HttpRequest,
    path: web::Path<String>,
    body: Option<web::Json<SubmitRequest>>,
) -> HttpResponse {
    let rid = path.into_inner();
    let payload = body.map(|b| b.into_inner().payload).unwrap_or_default();
    let details = browser_details(&req, payload);
    let outcome = tracking.mark_data_submitted(&rid, Some(details)).await;
    respond(&tracking, &req, rid, outcome, "submit_endpoint").await
}

/// POST /api/track/{rid}/report
pub async fn report_endpoint(
    tracking: web::Data<TrackingService>,
    req: HttpRequest,
    path: web::Path<String>,
) -> HttpResponse {
    let rid = path.into_inner();
    let details = browser_details(&req, Value::Null);
    let outcome = tracking.mark_reported(&rid, Some(details)).await;
    respond(&tracking, &req, rid, outcome, "report_endpoint").await
}

async fn respond(
    tracking: &TrackingService,
    req: &HttpRequest,
    rid: String,
    outcome: anyhow::Result<Transition>,
    endpoint: &str,
) -> HttpResponse {
    match outcome {
        Ok(transition) => {
            record_client(tracking, &rid, req).await;
            HttpResponse::Ok().json(TrackingResponse {
                success: true,
                rid,
                transition,
            })
        }
        Err(e) => error_response(endpoint, &rid, e),
    }
}

/// Guarda la IP del cliente en el resultado. Un fallo acá no afecta la respuesta.
async fn record_client(tracking: &TrackingService, rid: &str, req: &HttpRequest) {
    let Some(address) = client_address(req) else {
        return;
    };
    if let Err(e) = tracking.update_geo(rid, &address, None).await {
        log::warn!("(record_client) No se pudo guardar la IP de r_id={}: {:?}", rid, e);
    }
}

fn client_address(req: &HttpRequest) -> Option<String> {
    let info = req.connection_info();
    info.realip_remote_addr().map(|addr| addr.to_string())
}

fn browser_details(req: &HttpRequest, payload: Value) -> Value {
    let user_agent = req
        .headers()
        .get("User-Agent")
        .and_then(|ua| ua.to_str().ok())
        .unwrap_or_default();

    json!({
        "payload": payload,
        "browser": {
            "address": client_address(req).unwrap_or_default(),
            "user-agent": user_agent,
        }
    })
}

pub(crate) fn error_response(endpoint: &str, rid: &str, e: anyhow::Error) -> HttpResponse {
    if e.downcast_ref::<ResultNotFound>().is_some() {
        log::warn!("({}) r_id desconocido: {}", endpoint, rid);
        return HttpResponse::NotFound().json(json!({
            "success": false,
            "error": e.to_string()
        }));
    }

    log::error!("({}) Error procesando r_id={}: {:?}", endpoint, rid, e);
    HttpResponse::InternalServerError().json(json!({
        "success": false,
        "error": e.to_string()
    }))
}
