use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::event_model::Event;
use crate::models::result_model::{ResultRecord, Transition};

/// Query string `?rid=...` del pixel de seguimiento
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingQuery {
    pub rid: String,
}

/// Cuerpo opcional de un envío de datos desde la landing page
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub payload: Value,
}

/// Respuesta genérica de los callbacks de seguimiento
#[derive(Debug, Clone, Serialize)]
pub struct TrackingResponse {
    pub success: bool,
    pub rid: String,
    pub transition: Transition,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultStatusResponse {
    pub success: bool,
    pub result: ResultRecord,
    pub events: Vec<Event>,
}
