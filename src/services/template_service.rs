//! services/template_service.rs
//! Contexto de plantilla por destinatario: links con el token, pixel de
//! seguimiento y datos del destinatario. El render completo (HTML, QR) es externo.

use anyhow::{Context, Result};
use reqwest::Url;

use crate::models::campaign_model::CampaignContext;
use crate::models::entry_model::Entry;

/// Parámetro de query que lleva el token del destinatario
pub const RECIPIENT_PARAMETER: &str = "rid";

#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub from: String,
    pub url: String,
    pub tracking_url: String,
    pub tracker: String,
    pub base_url: String,
    pub r_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub position: String,
}

impl TemplateContext {
    pub fn new(campaign: &CampaignContext, entry: &Entry) -> Result<Self> {
        let mut recipient_url = Url::parse(&campaign.url)
            .with_context(|| format!("URL de campaña inválida: {}", campaign.url))?;
        recipient_url
            .query_pairs_mut()
            .append_pair(RECIPIENT_PARAMETER, &entry.r_id);

        let mut base_url = recipient_url.clone();
        base_url.set_path("");
        base_url.set_query(None);

        let mut tracking_url = recipient_url.clone();
        let tracking_path = format!("{}/track", tracking_url.path().trim_end_matches('/'));
        tracking_url.set_path(&tracking_path);

        let from = display_name(campaign.from_address());

        Ok(TemplateContext {
            tracker: format!(
                "<img alt='' style='display: none' src='{}'/>",
                tracking_url.as_str()
            ),
            from,
            url: recipient_url.to_string(),
            tracking_url: tracking_url.to_string(),
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            r_id: entry.r_id.clone(),
            first_name: entry.recipient.first_name.clone(),
            last_name: entry.recipient.last_name.clone(),
            email: entry.recipient.email.clone(),
            position: entry.recipient.position.clone(),
        })
    }

    pub fn render(&self, text: &str) -> String {
        [
            ("{{.RId}}", self.r_id.as_str()),
            ("{{.URL}}", self.url.as_str()),
            ("{{.TrackingURL}}", self.tracking_url.as_str()),
            ("{{.Tracker}}", self.tracker.as_str()),
            ("{{.BaseURL}}", self.base_url.as_str()),
            ("{{.From}}", self.from.as_str()),
            ("{{.FirstName}}", self.first_name.as_str()),
            ("{{.LastName}}", self.last_name.as_str()),
            ("{{.Email}}", self.email.as_str()),
            ("{{.Position}}", self.position.as_str()),
        ]
        .iter()
        .fold(text.to_string(), |acc, (placeholder, value)| {
            acc.replace(placeholder, value)
        })
    }
}

/// "Nombre <correo>" -> "Nombre"; sin nombre, el correo.
fn display_name(from: &str) -> String {
    match from.split_once('<') {
        Some((name, _)) if !name.trim().is_empty() => name.trim().trim_matches('"').to_string(),
        Some((_, address)) => address.trim_end_matches('>').trim().to_string(),
        None => from.trim().to_string(),
    }
}
