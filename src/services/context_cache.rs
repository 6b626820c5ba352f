//! services/context_cache.rs
//! Cache de contextos de campaña que vive una sola pasada del scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::models::campaign_model::CampaignContext;
use crate::services::campaign_service::CampaignContextProvider;

/// Cada campaña se carga como mucho una vez por pasada. La pasada es dueña del
/// cache (`&mut self`), así que no hay cargas duplicadas concurrentes.
pub struct CampaignContextCache {
    provider: Arc<dyn CampaignContextProvider>,
    contexts: HashMap<i64, Arc<CampaignContext>>,
}

impl CampaignContextCache {
    pub fn new(provider: Arc<dyn CampaignContextProvider>) -> Self {
        CampaignContextCache {
            provider,
            contexts: HashMap::new(),
        }
    }

    pub async fn get_or_load(
        &mut self,
        campaign_id: i64,
        user_id: i64,
    ) -> Result<Arc<CampaignContext>> {
        if let Some(context) = self.contexts.get(&campaign_id) {
            return Ok(context.clone());
        }

        log::info!("(get_or_load) Cacheando campaña con ID {}", campaign_id);
        let context = self
            .provider
            .load_context(campaign_id, user_id)
            .await
            .with_context(|| format!("No se pudo cargar el contexto de la campaña {campaign_id}"))?;
        let context = Arc::new(context);
        self.contexts.insert(campaign_id, context.clone());
        Ok(context)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::campaign_model::{CampaignStatus, CampaignTemplate};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl CampaignContextProvider for CountingProvider {
        async fn load_context(&self, campaign_id: i64, user_id: i64) -> Result<CampaignContext> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if campaign_id < 0 {
                return Err(anyhow!("boom"));
            }
            Ok(CampaignContext {
                id: campaign_id,
                user_id,
                name: format!("campaign {campaign_id}"),
                status: CampaignStatus::Queued,
                url: "https://example.test".to_string(),
                template: CampaignTemplate::default(),
                smtp: None,
                chat: None,
                launch_date: Utc::now(),
            })
        }

        async fn mark_in_progress(&self, _campaign_id: i64) -> Result<bool> {
            Ok(true)
        }
    }

    #[actix_rt::test]
    async fn loads_each_campaign_once() {
        let provider = Arc::new(CountingProvider {
            loads: AtomicUsize::new(0),
        });
        let mut cache = CampaignContextCache::new(provider.clone());

        for _ in 0..3 {
            cache.get_or_load(1, 9).await.unwrap();
            cache.get_or_load(2, 9).await.unwrap();
        }

        assert_eq!(provider.loads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[actix_rt::test]
    async fn failed_load_is_not_cached() {
        let provider = Arc::new(CountingProvider {
            loads: AtomicUsize::new(0),
        });
        let mut cache = CampaignContextCache::new(provider.clone());

        assert!(cache.get_or_load(-1, 9).await.is_err());
        assert!(cache.get_or_load(-1, 9).await.is_err());
        assert_eq!(provider.loads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 0);
    }
}
