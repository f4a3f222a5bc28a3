use std::sync::Arc;

use kedai_domain::support::{SupportService, SupportStores};
use kedai_infra::config::AppConfig;
use kedai_infra::realtime::SupportBroadcaster;
use kedai_infra::repositories::{InMemoryAttachmentRepository, InMemorySupportStore};
use kedai_infra::storefront::InMemoryStorefront;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub support: SupportService,
    pub realtime: SupportBroadcaster,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let storefront = match config.storefront_fixture_path.as_deref() {
            Some(path) => InMemoryStorefront::from_fixture_file(path).await?,
            None => {
                tracing::warn!("no storefront fixture configured; user directory starts empty");
                InMemoryStorefront::new()
            }
        };
        Ok(Self::with_storefront(config, Arc::new(storefront)))
    }

    pub fn with_storefront(config: AppConfig, storefront: Arc<InMemoryStorefront>) -> Self {
        let realtime = SupportBroadcaster::new(config.realtime_subscriber_queue);
        let store = Arc::new(InMemorySupportStore::new());
        let stores = SupportStores {
            conversations: store.clone(),
            messages: store,
            attachments: Arc::new(InMemoryAttachmentRepository::new()),
        };
        let support = SupportService::new(
            stores,
            storefront.clone(),
            storefront,
            Arc::new(realtime.clone()),
        )
        .with_limits(config.support_limits());
        Self {
            config,
            support,
            realtime,
        }
    }
}
