use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

use crate::authz::{self, PolicyRegistry};
use crate::config::Config;
use crate::db::Store;
use crate::domain::events::AuditEvent;
use crate::services::{
    AuditService, AuthService, SeaOrmAuthService, SeaOrmSessionService, SessionService,
};

#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<RwLock<Config>>,

    pub store: Store,

    pub event_bus: broadcast::Sender<AuditEvent>,

    pub auth_service: Arc<dyn AuthService>,

    pub session_service: Arc<dyn SessionService>,

    pub audit_service: Arc<AuditService>,

    pub policy: Arc<PolicyRegistry>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let (event_bus, _) = broadcast::channel(config.general.event_bus_buffer_size);
        Self::with_event_bus(config, event_bus).await
    }

    pub async fn with_event_bus(
        config: Config,
        event_bus: broadcast::Sender<AuditEvent>,
    ) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        let config_arc = Arc::new(RwLock::new(config));

        let auth_service = Arc::new(SeaOrmAuthService::new(
            store.clone(),
            config_arc.clone(),
            event_bus.clone(),
        )) as Arc<dyn AuthService>;

        let session_service =
            Arc::new(SeaOrmSessionService::new(store.clone(), event_bus.clone()))
                as Arc<dyn SessionService>;

        let audit_service = Arc::new(AuditService::new(store.clone(), event_bus.clone()));
        audit_service.clone().start_listener();

        let policy = Arc::new(authz::default_registry());

        Ok(Self {
            config: config_arc,
            store,
            event_bus,
            auth_service,
            session_service,
            audit_service,
            policy,
        })
    }

    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }
}
