pub mod api;
pub mod chat;
pub mod config;
pub mod db;
pub mod engine;
pub mod kv;
pub mod notifications;

pub use db::DbPool;

use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::chat::{ConnectionRegistry, MessageService};
use crate::engine::BookingManager;
use crate::kv::KvStore;
use crate::notifications::SystemEmailService;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    /// Live socket connections; shared with `messages`
    pub registry: Arc<ConnectionRegistry>,
    pub kv: Arc<KvStore>,
    pub messages: MessageService,
    pub bookings: BookingManager,
    pub mailer: SystemEmailService,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Self {
            messages: MessageService::new(db.clone(), registry.clone(), config.chat.clone()),
            bookings: BookingManager::new(db.clone(), config.booking.clone()),
            mailer: SystemEmailService::new(config.email.clone()),
            kv: Arc::new(KvStore::new()),
            registry,
            rate_limiter,
            config,
            db,
            metrics_handle: None,
        }
    }

    /// Set the Prometheus metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
