use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use engine::config::Settings;
use engine::db::DbPool;
use engine::TaskService;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub service: TaskService,
    /// `None` when the engine runs on in-memory storage
    pub db_pool: Option<DbPool>,
    /// `None` when no Prometheus recorder was installed
    pub metrics: Option<PrometheusHandle>,
    pub config: Arc<Settings>,
}

impl AppState {
    /// Create a new AppState instance
    pub fn new(
        service: TaskService,
        db_pool: Option<DbPool>,
        metrics: Option<PrometheusHandle>,
        config: Settings,
    ) -> Self {
        Self {
            service,
            db_pool,
            metrics,
            config: Arc::new(config),
        }
    }
}
