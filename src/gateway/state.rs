use std::sync::Arc;
use std::time::Instant;

use crate::db::Database;
use crate::signaling::{AuthorizationHandler, SignalingService};

/// Gateway shared state
#[derive(Clone)]
pub struct AppState {
    pub service: SignalingService,
    pub authz: AuthorizationHandler,
    /// Present when flows are stored in PostgreSQL; pinged by /health
    pub pg_db: Option<Arc<Database>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(service: SignalingService, pg_db: Option<Arc<Database>>) -> Self {
        let authz = AuthorizationHandler::new(service.sdk().store().clone());
        Self {
            service,
            authz,
            pg_db,
            started_at: Instant::now(),
        }
    }
}
