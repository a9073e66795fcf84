//! API module - HTTP handlers and middleware.

pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod routes;

use crate::config::Config;
use crate::services::dns_service::DnsResolver;
use crate::services::history_service::HistoryService;
use sqlx::PgPool;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: PgPool,
    pub history: HistoryService,
    pub dns: Arc<dyn DnsResolver>,
}

impl AppState {
    pub fn new(config: Config, db: PgPool, dns: Arc<dyn DnsResolver>) -> Self {
        let history = HistoryService::new(db.clone());
        Self {
            config,
            db,
            history,
            dns,
        }
    }
}

pub type SharedState = Arc<AppState>;
