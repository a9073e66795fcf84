//! Change history model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;

/// One row of the append-only change ledger.
///
/// `changes` holds a map of field name to `{"old": ..., "new": ...}` for
/// updates, or the sentinel `{"all": "created"}` / `{"all": "deleted"}`.
/// Rows are written once and never touched again.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct History {
    pub id: i64,
    pub action: String,
    pub entity_type: String,
    pub record_id: i64,
    #[schema(value_type = Object)]
    pub changes: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<i64>,
    pub server_id: Option<i64>,
    pub domain_id: Option<i64>,
    pub finance_id: Option<i64>,
}

/// Ledger row joined with the acting user's name, for administrative
/// browsing. `username` is null when the actor was deleted or the change
/// was system-initiated.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct HistoryWithActor {
    pub id: i64,
    pub action: String,
    pub entity_type: String,
    pub record_id: i64,
    #[schema(value_type = Object)]
    pub changes: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub server_id: Option<i64>,
    pub domain_id: Option<i64>,
    pub finance_id: Option<i64>,
}
