//! Administrative ledger browsing.

use axum::{
    extract::{Extension, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::api::middleware::auth::CurrentUser;
use crate::api::SharedState;
use crate::error::Result;
use crate::models::history::HistoryWithActor;
use crate::models::user::UserRole;
use crate::services::history_service::HistoryFilter;
use crate::services::permission;

/// Create history routes
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(list_history))
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// Rows to skip
    pub skip: Option<i64>,
    /// Page size, clamped to 1..=1000
    pub limit: Option<i64>,
    /// Substring match on entity type, action or record id
    pub search: Option<String>,
    /// Exact entity type tag, e.g. `servers`
    pub entity_type: Option<String>,
    /// Exact action, e.g. `UPDATE`
    pub action: Option<String>,
    /// Acting user's id
    pub user_id: Option<i64>,
}

impl HistoryQuery {
    pub fn skip(&self) -> i64 {
        self.skip.unwrap_or(0).max(0)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 1000)
    }

    fn filter(&self) -> HistoryFilter {
        HistoryFilter {
            entity_type: self.entity_type.clone(),
            action: self.action.clone(),
            user_id: self.user_id,
            search: self.search.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryListResponse {
    pub items: Vec<HistoryWithActor>,
    pub total: i64,
}

/// Browse the change ledger across all entities
#[utoipa::path(
    get,
    path = "",
    context_path = "/api/v1/history",
    tag = "history",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Ledger entries, newest first", body = HistoryListResponse),
        (status = 403, description = "Requires Admin 1L")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_history(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryListResponse>> {
    permission::require(actor.role, UserRole::Admin1L)?;

    let (items, total) = state
        .history
        .query_all(&query.filter(), query.skip(), query.limit())
        .await?;

    Ok(Json(HistoryListResponse { items, total }))
}

#[derive(OpenApi)]
#[openapi(
    paths(list_history),
    components(schemas(HistoryWithActor, HistoryListResponse))
)]
pub struct HistoryApiDoc;
