//! Finance handlers.
//!
//! Billing rows carry a different gate than the rest of the inventory:
//! Service Managers work with them alongside Admin 2L, while Admin 1L
//! is excluded from everything except the per-record history. The gate
//! is part of the external contract and must not be rationalized into
//! the rank ladder.

use async_trait::async_trait;
use axum::{
    extract::{Extension, Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::{Postgres, Transaction};
use utoipa::{OpenApi, ToSchema};

use crate::api::dto::{self, ListQuery};
use crate::api::handlers::groups::ensure_group_exists;
use crate::api::handlers::servers::ensure_server_exists;
use crate::api::middleware::auth::CurrentUser;
use crate::api::SharedState;
use crate::error::{AppError, Result};
use crate::models::finance::{AccountStatus, Currency, Finance};
use crate::models::history::History;
use crate::models::user::UserRole;
use crate::services::change_tracker::TrackedFields;
use crate::services::entity_service::{self, AuditedEntity};
use crate::services::history_service::{EntityType, HistoryEntry, ScopedRefs};
use crate::services::permission::{self, has_permission};

/// Create finance routes
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_finance).post(create_finance))
        .route("/:id", put(update_finance))
        .route("/:id/history", get(finance_history))
}

/// Admin 2L and above, plus Service Manager. Admin 1L is excluded.
fn require_finance_access(role: UserRole) -> Result<()> {
    if has_permission(role, UserRole::Admin2L) || role == UserRole::ServiceManager {
        Ok(())
    } else {
        Err(AppError::Authorization("Insufficient permissions".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Change tracking
// ---------------------------------------------------------------------------

impl TrackedFields for Finance {
    fn field_bag(&self) -> Map<String, Value> {
        let mut bag = Map::new();
        bag.insert("server_id".into(), json!(self.server_id));
        bag.insert("account_status".into(), json!(self.account_status));
        bag.insert("price".into(), json!(self.price));
        bag.insert("currency".into(), json!(self.currency));
        bag.insert("payment_date".into(), json!(self.payment_date));
        bag.insert("group_id".into(), json!(self.group_id));
        bag
    }

    fn apply_field(&mut self, field: &str, value: &Value) -> Result<()> {
        match field {
            "server_id" => self.server_id = serde_json::from_value(value.clone())?,
            "account_status" => self.account_status = serde_json::from_value(value.clone())?,
            "price" => self.price = serde_json::from_value(value.clone())?,
            "currency" => self.currency = serde_json::from_value(value.clone())?,
            "payment_date" => self.payment_date = serde_json::from_value(value.clone())?,
            "group_id" => self.group_id = serde_json::from_value(value.clone())?,
            other => {
                return Err(AppError::Validation(format!("Unknown field: {}", other)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AuditedEntity for Finance {
    const ENTITY_TYPE: EntityType = EntityType::Finance;

    fn id(&self) -> i64 {
        self.id
    }

    fn scoped_refs(id: i64) -> ScopedRefs {
        ScopedRefs::finance(id)
    }

    fn stamp_updated_by(&mut self, actor_id: i64) {
        self.updated_by = Some(actor_id);
    }

    async fn persist(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE finance
            SET server_id = $2, account_status = $3, price = $4, currency = $5,
                payment_date = $6, group_id = $7, updated_by = $8, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(self.id)
        .bind(self.server_id)
        .bind(self.account_status)
        .bind(self.price)
        .bind(self.currency)
        .bind(self.payment_date)
        .bind(self.group_id)
        .bind(self.updated_by)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct FinanceCreate {
    pub server_id: i64,
    #[serde(default = "default_account_status")]
    pub account_status: AccountStatus,
    pub price: f64,
    #[serde(default = "default_currency")]
    pub currency: Currency,
    pub payment_date: NaiveDate,
    pub group_id: Option<i64>,
}

fn default_account_status() -> AccountStatus {
    AccountStatus::Active
}

fn default_currency() -> Currency {
    Currency::Usd
}

/// Partial update; absent or null fields are left untouched.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct FinanceUpdate {
    pub server_id: Option<i64>,
    pub account_status: Option<AccountStatus>,
    pub price: Option<f64>,
    pub currency: Option<Currency>,
    pub payment_date: Option<NaiveDate>,
    pub group_id: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FinanceListResponse {
    pub items: Vec<Finance>,
    pub total: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// List finance records
#[utoipa::path(
    get,
    path = "",
    context_path = "/api/v1/finance",
    tag = "finance",
    params(ListQuery),
    responses(
        (status = 200, description = "List of finance records", body = FinanceListResponse),
        (status = 403, description = "Requires Admin 2L or Service Manager")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_finance(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<FinanceListResponse>> {
    require_finance_access(actor.role)?;

    let pattern = query.search_pattern();

    let items = sqlx::query_as::<_, Finance>(
        r#"
        SELECT f.* FROM finance f
        JOIN servers s ON f.server_id = s.id
        WHERE ($1::text IS NULL
               OR CAST(f.id AS TEXT) LIKE $1
               OR CAST(s.id AS TEXT) LIKE $1
               OR to_char(f.payment_date, 'YYYY-MM-DD') LIKE $1
               OR CAST(s.group_id AS TEXT) LIKE $1)
        ORDER BY f.id
        OFFSET $2 LIMIT $3
        "#,
    )
    .bind(&pattern)
    .bind(query.skip())
    .bind(query.limit())
    .fetch_all(&state.db)
    .await?;

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM finance f
        JOIN servers s ON f.server_id = s.id
        WHERE ($1::text IS NULL
               OR CAST(f.id AS TEXT) LIKE $1
               OR CAST(s.id AS TEXT) LIKE $1
               OR to_char(f.payment_date, 'YYYY-MM-DD') LIKE $1
               OR CAST(s.group_id AS TEXT) LIKE $1)
        "#,
    )
    .bind(&pattern)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(FinanceListResponse { items, total }))
}

/// Create a finance record
#[utoipa::path(
    post,
    path = "",
    context_path = "/api/v1/finance",
    tag = "finance",
    request_body = FinanceCreate,
    responses(
        (status = 200, description = "Finance record created", body = Finance),
        (status = 403, description = "Requires Admin 2L or Service Manager"),
        (status = 404, description = "Referenced server or group not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_finance(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Json(payload): Json<FinanceCreate>,
) -> Result<Json<Finance>> {
    require_finance_access(actor.role)?;

    ensure_server_exists(&state.db, payload.server_id).await?;
    if let Some(group_id) = payload.group_id {
        ensure_group_exists(&state.db, group_id).await?;
    }

    let mut tx = state.db.begin().await?;

    let finance = sqlx::query_as::<_, Finance>(
        r#"
        INSERT INTO finance (server_id, account_status, price, currency, payment_date,
                             group_id, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(payload.server_id)
    .bind(payload.account_status)
    .bind(payload.price)
    .bind(payload.currency)
    .bind(payload.payment_date)
    .bind(payload.group_id)
    .bind(actor.id)
    .fetch_one(&mut *tx)
    .await?;

    state
        .history
        .append(
            &mut tx,
            HistoryEntry::created(EntityType::Finance, finance.id)
                .actor(actor.id)
                .refs(ScopedRefs::finance(finance.id)),
        )
        .await?;

    tx.commit().await?;

    tracing::info!(
        finance_id = finance.id,
        server_id = finance.server_id,
        actor = %actor.username,
        "finance record created"
    );

    Ok(Json(finance))
}

/// Update a finance record
#[utoipa::path(
    put,
    path = "/{id}",
    context_path = "/api/v1/finance",
    tag = "finance",
    params(("id" = i64, Path, description = "Finance record ID")),
    request_body = FinanceUpdate,
    responses(
        (status = 200, description = "Finance record updated", body = Finance),
        (status = 403, description = "Requires Admin 2L or Service Manager"),
        (status = 404, description = "Finance record not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_finance(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(payload): Json<FinanceUpdate>,
) -> Result<Json<Finance>> {
    require_finance_access(actor.role)?;

    let mut finance = sqlx::query_as::<_, Finance>("SELECT * FROM finance WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Finance record not found".to_string()))?;

    let proposed = dto::proposed_fields(&payload)?;
    if let Some(server_id) = proposed.get("server_id").and_then(Value::as_i64) {
        ensure_server_exists(&state.db, server_id).await?;
    }
    if let Some(group_id) = proposed.get("group_id").and_then(Value::as_i64) {
        ensure_group_exists(&state.db, group_id).await?;
    }

    let changes =
        entity_service::update_entity(&state.db, &state.history, &mut finance, &proposed, actor.id)
            .await?;

    if !changes.is_empty() {
        finance = sqlx::query_as::<_, Finance>("SELECT * FROM finance WHERE id = $1")
            .bind(id)
            .fetch_one(&state.db)
            .await?;
        tracing::info!(
            finance_id = id,
            fields = changes.len(),
            actor = %actor.username,
            "finance record updated"
        );
    }

    Ok(Json(finance))
}

/// Change history for one finance record
#[utoipa::path(
    get,
    path = "/{id}/history",
    context_path = "/api/v1/finance",
    tag = "finance",
    params(("id" = i64, Path, description = "Finance record ID"), ListQuery),
    responses(
        (status = 200, description = "Ledger entries, newest first", body = Vec<History>),
        (status = 403, description = "Requires Admin 1L")
    ),
    security(("bearer_auth" = []))
)]
pub async fn finance_history(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<History>>> {
    permission::require(actor.role, UserRole::Admin1L)?;

    let rows = state
        .history
        .query_by_entity(EntityType::Finance, id, query.skip(), query.limit())
        .await?;

    Ok(Json(rows))
}

#[derive(OpenApi)]
#[openapi(
    paths(list_finance, create_finance, update_finance, finance_history),
    components(schemas(
        Finance,
        AccountStatus,
        Currency,
        FinanceCreate,
        FinanceUpdate,
        FinanceListResponse,
    ))
)]
pub struct FinanceApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::change_tracker::diff_and_apply;
    use chrono::Utc;

    fn sample_finance() -> Finance {
        Finance {
            id: 11,
            server_id: 7,
            account_status: AccountStatus::Active,
            price: 49.99,
            currency: Currency::Eur,
            payment_date: NaiveDate::from_ymd_opt(2025, 6, 1),
            group_id: Some(2),
            created_by: Some(1),
            updated_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    // -----------------------------------------------------------------------
    // access gate
    // -----------------------------------------------------------------------

    #[test]
    fn test_service_manager_passes_the_finance_gate() {
        assert!(require_finance_access(UserRole::ServiceManager).is_ok());
        assert!(require_finance_access(UserRole::Admin2L).is_ok());
        assert!(require_finance_access(UserRole::SuperAdmin).is_ok());
    }

    #[test]
    fn test_admin_1l_is_excluded_from_finance() {
        let err = require_finance_access(UserRole::Admin1L).unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));
    }

    // -----------------------------------------------------------------------
    // DTO shape
    // -----------------------------------------------------------------------

    #[test]
    fn test_finance_create_defaults() {
        let create: FinanceCreate = serde_json::from_str(
            r#"{"server_id": 7, "price": 49.99, "payment_date": "2025-06-01"}"#,
        )
        .unwrap();
        assert_eq!(create.account_status, AccountStatus::Active);
        assert_eq!(create.currency, Currency::Usd);
        assert_eq!(create.group_id, None);
    }

    #[test]
    fn test_currency_is_uppercase_on_the_wire() {
        assert_eq!(serde_json::to_value(Currency::Uah).unwrap(), json!("UAH"));
        let currency: Currency = serde_json::from_value(json!("EUR")).unwrap();
        assert_eq!(currency, Currency::Eur);
    }

    // -----------------------------------------------------------------------
    // change tracking
    // -----------------------------------------------------------------------

    #[test]
    fn test_price_change_is_tracked() {
        let mut finance = sample_finance();
        let mut proposed = Map::new();
        proposed.insert("price".into(), json!(59.99));

        let changes = diff_and_apply(&mut finance, &proposed).unwrap();
        assert_eq!(changes.get("price"), Some(&(json!(49.99), json!(59.99))));
        assert_eq!(finance.price, 59.99);
    }

    #[test]
    fn test_identical_price_is_a_no_op() {
        let mut finance = sample_finance();
        let mut proposed = Map::new();
        proposed.insert("price".into(), json!(49.99));
        proposed.insert("currency".into(), json!("EUR"));

        let changes = diff_and_apply(&mut finance, &proposed).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_payment_date_change_uses_iso_strings() {
        let mut finance = sample_finance();
        let mut proposed = Map::new();
        proposed.insert("payment_date".into(), json!("2025-07-01"));

        let changes = diff_and_apply(&mut finance, &proposed).unwrap();
        assert_eq!(
            changes.get("payment_date"),
            Some(&(json!("2025-06-01"), json!("2025-07-01")))
        );
        assert_eq!(
            finance.payment_date,
            NaiveDate::from_ymd_opt(2025, 7, 1)
        );
    }

    #[test]
    fn test_server_reassignment_is_tracked() {
        let mut finance = sample_finance();
        let mut proposed = Map::new();
        proposed.insert("server_id".into(), json!(8));

        let changes = diff_and_apply(&mut finance, &proposed).unwrap();
        assert_eq!(changes.get("server_id"), Some(&(json!(7), json!(8))));
        assert_eq!(finance.server_id, 8);
    }
}
