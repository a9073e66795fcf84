//! Domain inventory handlers.
//!
//! Domains cache three DNS record sets (NS, A, AAAA). The records are
//! system-managed: they are resolved on create, re-resolved when a
//! domain is renamed, and backfilled on list for rows that are missing
//! them. Clients cannot propose record values and record refreshes are
//! never written to the change ledger.

use async_trait::async_trait;
use axum::{
    extract::{Extension, Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::{Postgres, Transaction};
use utoipa::{OpenApi, ToSchema};

use crate::api::dto::{self, ListQuery};
use crate::api::handlers::groups::ensure_group_exists;
use crate::api::middleware::auth::CurrentUser;
use crate::api::SharedState;
use crate::error::{AppError, Result};
use crate::models::domain::{Domain, DomainStatus};
use crate::models::history::History;
use crate::models::user::UserRole;
use crate::services::change_tracker::{diff_and_apply, TrackedFields};
use crate::services::dns_service::DnsRecords;
use crate::services::entity_service::{self, AuditedEntity};
use crate::services::history_service::{EntityType, HistoryEntry, ScopedRefs};
use crate::services::permission;

/// Create domain routes
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_domains).post(create_domain))
        .route("/:id", put(update_domain))
        .route("/:id/history", get(domain_history))
}

// ---------------------------------------------------------------------------
// Change tracking
// ---------------------------------------------------------------------------

impl TrackedFields for Domain {
    fn field_bag(&self) -> Map<String, Value> {
        let mut bag = Map::new();
        bag.insert("domain_name".into(), json!(self.domain_name));
        bag.insert("group_id".into(), json!(self.group_id));
        bag.insert("status".into(), json!(self.status));
        bag
    }

    fn apply_field(&mut self, field: &str, value: &Value) -> Result<()> {
        match field {
            "domain_name" => self.domain_name = serde_json::from_value(value.clone())?,
            "group_id" => self.group_id = serde_json::from_value(value.clone())?,
            "status" => self.status = serde_json::from_value(value.clone())?,
            other => {
                return Err(AppError::Validation(format!("Unknown field: {}", other)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AuditedEntity for Domain {
    const ENTITY_TYPE: EntityType = EntityType::Domains;

    fn id(&self) -> i64 {
        self.id
    }

    fn scoped_refs(id: i64) -> ScopedRefs {
        ScopedRefs::domain(id)
    }

    fn stamp_updated_by(&mut self, actor_id: i64) {
        self.updated_by = Some(actor_id);
    }

    async fn persist(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE domains
            SET domain_name = $2, group_id = $3, status = $4, ns_records = $5,
                a_records = $6, aaaa_records = $7, updated_by = $8, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(self.id)
        .bind(&self.domain_name)
        .bind(self.group_id)
        .bind(self.status)
        .bind(&self.ns_records)
        .bind(&self.a_records)
        .bind(&self.aaaa_records)
        .bind(self.updated_by)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

async fn ensure_domain_name_free(
    state: &SharedState,
    domain_name: &str,
    exclude_id: Option<i64>,
) -> Result<()> {
    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM domains WHERE domain_name = $1 AND id <> COALESCE($2, -1))",
    )
    .bind(domain_name)
    .bind(exclude_id)
    .fetch_one(&state.db)
    .await?;
    if taken {
        Err(AppError::Conflict("Domain already exists".to_string()))
    } else {
        Ok(())
    }
}

fn apply_records(domain: &mut Domain, records: DnsRecords) {
    domain.ns_records = records.ns_records;
    domain.a_records = records.a_records;
    domain.aaaa_records = records.aaaa_records;
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct DomainCreate {
    pub domain_name: String,
    pub group_id: Option<i64>,
    #[serde(default = "default_domain_status")]
    pub status: DomainStatus,
}

fn default_domain_status() -> DomainStatus {
    DomainStatus::Active
}

/// Partial update; absent or null fields are left untouched. Record
/// sets are not accepted here.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct DomainUpdate {
    pub domain_name: Option<String>,
    pub group_id: Option<i64>,
    pub status: Option<DomainStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DomainListResponse {
    pub items: Vec<Domain>,
    pub total: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// List domains
///
/// Rows missing NS or A records are re-resolved inline and the record
/// columns backfilled, so a domain created while DNS was unreachable
/// heals on the next listing.
#[utoipa::path(
    get,
    path = "",
    context_path = "/api/v1/domains",
    tag = "domains",
    params(ListQuery),
    responses(
        (status = 200, description = "List of domains", body = DomainListResponse),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_domains(
    State(state): State<SharedState>,
    Extension(CurrentUser(_actor)): Extension<CurrentUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DomainListResponse>> {
    let pattern = query.search_pattern();

    let mut items = sqlx::query_as::<_, Domain>(
        r#"
        SELECT * FROM domains
        WHERE ($1::text IS NULL
               OR domain_name ILIKE $1
               OR CAST(group_id AS TEXT) LIKE $1)
        ORDER BY id
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
        SELECT COUNT(*) FROM domains
        WHERE ($1::text IS NULL
               OR domain_name ILIKE $1
               OR CAST(group_id AS TEXT) LIKE $1)
        "#,
    )
    .bind(&pattern)
    .fetch_one(&state.db)
    .await?;

    for domain in &mut items {
        if domain.ns_records.is_empty() || domain.a_records.is_empty() {
            let records = state.dns.resolve(&domain.domain_name).await;
            if records == DnsRecords::default() {
                continue;
            }
            // Record columns only; refreshes bypass updated_at and the ledger.
            sqlx::query(
                "UPDATE domains SET ns_records = $2, a_records = $3, aaaa_records = $4 WHERE id = $1",
            )
            .bind(domain.id)
            .bind(&records.ns_records)
            .bind(&records.a_records)
            .bind(&records.aaaa_records)
            .execute(&state.db)
            .await?;
            apply_records(domain, records);
        }
    }

    Ok(Json(DomainListResponse { items, total }))
}

/// Create a domain
#[utoipa::path(
    post,
    path = "",
    context_path = "/api/v1/domains",
    tag = "domains",
    request_body = DomainCreate,
    responses(
        (status = 200, description = "Domain created with resolved records", body = Domain),
        (status = 403, description = "Requires Admin 2L"),
        (status = 404, description = "Referenced group not found"),
        (status = 409, description = "Domain name already registered")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_domain(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Json(payload): Json<DomainCreate>,
) -> Result<Json<Domain>> {
    permission::require(actor.role, UserRole::Admin2L)?;

    ensure_domain_name_free(&state, &payload.domain_name, None).await?;
    if let Some(group_id) = payload.group_id {
        ensure_group_exists(&state.db, group_id).await?;
    }

    let records = state.dns.resolve(&payload.domain_name).await;

    let mut tx = state.db.begin().await?;

    let domain = sqlx::query_as::<_, Domain>(
        r#"
        INSERT INTO domains (domain_name, group_id, status, ns_records, a_records,
                             aaaa_records, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(&payload.domain_name)
    .bind(payload.group_id)
    .bind(payload.status)
    .bind(&records.ns_records)
    .bind(&records.a_records)
    .bind(&records.aaaa_records)
    .bind(actor.id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        let msg = e.to_string();
        if msg.contains("duplicate key") {
            AppError::Conflict("Domain already exists".to_string())
        } else {
            AppError::Database(e)
        }
    })?;

    state
        .history
        .append(
            &mut tx,
            HistoryEntry::created(EntityType::Domains, domain.id)
                .actor(actor.id)
                .refs(ScopedRefs::domain(domain.id)),
        )
        .await?;

    tx.commit().await?;

    tracing::info!(
        domain_id = domain.id,
        domain = %domain.domain_name,
        actor = %actor.username,
        "domain created"
    );

    Ok(Json(domain))
}

/// Update a domain
///
/// Renaming a domain re-resolves its records against the new name; the
/// refreshed records ride along with the persisted row without entering
/// the recorded diff.
#[utoipa::path(
    put,
    path = "/{id}",
    context_path = "/api/v1/domains",
    tag = "domains",
    params(("id" = i64, Path, description = "Domain ID")),
    request_body = DomainUpdate,
    responses(
        (status = 200, description = "Domain updated", body = Domain),
        (status = 403, description = "Requires Admin 1L"),
        (status = 404, description = "Domain not found"),
        (status = 409, description = "Domain name already registered")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_domain(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(payload): Json<DomainUpdate>,
) -> Result<Json<Domain>> {
    permission::require(actor.role, UserRole::Admin1L)?;

    let mut domain = sqlx::query_as::<_, Domain>("SELECT * FROM domains WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Domain not found".to_string()))?;

    let proposed = dto::proposed_fields(&payload)?;
    if let Some(group_id) = proposed.get("group_id").and_then(Value::as_i64) {
        ensure_group_exists(&state.db, group_id).await?;
    }

    let changes = diff_and_apply(&mut domain, &proposed)?;
    if changes.is_empty() {
        return Ok(Json(domain));
    }

    if changes.get("domain_name").is_some() {
        ensure_domain_name_free(&state, &domain.domain_name, Some(domain.id)).await?;
        let records = state.dns.resolve(&domain.domain_name).await;
        apply_records(&mut domain, records);
    }

    domain.stamp_updated_by(actor.id);
    entity_service::commit_update(&state.db, &state.history, &domain, &changes, actor.id).await?;

    let domain = sqlx::query_as::<_, Domain>("SELECT * FROM domains WHERE id = $1")
        .bind(id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(
        domain_id = id,
        fields = changes.len(),
        actor = %actor.username,
        "domain updated"
    );

    Ok(Json(domain))
}

/// Change history for one domain
#[utoipa::path(
    get,
    path = "/{id}/history",
    context_path = "/api/v1/domains",
    tag = "domains",
    params(("id" = i64, Path, description = "Domain ID"), ListQuery),
    responses(
        (status = 200, description = "Ledger entries, newest first", body = Vec<History>),
        (status = 403, description = "Requires Admin 1L")
    ),
    security(("bearer_auth" = []))
)]
pub async fn domain_history(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<History>>> {
    permission::require(actor.role, UserRole::Admin1L)?;

    let rows = state
        .history
        .query_by_entity(EntityType::Domains, id, query.skip(), query.limit())
        .await?;

    Ok(Json(rows))
}

#[derive(OpenApi)]
#[openapi(
    paths(list_domains, create_domain, update_domain, domain_history),
    components(schemas(
        Domain,
        DomainStatus,
        DomainCreate,
        DomainUpdate,
        DomainListResponse,
    ))
)]
pub struct DomainsApiDoc;
