//! Group management handlers.

use async_trait::async_trait;
use axum::{
    extract::{Extension, Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use utoipa::{OpenApi, ToSchema};

use crate::api::dto::{self, ListQuery};
use crate::api::middleware::auth::CurrentUser;
use crate::api::SharedState;
use crate::error::{AppError, Result};
use crate::models::group::{Group, GroupStatus};
use crate::models::user::UserRole;
use crate::services::change_tracker::TrackedFields;
use crate::services::entity_service::{self, AuditedEntity};
use crate::services::history_service::{EntityType, HistoryEntry};
use crate::services::permission;

/// Create group routes
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_groups).post(create_group))
        .route("/:id", put(update_group))
}

// ---------------------------------------------------------------------------
// Change tracking
// ---------------------------------------------------------------------------

impl TrackedFields for Group {
    fn field_bag(&self) -> Map<String, Value> {
        let mut bag = Map::new();
        bag.insert("title".into(), json!(self.title));
        bag.insert("projects".into(), json!(self.projects));
        bag.insert("status".into(), json!(self.status));
        bag.insert("description".into(), json!(self.description));
        bag
    }

    fn apply_field(&mut self, field: &str, value: &Value) -> Result<()> {
        match field {
            "title" => self.title = serde_json::from_value(value.clone())?,
            "projects" => self.projects = serde_json::from_value(value.clone())?,
            "status" => self.status = serde_json::from_value(value.clone())?,
            "description" => self.description = serde_json::from_value(value.clone())?,
            other => {
                return Err(AppError::Validation(format!("Unknown field: {}", other)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AuditedEntity for Group {
    const ENTITY_TYPE: EntityType = EntityType::Groups;

    fn id(&self) -> i64 {
        self.id
    }

    fn stamp_updated_by(&mut self, actor_id: i64) {
        self.updated_by = Some(actor_id);
    }

    async fn persist(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE groups
            SET title = $2, projects = $3, status = $4, description = $5,
                updated_by = $6, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(self.id)
        .bind(&self.title)
        .bind(&self.projects)
        .bind(self.status)
        .bind(&self.description)
        .bind(self.updated_by)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

/// Referential check shared with the server, domain and finance handlers.
pub(crate) async fn ensure_group_exists(db: &PgPool, group_id: i64) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM groups WHERE id = $1)")
        .bind(group_id)
        .fetch_one(db)
        .await?;
    if exists {
        Ok(())
    } else {
        Err(AppError::NotFound("Group not found".to_string()))
    }
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// Group row with its assigned server count.
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct GroupWithServers {
    pub id: i64,
    pub title: String,
    pub projects: Vec<String>,
    pub status: GroupStatus,
    pub description: Option<String>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_servers: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GroupCreate {
    pub title: String,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default = "default_group_status")]
    pub status: GroupStatus,
    pub description: Option<String>,
}

fn default_group_status() -> GroupStatus {
    GroupStatus::Enabled
}

/// Partial update; absent or null fields are left untouched.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct GroupUpdate {
    pub title: Option<String>,
    pub projects: Option<Vec<String>>,
    pub status: Option<GroupStatus>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GroupListResponse {
    pub items: Vec<GroupWithServers>,
    pub total: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// List groups with assigned server counts
#[utoipa::path(
    get,
    path = "",
    context_path = "/api/v1/groups",
    tag = "groups",
    params(ListQuery),
    responses(
        (status = 200, description = "List of groups", body = GroupListResponse),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_groups(
    State(state): State<SharedState>,
    Extension(CurrentUser(_actor)): Extension<CurrentUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<GroupListResponse>> {
    let pattern = query.search_pattern();

    let items = sqlx::query_as::<_, GroupWithServers>(
        r#"
        SELECT g.*,
               (SELECT COUNT(*) FROM servers s WHERE s.group_id = g.id) AS assigned_servers
        FROM groups g
        WHERE ($1::text IS NULL
               OR CAST(g.id AS TEXT) LIKE $1
               OR g.title ILIKE $1)
        ORDER BY g.id
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
        SELECT COUNT(*) FROM groups g
        WHERE ($1::text IS NULL
               OR CAST(g.id AS TEXT) LIKE $1
               OR g.title ILIKE $1)
        "#,
    )
    .bind(&pattern)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(GroupListResponse { items, total }))
}

/// Create a group
#[utoipa::path(
    post,
    path = "",
    context_path = "/api/v1/groups",
    tag = "groups",
    request_body = GroupCreate,
    responses(
        (status = 200, description = "Group created", body = Group),
        (status = 403, description = "Requires Admin 2L")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_group(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Json(payload): Json<GroupCreate>,
) -> Result<Json<Group>> {
    permission::require(actor.role, UserRole::Admin2L)?;

    let mut tx = state.db.begin().await?;

    let group = sqlx::query_as::<_, Group>(
        r#"
        INSERT INTO groups (title, projects, status, description, created_by)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(&payload.title)
    .bind(&payload.projects)
    .bind(payload.status)
    .bind(&payload.description)
    .bind(actor.id)
    .fetch_one(&mut *tx)
    .await?;

    state
        .history
        .append(
            &mut tx,
            HistoryEntry::created(EntityType::Groups, group.id).actor(actor.id),
        )
        .await?;

    tx.commit().await?;

    tracing::info!(group_id = group.id, actor = %actor.username, "group created");

    Ok(Json(group))
}

/// Update a group
#[utoipa::path(
    put,
    path = "/{id}",
    context_path = "/api/v1/groups",
    tag = "groups",
    params(("id" = i64, Path, description = "Group ID")),
    request_body = GroupUpdate,
    responses(
        (status = 200, description = "Group updated", body = Group),
        (status = 403, description = "Requires Admin 2L"),
        (status = 404, description = "Group not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_group(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(payload): Json<GroupUpdate>,
) -> Result<Json<Group>> {
    permission::require(actor.role, UserRole::Admin2L)?;

    let mut group = sqlx::query_as::<_, Group>("SELECT * FROM groups WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Group not found".to_string()))?;

    let proposed = dto::proposed_fields(&payload)?;
    let changes =
        entity_service::update_entity(&state.db, &state.history, &mut group, &proposed, actor.id)
            .await?;

    if !changes.is_empty() {
        group = sqlx::query_as::<_, Group>("SELECT * FROM groups WHERE id = $1")
            .bind(id)
            .fetch_one(&state.db)
            .await?;
        tracing::info!(
            group_id = id,
            fields = changes.len(),
            actor = %actor.username,
            "group updated"
        );
    }

    Ok(Json(group))
}

#[derive(OpenApi)]
#[openapi(
    paths(list_groups, create_group, update_group),
    components(schemas(
        Group,
        GroupStatus,
        GroupWithServers,
        GroupCreate,
        GroupUpdate,
        GroupListResponse,
    ))
)]
pub struct GroupsApiDoc;
