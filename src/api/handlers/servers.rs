//! Server inventory handlers.

use async_trait::async_trait;
use axum::{
    extract::{Extension, Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::{PgPool, Postgres, Transaction};
use utoipa::{OpenApi, ToSchema};

use crate::api::dto::{self, ListQuery};
use crate::api::handlers::groups::ensure_group_exists;
use crate::api::middleware::auth::CurrentUser;
use crate::api::SharedState;
use crate::error::{AppError, Result};
use crate::models::history::History;
use crate::models::server::{Server, ServerStatus};
use crate::models::user::UserRole;
use crate::services::change_tracker::TrackedFields;
use crate::services::entity_service::{self, AuditedEntity};
use crate::services::history_service::{EntityType, HistoryEntry, ScopedRefs};
use crate::services::permission;

/// Create server routes
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_servers).post(create_server))
        .route("/:id", get(get_server).put(update_server))
        .route("/:id/history", get(server_history))
}

// ---------------------------------------------------------------------------
// Change tracking
// ---------------------------------------------------------------------------

impl TrackedFields for Server {
    fn field_bag(&self) -> Map<String, Value> {
        let mut bag = Map::new();
        bag.insert("os".into(), json!(self.os));
        bag.insert("ip_address".into(), json!(self.ip_address));
        bag.insert("additional_ips".into(), json!(self.additional_ips));
        bag.insert("comments".into(), json!(self.comments));
        bag.insert("hoster".into(), json!(self.hoster));
        bag.insert("status".into(), json!(self.status));
        bag.insert("group_id".into(), json!(self.group_id));
        bag.insert("project".into(), json!(self.project));
        bag.insert("country".into(), json!(self.country));
        bag.insert("ssh_username".into(), json!(self.ssh_username));
        bag.insert("ssh_password".into(), json!(self.ssh_password));
        bag.insert("ssh_port".into(), json!(self.ssh_port));
        bag.insert("container_password".into(), json!(self.container_password));
        bag
    }

    fn apply_field(&mut self, field: &str, value: &Value) -> Result<()> {
        match field {
            "os" => self.os = serde_json::from_value(value.clone())?,
            "ip_address" => self.ip_address = serde_json::from_value(value.clone())?,
            "additional_ips" => self.additional_ips = serde_json::from_value(value.clone())?,
            "comments" => self.comments = serde_json::from_value(value.clone())?,
            "hoster" => self.hoster = serde_json::from_value(value.clone())?,
            "status" => self.status = serde_json::from_value(value.clone())?,
            "group_id" => self.group_id = serde_json::from_value(value.clone())?,
            "project" => self.project = serde_json::from_value(value.clone())?,
            "country" => {
                let country: Option<String> = serde_json::from_value(value.clone())?;
                validate_country(country.as_deref())?;
                self.country = country;
            }
            "ssh_username" => self.ssh_username = serde_json::from_value(value.clone())?,
            "ssh_password" => self.ssh_password = serde_json::from_value(value.clone())?,
            "ssh_port" => self.ssh_port = serde_json::from_value(value.clone())?,
            "container_password" => {
                self.container_password = serde_json::from_value(value.clone())?
            }
            other => {
                return Err(AppError::Validation(format!("Unknown field: {}", other)));
            }
        }
        Ok(())
    }

    fn redacted_fields() -> &'static [&'static str] {
        &["ssh_password", "container_password"]
    }
}

#[async_trait]
impl AuditedEntity for Server {
    const ENTITY_TYPE: EntityType = EntityType::Servers;

    fn id(&self) -> i64 {
        self.id
    }

    fn scoped_refs(id: i64) -> ScopedRefs {
        ScopedRefs::server(id)
    }

    fn stamp_updated_by(&mut self, actor_id: i64) {
        self.updated_by = Some(actor_id);
    }

    async fn persist(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE servers
            SET os = $2, ip_address = $3, additional_ips = $4, comments = $5,
                hoster = $6, status = $7, group_id = $8, project = $9, country = $10,
                ssh_username = $11, ssh_password = $12, ssh_port = $13,
                container_password = $14, updated_by = $15, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(self.id)
        .bind(&self.os)
        .bind(&self.ip_address)
        .bind(&self.additional_ips)
        .bind(&self.comments)
        .bind(&self.hoster)
        .bind(self.status)
        .bind(self.group_id)
        .bind(&self.project)
        .bind(&self.country)
        .bind(&self.ssh_username)
        .bind(&self.ssh_password)
        .bind(self.ssh_port)
        .bind(&self.container_password)
        .bind(self.updated_by)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

fn validate_country(country: Option<&str>) -> Result<()> {
    match country {
        Some(code) if code.len() != 2 => Err(AppError::Validation(
            "Country must be a 2-letter code".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Referential check shared with the finance handlers.
pub(crate) async fn ensure_server_exists(db: &PgPool, server_id: i64) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM servers WHERE id = $1)")
        .bind(server_id)
        .fetch_one(db)
        .await?;
    if exists {
        Ok(())
    } else {
        Err(AppError::NotFound("Server not found".to_string()))
    }
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct ServerCreate {
    pub os: Option<String>,
    pub ip_address: String,
    #[serde(default)]
    pub additional_ips: Vec<String>,
    pub comments: Option<String>,
    pub hoster: Option<String>,
    #[serde(default = "default_server_status")]
    pub status: ServerStatus,
    pub group_id: Option<i64>,
    pub project: Option<String>,
    pub country: Option<String>,
    #[serde(default = "default_ssh_username")]
    pub ssh_username: String,
    pub ssh_password: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: i32,
    pub container_password: Option<String>,
}

fn default_server_status() -> ServerStatus {
    ServerStatus::Running
}

fn default_ssh_username() -> String {
    "root".to_string()
}

fn default_ssh_port() -> i32 {
    22
}

/// Partial update; absent or null fields are left untouched.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct ServerUpdate {
    pub os: Option<String>,
    pub ip_address: Option<String>,
    pub additional_ips: Option<Vec<String>>,
    pub comments: Option<String>,
    pub hoster: Option<String>,
    pub status: Option<ServerStatus>,
    pub group_id: Option<i64>,
    pub project: Option<String>,
    pub country: Option<String>,
    pub ssh_username: Option<String>,
    pub ssh_password: Option<String>,
    pub ssh_port: Option<i32>,
    pub container_password: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ServerListResponse {
    pub items: Vec<Server>,
    pub total: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// List servers
#[utoipa::path(
    get,
    path = "",
    context_path = "/api/v1/servers",
    tag = "servers",
    params(ListQuery),
    responses(
        (status = 200, description = "List of servers", body = ServerListResponse),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_servers(
    State(state): State<SharedState>,
    Extension(CurrentUser(_actor)): Extension<CurrentUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ServerListResponse>> {
    let pattern = query.search_pattern();

    let items = sqlx::query_as::<_, Server>(
        r#"
        SELECT * FROM servers
        WHERE ($1::text IS NULL
               OR CAST(id AS TEXT) LIKE $1
               OR project ILIKE $1
               OR ip_address ILIKE $1
               OR comments ILIKE $1)
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
        SELECT COUNT(*) FROM servers
        WHERE ($1::text IS NULL
               OR CAST(id AS TEXT) LIKE $1
               OR project ILIKE $1
               OR ip_address ILIKE $1
               OR comments ILIKE $1)
        "#,
    )
    .bind(&pattern)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(ServerListResponse { items, total }))
}

/// Get a server by ID
#[utoipa::path(
    get,
    path = "/{id}",
    context_path = "/api/v1/servers",
    tag = "servers",
    params(("id" = i64, Path, description = "Server ID")),
    responses(
        (status = 200, description = "Server details", body = Server),
        (status = 404, description = "Server not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_server(
    State(state): State<SharedState>,
    Extension(CurrentUser(_actor)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<Json<Server>> {
    let server = sqlx::query_as::<_, Server>("SELECT * FROM servers WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Server not found".to_string()))?;

    Ok(Json(server))
}

/// Create a server
#[utoipa::path(
    post,
    path = "",
    context_path = "/api/v1/servers",
    tag = "servers",
    request_body = ServerCreate,
    responses(
        (status = 200, description = "Server created", body = Server),
        (status = 403, description = "Requires Admin 2L"),
        (status = 404, description = "Referenced group not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_server(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Json(payload): Json<ServerCreate>,
) -> Result<Json<Server>> {
    permission::require(actor.role, UserRole::Admin2L)?;
    validate_country(payload.country.as_deref())?;

    if let Some(group_id) = payload.group_id {
        ensure_group_exists(&state.db, group_id).await?;
    }

    let mut tx = state.db.begin().await?;

    let server = sqlx::query_as::<_, Server>(
        r#"
        INSERT INTO servers (os, ip_address, additional_ips, comments, hoster, status,
                             group_id, project, country, ssh_username, ssh_password,
                             ssh_port, container_password, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING *
        "#,
    )
    .bind(&payload.os)
    .bind(&payload.ip_address)
    .bind(&payload.additional_ips)
    .bind(&payload.comments)
    .bind(&payload.hoster)
    .bind(payload.status)
    .bind(payload.group_id)
    .bind(&payload.project)
    .bind(&payload.country)
    .bind(&payload.ssh_username)
    .bind(&payload.ssh_password)
    .bind(payload.ssh_port)
    .bind(&payload.container_password)
    .bind(actor.id)
    .fetch_one(&mut *tx)
    .await?;

    state
        .history
        .append(
            &mut tx,
            HistoryEntry::created(EntityType::Servers, server.id)
                .actor(actor.id)
                .refs(ScopedRefs::server(server.id)),
        )
        .await?;

    tx.commit().await?;

    tracing::info!(server_id = server.id, actor = %actor.username, "server created");

    Ok(Json(server))
}

/// Update a server
#[utoipa::path(
    put,
    path = "/{id}",
    context_path = "/api/v1/servers",
    tag = "servers",
    params(("id" = i64, Path, description = "Server ID")),
    request_body = ServerUpdate,
    responses(
        (status = 200, description = "Server updated", body = Server),
        (status = 403, description = "Requires Admin 1L"),
        (status = 404, description = "Server not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_server(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(payload): Json<ServerUpdate>,
) -> Result<Json<Server>> {
    permission::require(actor.role, UserRole::Admin1L)?;

    let mut server = sqlx::query_as::<_, Server>("SELECT * FROM servers WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Server not found".to_string()))?;

    let proposed = dto::proposed_fields(&payload)?;
    if let Some(group_id) = proposed.get("group_id").and_then(Value::as_i64) {
        ensure_group_exists(&state.db, group_id).await?;
    }

    let changes =
        entity_service::update_entity(&state.db, &state.history, &mut server, &proposed, actor.id)
            .await?;

    if !changes.is_empty() {
        server = sqlx::query_as::<_, Server>("SELECT * FROM servers WHERE id = $1")
            .bind(id)
            .fetch_one(&state.db)
            .await?;
        tracing::info!(
            server_id = id,
            fields = changes.len(),
            actor = %actor.username,
            "server updated"
        );
    }

    Ok(Json(server))
}

/// Change history for one server
#[utoipa::path(
    get,
    path = "/{id}/history",
    context_path = "/api/v1/servers",
    tag = "servers",
    params(("id" = i64, Path, description = "Server ID"), ListQuery),
    responses(
        (status = 200, description = "Ledger entries, newest first", body = Vec<History>),
        (status = 403, description = "Requires Admin 1L")
    ),
    security(("bearer_auth" = []))
)]
pub async fn server_history(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<History>>> {
    permission::require(actor.role, UserRole::Admin1L)?;

    let rows = state
        .history
        .query_by_entity(EntityType::Servers, id, query.skip(), query.limit())
        .await?;

    Ok(Json(rows))
}

#[derive(OpenApi)]
#[openapi(
    paths(list_servers, get_server, create_server, update_server, server_history),
    components(schemas(
        Server,
        ServerStatus,
        ServerCreate,
        ServerUpdate,
        ServerListResponse,
        History,
    ))
)]
pub struct ServersApiDoc;
