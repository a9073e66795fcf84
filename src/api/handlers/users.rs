//! User management handlers.
//!
//! Mutations here guard the privilege ladder itself: a Super Admin can
//! only be demoted by themself, cannot be deleted at all, and every
//! password travels through bcrypt before it reaches the tracked diff,
//! so the ledger only ever sees `password_hash` (redacted).

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
use crate::api::middleware::auth::CurrentUser;
use crate::api::SharedState;
use crate::error::{AppError, Result};
use crate::models::user::{User, UserRole, UserStatus};
use crate::services::auth_service::AuthService;
use crate::services::change_tracker::TrackedFields;
use crate::services::entity_service::{self, AuditedEntity};
use crate::services::history_service::{EntityType, HistoryEntry};
use crate::services::permission;

/// Create user routes
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/:id", put(update_user).delete(delete_user))
}

// ---------------------------------------------------------------------------
// Change tracking
// ---------------------------------------------------------------------------

impl TrackedFields for User {
    fn field_bag(&self) -> Map<String, Value> {
        let mut bag = Map::new();
        bag.insert("username".into(), json!(self.username));
        bag.insert("email".into(), json!(self.email));
        bag.insert("password_hash".into(), json!(self.password_hash));
        bag.insert("role".into(), json!(self.role));
        bag.insert("status".into(), json!(self.status));
        bag.insert("phone_number".into(), json!(self.phone_number));
        bag.insert("allowed_ips".into(), json!(self.allowed_ips));
        bag
    }

    fn apply_field(&mut self, field: &str, value: &Value) -> Result<()> {
        match field {
            "username" => self.username = serde_json::from_value(value.clone())?,
            "email" => self.email = serde_json::from_value(value.clone())?,
            "password_hash" => self.password_hash = serde_json::from_value(value.clone())?,
            "role" => self.role = serde_json::from_value(value.clone())?,
            "status" => self.status = serde_json::from_value(value.clone())?,
            "phone_number" => self.phone_number = serde_json::from_value(value.clone())?,
            "allowed_ips" => self.allowed_ips = serde_json::from_value(value.clone())?,
            other => {
                return Err(AppError::Validation(format!("Unknown field: {}", other)));
            }
        }
        Ok(())
    }

    fn redacted_fields() -> &'static [&'static str] {
        &["password_hash"]
    }
}

#[async_trait]
impl AuditedEntity for User {
    const ENTITY_TYPE: EntityType = EntityType::Users;

    fn id(&self) -> i64 {
        self.id
    }

    // users table carries no updated_by column; keep the default no-op stamp.

    async fn persist(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET username = $2, email = $3, password_hash = $4, role = $5, status = $6,
                phone_number = $7, allowed_ips = $8, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(self.id)
        .bind(&self.username)
        .bind(&self.email)
        .bind(&self.password_hash)
        .bind(self.role)
        .bind(self.status)
        .bind(&self.phone_number)
        .bind(&self.allowed_ips)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserCreate {
    pub username: String,
    pub email: String,
    pub password: String,
    pub phone_number: Option<String>,
    #[serde(default = "default_role")]
    pub role: UserRole,
    #[serde(default = "default_status")]
    pub status: UserStatus,
    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: Vec<String>,
}

fn default_role() -> UserRole {
    UserRole::Admin1L
}

fn default_status() -> UserStatus {
    UserStatus::Active
}

fn default_allowed_ips() -> Vec<String> {
    vec!["0.0.0.0/0".to_string()]
}

/// Partial update; absent or null fields are left untouched. A plain
/// `password` is accepted here and hashed before diffing.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub phone_number: Option<String>,
    pub role: Option<UserRole>,
    pub status: Option<UserStatus>,
    pub allowed_ips: Option<Vec<String>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserListResponse {
    pub items: Vec<User>,
    pub total: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// List users
#[utoipa::path(
    get,
    path = "",
    context_path = "/api/v1/users",
    tag = "users",
    params(ListQuery),
    responses(
        (status = 200, description = "List of users", body = UserListResponse),
        (status = 403, description = "Requires Admin 2L")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_users(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<UserListResponse>> {
    permission::require(actor.role, UserRole::Admin2L)?;

    let pattern = query.search_pattern();

    let items = sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users
        WHERE ($1::text IS NULL
               OR username ILIKE $1
               OR email ILIKE $1
               OR phone_number ILIKE $1
               OR CAST(role AS TEXT) ILIKE $1)
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
        SELECT COUNT(*) FROM users
        WHERE ($1::text IS NULL
               OR username ILIKE $1
               OR email ILIKE $1
               OR phone_number ILIKE $1
               OR CAST(role AS TEXT) ILIKE $1)
        "#,
    )
    .bind(&pattern)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(UserListResponse { items, total }))
}

/// Create a user
#[utoipa::path(
    post,
    path = "",
    context_path = "/api/v1/users",
    tag = "users",
    request_body = UserCreate,
    responses(
        (status = 200, description = "User created", body = User),
        (status = 403, description = "Requires Admin 2L"),
        (status = 409, description = "Username or email taken")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_user(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Json(payload): Json<UserCreate>,
) -> Result<Json<User>> {
    permission::require(actor.role, UserRole::Admin2L)?;

    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM users WHERE username = $1 OR email = $2)",
    )
    .bind(&payload.username)
    .bind(&payload.email)
    .fetch_one(&state.db)
    .await?;
    if taken {
        return Err(AppError::Conflict(
            "Username or email already exists".to_string(),
        ));
    }

    let password_hash = AuthService::hash_password(&payload.password)?;

    let mut tx = state.db.begin().await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (username, email, password_hash, role, status, phone_number,
                           allowed_ips)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(&payload.username)
    .bind(&payload.email)
    .bind(&password_hash)
    .bind(payload.role)
    .bind(payload.status)
    .bind(&payload.phone_number)
    .bind(&payload.allowed_ips)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        let msg = e.to_string();
        if msg.contains("duplicate key") {
            AppError::Conflict("Username or email already exists".to_string())
        } else {
            AppError::Database(e)
        }
    })?;

    state
        .history
        .append(
            &mut tx,
            HistoryEntry::created(EntityType::Users, user.id).actor(actor.id),
        )
        .await?;

    tx.commit().await?;

    tracing::info!(
        user_id = user.id,
        username = %user.username,
        role = user.role.as_str(),
        actor = %actor.username,
        "user created"
    );

    Ok(Json(user))
}

/// Update a user
///
/// Users may edit themselves; editing anyone else requires Admin 2L.
/// Role changes always require Admin 2L, and a Super Admin's role can
/// only be changed by that Super Admin.
#[utoipa::path(
    put,
    path = "/{id}",
    context_path = "/api/v1/users",
    tag = "users",
    params(("id" = i64, Path, description = "User ID")),
    request_body = UserUpdate,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 403, description = "Not permitted for this target"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Username or email taken")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_user(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(payload): Json<UserUpdate>,
) -> Result<Json<User>> {
    if actor.id != id {
        permission::require(actor.role, UserRole::Admin2L)?;
    }

    let mut user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if let Some(new_role) = payload.role {
        if new_role != user.role {
            if user.role == UserRole::SuperAdmin {
                if actor.id != user.id {
                    return Err(AppError::Authorization(
                        "Cannot demote Super Admin".to_string(),
                    ));
                }
            } else {
                permission::require(actor.role, UserRole::Admin2L)?;
            }
        }
    }

    if let Some(username) = payload.username.as_deref() {
        if username != user.username {
            let taken: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM users WHERE username = $1 AND id <> $2)",
            )
            .bind(username)
            .bind(id)
            .fetch_one(&state.db)
            .await?;
            if taken {
                return Err(AppError::Conflict("Username already exists".to_string()));
            }
        }
    }
    if let Some(email) = payload.email.as_deref() {
        if email != user.email {
            let taken: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM users WHERE email = $1 AND id <> $2)",
            )
            .bind(email)
            .bind(id)
            .fetch_one(&state.db)
            .await?;
            if taken {
                return Err(AppError::Conflict("Email already exists".to_string()));
            }
        }
    }

    let mut proposed = dto::proposed_fields(&payload)?;
    if let Some(password) = payload.password.as_deref() {
        proposed.remove("password");
        proposed.insert(
            "password_hash".into(),
            json!(AuthService::hash_password(password)?),
        );
    }

    let changes =
        entity_service::update_entity(&state.db, &state.history, &mut user, &proposed, actor.id)
            .await?;

    if !changes.is_empty() {
        user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_one(&state.db)
            .await?;
        tracing::info!(
            user_id = id,
            fields = changes.len(),
            actor = %actor.username,
            "user updated"
        );
    }

    Ok(Json(user))
}

/// Delete a user
#[utoipa::path(
    delete,
    path = "/{id}",
    context_path = "/api/v1/users",
    tag = "users",
    params(("id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deleted"),
        (status = 403, description = "Super Admin and self-deletion are protected"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_user(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<()> {
    permission::require(actor.role, UserRole::Admin2L)?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if user.role == UserRole::SuperAdmin {
        return Err(AppError::Authorization(
            "Cannot delete Super Admin".to_string(),
        ));
    }
    if actor.id == id {
        return Err(AppError::Authorization("Cannot delete yourself".to_string()));
    }

    let mut tx = state.db.begin().await?;

    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    state
        .history
        .append(
            &mut tx,
            HistoryEntry::deleted(EntityType::Users, id).actor(actor.id),
        )
        .await?;

    tx.commit().await?;

    tracing::info!(
        user_id = id,
        username = %user.username,
        actor = %actor.username,
        "user deleted"
    );

    Ok(())
}

#[derive(OpenApi)]
#[openapi(
    paths(list_users, create_user, update_user, delete_user),
    components(schemas(User, UserRole, UserStatus, UserCreate, UserUpdate, UserListResponse))
)]
pub struct UsersApiDoc;
