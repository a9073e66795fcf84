//! Per-user settings handlers.
//!
//! Settings are strictly self-scoped: every route operates on the
//! calling user's row, which is created on first access. Contact and
//! access fields mirror into the users table inside the same
//! transaction, and a password change rides along as a redacted ledger
//! entry against the settings row.

use axum::{
    extract::{Extension, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use utoipa::{OpenApi, ToSchema};

use crate::api::dto;
use crate::api::middleware::auth::CurrentUser;
use crate::api::SharedState;
use crate::error::{AppError, Result};
use crate::models::settings::Settings;
use crate::models::user::{UserRole, UserStatus};
use crate::services::auth_service::AuthService;
use crate::services::change_tracker::{diff_and_apply, TrackedFields};
use crate::services::history_service::{EntityType, HistoryEntry};

/// Create settings routes
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_settings).put(update_settings))
        .route("/profile", get(get_profile))
}

// ---------------------------------------------------------------------------
// Change tracking
// ---------------------------------------------------------------------------

impl TrackedFields for Settings {
    fn field_bag(&self) -> Map<String, Value> {
        let mut bag = Map::new();
        bag.insert("first_name".into(), json!(self.first_name));
        bag.insert("last_name".into(), json!(self.last_name));
        bag.insert("email".into(), json!(self.email));
        bag.insert("phone_number".into(), json!(self.phone_number));
        bag.insert("allowed_ips".into(), json!(self.allowed_ips));
        bag
    }

    fn apply_field(&mut self, field: &str, value: &Value) -> Result<()> {
        match field {
            "first_name" => self.first_name = serde_json::from_value(value.clone())?,
            "last_name" => self.last_name = serde_json::from_value(value.clone())?,
            "email" => self.email = serde_json::from_value(value.clone())?,
            "phone_number" => self.phone_number = serde_json::from_value(value.clone())?,
            "allowed_ips" => self.allowed_ips = serde_json::from_value(value.clone())?,
            other => {
                return Err(AppError::Validation(format!("Unknown field: {}", other)));
            }
        }
        Ok(())
    }
}

/// Fetch the caller's settings row, creating an empty one on first access.
async fn load_or_create(db: &PgPool, user_id: i64) -> Result<Settings> {
    sqlx::query("INSERT INTO settings (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(db)
        .await?;

    let settings = sqlx::query_as::<_, Settings>("SELECT * FROM settings WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(db)
        .await?;

    Ok(settings)
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// Partial update; absent or null fields are left untouched. A plain
/// `password` is accepted and hashed into the user account.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct SettingsUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub allowed_ips: Option<Vec<String>>,
    pub password: Option<String>,
}

/// Flattened view of the caller's account and settings
#[derive(Debug, Serialize, ToSchema)]
pub struct ProfileResponse {
    pub username: String,
    pub role: UserRole,
    pub email: String,
    pub phone_number: String,
    pub status: UserStatus,
    pub first_name: String,
    pub last_name: String,
    pub allowed_ips: Option<Vec<String>>,
    pub last_login_ip: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Get the caller's settings
#[utoipa::path(
    get,
    path = "",
    context_path = "/api/v1/settings",
    tag = "settings",
    responses(
        (status = 200, description = "Settings row, created on first access", body = Settings),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_settings(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
) -> Result<Json<Settings>> {
    let settings = load_or_create(&state.db, actor.id).await?;
    Ok(Json(settings))
}

/// Update the caller's settings
#[utoipa::path(
    put,
    path = "",
    context_path = "/api/v1/settings",
    tag = "settings",
    request_body = SettingsUpdate,
    responses(
        (status = 200, description = "Settings updated", body = Settings),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_settings(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Json(mut payload): Json<SettingsUpdate>,
) -> Result<Json<Settings>> {
    let mut settings = load_or_create(&state.db, actor.id).await?;

    let password = payload.password.take().filter(|p| !p.is_empty());
    let proposed = dto::proposed_fields(&payload)?;
    let mut changes = diff_and_apply(&mut settings, &proposed)?;

    let password_hash = match password.as_deref() {
        Some(password) => {
            changes.record_redacted("password");
            Some(AuthService::hash_password(password)?)
        }
        None => None,
    };

    if changes.is_empty() {
        return Ok(Json(settings));
    }

    let mut tx = state.db.begin().await?;

    sqlx::query(
        r#"
        UPDATE settings
        SET first_name = $2, last_name = $3, email = $4, phone_number = $5,
            allowed_ips = $6, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(settings.id)
    .bind(&settings.first_name)
    .bind(&settings.last_name)
    .bind(&settings.email)
    .bind(&settings.phone_number)
    .bind(&settings.allowed_ips)
    .execute(&mut *tx)
    .await?;

    // Contact and access fields mirror into the account row. COALESCE keeps
    // the account value when a field was not part of this change.
    let mirror_email = changes.get("email").is_some();
    let mirror_phone = changes.get("phone_number").is_some();
    let mirror_ips = changes.get("allowed_ips").is_some();

    if mirror_email || mirror_phone || mirror_ips || password_hash.is_some() {
        sqlx::query(
            r#"
            UPDATE users
            SET email = COALESCE($2, email),
                phone_number = COALESCE($3, phone_number),
                allowed_ips = COALESCE($4, allowed_ips),
                password_hash = COALESCE($5, password_hash),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(actor.id)
        .bind(if mirror_email { settings.email.clone() } else { None })
        .bind(if mirror_phone {
            settings.phone_number.clone()
        } else {
            None
        })
        .bind(if mirror_ips {
            settings.allowed_ips.clone()
        } else {
            None
        })
        .bind(&password_hash)
        .execute(&mut *tx)
        .await?;
    }

    state
        .history
        .append(
            &mut tx,
            HistoryEntry::updated(EntityType::Settings, settings.id, &changes).actor(actor.id),
        )
        .await?;

    tx.commit().await?;

    let settings = sqlx::query_as::<_, Settings>("SELECT * FROM settings WHERE id = $1")
        .bind(settings.id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(
        user_id = actor.id,
        fields = changes.len(),
        "settings updated"
    );

    Ok(Json(settings))
}

/// Get the caller's profile
#[utoipa::path(
    get,
    path = "/profile",
    context_path = "/api/v1/settings",
    tag = "settings",
    responses(
        (status = 200, description = "Account and settings overview", body = ProfileResponse),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_profile(
    State(state): State<SharedState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
) -> Result<Json<ProfileResponse>> {
    let settings = sqlx::query_as::<_, Settings>("SELECT * FROM settings WHERE user_id = $1")
        .bind(actor.id)
        .fetch_optional(&state.db)
        .await?;

    let (first_name, last_name) = settings
        .map(|s| {
            (
                s.first_name.unwrap_or_default(),
                s.last_name.unwrap_or_default(),
            )
        })
        .unwrap_or_default();

    Ok(Json(ProfileResponse {
        username: actor.username,
        role: actor.role,
        email: actor.email,
        phone_number: actor.phone_number.unwrap_or_default(),
        status: actor.status,
        first_name,
        last_name,
        allowed_ips: actor.allowed_ips,
        last_login_ip: actor.last_login_ip.unwrap_or_default(),
    }))
}

#[derive(OpenApi)]
#[openapi(
    paths(get_settings, update_settings, get_profile),
    components(schemas(Settings, SettingsUpdate, ProfileResponse))
)]
pub struct SettingsApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::change_tracker::REDACTED;
    use chrono::Utc;

    fn sample_settings() -> Settings {
        Settings {
            id: 4,
            user_id: 5,
            first_name: Some("Mira".to_string()),
            last_name: None,
            email: Some("mira@example.com".to_string()),
            phone_number: None,
            allowed_ips: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    // -----------------------------------------------------------------------
    // DTO shape
    // -----------------------------------------------------------------------

    #[test]
    fn test_settings_update_null_fields_are_dropped() {
        let payload = SettingsUpdate {
            first_name: Some("Amira".to_string()),
            ..SettingsUpdate::default()
        };
        let proposed = dto::proposed_fields(&payload).unwrap();
        assert_eq!(proposed.len(), 1);
        assert_eq!(proposed["first_name"], json!("Amira"));
    }

    #[test]
    fn test_taken_password_leaves_no_proposed_field() {
        let mut payload = SettingsUpdate {
            password: Some("hunter2".to_string()),
            last_name: Some("K".to_string()),
            ..SettingsUpdate::default()
        };
        let password = payload.password.take();
        let proposed = dto::proposed_fields(&payload).unwrap();
        assert_eq!(password.as_deref(), Some("hunter2"));
        assert!(proposed.get("password").is_none());
        assert_eq!(proposed.len(), 1);
    }

    #[test]
    fn test_empty_password_is_ignored() {
        let mut payload = SettingsUpdate {
            password: Some(String::new()),
            ..SettingsUpdate::default()
        };
        let password = payload.password.take().filter(|p| !p.is_empty());
        assert!(password.is_none());
    }

    // -----------------------------------------------------------------------
    // change tracking
    // -----------------------------------------------------------------------

    #[test]
    fn test_contact_change_is_tracked() {
        let mut settings = sample_settings();
        let mut proposed = Map::new();
        proposed.insert("email".into(), json!("mira@corp.example"));

        let changes = diff_and_apply(&mut settings, &proposed).unwrap();
        assert_eq!(
            changes.get("email"),
            Some(&(json!("mira@example.com"), json!("mira@corp.example")))
        );
        assert_eq!(settings.email.as_deref(), Some("mira@corp.example"));
    }

    #[test]
    fn test_user_id_is_not_proposable() {
        let mut settings = sample_settings();
        let mut proposed = Map::new();
        proposed.insert("user_id".into(), json!(99));

        let err = diff_and_apply(&mut settings, &proposed).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_password_entry_is_recorded_redacted() {
        let mut changes = diff_and_apply(&mut sample_settings(), &Map::new()).unwrap();
        changes.record_redacted("password");

        let payload = changes.to_value();
        assert_eq!(payload["password"]["old"], json!(REDACTED));
        assert_eq!(payload["password"]["new"], json!(REDACTED));
    }

    // -----------------------------------------------------------------------
    // profile response
    // -----------------------------------------------------------------------

    #[test]
    fn test_profile_defaults_missing_fields_to_empty_strings() {
        let profile = ProfileResponse {
            username: "mira".to_string(),
            role: UserRole::Admin1L,
            email: "mira@example.com".to_string(),
            phone_number: String::new(),
            status: UserStatus::Active,
            first_name: String::new(),
            last_name: String::new(),
            allowed_ips: None,
            last_login_ip: String::new(),
        };
        let value = serde_json::to_value(&profile).unwrap();
        assert_eq!(value["phone_number"], json!(""));
        assert_eq!(value["last_login_ip"], json!(""));
        assert_eq!(value["role"], json!("Admin 1L"));
        assert_eq!(value["status"], json!("active"));
    }
}
