//! User model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Operator roles, ordered by privilege.
///
/// Variant order matters: it matches the rank table in
/// `services::permission` (Super Admin is rank 0, the highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "user_role")]
pub enum UserRole {
    #[sqlx(rename = "Super Admin")]
    #[serde(rename = "Super Admin")]
    SuperAdmin,
    #[sqlx(rename = "Admin 2L")]
    #[serde(rename = "Admin 2L")]
    Admin2L,
    #[sqlx(rename = "Admin 1L")]
    #[serde(rename = "Admin 1L")]
    Admin1L,
    #[sqlx(rename = "Service Manager")]
    #[serde(rename = "Service Manager")]
    ServiceManager,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::SuperAdmin => "Super Admin",
            UserRole::Admin2L => "Admin 2L",
            UserRole::Admin1L => "Admin 1L",
            UserRole::ServiceManager => "Service Manager",
        }
    }
}

/// Account status. Only `active` users can authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "user_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Suspended,
    Inactive,
}

/// User entity
#[derive(Clone, FromRow, Serialize, ToSchema)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub status: UserStatus,
    pub phone_number: Option<String>,
    pub last_login_ip: Option<String>,
    pub allowed_ips: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

redacted_debug!(User {
    show id,
    show username,
    show email,
    redact password_hash,
    show role,
    show status,
    show phone_number,
    show last_login_ip,
    show allowed_ips,
    show created_at,
    show updated_at,
});
