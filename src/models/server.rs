//! Server model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Server lifecycle status.
///
/// The spellings `stoped`, `reserv` and `maintaince` are long-standing
/// values in the production database and must not be corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "server_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Running,
    Stoped,
    Reserv,
    Abuse,
    Maintaince,
}

/// Server entity
#[derive(Clone, FromRow, Serialize, ToSchema)]
pub struct Server {
    pub id: i64,
    pub os: Option<String>,
    pub ip_address: String,
    pub additional_ips: Vec<String>,
    pub comments: Option<String>,
    pub hoster: Option<String>,
    pub status: ServerStatus,
    pub group_id: Option<i64>,
    pub project: Option<String>,
    pub country: Option<String>,
    pub ssh_username: String,
    pub ssh_password: Option<String>,
    pub ssh_port: i32,
    pub container_password: Option<String>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

redacted_debug!(Server {
    show id,
    show os,
    show ip_address,
    show additional_ips,
    show hoster,
    show status,
    show group_id,
    show project,
    show country,
    show ssh_username,
    redact_option ssh_password,
    show ssh_port,
    redact_option container_password,
    show created_at,
    show updated_at,
});
