//! Group model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "group_status")]
pub enum GroupStatus {
    Enabled,
    Disabled,
}

/// Operator group entity
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Group {
    pub id: i64,
    pub title: String,
    pub projects: Vec<String>,
    pub status: GroupStatus,
    pub description: Option<String>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
