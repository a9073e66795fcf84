//! Domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Domain status. `Maintance` is a long-standing production value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "domain_status")]
pub enum DomainStatus {
    Active,
    Suspended,
    Abuse,
    Maintance,
}

/// Domain entity with cached DNS record sets
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Domain {
    pub id: i64,
    pub domain_name: String,
    pub group_id: Option<i64>,
    pub status: DomainStatus,
    pub ns_records: Vec<String>,
    pub a_records: Vec<String>,
    pub aaaa_records: Vec<String>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
