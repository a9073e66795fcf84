//! Shared Data Transfer Objects (DTOs) for API handlers.
//!
//! This module provides common structs used across multiple API endpoints
//! to ensure consistency in request/response formats.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::IntoParams;

use crate::error::{AppError, Result};

/// Query parameters for offset-paginated list requests.
///
/// Provides optional `skip`/`limit` windowing and a free-text `search`
/// filter; the searchable columns differ per entity and are described on
/// each list endpoint.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct ListQuery {
    /// Number of rows to skip (default: 0)
    pub skip: Option<i64>,
    /// Maximum number of rows to return (default: 100, max: 1000)
    pub limit: Option<i64>,
    /// Free-text filter, matched as a substring
    pub search: Option<String>,
}

impl ListQuery {
    /// Get the offset, defaulting to 0. Negative values clamp to 0.
    pub fn skip(&self) -> i64 {
        self.skip.unwrap_or(0).max(0)
    }

    /// Get the row limit, defaulting to 100 and capped at 1000.
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 1000)
    }

    /// The search filter as an ILIKE pattern, if one was given.
    pub fn search_pattern(&self) -> Option<String> {
        self.search
            .as_ref()
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s))
    }
}

/// Serialize a partial-update DTO into the proposed-field map consumed by
/// the change tracker.
///
/// Null fields are dropped: absent and null both mean "leave untouched",
/// so clearing a value is not expressible on the update surface.
pub fn proposed_fields<T: Serialize>(dto: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(dto)? {
        Value::Object(map) => Ok(map.into_iter().filter(|(_, v)| !v.is_null()).collect()),
        _ => Err(AppError::Validation(
            "Update payload must be a JSON object".to_string(),
        )),
    }
}
