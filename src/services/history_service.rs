//! Append-only change ledger.
//!
//! Every committed mutation writes exactly one history row in the same
//! transaction as the entity write. The ledger exposes no update or
//! delete path; queries are fresh each call and ordered newest-first
//! with ties broken by ascending sequence id.

use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::Result;
use crate::models::history::{History, HistoryWithActor};
use crate::services::change_tracker::ChangeSet;

/// Mutation kinds recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    Create,
    Update,
    Delete,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Create => "CREATE",
            HistoryAction::Update => "UPDATE",
            HistoryAction::Delete => "DELETE",
        }
    }
}

/// Entity tags used to scope ledger rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Servers,
    Domains,
    Groups,
    Finance,
    Users,
    Settings,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Servers => "servers",
            EntityType::Domains => "domains",
            EntityType::Groups => "groups",
            EntityType::Finance => "finance",
            EntityType::Users => "users",
            EntityType::Settings => "settings",
        }
    }
}

/// Nullable references to the concrete entity row, for fast scoped lookup.
/// They null out on entity deletion while the ledger row survives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopedRefs {
    pub server_id: Option<i64>,
    pub domain_id: Option<i64>,
    pub finance_id: Option<i64>,
}

impl ScopedRefs {
    pub fn server(id: i64) -> Self {
        Self {
            server_id: Some(id),
            ..Self::default()
        }
    }

    pub fn domain(id: i64) -> Self {
        Self {
            domain_id: Some(id),
            ..Self::default()
        }
    }

    pub fn finance(id: i64) -> Self {
        Self {
            finance_id: Some(id),
            ..Self::default()
        }
    }
}

/// Ledger entry builder
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    action: HistoryAction,
    entity_type: EntityType,
    record_id: i64,
    changes: Value,
    user_id: Option<i64>,
    refs: ScopedRefs,
}

impl HistoryEntry {
    /// Entry for a freshly created entity, diff sentinel `{"all": "created"}`.
    pub fn created(entity_type: EntityType, record_id: i64) -> Self {
        Self {
            action: HistoryAction::Create,
            entity_type,
            record_id,
            changes: json!({ "all": "created" }),
            user_id: None,
            refs: ScopedRefs::default(),
        }
    }

    /// Entry for a deleted entity, diff sentinel `{"all": "deleted"}`.
    pub fn deleted(entity_type: EntityType, record_id: i64) -> Self {
        Self {
            action: HistoryAction::Delete,
            entity_type,
            record_id,
            changes: json!({ "all": "deleted" }),
            user_id: None,
            refs: ScopedRefs::default(),
        }
    }

    /// Entry for an update carrying the recorded field transitions.
    pub fn updated(entity_type: EntityType, record_id: i64, changes: &ChangeSet) -> Self {
        Self {
            action: HistoryAction::Update,
            entity_type,
            record_id,
            changes: changes.to_value(),
            user_id: None,
            refs: ScopedRefs::default(),
        }
    }

    pub fn actor(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn refs(mut self, refs: ScopedRefs) -> Self {
        self.refs = refs;
        self
    }
}

/// Filters for administrative ledger browsing
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub entity_type: Option<String>,
    pub action: Option<String>,
    pub user_id: Option<i64>,
    pub search: Option<String>,
}

/// History ledger service
#[derive(Clone)]
pub struct HistoryService {
    db: PgPool,
}

impl HistoryService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Append one entry inside the caller's open transaction.
    ///
    /// Sequence id and timestamp are assigned by the store so the entry
    /// commits or rolls back together with the entity write it records.
    pub async fn append(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: HistoryEntry,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO history (action, entity_type, record_id, changes, user_id, server_id, domain_id, finance_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(entry.action.as_str())
        .bind(entry.entity_type.as_str())
        .bind(entry.record_id)
        .bind(&entry.changes)
        .bind(entry.user_id)
        .bind(entry.refs.server_id)
        .bind(entry.refs.domain_id)
        .bind(entry.refs.finance_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(id)
    }

    /// All ledger rows for one entity, newest first.
    ///
    /// Ties on the store-assigned timestamp are broken by ascending
    /// sequence id so the ordering is stable across calls.
    pub async fn query_by_entity(
        &self,
        entity_type: EntityType,
        record_id: i64,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<History>> {
        let rows = sqlx::query_as::<_, History>(
            r#"
            SELECT id, action, entity_type, record_id, changes, timestamp,
                   user_id, server_id, domain_id, finance_id
            FROM history
            WHERE entity_type = $1 AND record_id = $2
            ORDER BY timestamp DESC, id ASC
            OFFSET $3 LIMIT $4
            "#,
        )
        .bind(entity_type.as_str())
        .bind(record_id)
        .bind(skip)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }

    /// Administrative browsing across all entities with optional filters.
    ///
    /// Rows come back with the acting user's name resolved so the caller
    /// does not need a second lookup per row.
    pub async fn query_all(
        &self,
        filter: &HistoryFilter,
        skip: i64,
        limit: i64,
    ) -> Result<(Vec<HistoryWithActor>, i64)> {
        let search_pattern = filter.search.as_ref().map(|s| format!("%{}%", s));

        let rows = sqlx::query_as::<_, HistoryWithActor>(
            r#"
            SELECT h.id, h.action, h.entity_type, h.record_id, h.changes, h.timestamp,
                   h.user_id, u.username, h.server_id, h.domain_id, h.finance_id
            FROM history h
            LEFT JOIN users u ON u.id = h.user_id
            WHERE ($1::text IS NULL OR h.entity_type = $1)
              AND ($2::text IS NULL OR h.action = $2)
              AND ($3::bigint IS NULL OR h.user_id = $3)
              AND ($4::text IS NULL
                   OR h.entity_type ILIKE $4
                   OR h.action ILIKE $4
                   OR CAST(h.record_id AS TEXT) ILIKE $4)
            ORDER BY h.timestamp DESC, h.id ASC
            OFFSET $5 LIMIT $6
            "#,
        )
        .bind(&filter.entity_type)
        .bind(&filter.action)
        .bind(filter.user_id)
        .bind(&search_pattern)
        .bind(skip)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM history
            WHERE ($1::text IS NULL OR entity_type = $1)
              AND ($2::text IS NULL OR action = $2)
              AND ($3::bigint IS NULL OR user_id = $3)
              AND ($4::text IS NULL
                   OR entity_type ILIKE $4
                   OR action ILIKE $4
                   OR CAST(record_id AS TEXT) ILIKE $4)
            "#,
        )
        .bind(&filter.entity_type)
        .bind(&filter.action)
        .bind(filter.user_id)
        .bind(&search_pattern)
        .fetch_one(&self.db)
        .await?;

        Ok((rows, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -----------------------------------------------------------------------
    // as_str tags
    // -----------------------------------------------------------------------

    #[test]
    fn test_history_action_as_str() {
        assert_eq!(HistoryAction::Create.as_str(), "CREATE");
        assert_eq!(HistoryAction::Update.as_str(), "UPDATE");
        assert_eq!(HistoryAction::Delete.as_str(), "DELETE");
    }

    #[test]
    fn test_entity_type_as_str() {
        assert_eq!(EntityType::Servers.as_str(), "servers");
        assert_eq!(EntityType::Domains.as_str(), "domains");
        assert_eq!(EntityType::Groups.as_str(), "groups");
        assert_eq!(EntityType::Finance.as_str(), "finance");
        assert_eq!(EntityType::Users.as_str(), "users");
        assert_eq!(EntityType::Settings.as_str(), "settings");
    }

    // -----------------------------------------------------------------------
    // entry builder
    // -----------------------------------------------------------------------

    #[test]
    fn test_created_entry_uses_sentinel_diff() {
        let entry = HistoryEntry::created(EntityType::Servers, 7).actor(1);
        assert_eq!(entry.changes, json!({ "all": "created" }));
        assert_eq!(entry.action, HistoryAction::Create);
        assert_eq!(entry.user_id, Some(1));
    }

    #[test]
    fn test_deleted_entry_uses_sentinel_diff() {
        let entry = HistoryEntry::deleted(EntityType::Users, 3);
        assert_eq!(entry.changes, json!({ "all": "deleted" }));
        assert_eq!(entry.action, HistoryAction::Delete);
        assert_eq!(entry.user_id, None, "system-initiated entries have no actor");
    }

    #[test]
    fn test_updated_entry_carries_change_set_payload() {
        let mut changes = ChangeSet::default();
        changes.record("ip_address", json!("1.2.3.4"), json!("5.6.7.8"));
        let entry =
            HistoryEntry::updated(EntityType::Servers, 9, &changes).refs(ScopedRefs::server(9));
        assert_eq!(
            entry.changes,
            json!({ "ip_address": { "old": "1.2.3.4", "new": "5.6.7.8" } })
        );
        assert_eq!(entry.refs.server_id, Some(9));
        assert_eq!(entry.refs.domain_id, None);
    }

    #[test]
    fn test_scoped_refs_constructors_set_single_reference() {
        let s = ScopedRefs::server(1);
        let d = ScopedRefs::domain(2);
        let f = ScopedRefs::finance(3);
        assert_eq!((s.server_id, s.domain_id, s.finance_id), (Some(1), None, None));
        assert_eq!((d.server_id, d.domain_id, d.finance_id), (None, Some(2), None));
        assert_eq!((f.server_id, f.domain_id, f.finance_id), (None, None, Some(3)));
    }
}
