//! Generic mutation orchestration for audited entities.
//!
//! Every audited update follows the same pipeline: diff the proposed
//! fields against the loaded entity, apply the differing ones in memory,
//! then persist the entity and append the ledger entry inside one
//! transaction. An empty diff short-circuits before any database write,
//! so a no-op update leaves the row (including `updated_at`) and the
//! ledger completely untouched.
//!
//! Creates and deletes stay in their handlers: the INSERT/DELETE
//! statement and the sentinel ledger entry share a transaction there,
//! using the same [`HistoryService::append`] contract.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::Result;
use crate::services::change_tracker::{diff_and_apply, ChangeSet, TrackedFields};
use crate::services::history_service::{EntityType, HistoryEntry, HistoryService, ScopedRefs};

/// An entity whose mutations are diffed and recorded in the ledger.
#[async_trait]
pub trait AuditedEntity: TrackedFields + Send + Sync {
    /// Ledger tag for this entity type.
    const ENTITY_TYPE: EntityType;

    /// Primary key of the loaded row.
    fn id(&self) -> i64;

    /// Scoped ledger references for a row of this type.
    fn scoped_refs(id: i64) -> ScopedRefs {
        let _ = id;
        ScopedRefs::default()
    }

    /// Record the acting user on the row. Entities without an
    /// `updated_by` column keep the default no-op.
    fn stamp_updated_by(&mut self, actor_id: i64) {
        let _ = actor_id;
    }

    /// Write the full current state of the entity back to its row.
    async fn persist(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()>;
}

/// Diff, apply and commit an update to an audited entity.
///
/// Returns the recorded change set. When it is empty nothing was
/// persisted and no ledger entry was appended.
pub async fn update_entity<E: AuditedEntity>(
    db: &PgPool,
    history: &HistoryService,
    entity: &mut E,
    proposed: &Map<String, Value>,
    actor_id: i64,
) -> Result<ChangeSet> {
    let changes = diff_and_apply(entity, proposed)?;
    if changes.is_empty() {
        return Ok(changes);
    }

    entity.stamp_updated_by(actor_id);
    commit_update(db, history, entity, &changes, actor_id).await?;
    Ok(changes)
}

/// Persist an already-diffed entity and its ledger entry atomically.
///
/// Split out from [`update_entity`] for callers that mutate the entity
/// between diff and persist (the domain service refreshes DNS records
/// after a renamed domain, outside the recorded diff).
pub async fn commit_update<E: AuditedEntity>(
    db: &PgPool,
    history: &HistoryService,
    entity: &E,
    changes: &ChangeSet,
    actor_id: i64,
) -> Result<()> {
    let mut tx = db.begin().await?;
    entity.persist(&mut tx).await?;
    history
        .append(
            &mut tx,
            HistoryEntry::updated(E::ENTITY_TYPE, entity.id(), changes)
                .actor(actor_id)
                .refs(E::scoped_refs(entity.id())),
        )
        .await?;
    tx.commit().await?;
    Ok(())
}
