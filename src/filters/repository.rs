//! Filtered entity repository
//!
//! Typed reads for one aggregate. Default reads always go through the
//! aggregate's registered query filter; reading deleted rows needs an
//! explicit, logged bypass.

use std::marker::PhantomData;
use std::sync::Arc;

use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::store::{EntityRow, EntityStore, RowScope};

use super::{QueryError, QueryFilter, QueryFilters};

/// Reads aggregates of type `A` from store `S`
pub struct Repository<A, S> {
    store: S,
    filters: Arc<QueryFilters>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A, S> Repository<A, S>
where
    A: Aggregate,
    S: EntityStore,
{
    pub fn new(store: S, filters: Arc<QueryFilters>) -> Self {
        Self {
            store,
            filters,
            _aggregate: PhantomData,
        }
    }

    /// Load one aggregate; soft-deleted rows are invisible
    pub async fn find(&self, id: Uuid) -> Result<Option<A>, QueryError> {
        let filter = self.filter()?;
        let row = self.store.fetch_row(A::TABLE, id, RowScope::filtered(filter)).await?;
        row.map(Self::hydrate).transpose()
    }

    /// Load every non-deleted aggregate
    pub async fn list(&self) -> Result<Vec<A>, QueryError> {
        let filter = self.filter()?;
        let rows = self.store.fetch_rows(A::TABLE, RowScope::filtered(filter)).await?;
        rows.into_iter().map(Self::hydrate).collect()
    }

    /// Load one aggregate even if it was soft-deleted
    pub async fn find_including_deleted(
        &self,
        id: Uuid,
        reason: &str,
    ) -> Result<Option<A>, QueryError> {
        self.audit_bypass(reason)?;
        let row = self.store.fetch_row(A::TABLE, id, RowScope::unfiltered()).await?;
        row.map(Self::hydrate).transpose()
    }

    /// Load every aggregate, deleted ones included
    pub async fn list_including_deleted(&self, reason: &str) -> Result<Vec<A>, QueryError> {
        self.audit_bypass(reason)?;
        let rows = self.store.fetch_rows(A::TABLE, RowScope::unfiltered()).await?;
        rows.into_iter().map(Self::hydrate).collect()
    }

    fn filter(&self) -> Result<&QueryFilter, QueryError> {
        self.filters.for_entity::<A>()
    }

    fn audit_bypass(&self, reason: &str) -> Result<(), QueryError> {
        if reason.trim().is_empty() {
            return Err(QueryError::MissingBypassReason(A::ENTITY_TYPE));
        }

        tracing::warn!(
            target: "audit",
            entity_type = A::ENTITY_TYPE,
            table = A::TABLE,
            reason = %reason,
            "Query filters bypassed"
        );
        Ok(())
    }

    fn hydrate(row: EntityRow) -> Result<A, QueryError> {
        let mut aggregate: A =
            serde_json::from_value(row.data).map_err(|source| QueryError::Decode {
                entity_type: A::ENTITY_TYPE,
                source,
            })?;
        aggregate
            .entity_mut()
            .restore(row.is_deleted, row.version, row.updated_at);
        Ok(aggregate)
    }
}
