//! Query filters
//!
//! Default predicates attached to every query against an event-bearing
//! entity table. Built once at startup from the registered entity
//! descriptors; the only filter today is soft delete, generated for every
//! type by the same generic helper.

mod repository;

use std::collections::HashMap;

use crate::aggregate::Aggregate;
use crate::store::{EntityRow, StoreError};

pub use repository::Repository;

/// In-memory form of a filter's predicate
pub type RowPredicate = fn(&EntityRow) -> bool;

/// Identifies one entity type and where its rows live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub entity_type: &'static str,
    pub table: &'static str,
}

impl EntityDescriptor {
    pub fn of<A: Aggregate>() -> Self {
        Self {
            entity_type: A::ENTITY_TYPE,
            table: A::TABLE,
        }
    }
}

/// Default predicate for one entity table
#[derive(Debug, Clone)]
pub struct QueryFilter {
    descriptor: EntityDescriptor,

    /// SQL form, appended to the WHERE clause
    predicate_sql: &'static str,

    /// Same predicate evaluated against a fetched row
    predicate: RowPredicate,
}

impl QueryFilter {
    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    pub fn predicate_sql(&self) -> &'static str {
        self.predicate_sql
    }

    pub fn matches(&self, row: &EntityRow) -> bool {
        (self.predicate)(row)
    }
}

fn not_deleted(row: &EntityRow) -> bool {
    !row.is_deleted
}

/// Build the soft-delete filter for any aggregate type
pub fn soft_delete_filter<A: Aggregate>() -> QueryFilter {
    QueryFilter {
        descriptor: EntityDescriptor::of::<A>(),
        predicate_sql: "is_deleted = FALSE",
        predicate: not_deleted,
    }
}

/// Errors raised while reading entities through the filters
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The entity type was never registered with the builder
    #[error("No query filter registered for entity type {0}")]
    UnregisteredEntity(&'static str),

    /// A filter bypass was requested without saying why
    #[error("Bypassing query filters on {0} requires a reason")]
    MissingBypassReason(&'static str),

    #[error("Failed to decode {entity_type} row: {source}")]
    Decode {
        entity_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Collects entity types at startup and generates their filters
#[derive(Default)]
pub struct QueryFilterBuilder {
    factories: Vec<(EntityDescriptor, fn() -> QueryFilter)>,
}

impl QueryFilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an aggregate type
    pub fn register<A: Aggregate>(mut self) -> Self {
        self.factories
            .push((EntityDescriptor::of::<A>(), soft_delete_filter::<A> as fn() -> QueryFilter));
        self
    }

    /// Generate one filter per registered table
    pub fn build(self) -> QueryFilters {
        let mut by_table = HashMap::with_capacity(self.factories.len());

        for (descriptor, factory) in self.factories {
            if by_table.contains_key(descriptor.table) {
                tracing::debug!(
                    entity_type = descriptor.entity_type,
                    table = descriptor.table,
                    "Entity type registered twice, keeping first filter"
                );
                continue;
            }

            let filter = factory();
            tracing::debug!(
                entity_type = descriptor.entity_type,
                table = descriptor.table,
                predicate = filter.predicate_sql,
                "Attached query filter"
            );
            by_table.insert(descriptor.table, filter);
        }

        tracing::info!(entity_types = by_table.len(), "Query filters built");
        QueryFilters { by_table }
    }
}

/// Filters for every registered entity table
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    by_table: HashMap<&'static str, QueryFilter>,
}

impl QueryFilters {
    /// Filter for an aggregate type
    pub fn for_entity<A: Aggregate>(&self) -> Result<&QueryFilter, QueryError> {
        self.by_table
            .get(A::TABLE)
            .ok_or(QueryError::UnregisteredEntity(A::ENTITY_TYPE))
    }

    pub fn len(&self) -> usize {
        self.by_table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_table.is_empty()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.by_table.values().map(|f| &f.descriptor)
    }
}
