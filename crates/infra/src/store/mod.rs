//! In-memory storage for tests and development.

pub mod entitlements;
pub mod pools;

pub use entitlements::InMemoryEntitlementStore;
pub use pools::InMemoryPoolStore;

use entpool_core::{DomainError, DomainResult, Entity};

/// Identifier of an entity that must already be stored.
fn stored_id<T: Entity>(entity: &T, what: &str) -> DomainResult<T::Id> {
    entity
        .id()
        .cloned()
        .ok_or_else(|| DomainError::invalid_state(format!("cannot save a {what} without an id")))
}

fn poisoned(what: &str) -> DomainError {
    DomainError::conflict(format!("{what} store lock poisoned"))
}
