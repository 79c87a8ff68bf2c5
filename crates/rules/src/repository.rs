//! Storage collaborators.
//!
//! The engine never queries storage for pools; callers hand it candidate
//! snapshots and apply the returned plan through [`PoolRepository`]. Stack
//! refreshes read members through [`EntitlementRepository`].
//!
//! Implementations must give row-level isolation for the pools and
//! entitlements touched during a pass. Passes for the same subscription or
//! stack must be serialized by the caller.

use std::collections::HashSet;
use std::sync::Arc;

use entpool_core::{ConsumerId, DomainResult, EntitlementId, PoolId, StackId, SubscriptionId};
use entpool_pools::{Entitlement, Pool};

pub trait PoolRepository: Send + Sync {
    /// Pools sourced from a subscription (master and derived).
    fn find_by_subscription(&self, subscription_id: &SubscriptionId) -> Vec<Pool>;

    /// Pools aggregating a stack.
    fn find_by_stack(&self, stack_id: &StackId) -> Vec<Pool>;

    /// Persist new pools, assigning identifiers.
    fn create_pools(&self, pools: Vec<Pool>) -> DomainResult<Vec<Pool>>;

    /// Persist an updated pool (and its attached entitlements' dirty flags).
    fn save(&self, pool: &Pool) -> DomainResult<()>;

    /// Delete pools, skipping ids already deleted earlier in the same
    /// operation. Returns the ids actually removed.
    fn delete_pools(&self, pools: &[Pool], already_deleted: &HashSet<PoolId>) -> Vec<PoolId>;
}

pub trait EntitlementRepository: Send + Sync {
    fn find_by_stack_id(&self, consumer_id: ConsumerId, stack_id: &StackId) -> Vec<Entitlement>;

    /// Members of any of `stack_ids`; `None` spans all consumers.
    fn find_by_stack_ids(
        &self,
        consumer_id: Option<ConsumerId>,
        stack_ids: &HashSet<StackId>,
    ) -> Vec<Entitlement>;

    /// Entitlements consuming from a pool.
    fn find_by_pool(&self, pool_id: PoolId) -> Vec<Entitlement>;

    /// Flag stored entitlements for certificate regeneration.
    fn mark_dirty(&self, ids: &[EntitlementId]) -> DomainResult<()>;
}

impl<S> PoolRepository for Arc<S>
where
    S: PoolRepository + ?Sized,
{
    fn find_by_subscription(&self, subscription_id: &SubscriptionId) -> Vec<Pool> {
        (**self).find_by_subscription(subscription_id)
    }

    fn find_by_stack(&self, stack_id: &StackId) -> Vec<Pool> {
        (**self).find_by_stack(stack_id)
    }

    fn create_pools(&self, pools: Vec<Pool>) -> DomainResult<Vec<Pool>> {
        (**self).create_pools(pools)
    }

    fn save(&self, pool: &Pool) -> DomainResult<()> {
        (**self).save(pool)
    }

    fn delete_pools(&self, pools: &[Pool], already_deleted: &HashSet<PoolId>) -> Vec<PoolId> {
        (**self).delete_pools(pools, already_deleted)
    }
}

impl<S> EntitlementRepository for Arc<S>
where
    S: EntitlementRepository + ?Sized,
{
    fn find_by_stack_id(&self, consumer_id: ConsumerId, stack_id: &StackId) -> Vec<Entitlement> {
        (**self).find_by_stack_id(consumer_id, stack_id)
    }

    fn find_by_stack_ids(
        &self,
        consumer_id: Option<ConsumerId>,
        stack_ids: &HashSet<StackId>,
    ) -> Vec<Entitlement> {
        (**self).find_by_stack_ids(consumer_id, stack_ids)
    }

    fn find_by_pool(&self, pool_id: PoolId) -> Vec<Entitlement> {
        (**self).find_by_pool(pool_id)
    }

    fn mark_dirty(&self, ids: &[EntitlementId]) -> DomainResult<()> {
        (**self).mark_dirty(ids)
    }
}
