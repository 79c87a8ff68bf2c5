//! Refresh pipeline.
//!
//! Loads the candidate pools for a subscription or a consumer's stacks, runs
//! the synchronizer over them and applies the resulting plan to storage:
//!
//! ```text
//! canonical master / stack ids
//!   ↓
//! 1. load existing pools and attach their entitlements (repositories)
//!   ↓
//! 2. synchronize (pure; returns a plan)
//!   ↓
//! 3. check sources, then create, save and delete through the repositories
//! ```
//!
//! A fatal engine error aborts before anything is written. Custom pools have no
//! source and never pass through here; they are created directly from
//! `Synchronizer::create_and_enrich`.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use entpool_core::{ConsumerId, DomainError, DomainResult, EntitlementId, PoolId, StackId};
use entpool_pools::{Entitlement, Pool};
use entpool_products::ChangedProducts;
use entpool_rules::{EntitlementRepository, PoolRepository, PoolUpdate, Synchronizer};

/// What one refresh wrote to storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub created: Vec<PoolId>,
    pub updated: Vec<PoolId>,
    /// Subset of `updated` now flagged for deletion.
    pub marked_for_delete: Vec<PoolId>,
    pub deleted: Vec<PoolId>,
}

impl RefreshSummary {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

pub struct PoolRefresher<P, E> {
    synchronizer: Synchronizer,
    pools: P,
    entitlements: E,
}

impl<P, E> PoolRefresher<P, E>
where
    P: PoolRepository,
    E: EntitlementRepository,
{
    pub fn new(synchronizer: Synchronizer, pools: P, entitlements: E) -> Self {
        Self {
            synchronizer,
            pools,
            entitlements,
        }
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.synchronizer
    }

    /// Bring a subscription's pools in line with its canonical master pool.
    pub fn refresh_subscription(
        &self,
        master: Pool,
        changed_products: &ChangedProducts,
    ) -> DomainResult<RefreshSummary> {
        let subscription_id = master.subscription_id().cloned().ok_or_else(|| {
            DomainError::invalid_state("canonical master pool has no subscription source")
        })?;

        let mut existing = self.pools.find_by_subscription(&subscription_id);
        self.attach_entitlements(&mut existing);
        let plan = self
            .synchronizer
            .sync_subscription(master, &mut existing, changed_products)?;

        check_sources(plan.to_create.iter())?;
        check_sources(plan.updates.iter().map(|u| &u.pool))?;

        let created = self.pools.create_pools(plan.to_create)?;
        let mut summary = RefreshSummary {
            created: created.iter().filter_map(Pool::id_typed).collect(),
            ..RefreshSummary::default()
        };
        self.save_updates(&plan.updates, &mut summary)?;

        info!(
            subscription_id = %subscription_id,
            created = summary.created.len(),
            updated = summary.updated.len(),
            marked_for_delete = summary.marked_for_delete.len(),
            "refreshed subscription pools"
        );
        Ok(summary)
    }

    /// Refresh a consumer's stack pools for `stack_ids`.
    ///
    /// Pools deleted here are added to `already_deleted` so later steps of the
    /// same operation skip them.
    pub fn refresh_consumer_stacks(
        &self,
        consumer_id: ConsumerId,
        stack_ids: &HashSet<StackId>,
        new_entitlements: Vec<Entitlement>,
        delete_if_empty: bool,
        already_deleted: &mut HashSet<PoolId>,
    ) -> DomainResult<RefreshSummary> {
        let mut pools: Vec<Pool> = stack_ids
            .iter()
            .flat_map(|stack_id| self.pools.find_by_stack(stack_id))
            .filter(|p| p.source_stack().and_then(|s| s.source_consumer) == Some(consumer_id))
            .filter(|p| p.id_typed().is_none_or(|id| !already_deleted.contains(&id)))
            .collect();
        self.attach_entitlements(&mut pools);

        let plan = self.synchronizer.update_pools_from_stack(
            consumer_id,
            &mut pools,
            new_entitlements,
            delete_if_empty,
            &self.entitlements,
        );

        let mut summary = RefreshSummary::default();
        self.save_updates(&plan.updates, &mut summary)?;

        summary.deleted = self.pools.delete_pools(&plan.to_delete, already_deleted);
        already_deleted.extend(summary.deleted.iter().copied());

        info!(
            consumer_id = %consumer_id,
            stacks = stack_ids.len(),
            updated = summary.updated.len(),
            deleted = summary.deleted.len(),
            "refreshed consumer stack pools"
        );
        Ok(summary)
    }

    /// Refresh the stack pools of several consumers at once.
    pub fn refresh_bulk_stacks(
        &self,
        consumers: &HashSet<ConsumerId>,
        stack_ids: &HashSet<StackId>,
        delete_if_empty: bool,
        already_deleted: &mut HashSet<PoolId>,
    ) -> DomainResult<RefreshSummary> {
        let mut pools: Vec<Pool> = stack_ids
            .iter()
            .flat_map(|stack_id| self.pools.find_by_stack(stack_id))
            .filter(|p| {
                p.source_stack()
                    .and_then(|s| s.source_consumer)
                    .is_some_and(|c| consumers.contains(&c))
            })
            .collect();
        self.attach_entitlements(&mut pools);

        let plan = self.synchronizer.bulk_update_from_stack(
            consumers,
            &mut pools,
            delete_if_empty,
            &self.entitlements,
        );

        let mut summary = RefreshSummary::default();
        self.save_updates(&plan.updates, &mut summary)?;
        summary.deleted = self.pools.delete_pools(&plan.to_delete, already_deleted);
        already_deleted.extend(summary.deleted.iter().copied());
        Ok(summary)
    }

    /// Refresh pools that no subscription manages.
    pub fn refresh_floating_pools(
        &self,
        mut pools: Vec<Pool>,
        changed_products: &ChangedProducts,
    ) -> DomainResult<RefreshSummary> {
        self.attach_entitlements(&mut pools);
        let updates =
            self.synchronizer
                .update_floating_pools(&mut pools, &self.entitlements, changed_products);

        let mut summary = RefreshSummary::default();
        self.save_updates(&updates, &mut summary)?;
        Ok(summary)
    }

    /// Replace each stored pool's attached entitlements with the current rows.
    fn attach_entitlements(&self, pools: &mut [Pool]) {
        for pool in pools.iter_mut() {
            if let Some(id) = pool.id_typed() {
                *pool.entitlements_mut() = self.entitlements.find_by_pool(id);
            }
        }
    }

    fn save_updates(
        &self,
        updates: &[PoolUpdate],
        summary: &mut RefreshSummary,
    ) -> DomainResult<()> {
        check_sources(updates.iter().map(|u| &u.pool))?;

        for update in updates {
            let Some(id) = update.pool.id_typed() else {
                warn!(update = %update, "skipping update for a pool that was never stored");
                continue;
            };

            let dirty: Vec<EntitlementId> = update
                .pool
                .entitlements()
                .iter()
                .filter(|e| e.is_dirty())
                .map(Entitlement::id_typed)
                .collect();

            let mut row = update.pool.clone();
            row.entitlements_mut().clear();
            self.pools.save(&row)?;
            if !dirty.is_empty() {
                debug!(pool_id = %id, entitlements = dirty.len(), "flagging entitlements dirty");
                self.entitlements.mark_dirty(&dirty)?;
            }

            summary.updated.push(id);
            if update.pool.is_marked_for_delete() {
                summary.marked_for_delete.push(id);
            }
        }
        Ok(())
    }
}

/// Every pool written by a refresh must carry a subscription or stack source.
fn check_sources<'a>(pools: impl IntoIterator<Item = &'a Pool>) -> DomainResult<()> {
    pools.into_iter().try_for_each(Pool::ensure_source)
}

impl<P, E> core::fmt::Debug for PoolRefresher<P, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolRefresher")
            .field("synchronizer", &self.synchronizer)
            .finish_non_exhaustive()
    }
}
