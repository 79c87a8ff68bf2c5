//! Pool synchronization: stack path.
//!
//! Stack pools mirror the aggregate of a consumer's stacked entitlements.
//! Members are read through an [`EntitlementRepository`]; the pools themselves
//! are handed in by the caller.

use std::collections::{HashMap, HashSet};

use tracing::{debug, error, warn};

use entpool_core::{ConsumerId, StackId};
use entpool_pools::{Entitlement, Pool};
use entpool_products::ChangedProducts;

use crate::differ::PoolDiffer;
use crate::repository::EntitlementRepository;
use crate::stacking::StackAggregate;
use crate::synchronizer::Synchronizer;
use crate::update::PoolUpdate;

/// Result of refreshing a set of stack pools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackPlan {
    /// Only pools with a material change.
    pub updates: Vec<PoolUpdate>,
    /// Pools whose stack has no members left.
    pub to_delete: Vec<Pool>,
}

impl StackPlan {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.to_delete.is_empty()
    }
}

impl Synchronizer {
    /// Reconcile one stack pool against its members. An empty stack leaves
    /// the pool untouched.
    pub fn update_pool_from_stacked_entitlements(
        &self,
        pool: &mut Pool,
        members: &[Entitlement],
        changed_products: &ChangedProducts,
    ) -> PoolUpdate {
        let Some(aggregate) = StackAggregate::from_members(members) else {
            return PoolUpdate::unchanged(pool);
        };

        debug!(
            pool = %pool,
            members = members.len(),
            eldest = %aggregate.eldest().id_typed(),
            "updating stack pool from stacked entitlements"
        );
        PoolDiffer::new(changed_products).diff(pool, &aggregate)
    }

    /// Reconcile one stack pool, reading its members from `entitlements`.
    ///
    /// `None` when the pool is not stack-sourced or its stack has no consumer.
    pub fn update_pool_from_stack<E>(
        &self,
        pool: &mut Pool,
        entitlements: &E,
        changed_products: &ChangedProducts,
    ) -> Option<PoolUpdate>
    where
        E: EntitlementRepository + ?Sized,
    {
        let Some(stack) = pool.source_stack() else {
            warn!(pool = %pool, "pool is not sourced from a stack, skipping");
            return None;
        };
        let Some(consumer_id) = stack.source_consumer else {
            error!(
                pool = %pool,
                stack_id = %stack.stack_id,
                "stack derived pool has no source consumer"
            );
            return None;
        };

        let stack_id = stack.stack_id.clone();
        let members = entitlements.find_by_stack_id(consumer_id, &stack_id);
        Some(self.update_pool_from_stacked_entitlements(pool, &members, changed_products))
    }

    /// Refresh pools with no subscription behind them. Development pools and
    /// non-stack pools are left alone.
    pub fn update_floating_pools<E>(
        &self,
        pools: &mut [Pool],
        entitlements: &E,
        changed_products: &ChangedProducts,
    ) -> Vec<PoolUpdate>
    where
        E: EntitlementRepository + ?Sized,
    {
        let mut updates = Vec::new();

        for pool in pools.iter_mut() {
            if pool.subscription_id().is_some() || pool.is_development_pool() {
                continue;
            }
            if pool.source_stack().is_none() {
                continue;
            }

            let update = self.update_pool_from_stack(pool, entitlements, changed_products);
            if let Some(update) = update.filter(PoolUpdate::changed) {
                updates.push(update);
            }
        }

        updates
    }

    /// Refresh a consumer's stack pools.
    ///
    /// `new_entitlements` are members granted in the current operation that
    /// storage may not return yet. With `delete_if_empty`, pools whose stack
    /// has no members are scheduled for deletion.
    pub fn update_pools_from_stack<E>(
        &self,
        consumer_id: ConsumerId,
        pools: &mut [Pool],
        new_entitlements: Vec<Entitlement>,
        delete_if_empty: bool,
        entitlements: &E,
    ) -> StackPlan
    where
        E: EntitlementRepository + ?Sized,
    {
        let stack_ids = stack_ids_of(pools);
        let mut members = entitlements.find_by_stack_ids(Some(consumer_id), &stack_ids);

        let known: HashSet<_> = members.iter().map(Entitlement::id_typed).collect();
        members.extend(
            new_entitlements
                .into_iter()
                .filter(|e| e.consumer_id() == consumer_id && !known.contains(&e.id_typed())),
        );

        self.apply_stack_groups(pools, &group_by_stack(members), delete_if_empty)
    }

    /// Refresh stack pools across several consumers in one pass.
    pub fn bulk_update_from_stack<E>(
        &self,
        consumers: &HashSet<ConsumerId>,
        pools: &mut [Pool],
        delete_if_empty: bool,
        entitlements: &E,
    ) -> StackPlan
    where
        E: EntitlementRepository + ?Sized,
    {
        let stack_ids = stack_ids_of(pools);
        let members: Vec<Entitlement> = entitlements
            .find_by_stack_ids(None, &stack_ids)
            .into_iter()
            .filter(|e| consumers.contains(&e.consumer_id()))
            .collect();
        debug!(consumers = consumers.len(), members = members.len(), "found stacking entitlements");

        self.apply_stack_groups(pools, &group_by_stack(members), delete_if_empty)
    }

    fn apply_stack_groups(
        &self,
        pools: &mut [Pool],
        grouped: &HashMap<StackId, Vec<Entitlement>>,
        delete_if_empty: bool,
    ) -> StackPlan {
        let none = ChangedProducts::new();
        let mut plan = StackPlan::default();

        for pool in pools.iter_mut() {
            let Some(stack_id) = pool.source_stack_id() else {
                warn!(pool = %pool, "pool is not sourced from a stack, skipping");
                continue;
            };

            match grouped.get(stack_id).filter(|m| !m.is_empty()) {
                Some(members) => {
                    let update = self.update_pool_from_stacked_entitlements(pool, members, &none);
                    if update.changed() {
                        plan.updates.push(update);
                    }
                }
                None if delete_if_empty => {
                    debug!(pool = %pool, "stack has no members, scheduling pool for deletion");
                    plan.to_delete.push(pool.clone());
                }
                None => {}
            }
        }

        plan
    }
}

fn stack_ids_of(pools: &[Pool]) -> HashSet<StackId> {
    pools
        .iter()
        .filter_map(|p| p.source_stack_id().cloned())
        .collect()
}

fn group_by_stack(members: Vec<Entitlement>) -> HashMap<StackId, Vec<Entitlement>> {
    let mut grouped: HashMap<StackId, Vec<Entitlement>> = HashMap::new();
    for ent in members {
        if let Some(stack_id) = ent.stack_id().cloned() {
            grouped.entry(stack_id).or_default().push(ent);
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, RwLock};

    use chrono::Duration;

    use super::*;
    use crate::stacking::test_support::{member_pool, t0, virt_product};
    use entpool_core::{
        AttributeKey, DomainResult, EngineConfig, EntitlementId, OwnerId, PoolId, SubscriptionId,
    };
    use entpool_pools::{OrderInfo, PoolType, SubscriptionSubKey, UNLIMITED_QUANTITY};
    use entpool_products::Product;

    #[derive(Default)]
    struct FakeEntitlements {
        rows: RwLock<Vec<Entitlement>>,
    }

    impl FakeEntitlements {
        fn with(rows: Vec<Entitlement>) -> Self {
            Self { rows: RwLock::new(rows) }
        }
    }

    impl EntitlementRepository for FakeEntitlements {
        fn find_by_stack_id(
            &self,
            consumer_id: ConsumerId,
            stack_id: &StackId,
        ) -> Vec<Entitlement> {
            self.rows
                .read()
                .unwrap()
                .iter()
                .filter(|e| e.consumer_id() == consumer_id && e.stack_id() == Some(stack_id))
                .cloned()
                .collect()
        }

        fn find_by_stack_ids(
            &self,
            consumer_id: Option<ConsumerId>,
            stack_ids: &HashSet<StackId>,
        ) -> Vec<Entitlement> {
            self.rows
                .read()
                .unwrap()
                .iter()
                .filter(|e| consumer_id.is_none_or(|c| e.consumer_id() == c))
                .filter(|e| e.stack_id().is_some_and(|s| stack_ids.contains(s)))
                .cloned()
                .collect()
        }

        fn find_by_pool(&self, pool_id: PoolId) -> Vec<Entitlement> {
            self.rows
                .read()
                .unwrap()
                .iter()
                .filter(|e| e.pool().id_typed() == Some(pool_id))
                .cloned()
                .collect()
        }

        fn mark_dirty(&self, ids: &[EntitlementId]) -> DomainResult<()> {
            for ent in self.rows.write().unwrap().iter_mut() {
                if ids.contains(&ent.id_typed()) {
                    ent.mark_dirty();
                }
            }
            Ok(())
        }
    }

    fn stack_member(
        consumer: ConsumerId,
        stack: &str,
        pool: Pool,
        created_offset_days: i64,
    ) -> Entitlement {
        Entitlement::new(
            EntitlementId::new(),
            consumer,
            Arc::new(pool),
            1,
            t0() + Duration::days(created_offset_days),
        )
        .with_stack(StackId::new(stack))
    }

    fn stack_pool(consumer: ConsumerId, stack: &str) -> Pool {
        Pool::new(OwnerId::new(), Product::new("RH-OLD", "Old"), 0, t0(), t0())
            .with_id(PoolId::new())
            .with_stack(StackId::new(stack), Some(consumer))
    }

    fn sync() -> Synchronizer {
        Synchronizer::new(EngineConfig::hosted())
    }

    #[test]
    fn stack_pool_takes_eldest_product_and_spanning_dates() {
        let consumer = ConsumerId::new();
        let older = stack_member(consumer, "s1", member_pool(virt_product("4"), 0, 100), 0);
        let newer = stack_member(
            consumer,
            "s1",
            member_pool(Product::new("RH002", "Newer"), -10, 300),
            5,
        );
        let mut pool = stack_pool(consumer, "s1");

        let update = sync().update_pool_from_stacked_entitlements(
            &mut pool,
            &[newer, older],
            &ChangedProducts::new(),
        );

        assert!(update.dates_changed);
        assert!(update.products_changed);
        assert!(update.quantity_changed);
        assert!(update.order_changed);
        assert_eq!(pool.product().id().as_str(), "RH-VIRT");
        assert_eq!(pool.start_date(), t0() - Duration::days(10));
        assert_eq!(pool.end_date(), t0() + Duration::days(300));
        assert_eq!(pool.quantity(), 4);
        assert_eq!(pool.order(), &OrderInfo::new("contract-1", "order-1", "account-1"));
        assert_eq!(pool.pool_type(), PoolType::Stack);
    }

    #[test]
    fn attribute_only_change_is_reported_and_rebound() {
        let consumer = ConsumerId::new();
        let members = vec![stack_member(consumer, "s1", member_pool(virt_product("4"), 0, 100), 0)];
        let mut pool = stack_pool(consumer, "s1");
        let none = ChangedProducts::new();
        sync().update_pool_from_stacked_entitlements(&mut pool, &members, &none);

        let updated = virt_product("4").with_attribute(AttributeKey::Sockets, "2");
        let members = vec![stack_member(consumer, "s1", member_pool(updated, 0, 100), 0)];
        let update = sync().update_pool_from_stacked_entitlements(&mut pool, &members, &none);

        assert!(update.product_attributes_changed);
        assert!(!update.products_changed);
        assert_eq!(pool.product().attributes().get(&AttributeKey::Sockets), Some("2"));

        let again = sync().update_pool_from_stacked_entitlements(&mut pool, &members, &none);
        assert!(!again.changed());
    }

    #[test]
    fn empty_stack_leaves_pool_unchanged() {
        let mut pool = stack_pool(ConsumerId::new(), "s1");
        let before = pool.clone();
        let update =
            sync().update_pool_from_stacked_entitlements(&mut pool, &[], &ChangedProducts::new());
        assert!(!update.changed());
        assert_eq!(pool, before);
    }

    #[test]
    fn unlimited_virt_limit_on_eldest_member() {
        let consumer = ConsumerId::new();
        let unlimited = member_pool(virt_product("unlimited"), 0, 100);
        let members = vec![stack_member(consumer, "s1", unlimited, 0)];
        let mut pool = stack_pool(consumer, "s1");
        sync().update_pool_from_stacked_entitlements(&mut pool, &members, &ChangedProducts::new());
        assert_eq!(pool.quantity(), UNLIMITED_QUANTITY);
    }

    #[test]
    fn floating_pools_skip_subscription_dev_and_orphaned_stacks() {
        let consumer = ConsumerId::new();
        let repo = FakeEntitlements::with(vec![stack_member(
            consumer,
            "s1",
            member_pool(virt_product("2"), 0, 100),
            0,
        )]);

        let subscription_pool = stack_pool(consumer, "s1")
            .with_subscription(SubscriptionId::new("sub-1"), SubscriptionSubKey::Master);
        let dev_pool =
            stack_pool(consumer, "s1").with_attribute(AttributeKey::DevelopmentPool, "true");
        let orphan = Pool::new(OwnerId::new(), Product::new("RH-OLD", "Old"), 0, t0(), t0())
            .with_stack(StackId::new("s1"), None);
        let live = stack_pool(consumer, "s1");

        let mut pools = vec![subscription_pool, dev_pool, orphan, live];
        let before = pools.clone();
        let updates = sync().update_floating_pools(&mut pools, &repo, &ChangedProducts::new());

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].pool.id_typed(), before[3].id_typed());
        assert_eq!(&pools[..3], &before[..3]);
    }

    #[test]
    fn update_pools_from_stack_merges_new_entitlements_and_deletes_empty() {
        let consumer = ConsumerId::new();
        let repo = FakeEntitlements::default();
        let granted = stack_member(consumer, "s1", member_pool(virt_product("2"), 0, 100), 0);

        let mut pools = vec![stack_pool(consumer, "s1"), stack_pool(consumer, "s2")];
        let plan = sync().update_pools_from_stack(consumer, &mut pools, vec![granted], true, &repo);

        assert_eq!(plan.updates.len(), 1);
        assert_eq!(pools[0].quantity(), 2);
        assert_eq!(plan.to_delete.len(), 1);
        assert_eq!(plan.to_delete[0].source_stack_id(), Some(&StackId::new("s2")));
    }

    #[test]
    fn empty_stack_is_kept_without_delete_if_empty() {
        let consumer = ConsumerId::new();
        let mut pools = vec![stack_pool(consumer, "s1")];
        let plan = sync().update_pools_from_stack(
            consumer,
            &mut pools,
            Vec::new(),
            false,
            &FakeEntitlements::default(),
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn other_consumers_members_are_ignored() {
        let consumer = ConsumerId::new();
        let stranger = ConsumerId::new();
        let repo = FakeEntitlements::with(vec![stack_member(
            stranger,
            "s1",
            member_pool(virt_product("9"), 0, 100),
            0,
        )]);

        let mut pools = vec![stack_pool(consumer, "s1")];
        let plan = sync().update_pools_from_stack(consumer, &mut pools, Vec::new(), true, &repo);
        assert!(plan.updates.is_empty());
        assert_eq!(plan.to_delete.len(), 1);
    }

    #[test]
    fn bulk_update_spans_requested_consumers() {
        let a = ConsumerId::new();
        let b = ConsumerId::new();
        let c = ConsumerId::new();
        let repo = FakeEntitlements::with(vec![
            stack_member(a, "sa", member_pool(virt_product("2"), 0, 100), 0),
            stack_member(b, "sb", member_pool(virt_product("3"), 0, 100), 0),
            stack_member(c, "sc", member_pool(virt_product("5"), 0, 100), 0),
        ]);

        let mut pools = vec![stack_pool(a, "sa"), stack_pool(b, "sb"), stack_pool(c, "sc")];
        let consumers: HashSet<ConsumerId> = [a, b].into_iter().collect();
        let plan = sync().bulk_update_from_stack(&consumers, &mut pools, false, &repo);

        assert_eq!(plan.updates.len(), 2);
        assert_eq!(pools[0].quantity(), 2);
        assert_eq!(pools[1].quantity(), 3);
        assert_eq!(pools[2].quantity(), 0);
    }

    #[test]
    fn second_refresh_is_a_no_op() {
        let consumer = ConsumerId::new();
        let repo = FakeEntitlements::with(vec![stack_member(
            consumer,
            "s1",
            member_pool(virt_product("2"), 0, 100),
            0,
        )]);
        let mut pools = vec![stack_pool(consumer, "s1")];

        let first = sync().update_pools_from_stack(consumer, &mut pools, Vec::new(), true, &repo);
        assert_eq!(first.updates.len(), 1);
        let second = sync().update_pools_from_stack(consumer, &mut pools, Vec::new(), true, &repo);
        assert!(second.is_empty());
    }
}
