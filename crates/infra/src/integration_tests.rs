//! Integration tests for the refresh pipeline.
//!
//! Tests: canonical master → Synchronizer → plan → InMemoryPoolStore
//!
//! Verifies:
//! - Subscription refreshes create, update and withdraw pools
//! - Repeated refreshes are no-ops
//! - Stack refreshes follow their members and delete emptied pools once
//! - Fatal errors leave storage untouched

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use entpool_core::{
        AttributeKey, ConsumerId, DomainError, EngineConfig, EntitlementId, OwnerId, PoolId,
        StackId, SubscriptionId,
    };
    use entpool_pools::{Entitlement, Pool, PoolType, SubscriptionSubKey, UNLIMITED_QUANTITY};
    use entpool_products::{ChangedProducts, Product};
    use entpool_rules::{PoolRepository, Synchronizer};

    use crate::refresh::PoolRefresher;
    use crate::store::{InMemoryEntitlementStore, InMemoryPoolStore};

    type Refresher = PoolRefresher<Arc<InMemoryPoolStore>, Arc<InMemoryEntitlementStore>>;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn setup(
        config: EngineConfig,
    ) -> (Refresher, Arc<InMemoryPoolStore>, Arc<InMemoryEntitlementStore>) {
        entpool_observability::init();
        let pools = Arc::new(InMemoryPoolStore::new());
        let entitlements = Arc::new(InMemoryEntitlementStore::new());
        let refresher =
            PoolRefresher::new(Synchronizer::new(config), pools.clone(), entitlements.clone());
        (refresher, pools, entitlements)
    }

    fn master(sub: &str, product: Product, quantity: i64) -> Pool {
        Pool::new(OwnerId::new(), product, quantity, t0(), t0() + Duration::days(365))
            .with_subscription(SubscriptionId::new(sub), SubscriptionSubKey::Master)
    }

    fn server(virt_limit: Option<&str>) -> Product {
        let product = Product::new("RH001", "Server").with_multiplier(2);
        match virt_limit {
            Some(limit) => product.with_attribute(AttributeKey::VirtLimit, limit),
            None => product,
        }
    }

    fn derived_of(pools: &InMemoryPoolStore, sub: &str) -> Pool {
        pools
            .find_by_subscription(&SubscriptionId::new(sub))
            .into_iter()
            .find(|p| p.sub_key() == Some(SubscriptionSubKey::Derived))
            .expect("derived pool")
    }

    #[test]
    fn subscription_lifecycle() {
        let (refresher, pools, _) = setup(EngineConfig::hosted());
        let none = ChangedProducts::new();

        let created = refresher
            .refresh_subscription(master("sub-1", server(Some("4")), 5), &none)
            .unwrap();
        assert_eq!(created.created.len(), 2);
        assert_eq!(pools.len(), 2);
        assert_eq!(derived_of(&pools, "sub-1").quantity(), 40);
        assert_eq!(derived_of(&pools, "sub-1").pool_type(), PoolType::Bonus);

        let again = refresher
            .refresh_subscription(master("sub-1", server(Some("4")), 5), &none)
            .unwrap();
        assert!(again.is_empty(), "second refresh wrote: {again:?}");

        let grown = refresher
            .refresh_subscription(master("sub-1", server(Some("4")), 8), &none)
            .unwrap();
        assert_eq!(grown.updated.len(), 2);
        assert_eq!(derived_of(&pools, "sub-1").quantity(), 64);

        let withdrawn = refresher
            .refresh_subscription(master("sub-1", server(None), 8), &none)
            .unwrap();
        assert_eq!(withdrawn.marked_for_delete.len(), 1);
        let derived = derived_of(&pools, "sub-1");
        assert!(derived.is_marked_for_delete());
        assert_eq!(derived.quantity(), 0);
        assert_eq!(pools.len(), 2);
    }

    #[test]
    fn date_change_flags_stored_entitlements_dirty() {
        let (refresher, pools, entitlements) = setup(EngineConfig::hosted());
        let none = ChangedProducts::new();
        refresher
            .refresh_subscription(master("sub-d", server(None), 5), &none)
            .unwrap();

        let stored = pools.find_by_subscription(&SubscriptionId::new("sub-d"));
        assert_eq!(stored.len(), 1);
        let claim = Entitlement::new(
            EntitlementId::new(),
            ConsumerId::new(),
            Arc::new(stored[0].clone()),
            1,
            t0(),
        );
        let claim_id = claim.id_typed();
        entitlements.insert(claim).unwrap();

        let mut extended = master("sub-d", server(None), 5);
        extended.set_dates(t0(), t0() + Duration::days(395));
        let summary = refresher.refresh_subscription(extended, &none).unwrap();

        assert_eq!(summary.updated.len(), 1);
        assert!(entitlements.get(claim_id).unwrap().is_dirty());
        assert!(pools.get(summary.updated[0]).unwrap().entitlements().is_empty());
    }

    #[test]
    fn unlimited_subscription_stays_unlimited() {
        let (refresher, pools, _) = setup(EngineConfig::hosted());
        refresher
            .refresh_subscription(master("sub-u", server(Some("2")), -1), &ChangedProducts::new())
            .unwrap();

        assert!(
            pools
                .find_by_subscription(&SubscriptionId::new("sub-u"))
                .iter()
                .all(|p| p.quantity() == UNLIMITED_QUANTITY)
        );
    }

    #[test]
    fn standalone_deployment_creates_unmapped_guest_pool() {
        let (refresher, pools, _) = setup(EngineConfig::hosted().with_standalone(true));
        refresher
            .refresh_subscription(master("sub-s", server(Some("4")), 5), &ChangedProducts::new())
            .unwrap();

        let derived = derived_of(&pools, "sub-s");
        assert_eq!(derived.pool_type(), PoolType::UnmappedGuest);
        assert!(derived.is_unmapped_guests_only());
    }

    #[test]
    fn malformed_instance_multiplier_writes_nothing() {
        let (refresher, pools, _) = setup(EngineConfig::hosted());
        let product = server(Some("4")).with_attribute(AttributeKey::InstanceMultiplier, "two");

        let err = refresher
            .refresh_subscription(master("sub-bad", product, 5), &ChangedProducts::new())
            .unwrap_err();
        assert!(matches!(err, DomainError::MalformedAttribute { .. }));
        assert!(err.is_fatal());
        assert!(pools.is_empty());
    }

    #[test]
    fn master_without_subscription_is_rejected() {
        let (refresher, _, _) = setup(EngineConfig::hosted());
        let custom = Pool::new(OwnerId::new(), server(None), 5, t0(), t0());
        let err = refresher
            .refresh_subscription(custom, &ChangedProducts::new())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    fn stacked(consumer: ConsumerId, stack: &str, product: Product) -> Entitlement {
        let source = Pool::new(OwnerId::new(), product, 10, t0(), t0() + Duration::days(90))
            .with_id(PoolId::new());
        Entitlement::new(EntitlementId::new(), consumer, Arc::new(source), 1, t0())
            .with_stack(StackId::new(stack))
    }

    #[test]
    fn consumer_stack_refresh_and_single_delete() {
        let (refresher, pools, entitlements) = setup(EngineConfig::hosted());
        let consumer = ConsumerId::new();
        let member = stacked(
            consumer,
            "stack-a",
            Product::new("RH-VIRT", "Virt").with_attribute(AttributeKey::VirtLimit, "8"),
        );
        entitlements.insert(member.clone()).unwrap();

        let stack_pool = Pool::new(OwnerId::new(), Product::new("RH-VIRT", "Virt"), 0, t0(), t0())
            .with_stack(StackId::new("stack-a"), Some(consumer));
        let stored = pools.create_pools(vec![stack_pool]).unwrap();
        let pool_id = stored[0].id_typed().unwrap();

        let stacks: HashSet<StackId> = [StackId::new("stack-a")].into_iter().collect();
        let mut deleted = HashSet::new();

        let summary = refresher
            .refresh_consumer_stacks(consumer, &stacks, Vec::new(), true, &mut deleted)
            .unwrap();
        assert_eq!(summary.updated, vec![pool_id]);
        let refreshed = pools.get(pool_id).unwrap();
        assert_eq!(refreshed.quantity(), 8);
        assert_eq!(refreshed.end_date(), t0() + Duration::days(90));

        entitlements.remove(member.id_typed());
        let summary = refresher
            .refresh_consumer_stacks(consumer, &stacks, Vec::new(), true, &mut deleted)
            .unwrap();
        assert_eq!(summary.deleted, vec![pool_id]);
        assert!(deleted.contains(&pool_id));
        assert!(pools.is_empty());

        let summary = refresher
            .refresh_consumer_stacks(consumer, &stacks, Vec::new(), true, &mut deleted)
            .unwrap();
        assert!(summary.is_empty());
    }

    #[test]
    fn bulk_stack_refresh_only_touches_requested_consumers() {
        let (refresher, pools, entitlements) = setup(EngineConfig::hosted());
        let a = ConsumerId::new();
        let b = ConsumerId::new();
        let virt = Product::new("RH-VIRT", "Virt").with_attribute(AttributeKey::VirtLimit, "3");
        entitlements.insert(stacked(a, "stack-a", virt.clone())).unwrap();
        entitlements.insert(stacked(b, "stack-b", virt)).unwrap();

        let stored = pools
            .create_pools(vec![
                Pool::new(OwnerId::new(), Product::new("RH-VIRT", "Virt"), 0, t0(), t0())
                    .with_stack(StackId::new("stack-a"), Some(a)),
                Pool::new(OwnerId::new(), Product::new("RH-VIRT", "Virt"), 0, t0(), t0())
                    .with_stack(StackId::new("stack-b"), Some(b)),
            ])
            .unwrap();

        let consumers: HashSet<ConsumerId> = [a].into_iter().collect();
        let stacks: HashSet<StackId> = [StackId::new("stack-a"), StackId::new("stack-b")]
            .into_iter()
            .collect();
        let summary = refresher
            .refresh_bulk_stacks(&consumers, &stacks, false, &mut HashSet::new())
            .unwrap();

        assert_eq!(summary.updated.len(), 1);
        assert_eq!(pools.get(stored[0].id_typed().unwrap()).unwrap().quantity(), 3);
        assert_eq!(pools.get(stored[1].id_typed().unwrap()).unwrap().quantity(), 0);
    }

    #[test]
    fn summary_serializes_for_reporting() {
        let (refresher, _, _) = setup(EngineConfig::hosted());
        let summary = refresher
            .refresh_subscription(master("sub-j", server(None), 1), &ChangedProducts::new())
            .unwrap();

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["created"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["deleted"].as_array().map(Vec::len), Some(0));
    }

    #[test]
    fn independent_subscriptions_refresh_concurrently() {
        let (refresher, pools, _) = setup(EngineConfig::hosted());
        let refresher = Arc::new(refresher);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let refresher = refresher.clone();
                std::thread::spawn(move || {
                    let master = master(&format!("sub-{i}"), server(Some("2")), 3);
                    refresher
                        .refresh_subscription(master, &ChangedProducts::new())
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().created.len(), 2);
        }
        assert_eq!(pools.len(), 16);
    }
}
