//! Pool synchronization: subscription path.
//!
//! Given the canonical master pool converted from a subscription and the pools
//! that already exist for it, decide what to create and reconcile the rest.
//! The stack path lives in `stack_refresh`.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use entpool_core::{AttributeKey, DomainError, DomainResult, EngineConfig, VirtLimit};
use entpool_pools::{OrderInfo, Pool, PoolType, SubscriptionSubKey, UNLIMITED_QUANTITY};
use entpool_products::{ChangedProducts, Product};

use crate::bonus;
use crate::differ::{CanonicalSource, PoolDiffer};
use crate::quantity::{self, checked_mul};
use crate::update::PoolUpdate;

/// Decides whether a master pool can be linked to its derived pools.
pub type ManagedCheck = Box<dyn Fn(&Pool) -> bool + Send + Sync>;

/// Result of one subscription synchronization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionPlan {
    /// The canonical master after quantity expansion and attribute enrichment.
    pub master: Pool,
    pub to_create: Vec<Pool>,
    /// Only pools with a material change.
    pub updates: Vec<PoolUpdate>,
}

impl SubscriptionPlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.updates.is_empty()
    }

    /// Updated pools now flagged for deletion.
    pub fn marked_for_delete(&self) -> impl Iterator<Item = &Pool> {
        self.updates
            .iter()
            .map(|u| &u.pool)
            .filter(|p| p.is_marked_for_delete())
    }
}

/// Stateless pool synchronizer. Safe to share across threads; passes for the
/// same subscription or stack must still be serialized by the caller.
pub struct Synchronizer {
    config: EngineConfig,
    managed: ManagedCheck,
}

impl core::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Synchronizer {
    /// A pool is managed when it has a subscription source.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            managed: Box::new(|pool: &Pool| pool.source_subscription().is_some()),
        }
    }

    pub fn with_managed_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&Pool) -> bool + Send + Sync + 'static,
    {
        self.managed = Box::new(check);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_managed(&self, pool: &Pool) -> bool {
        (self.managed)(pool)
    }

    /// Run the full subscription path: enrich the master, schedule missing
    /// pools, reconcile existing ones.
    pub fn sync_subscription(
        &self,
        mut master: Pool,
        existing: &mut [Pool],
        changed_products: &ChangedProducts,
    ) -> DomainResult<SubscriptionPlan> {
        let original_quantity = master.quantity();
        let to_create = self.create_and_enrich(&mut master, existing)?;
        let updates =
            self.update_subscription_pools(&master, existing, original_quantity, changed_products)?;

        Ok(SubscriptionPlan {
            master,
            to_create,
            updates,
        })
    }

    /// Expand and enrich `master` in place, then return the pools that must be
    /// created for it (master and/or derived).
    pub fn create_and_enrich(
        &self,
        master: &mut Pool,
        existing: &[Pool],
    ) -> DomainResult<Vec<Pool>> {
        let expanded =
            quantity::expand(master.quantity(), master.product(), master.upstream_pool_id())?;
        master.set_quantity(expanded);

        // virt_only must never be left stale on the pool.
        match master.product().virt_only().map(str::to_string) {
            Some(value) => master.attributes_mut().set(AttributeKey::VirtOnly, value),
            None => {
                master.attributes_mut().remove(&AttributeKey::VirtOnly);
            }
        }

        info!(pool = %master, "checking if pools need to be created");
        let mut pools = Vec::new();

        if let Some(source) = master.source_subscription() {
            if !has_master_pool(existing) {
                if source.sub_key == SubscriptionSubKey::Derived {
                    return Err(DomainError::invalid_state(format!(
                        "cannot create master pool from derived pool of subscription {}",
                        source.subscription_id
                    )));
                }
                info!(pool = %master, "creating new master pool");
                pools.push(master.clone());
            }
        } else if master.id_typed().is_none() {
            // Custom pool with no subscription behind it.
            pools.push(master.clone());
        }

        let managed = self.is_managed(master);
        if let Some(derived) = bonus::derive_pool(master, existing, managed, &self.config)? {
            pools.push(derived);
        }

        Ok(pools)
    }

    /// Reconcile every existing pool of a subscription against its master.
    ///
    /// `original_quantity` is the subscription's quantity before expansion.
    pub fn update_subscription_pools(
        &self,
        master: &Pool,
        existing: &mut [Pool],
        original_quantity: i64,
        changed_products: &ChangedProducts,
    ) -> DomainResult<Vec<PoolUpdate>> {
        debug!(
            pool = %master,
            existing = existing.len(),
            "refreshing pools for existing master pool"
        );

        let differ = PoolDiffer::new(changed_products);
        let mut updates = Vec::new();

        for i in 0..existing.len() {
            let expectation = self.expected_quantity(master, original_quantity, existing, i)?;
            let pool = &mut existing[i];
            debug!(pool = %pool, "checking pool");

            if pool.sub_key() == Some(SubscriptionSubKey::Master) {
                pool.set_upstream(master.upstream().clone());
            }

            let mut newly_withdrawn = false;
            let expected_quantity = match expectation {
                Expectation::Quantity(q) => q,
                Expectation::Withdrawn => {
                    if !pool.is_marked_for_delete() {
                        warn!(
                            pool = %pool,
                            "virt_limit has been removed from the subscription, \
                             flagging pool for deletion"
                        );
                        pool.mark_for_delete();
                        newly_withdrawn = true;
                    }
                    // Peers that ignore the delete flag still see no capacity.
                    0
                }
            };

            let target = MasterTarget {
                master,
                expected_quantity,
            };
            let mut update = differ.diff(pool, &target);
            if newly_withdrawn {
                // The flag alone is a material change, even when the quantity
                // was already zero.
                if !update.changed() {
                    pool.mark_entitlements_dirty();
                    update.pool = pool.clone();
                }
                update.marked_for_delete = true;
            }
            if update.changed() {
                updates.push(update);
            }
        }

        Ok(updates)
    }

    fn expected_quantity(
        &self,
        master: &Pool,
        original_quantity: i64,
        existing: &[Pool],
        index: usize,
    ) -> DomainResult<Expectation> {
        let mut expected =
            quantity::expand(original_quantity, master.product(), master.upstream_pool_id())?;
        let pool = &existing[index];

        if !depends_on_virt_limit(pool) {
            return Ok(Expectation::Quantity(expected));
        }

        let Some(raw) = master.product().attributes().get(&AttributeKey::VirtLimit) else {
            return Ok(Expectation::Withdrawn);
        };

        match VirtLimit::parse(raw) {
            Some(VirtLimit::Unlimited) => {
                // Zero is only ever set by the rules; keep it.
                expected = if pool.quantity() == 0 { 0 } else { UNLIMITED_QUANTITY };
            }
            Some(VirtLimit::Limited(limit)) => {
                let limit = i64::from(limit);
                if self.config.standalone && !pool.is_unmapped_guests_only() {
                    expected = limit;
                } else {
                    let siblings = SiblingCapacity::of(existing)?;
                    let derived_variant =
                        matches!(pool.pool_type(), PoolType::Bonus | PoolType::UnmappedGuest);

                    expected = if (siblings.master_unlimited && derived_variant)
                        || expected == UNLIMITED_QUANTITY
                    {
                        UNLIMITED_QUANTITY
                    } else {
                        checked_mul((expected - siblings.exported).max(0), limit)?
                    };
                }
            }
            None => {
                debug!(
                    value = raw,
                    "unparsable virt_limit on subscription, leaving expected quantity"
                );
            }
        }

        Ok(Expectation::Quantity(expected))
    }
}

enum Expectation {
    Quantity(i64),
    Withdrawn,
}

/// Capacity the subscription's single non-derived pool already handed out.
struct SiblingCapacity {
    exported: i64,
    master_unlimited: bool,
}

impl SiblingCapacity {
    fn of(existing: &[Pool]) -> DomainResult<Self> {
        let mut bases = existing.iter().filter(|p| !p.is_derived());
        let first = bases.next();
        if bases.next().is_some() {
            return Err(DomainError::invariant(
                "more than one non-derived pool exists for a subscription",
            ));
        }

        Ok(match first {
            Some(base) => SiblingCapacity {
                exported: base.exported(),
                master_unlimited: base.is_unlimited(),
            },
            None => SiblingCapacity {
                exported: 0,
                master_unlimited: false,
            },
        })
    }
}

/// Derived, virt-only and carrying a `virt_limit` marker on itself or its
/// product.
fn depends_on_virt_limit(pool: &Pool) -> bool {
    pool.is_derived()
        && pool.is_virt_only()
        && (pool.attributes().contains(&AttributeKey::VirtLimit)
            || pool.product().has_attribute(&AttributeKey::VirtLimit))
}

fn has_master_pool(pools: &[Pool]) -> bool {
    pools
        .iter()
        .any(|p| p.sub_key() == Some(SubscriptionSubKey::Master))
}

/// The master pool with a per-pool expected quantity.
struct MasterTarget<'a> {
    master: &'a Pool,
    expected_quantity: i64,
}

impl CanonicalSource for MasterTarget<'_> {
    fn start_date(&self) -> DateTime<Utc> {
        self.master.start_date()
    }

    fn end_date(&self) -> DateTime<Utc> {
        self.master.end_date()
    }

    fn expected_quantity(&self, _existing: &Pool) -> Option<i64> {
        Some(self.expected_quantity)
    }

    fn product_for(&self, existing: &Pool) -> &Product {
        CanonicalSource::product_for(self.master, existing)
    }

    fn order(&self) -> &OrderInfo {
        self.master.order()
    }
}
