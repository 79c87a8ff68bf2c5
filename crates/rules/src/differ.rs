//! Field-by-field reconciliation of an existing pool against its source.

use chrono::{DateTime, Utc};
use tracing::debug;

use entpool_core::AttributeKey;
use entpool_pools::{OrderInfo, Pool};
use entpool_products::{ChangedProducts, Product};

use crate::stacking::StackAggregate;
use crate::update::PoolUpdate;

/// The authoritative shape an existing pool is reconciled towards: a
/// subscription's master pool, or a stack aggregate.
pub trait CanonicalSource {
    fn start_date(&self) -> DateTime<Utc>;

    fn end_date(&self) -> DateTime<Utc>;

    /// Quantity `existing` should carry. `None` leaves the quantity alone.
    fn expected_quantity(&self, existing: &Pool) -> Option<i64>;

    /// Product `existing` should be bound to.
    fn product_for(&self, existing: &Pool) -> &Product;

    fn order(&self) -> &OrderInfo;

    /// Also compare product attribute content, not just product identity.
    fn compares_product_attributes(&self) -> bool {
        false
    }
}

/// A pool is its own canonical source: derived pools follow the declared
/// derived product, everything else follows the pool's product. A canonical
/// pool that is itself derived already carries the product to follow.
impl CanonicalSource for Pool {
    fn start_date(&self) -> DateTime<Utc> {
        Pool::start_date(self)
    }

    fn end_date(&self) -> DateTime<Utc> {
        Pool::end_date(self)
    }

    fn expected_quantity(&self, _existing: &Pool) -> Option<i64> {
        Some(self.quantity())
    }

    fn product_for(&self, existing: &Pool) -> &Product {
        let product = self.product();
        match product.derived_product() {
            Some(derived) if is_derived(existing) && !is_derived(self) => derived,
            _ => product,
        }
    }

    fn order(&self) -> &OrderInfo {
        Pool::order(self)
    }
}

fn is_derived(pool: &Pool) -> bool {
    pool.attributes().flag(&AttributeKey::DerivedPool)
}

impl CanonicalSource for StackAggregate<'_> {
    fn start_date(&self) -> DateTime<Utc> {
        StackAggregate::start_date(self)
    }

    fn end_date(&self) -> DateTime<Utc> {
        StackAggregate::end_date(self)
    }

    fn expected_quantity(&self, _existing: &Pool) -> Option<i64> {
        self.virt_limit_quantity()
    }

    fn product_for(&self, _existing: &Pool) -> &Product {
        self.anchor_product()
    }

    fn order(&self) -> &OrderInfo {
        self.eldest().pool().order()
    }

    fn compares_product_attributes(&self) -> bool {
        true
    }
}

/// Reconciles pools and reports what changed.
///
/// Fields are only written when they differ. A pool marked for delete is
/// frozen except for its dates and quantity.
#[derive(Debug, Clone, Copy)]
pub struct PoolDiffer<'a> {
    changed_products: &'a ChangedProducts,
}

impl<'a> PoolDiffer<'a> {
    pub fn new(changed_products: &'a ChangedProducts) -> Self {
        Self { changed_products }
    }

    /// Reconcile `existing` towards `canonical`.
    ///
    /// On any material change every entitlement attached to `existing` is
    /// marked dirty.
    pub fn diff<C>(&self, existing: &mut Pool, canonical: &C) -> PoolUpdate
    where
        C: CanonicalSource + ?Sized,
    {
        let dates_changed = check_dates(canonical.start_date(), canonical.end_date(), existing);
        let quantity_changed = check_quantity(canonical.expected_quantity(existing), existing);

        let mut products_changed = false;
        let mut product_attributes_changed = false;
        let mut order_changed = false;

        if !existing.is_marked_for_delete() {
            let incoming = canonical.product_for(existing);

            if canonical.compares_product_attributes() {
                product_attributes_changed =
                    existing.product().attributes() != incoming.attributes();
            }

            products_changed = self.check_products(incoming, existing);
            if product_attributes_changed && !products_changed {
                existing.set_product(incoming.clone());
            }

            order_changed = check_order(canonical.order(), existing);
        }

        let changed = dates_changed
            || quantity_changed
            || products_changed
            || order_changed
            || product_attributes_changed;

        if changed {
            existing.mark_entitlements_dirty();
        } else {
            debug!(pool = %existing, "no updates required");
        }

        PoolUpdate {
            pool: existing.clone(),
            dates_changed,
            quantity_changed,
            products_changed,
            order_changed,
            product_attributes_changed,
            marked_for_delete: false,
        }
    }

    fn check_products(&self, incoming: &Product, existing: &mut Pool) -> bool {
        let current = existing.product().id();
        let changed = current != incoming.id() || self.changed_products.contains(current);

        if changed {
            existing.set_product(incoming.clone());
        }
        changed
    }
}

fn check_dates(start: DateTime<Utc>, end: DateTime<Utc>, existing: &mut Pool) -> bool {
    let changed = start != existing.start_date() || end != existing.end_date();
    if changed {
        existing.set_dates(start, end);
    }
    changed
}

fn check_quantity(expected: Option<i64>, existing: &mut Pool) -> bool {
    match expected {
        Some(quantity) if quantity != existing.quantity() => {
            existing.set_quantity(quantity);
            true
        }
        _ => false,
    }
}

/// Contract, order and account numbers move as one unit.
fn check_order(incoming: &OrderInfo, existing: &mut Pool) -> bool {
    let changed = incoming != existing.order();
    if changed {
        existing.set_order(incoming.clone());
    }
    changed
}
