//! Per-pool change record for one synchronization pass.

use entpool_pools::Pool;

/// What changed on a pool during reconciliation. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolUpdate {
    /// The pool after the changes were applied.
    pub pool: Pool,
    pub dates_changed: bool,
    pub quantity_changed: bool,
    pub products_changed: bool,
    pub order_changed: bool,
    pub product_attributes_changed: bool,
    /// Newly flagged for deletion during this pass.
    pub marked_for_delete: bool,
}

impl PoolUpdate {
    pub fn unchanged(pool: &Pool) -> Self {
        Self {
            pool: pool.clone(),
            dates_changed: false,
            quantity_changed: false,
            products_changed: false,
            order_changed: false,
            product_attributes_changed: false,
            marked_for_delete: false,
        }
    }

    /// Any material change. Unchanged updates must not be recorded.
    pub fn changed(&self) -> bool {
        self.dates_changed
            || self.quantity_changed
            || self.products_changed
            || self.order_changed
            || self.product_attributes_changed
            || self.marked_for_delete
    }
}

impl core::fmt::Display for PoolUpdate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "PoolUpdate[{}, dates={}, quantity={}, products={}, order={}, \
             product_attributes={}, marked_for_delete={}]",
            self.pool,
            self.dates_changed,
            self.quantity_changed,
            self.products_changed,
            self.order_changed,
            self.product_attributes_changed,
            self.marked_for_delete
        )
    }
}
