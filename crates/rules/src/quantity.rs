//! Quantity expansion.

use tracing::debug;

use entpool_core::{DomainError, DomainResult};
use entpool_pools::UNLIMITED_QUANTITY;
use entpool_products::Product;

/// Expand a subscription's base quantity into the pool quantity.
///
/// - Negative input is never meaningful and is never multiplied; it becomes
///   [`UNLIMITED_QUANTITY`].
/// - The product multiplier (default 1) always applies.
/// - The instance multiplier applies only when this deployment is the origin of
///   record (`upstream_pool_id` is `None`). A downstream mirror already received
///   the multiplied quantity. A malformed instance multiplier is fatal.
pub fn expand(base: i64, product: &Product, upstream_pool_id: Option<&str>) -> DomainResult<i64> {
    if base < 0 {
        return Ok(UNLIMITED_QUANTITY);
    }

    let mut result = checked_mul(base, i64::from(product.multiplier()))?;

    if upstream_pool_id.is_none() {
        if let Some(instance_multiplier) = product.instance_multiplier()? {
            debug!(instance_multiplier, "increasing pool quantity for instance multiplier");
            result = checked_mul(result, i64::from(instance_multiplier))?;
        }
    }

    Ok(result)
}

pub(crate) fn checked_mul(a: i64, b: i64) -> DomainResult<i64> {
    a.checked_mul(b)
        .ok_or_else(|| DomainError::invalid_state(format!("pool quantity overflow ({a} * {b})")))
}
