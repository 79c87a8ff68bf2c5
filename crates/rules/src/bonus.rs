//! Derived (bonus) pool synthesis from a master pool's `virt_limit`.
//!
//! At most one derived pool exists per subscription. It is either a general
//! virtual-use bonus pool or, for host-limited products and standalone
//! deployments, a pool for guests not yet mapped to a host.

use tracing::{info, warn};

use entpool_core::{AttributeKey, DomainResult, EngineConfig, VirtLimit};
use entpool_pools::{Pool, PoolType, SubscriptionSubKey, UNLIMITED_QUANTITY};
use entpool_products::Product;

use crate::quantity::checked_mul;

/// The exclusive shapes a derived pool can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivedVariant {
    Bonus,
    UnmappedGuest,
}

impl DerivedVariant {
    pub fn for_product(product: &Product, config: &EngineConfig) -> Self {
        if product.is_host_limited() || config.standalone {
            DerivedVariant::UnmappedGuest
        } else {
            DerivedVariant::Bonus
        }
    }

    pub fn pool_type(self) -> PoolType {
        match self {
            DerivedVariant::Bonus => PoolType::Bonus,
            DerivedVariant::UnmappedGuest => PoolType::UnmappedGuest,
        }
    }
}

/// Capacity a derived pool grants, from the raw `virt_limit` and the already
/// expanded master quantity.
///
/// `"unlimited"` or an unlimited master yields the unlimited sentinel. A
/// positive limit multiplies the master quantity. Anything else means no
/// derived pool.
pub fn virt_quantity(virt_limit: Option<&str>, master_quantity: i64) -> DomainResult<Option<i64>> {
    let Some(raw) = virt_limit else {
        return Ok(None);
    };

    if master_quantity == UNLIMITED_QUANTITY {
        return Ok(Some(UNLIMITED_QUANTITY));
    }

    match VirtLimit::parse(raw) {
        Some(VirtLimit::Unlimited) => Ok(Some(UNLIMITED_QUANTITY)),
        Some(VirtLimit::Limited(limit)) if limit > 0 => {
            checked_mul(i64::from(limit), master_quantity).map(Some)
        }
        _ => {
            tracing::debug!(
                value = raw,
                "null or invalid virt_limit, assuming no derived pool is needed"
            );
            Ok(None)
        }
    }
}

/// Whether `pools` already holds this subscription's derived pool.
pub fn has_derived_pool(pools: &[Pool]) -> bool {
    pools
        .iter()
        .any(|p| p.sub_key() == Some(SubscriptionSubKey::Derived))
}

/// Build the derived pool for `master`, if one is called for.
///
/// `managed` says whether the master is linkable to its subscription; an
/// unmanaged master would leave the derived pool orphaned.
pub fn derive_pool(
    master: &Pool,
    existing: &[Pool],
    managed: bool,
    config: &EngineConfig,
) -> DomainResult<Option<Pool>> {
    let product = master.product();
    let virt_limit = product.attributes().get(&AttributeKey::VirtLimit);
    let quantity = virt_quantity(virt_limit, master.quantity())?;

    info!(pool = %master, "checking if a derived pool needs to be created");

    let Some(quantity) = quantity else {
        return Ok(None);
    };
    if !managed || has_derived_pool(existing) {
        return Ok(None);
    }
    let Some(subscription_id) = master.subscription_id() else {
        warn!(pool = %master, "managed pool has no subscription source, not deriving");
        return Ok(None);
    };

    let variant = DerivedVariant::for_product(product, config);

    let mut attributes = master.attributes().clone();
    attributes.set(AttributeKey::VirtOnly, "true");
    attributes.set(AttributeKey::DerivedPool, "true");
    attributes.set(AttributeKey::PhysicalOnly, "false");
    if variant == DerivedVariant::UnmappedGuest {
        attributes.set(AttributeKey::UnmappedGuestsOnly, "true");
    }
    // A zero virt_limit keeps the derived pool from deriving again.
    attributes.set(AttributeKey::VirtLimit, "0");

    let mut derived = Pool::new(
        master.owner_id(),
        product.derived_or_self().clone(),
        quantity,
        master.start_date(),
        master.end_date(),
    )
    .with_subscription(subscription_id.clone(), SubscriptionSubKey::Derived)
    .with_type(variant.pool_type())
    .with_order(master.order().clone())
    .with_upstream(master.upstream().clone());
    *derived.attributes_mut() = attributes;

    info!(pool = %derived, ?variant, "creating new derived pool");
    Ok(Some(derived))
}
