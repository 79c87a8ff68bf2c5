//! Stack aggregation.
//!
//! A stack is the set of a consumer's entitlements sharing a stack key. The
//! eldest member anchors product and order decisions for the stack pool.

use chrono::{DateTime, Utc};
use tracing::warn;

use entpool_core::{AttributeKey, VirtLimit};
use entpool_pools::{Entitlement, UNLIMITED_QUANTITY};
use entpool_products::Product;

/// Aggregate view over one stack's members.
#[derive(Debug, Clone, Copy)]
pub struct StackAggregate<'a> {
    eldest: &'a Entitlement,
    eldest_with_virt_limit: Option<&'a Entitlement>,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
}

impl<'a> StackAggregate<'a> {
    /// Aggregate a stack. Returns `None` for an empty stack: there is nothing
    /// to derive, which is not an error.
    ///
    /// Eldest is the earliest `created_at`, ties broken by entitlement id, so
    /// the result does not depend on input order.
    pub fn from_members<I>(members: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Entitlement>,
    {
        let mut iter = members.into_iter();
        let first = iter.next()?;

        let mut agg = StackAggregate {
            eldest: first,
            eldest_with_virt_limit: declares_virt_limit(first).then_some(first),
            start_date: first.pool().start_date(),
            end_date: first.pool().end_date(),
        };

        for ent in iter {
            if is_older(ent, agg.eldest) {
                agg.eldest = ent;
            }

            if declares_virt_limit(ent)
                && agg.eldest_with_virt_limit.is_none_or(|current| is_older(ent, current))
            {
                agg.eldest_with_virt_limit = Some(ent);
            }

            agg.start_date = agg.start_date.min(ent.pool().start_date());
            agg.end_date = agg.end_date.max(ent.pool().end_date());
        }

        Some(agg)
    }

    pub fn eldest(&self) -> &'a Entitlement {
        self.eldest
    }

    pub fn eldest_with_virt_limit(&self) -> Option<&'a Entitlement> {
        self.eldest_with_virt_limit
    }

    pub fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    pub fn end_date(&self) -> DateTime<Utc> {
        self.end_date
    }

    /// Product the stack pool should carry: the eldest member pool's derived
    /// product when it has one.
    pub fn anchor_product(&self) -> &'a Product {
        self.eldest.pool().product().derived_or_self()
    }

    /// Quantity granted by the eldest member requesting virtual capacity.
    ///
    /// `None` when no member requests it, or when the request cannot be parsed
    /// (logged; the stack pool quantity is then left alone).
    pub fn virt_limit_quantity(&self) -> Option<i64> {
        let ent = self.eldest_with_virt_limit?;
        match ent.pool().product().virt_limit() {
            Some(VirtLimit::Unlimited) => Some(UNLIMITED_QUANTITY),
            Some(VirtLimit::Limited(limit)) => Some(i64::from(limit)),
            None => {
                warn!(
                    entitlement_id = %ent.id_typed(),
                    "unparsable virt_limit on stacked entitlement, leaving quantity unchanged"
                );
                None
            }
        }
    }
}

fn declares_virt_limit(ent: &Entitlement) -> bool {
    ent.pool().product().has_attribute(&AttributeKey::VirtLimit)
}

fn is_older(a: &Entitlement, b: &Entitlement) -> bool {
    (a.created_at(), a.id_typed()) < (b.created_at(), b.id_typed())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use entpool_core::{AttributeKey, ConsumerId, EntitlementId, OwnerId, StackId};
    use entpool_pools::{Entitlement, OrderInfo, Pool};
    use entpool_products::Product;

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    pub fn member_pool(product: Product, start_offset_days: i64, end_offset_days: i64) -> Pool {
        Pool::new(
            OwnerId::new(),
            product,
            10,
            t0() + Duration::days(start_offset_days),
            t0() + Duration::days(end_offset_days),
        )
        .with_order(OrderInfo::new("contract-1", "order-1", "account-1"))
    }

    pub fn member(pool: Pool, created_offset_days: i64) -> Entitlement {
        Entitlement::new(
            EntitlementId::new(),
            ConsumerId::new(),
            Arc::new(pool),
            1,
            t0() + Duration::days(created_offset_days),
        )
        .with_stack(StackId::new("stack-1"))
    }

    pub fn virt_product(limit: &str) -> Product {
        Product::new("RH-VIRT", "Virt server").with_attribute(AttributeKey::VirtLimit, limit)
    }
}
