//! Pools and entitlements.
//!
//! A pool is a grant of capacity for one product; an entitlement is a
//! consumer's claim against one pool. Both are plain data here; the rules that
//! derive and reconcile pools live in `entpool-rules`.

pub mod entitlement;
pub mod pool;

pub use entitlement::Entitlement;
pub use pool::{
    OrderInfo, Pool, PoolSource, PoolType, SourceStack, SourceSubscription, SubscriptionSubKey,
    UNLIMITED_QUANTITY, UpstreamRef,
};
