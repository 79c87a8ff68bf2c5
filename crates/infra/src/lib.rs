//! Infrastructure layer: storage adapters and the refresh pipeline that applies
//! synchronization plans to them.

pub mod refresh;
pub mod store;

mod integration_tests;

pub use refresh::{PoolRefresher, RefreshSummary};
pub use store::{InMemoryEntitlementStore, InMemoryPoolStore};
