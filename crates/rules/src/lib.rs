//! Pool derivation and reconciliation rules.
//!
//! Every entry point works on an explicit snapshot handed in by the caller and
//! returns what should be created, updated or deleted. Persisting the result is
//! the caller's job; the only side effect here is flipping the dirty flag on
//! in-memory entitlements attached to a materially changed pool.
//!
//! - [`quantity`]: base quantity expansion
//! - [`stacking`]: eldest-member aggregation over a stack
//! - [`differ`]: field-by-field reconciliation of one pool against its source
//! - [`bonus`]: virt-limit derived pool synthesis
//! - [`synchronizer`]: subscription and stack orchestration

pub mod bonus;
pub mod differ;
pub mod quantity;
pub mod repository;
pub mod stacking;
pub mod synchronizer;
pub mod update;

mod stack_refresh;

pub use bonus::DerivedVariant;
pub use differ::{CanonicalSource, PoolDiffer};
pub use repository::{EntitlementRepository, PoolRepository};
pub use stack_refresh::StackPlan;
pub use stacking::StackAggregate;
pub use synchronizer::{SubscriptionPlan, Synchronizer};
pub use update::PoolUpdate;
