//! `entpool-core`: shared building blocks for the entitlement pool engine.
//!
//! This crate contains **pure** primitives (no storage, no IO beyond reading
//! process configuration).

pub mod attributes;
pub mod config;
pub mod entity;
pub mod error;
pub mod id;

pub use attributes::{AttributeKey, Attributes, VirtLimit};
pub use config::EngineConfig;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    ConsumerId, EntitlementId, OwnerId, PoolId, ProductId, StackId, SubscriptionId,
};
