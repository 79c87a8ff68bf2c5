//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Pools only receive an identifier once storage has persisted them, so the
/// identifier is optional.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier, if one has been assigned.
    fn id(&self) -> Option<&Self::Id>;
}
