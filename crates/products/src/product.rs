use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use entpool_core::{AttributeKey, Attributes, DomainResult, ProductId, VirtLimit};

/// Catalog product as seen by the pool engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    name: String,
    multiplier: Option<u32>,
    attributes: Attributes,
    derived_product: Option<Box<Product>>,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            multiplier: None,
            attributes: Attributes::new(),
            derived_product: None,
        }
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    pub fn with_attribute(mut self, key: AttributeKey, value: impl Into<String>) -> Self {
        self.attributes.set(key, value);
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_derived_product(mut self, derived: Product) -> Self {
        self.derived_product = Some(Box::new(derived));
        self
    }

    pub fn id(&self) -> &ProductId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn has_attribute(&self, key: &AttributeKey) -> bool {
        self.attributes.contains(key)
    }

    /// Quantity multiplier; absent means 1.
    pub fn multiplier(&self) -> u32 {
        self.multiplier.unwrap_or(1)
    }

    /// Instance multiplier. A malformed value is a fatal configuration error.
    pub fn instance_multiplier(&self) -> DomainResult<Option<u32>> {
        self.attributes.require_count(&AttributeKey::InstanceMultiplier)
    }

    /// Parsed `virt_limit`; unparsable values read as absent.
    pub fn virt_limit(&self) -> Option<VirtLimit> {
        self.attributes.virt_limit()
    }

    pub fn is_host_limited(&self) -> bool {
        self.attributes.flag(&AttributeKey::HostLimited)
    }

    /// Raw `virt_only` marketing attribute, if set to a non-empty value.
    pub fn virt_only(&self) -> Option<&str> {
        self.attributes
            .get(&AttributeKey::VirtOnly)
            .filter(|v| !v.is_empty())
    }

    pub fn derived_product(&self) -> Option<&Product> {
        self.derived_product.as_deref()
    }

    /// The product a derived pool is built from: the derived product when one
    /// is declared, otherwise this product.
    pub fn derived_or_self(&self) -> &Product {
        self.derived_product().unwrap_or(self)
    }
}

/// Products whose content changed in place since the last refresh.
///
/// A pool bound to one of these products is treated as having a changed
/// product even though the identifier did not move.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedProducts(HashSet<ProductId>);

impl ChangedProducts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ProductId) {
        self.0.insert(id);
    }

    pub fn contains(&self, id: &ProductId) -> bool {
        self.0.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ProductId> for ChangedProducts {
    fn from_iter<I: IntoIterator<Item = ProductId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
