use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entpool_core::{
    AttributeKey, Attributes, ConsumerId, DomainError, DomainResult, Entity, OwnerId, PoolId,
    StackId, SubscriptionId,
};
use entpool_products::Product;

use crate::entitlement::Entitlement;

/// Reserved quantity meaning "no upper bound". Never a literal negative count.
pub const UNLIMITED_QUANTITY: i64 = -1;

/// Which of a subscription's pools this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionSubKey {
    /// The pool carrying the subscription's purchased capacity.
    Master,
    /// The single pool synthesized from the master's `virt_limit`.
    Derived,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceSubscription {
    pub subscription_id: SubscriptionId,
    pub sub_key: SubscriptionSubKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceStack {
    pub stack_id: StackId,
    /// Consumer whose entitlements make up the stack. May be unresolvable.
    pub source_consumer: Option<ConsumerId>,
}

/// Where a pool's capacity comes from. A pool has exactly one source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolSource {
    Subscription(SourceSubscription),
    Stack(SourceStack),
}

/// Explicit pool variant, assigned when the pool is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolType {
    Normal,
    /// Virtual-use capacity derived from a master pool.
    Bonus,
    /// Derived capacity for guests not yet mapped to a host.
    UnmappedGuest,
    /// Aggregate of a consumer's stacked entitlements.
    Stack,
}

/// Contract/order/account numbers. Updated together, never field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderInfo {
    pub contract_number: Option<String>,
    pub order_number: Option<String>,
    pub account_number: Option<String>,
}

impl OrderInfo {
    pub fn new(
        contract_number: impl Into<String>,
        order_number: impl Into<String>,
        account_number: impl Into<String>,
    ) -> Self {
        Self {
            contract_number: Some(contract_number.into()),
            order_number: Some(order_number.into()),
            account_number: Some(account_number.into()),
        }
    }
}

/// Identifiers of the pool this one mirrors in an upstream system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamRef {
    pub pool_id: Option<String>,
    pub entitlement_id: Option<String>,
    pub consumer_id: Option<String>,
}

/// A grant of capacity for one product under one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    id: Option<PoolId>,
    owner_id: OwnerId,
    product: Product,
    quantity: i64,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    order: OrderInfo,
    source: Option<PoolSource>,
    upstream: UpstreamRef,
    attributes: Attributes,
    pool_type: PoolType,
    exported: i64,
    marked_for_delete: bool,
    #[serde(skip)]
    entitlements: Vec<Entitlement>,
}

impl Pool {
    /// A new, unpersisted, source-less `Normal` pool. Negative quantities are
    /// normalized to [`UNLIMITED_QUANTITY`].
    pub fn new(
        owner_id: OwnerId,
        product: Product,
        quantity: i64,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            owner_id,
            product,
            quantity: normalize_quantity(quantity),
            start_date,
            end_date,
            order: OrderInfo::default(),
            source: None,
            upstream: UpstreamRef::default(),
            attributes: Attributes::new(),
            pool_type: PoolType::Normal,
            exported: 0,
            marked_for_delete: false,
            entitlements: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: PoolId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_subscription(
        mut self,
        subscription_id: SubscriptionId,
        sub_key: SubscriptionSubKey,
    ) -> Self {
        self.source = Some(PoolSource::Subscription(SourceSubscription {
            subscription_id,
            sub_key,
        }));
        self
    }

    /// Stack pools are always typed [`PoolType::Stack`].
    pub fn with_stack(mut self, stack_id: StackId, source_consumer: Option<ConsumerId>) -> Self {
        self.source = Some(PoolSource::Stack(SourceStack {
            stack_id,
            source_consumer,
        }));
        self.pool_type = PoolType::Stack;
        self
    }

    pub fn with_type(mut self, pool_type: PoolType) -> Self {
        self.pool_type = pool_type;
        self
    }

    pub fn with_order(mut self, order: OrderInfo) -> Self {
        self.order = order;
        self
    }

    pub fn with_upstream(mut self, upstream: UpstreamRef) -> Self {
        self.upstream = upstream;
        self
    }

    pub fn with_attribute(mut self, key: AttributeKey, value: impl Into<String>) -> Self {
        self.attributes.set(key, value);
        self
    }

    pub fn with_exported(mut self, exported: i64) -> Self {
        self.exported = exported;
        self
    }

    pub fn with_entitlement(mut self, entitlement: Entitlement) -> Self {
        self.entitlements.push(entitlement);
        self
    }

    pub fn id_typed(&self) -> Option<PoolId> {
        self.id
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    pub fn product(&self) -> &Product {
        &self.product
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn is_unlimited(&self) -> bool {
        self.quantity == UNLIMITED_QUANTITY
    }

    pub fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    pub fn end_date(&self) -> DateTime<Utc> {
        self.end_date
    }

    pub fn order(&self) -> &OrderInfo {
        &self.order
    }

    pub fn source(&self) -> Option<&PoolSource> {
        self.source.as_ref()
    }

    pub fn source_subscription(&self) -> Option<&SourceSubscription> {
        match &self.source {
            Some(PoolSource::Subscription(sub)) => Some(sub),
            _ => None,
        }
    }

    pub fn source_stack(&self) -> Option<&SourceStack> {
        match &self.source {
            Some(PoolSource::Stack(stack)) => Some(stack),
            _ => None,
        }
    }

    pub fn subscription_id(&self) -> Option<&SubscriptionId> {
        self.source_subscription().map(|s| &s.subscription_id)
    }

    pub fn sub_key(&self) -> Option<SubscriptionSubKey> {
        self.source_subscription().map(|s| s.sub_key)
    }

    pub fn source_stack_id(&self) -> Option<&StackId> {
        self.source_stack().map(|s| &s.stack_id)
    }

    pub fn upstream(&self) -> &UpstreamRef {
        &self.upstream
    }

    pub fn upstream_pool_id(&self) -> Option<&str> {
        self.upstream.pool_id.as_deref()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    pub fn pool_type(&self) -> PoolType {
        self.pool_type
    }

    pub fn exported(&self) -> i64 {
        self.exported
    }

    pub fn is_marked_for_delete(&self) -> bool {
        self.marked_for_delete
    }

    /// Carries the derived-pool marker (with any value).
    pub fn is_derived(&self) -> bool {
        self.attributes.contains(&AttributeKey::DerivedPool)
    }

    pub fn is_virt_only(&self) -> bool {
        self.attributes.flag(&AttributeKey::VirtOnly)
    }

    pub fn is_unmapped_guests_only(&self) -> bool {
        self.attributes.flag(&AttributeKey::UnmappedGuestsOnly)
    }

    pub fn is_development_pool(&self) -> bool {
        self.attributes.flag(&AttributeKey::DevelopmentPool)
    }

    pub fn entitlements(&self) -> &[Entitlement] {
        &self.entitlements
    }

    pub fn entitlements_mut(&mut self) -> &mut Vec<Entitlement> {
        &mut self.entitlements
    }

    pub fn assign_id(&mut self, id: PoolId) {
        self.id = Some(id);
    }

    pub fn set_quantity(&mut self, quantity: i64) {
        self.quantity = normalize_quantity(quantity);
    }

    pub fn set_dates(&mut self, start_date: DateTime<Utc>, end_date: DateTime<Utc>) {
        self.start_date = start_date;
        self.end_date = end_date;
    }

    pub fn set_product(&mut self, product: Product) {
        self.product = product;
    }

    pub fn set_order(&mut self, order: OrderInfo) {
        self.order = order;
    }

    pub fn set_upstream(&mut self, upstream: UpstreamRef) {
        self.upstream = upstream;
    }

    pub fn set_exported(&mut self, exported: i64) {
        self.exported = exported;
    }

    pub fn mark_for_delete(&mut self) {
        self.marked_for_delete = true;
    }

    /// Flag every attached entitlement for certificate regeneration.
    pub fn mark_entitlements_dirty(&mut self) {
        for ent in &mut self.entitlements {
            ent.mark_dirty();
        }
    }

    /// A persisted pool must have exactly one source.
    pub fn ensure_source(&self) -> DomainResult<()> {
        if self.source.is_none() {
            return Err(DomainError::invariant(format!(
                "pool {} has neither a subscription nor a stack source",
                self
            )));
        }
        Ok(())
    }
}

impl Entity for Pool {
    type Id = PoolId;

    fn id(&self) -> Option<&Self::Id> {
        self.id.as_ref()
    }
}

impl core::fmt::Display for Pool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.id {
            Some(id) => write!(f, "Pool[id={id}")?,
            None => write!(f, "Pool[id=<new>")?,
        }
        write!(
            f,
            ", type={:?}, product={}, quantity={}]",
            self.pool_type,
            self.product.id(),
            self.quantity
        )
    }
}

fn normalize_quantity(quantity: i64) -> i64 {
    if quantity < 0 { UNLIMITED_QUANTITY } else { quantity }
}
