use std::sync::Arc;

use chrono::{DateTime, Utc};

use entpool_core::{ConsumerId, Entity, EntitlementId, StackId};

use crate::pool::Pool;

/// A consumer's claim against one pool.
///
/// The pool is held as a shared snapshot; stacking reads its dates, product
/// and order data without needing the live row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entitlement {
    id: EntitlementId,
    consumer_id: ConsumerId,
    pool: Arc<Pool>,
    stack_id: Option<StackId>,
    quantity: u32,
    created_at: DateTime<Utc>,
    dirty: bool,
}

impl Entitlement {
    pub fn new(
        id: EntitlementId,
        consumer_id: ConsumerId,
        pool: Arc<Pool>,
        quantity: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            consumer_id,
            pool,
            stack_id: None,
            quantity,
            created_at,
            dirty: false,
        }
    }

    pub fn with_stack(mut self, stack_id: StackId) -> Self {
        self.stack_id = Some(stack_id);
        self
    }

    pub fn id_typed(&self) -> EntitlementId {
        self.id
    }

    pub fn consumer_id(&self) -> ConsumerId {
        self.consumer_id
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn stack_id(&self) -> Option<&StackId> {
        self.stack_id.as_ref()
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Request certificate regeneration on next checkin. The flag is only ever
    /// cleared by the regeneration subsystem.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Entity for Entitlement {
    type Id = EntitlementId;

    fn id(&self) -> Option<&Self::Id> {
        Some(&self.id)
    }
}
