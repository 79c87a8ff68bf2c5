use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use entpool_core::{ConsumerId, DomainResult, EntitlementId, PoolId, StackId};
use entpool_pools::Entitlement;
use entpool_rules::EntitlementRepository;

use super::poisoned;

/// In-memory entitlement table keyed by entitlement id.
#[derive(Debug, Default)]
pub struct InMemoryEntitlementStore {
    inner: RwLock<HashMap<EntitlementId, Entitlement>>,
}

impl InMemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entitlement: Entitlement) -> DomainResult<()> {
        let mut map = self.inner.write().map_err(|_| poisoned("entitlement"))?;
        map.insert(entitlement.id_typed(), entitlement);
        Ok(())
    }

    pub fn get(&self, id: EntitlementId) -> Option<Entitlement> {
        let map = self.inner.read().ok()?;
        map.get(&id).cloned()
    }

    pub fn remove(&self, id: EntitlementId) -> Option<Entitlement> {
        let mut map = self.inner.write().ok()?;
        map.remove(&id)
    }

    fn select(&self, predicate: impl Fn(&Entitlement) -> bool) -> Vec<Entitlement> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        map.values().filter(|e| predicate(e)).cloned().collect()
    }
}

impl EntitlementRepository for InMemoryEntitlementStore {
    fn find_by_stack_id(&self, consumer_id: ConsumerId, stack_id: &StackId) -> Vec<Entitlement> {
        self.select(|e| e.consumer_id() == consumer_id && e.stack_id() == Some(stack_id))
    }

    fn find_by_stack_ids(
        &self,
        consumer_id: Option<ConsumerId>,
        stack_ids: &HashSet<StackId>,
    ) -> Vec<Entitlement> {
        self.select(|e| {
            consumer_id.is_none_or(|c| e.consumer_id() == c)
                && e.stack_id().is_some_and(|s| stack_ids.contains(s))
        })
    }

    fn find_by_pool(&self, pool_id: PoolId) -> Vec<Entitlement> {
        self.select(|e| e.pool().id_typed() == Some(pool_id))
    }

    fn mark_dirty(&self, ids: &[EntitlementId]) -> DomainResult<()> {
        let mut map = self.inner.write().map_err(|_| poisoned("entitlement"))?;
        for id in ids {
            if let Some(ent) = map.get_mut(id) {
                ent.mark_dirty();
            }
        }
        Ok(())
    }
}
