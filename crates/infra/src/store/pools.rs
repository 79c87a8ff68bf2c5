use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tracing::debug;

use entpool_core::{DomainError, DomainResult, PoolId, StackId, SubscriptionId};
use entpool_pools::Pool;
use entpool_rules::PoolRepository;

use super::{poisoned, stored_id};

/// In-memory pool table keyed by pool id.
#[derive(Debug, Default)]
pub struct InMemoryPoolStore {
    inner: RwLock<HashMap<PoolId, Pool>>,
}

impl InMemoryPoolStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: PoolId) -> Option<Pool> {
        let map = self.inner.read().ok()?;
        map.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, predicate: impl Fn(&Pool) -> bool) -> Vec<Pool> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        let mut pools: Vec<Pool> = map.values().filter(|p| predicate(p)).cloned().collect();
        // Stable order for callers that zip results with plans.
        pools.sort_by_key(|p| p.id_typed());
        pools
    }
}

impl PoolRepository for InMemoryPoolStore {
    fn find_by_subscription(&self, subscription_id: &SubscriptionId) -> Vec<Pool> {
        self.select(|p| p.subscription_id() == Some(subscription_id))
    }

    fn find_by_stack(&self, stack_id: &StackId) -> Vec<Pool> {
        self.select(|p| p.source_stack_id() == Some(stack_id))
    }

    fn create_pools(&self, pools: Vec<Pool>) -> DomainResult<Vec<Pool>> {
        let mut map = self.inner.write().map_err(|_| poisoned("pool"))?;

        let mut created = Vec::with_capacity(pools.len());
        for mut pool in pools {
            let id = match pool.id_typed() {
                Some(id) if map.contains_key(&id) => {
                    return Err(DomainError::conflict(format!("pool {id} already exists")));
                }
                Some(id) => id,
                None => {
                    let id = PoolId::new();
                    pool.assign_id(id);
                    id
                }
            };
            debug!(pool = %pool, "storing new pool");
            map.insert(id, pool.clone());
            created.push(pool);
        }

        Ok(created)
    }

    fn save(&self, pool: &Pool) -> DomainResult<()> {
        let id = stored_id(pool, "pool")?;

        let mut map = self.inner.write().map_err(|_| poisoned("pool"))?;
        match map.get_mut(&id) {
            Some(slot) => {
                *slot = pool.clone();
                Ok(())
            }
            None => Err(DomainError::not_found()),
        }
    }

    fn delete_pools(&self, pools: &[Pool], already_deleted: &HashSet<PoolId>) -> Vec<PoolId> {
        let mut map = match self.inner.write() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        pools
            .iter()
            .filter_map(Pool::id_typed)
            .filter(|id| !already_deleted.contains(id))
            .filter(|id| map.remove(id).is_some())
            .collect()
    }
}
