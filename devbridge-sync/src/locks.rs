//! Per-entity exclusive locks.
//!
//! One tokio mutex per [`EntityRef`], created on first use and kept for the
//! life of the table. The returned guard is owned, so it is released on
//! every exit path of the caller, including `?` and cancellation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use devbridge_core::EntityRef;

use crate::SyncError;

/// Held while a sync of one entity is in flight.
pub type EntityGuard = OwnedMutexGuard<()>;

#[derive(Debug, Default)]
pub struct LockTable {
    locks: Mutex<HashMap<EntityRef, Arc<AsyncMutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `entity` with no time limit.
    pub async fn acquire(&self, entity: &EntityRef) -> EntityGuard {
        let lock = self.lock_for(entity);
        if let Ok(guard) = lock.clone().try_lock_owned() {
            return guard;
        }
        tracing::debug!("waiting for sync lock on {entity}");
        lock.lock_owned().await
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    ///
    /// `None` waits forever.
    pub async fn acquire_timeout(
        &self,
        entity: &EntityRef,
        timeout: Option<Duration>,
    ) -> Result<EntityGuard, SyncError> {
        let Some(timeout) = timeout else {
            return Ok(self.acquire(entity).await);
        };
        tokio::time::timeout(timeout, self.acquire(entity))
            .await
            .map_err(|_| SyncError::LockTimeout {
                entity: entity.clone(),
                waited: timeout,
            })
    }

    /// Whether a sync currently holds the lock for `entity`.
    pub fn is_locked(&self, entity: &EntityRef) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .get(entity)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of distinct entities ever locked.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_for(&self, entity: &EntityRef) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .entry(entity.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
