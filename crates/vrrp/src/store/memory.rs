//! In-process coordination store.
//!
//! Implements the same lock semantics as the etcd backend. Used by tests
//! and by single-node deployments without an etcd cluster.

use super::{LeaseId, StoreConnection, StoreConnector};
use async_trait::async_trait;
use common::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

#[derive(Default)]
struct Shared {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
    /// lock path → (lease, token)
    locks: Mutex<HashMap<String, (LeaseId, String)>>,
    released: Notify,
    next_lease: AtomicI64,
    locks_granted: AtomicUsize,
    fail_writes: AtomicBool,
}

impl Shared {
    fn data(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<String, (LeaseId, String)>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::store("write rejected"));
        }
        Ok(())
    }
}

/// Connector for the in-process store; clones share the same data
#[derive(Clone, Default)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a raw value, bypassing the lock
    pub fn insert(&self, path: &str, value: Vec<u8>) {
        self.shared.data().insert(path.to_string(), value);
    }

    /// Raw value at `path`
    pub fn value(&self, path: &str) -> Option<Vec<u8>> {
        self.shared.data().get(path).cloned()
    }

    pub fn is_locked(&self, path: &str) -> bool {
        self.shared.locks().contains_key(path)
    }

    /// Number of locks granted since creation
    pub fn locks_granted(&self) -> usize {
        self.shared.locks_granted.load(Ordering::SeqCst)
    }

    /// Make every put/delete fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>> {
        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MemoryConnection {
    shared: Arc<Shared>,
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn lock(&self, path: &str, token: &str) -> Result<LeaseId> {
        loop {
            let released = self.shared.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            {
                let mut locks = self.shared.locks();
                if !locks.contains_key(path) {
                    let lease = self.shared.next_lease.fetch_add(1, Ordering::SeqCst) + 1;
                    locks.insert(path.to_string(), (lease, token.to_string()));
                    self.shared.locks_granted.fetch_add(1, Ordering::SeqCst);
                    debug!(lock = %path, lease, "Lock acquired");
                    return Ok(lease);
                }
            }

            released.await;
        }
    }

    async fn unlock(&self, path: &str, lease: LeaseId) -> Result<()> {
        let removed = {
            let mut locks = self.shared.locks();
            let held = matches!(locks.get(path), Some((held, _)) if *held == lease);
            if held {
                locks.remove(path);
            }
            held
        };
        if !removed {
            return Err(Error::store(format!("lease {} does not hold {}", lease, path)));
        }
        self.shared.released.notify_waiters();
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let value = self.shared.data().get(path).cloned();
        // Give concurrent callers a chance to run between read and write.
        tokio::task::yield_now().await;
        Ok(value)
    }

    async fn put(&self, path: &str, value: &[u8]) -> Result<()> {
        self.shared.check_writable()?;
        self.shared.data().insert(path.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.shared.check_writable()?;
        self.shared.data().remove(path);
        Ok(())
    }
}
