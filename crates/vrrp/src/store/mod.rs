//! Coordination store access.
//!
//! The per-interface VRRP state of the whole cluster lives in one JSON
//! document at [`StatePaths::state_path`]. Every read-modify-write of that
//! document happens while holding the lease-backed lock at
//! [`StatePaths::lock_path`], so concurrent writers on different nodes
//! serialize instead of losing each other's updates.

mod etcd;
mod memory;

pub use etcd::{EtcdConnector, EtcdSettings};
pub use memory::MemoryConnector;

use crate::types::PublishedState;
use async_trait::async_trait;
use common::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lease backing a held lock
pub type LeaseId = i64;

/// Interface name → published record
pub type StateDocument = BTreeMap<String, PublishedState>;

/// Opens connections to the coordination store
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>>;
}

/// One connection to the coordination store
#[async_trait]
pub trait StoreConnection: Send + Sync {
    /// Block until the lock at `path` is held under a fresh lease
    async fn lock(&self, path: &str, token: &str) -> Result<LeaseId>;

    /// Release a lock acquired with [`StoreConnection::lock`]
    async fn unlock(&self, path: &str, lease: LeaseId) -> Result<()>;

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, path: &str, value: &[u8]) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    async fn close(&self) {}
}

/// Well-known store paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub lock_path: String,
    pub state_path: String,
}

impl Default for StatePaths {
    fn default() -> Self {
        Self {
            lock_path: "/local/vrrp/state/lock".to_string(),
            state_path: "/state/services/port/vrrp".to_string(),
        }
    }
}

enum Mutation<'a> {
    Remove(&'a str),
    Clear,
}

/// Locked read-modify-write client for the published state document
#[derive(Clone)]
pub struct StateStore {
    connector: Arc<dyn StoreConnector>,
    paths: StatePaths,
}

impl StateStore {
    pub fn new(connector: Arc<dyn StoreConnector>, paths: StatePaths) -> Self {
        Self { connector, paths }
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    /// Remove the record for `interface` from the published document.
    ///
    /// The key is deleted once the document becomes empty. Failures are
    /// returned without retry; the caller cannot assume the record is gone.
    pub async fn delete_interface_state(&self, interface: &str) -> Result<()> {
        let token = format!("{}{}", interface, Uuid::new_v4());
        self.locked(&token, Mutation::Remove(interface)).await
    }

    /// Delete the whole published document
    pub async fn clear_all(&self) -> Result<()> {
        let token = Uuid::new_v4().to_string();
        self.locked(&token, Mutation::Clear).await
    }

    /// Read the published document without locking
    pub async fn read(&self) -> Result<StateDocument> {
        let conn = self.connector.connect().await?;
        let doc = self.read_document(conn.as_ref()).await;
        conn.close().await;
        doc
    }

    async fn locked(&self, token: &str, mutation: Mutation<'_>) -> Result<()> {
        let conn = self.connector.connect().await?;

        let result = match conn.lock(&self.paths.lock_path, token).await {
            Ok(lease) => {
                let result = self.apply(conn.as_ref(), mutation).await;
                if let Err(e) = conn.unlock(&self.paths.lock_path, lease).await {
                    warn!(lock = %self.paths.lock_path, error = %e, "Failed to release state lock");
                }
                result
            }
            Err(e) => Err(e),
        };

        conn.close().await;
        result
    }

    async fn apply(&self, conn: &dyn StoreConnection, mutation: Mutation<'_>) -> Result<()> {
        match mutation {
            Mutation::Clear => conn.delete(&self.paths.state_path).await,
            Mutation::Remove(interface) => {
                let mut doc = self.read_document(conn).await?;
                if doc.remove(interface).is_none() {
                    debug!(interface = %interface, "No published state to remove");
                }

                if doc.is_empty() {
                    conn.delete(&self.paths.state_path).await
                } else {
                    let encoded = serde_json::to_vec(&doc)?;
                    conn.put(&self.paths.state_path, &encoded).await
                }
            }
        }
    }

    async fn read_document(&self, conn: &dyn StoreConnection) -> Result<StateDocument> {
        match conn.get(&self.paths.state_path).await? {
            None => Ok(StateDocument::new()),
            Some(raw) => serde_json::from_slice::<Option<StateDocument>>(&raw)
                .map(Option::unwrap_or_default)
                .map_err(|e| {
                    Error::store(format!(
                        "malformed state document {}: {}",
                        String::from_utf8_lossy(&raw),
                        e
                    ))
                }),
        }
    }
}
