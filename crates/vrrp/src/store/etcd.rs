//! etcd v3 backend over the JSON gRPC gateway.
//!
//! Keys and values travel base64-encoded. A lock is a key created under a
//! lease with a `create_revision == 0` transaction. The lease is renewed
//! while the lock is held; releasing it revokes the lease, which removes the
//! key.

use super::{LeaseId, StoreConnection, StoreConnector};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::{Error, Result};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Connection settings for the etcd cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdSettings {
    pub endpoints: Vec<String>,
    pub dial_timeout: Duration,
    pub request_timeout: Duration,
    pub lock_ttl: Duration,
    pub lock_poll: Duration,
}

impl Default for EtcdSettings {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            dial_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
            lock_ttl: Duration::from_secs(10),
            lock_poll: Duration::from_millis(100),
        }
    }
}

/// Opens HTTP connections to the first reachable etcd endpoint
#[derive(Debug, Clone)]
pub struct EtcdConnector {
    settings: Arc<EtcdSettings>,
}

impl EtcdConnector {
    pub fn new(settings: EtcdSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

#[async_trait]
impl StoreConnector for EtcdConnector {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.settings.dial_timeout)
            .timeout(self.settings.request_timeout)
            .build()
            .map_err(|e| Error::store(format!("failed to build HTTP client: {}", e)))?;

        let mut last_error = Error::store("no etcd endpoints configured");
        for endpoint in &self.settings.endpoints {
            let gateway = Gateway {
                client: client.clone(),
                base: endpoint.trim_end_matches('/').to_string(),
                settings: Arc::clone(&self.settings),
            };
            match gateway.call::<_, IgnoredAny>("/v3/maintenance/status", &json!({})).await {
                Ok(_) => {
                    debug!(endpoint = %gateway.base, "Connected to etcd");
                    return Ok(Box::new(EtcdConnection {
                        gateway,
                        keepalives: Mutex::new(HashMap::new()),
                    }));
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "etcd endpoint unreachable");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

#[derive(Clone)]
struct Gateway {
    client: reqwest::Client,
    base: String,
    settings: Arc<EtcdSettings>,
}

struct EtcdConnection {
    gateway: Gateway,
    /// Lease renewal tasks of locks held through this connection
    keepalives: Mutex<HashMap<LeaseId, JoinHandle<()>>>,
}

#[derive(Serialize)]
struct KeyRequest {
    key: String,
}

#[derive(Serialize)]
struct PutRequest {
    key: String,
    value: String,
}

#[derive(Deserialize, Default)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<KeyValue>,
}

#[derive(Deserialize)]
struct KeyValue {
    #[serde(default)]
    value: String,
}

#[derive(Serialize)]
struct LeaseGrantRequest {
    #[serde(rename = "TTL")]
    ttl: i64,
}

#[derive(Deserialize)]
struct LeaseGrantResponse {
    #[serde(rename = "ID", deserialize_with = "de_i64")]
    id: i64,
}

#[derive(Serialize)]
struct LeaseIdRequest {
    #[serde(rename = "ID")]
    id: i64,
}

#[derive(Deserialize)]
struct TxnResponse {
    #[serde(default)]
    succeeded: bool,
}

/// The gateway renders int64 fields as JSON strings.
fn de_i64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int {
        Num(i64),
        Str(String),
    }

    match Int::deserialize(deserializer)? {
        Int::Num(v) => Ok(v),
        Int::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn encode(raw: impl AsRef<[u8]>) -> String {
    STANDARD.encode(raw)
}

fn lock_txn(key: &str, token: &str, lease: LeaseId) -> serde_json::Value {
    json!({
        "compare": [{
            "target": "CREATE",
            "result": "EQUAL",
            "key": key,
            "create_revision": "0",
        }],
        "success": [{
            "request_put": {
                "key": key,
                "value": encode(token),
                "lease": lease.to_string(),
            }
        }],
    })
}

impl Gateway {
    async fn call<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::store(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::store(format!("{} returned {}: {}", url, status, body)));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| Error::store(format!("{}: invalid response: {}", url, e)))
    }

    async fn revoke(&self, lease: LeaseId) -> Result<()> {
        self.call::<_, IgnoredAny>("/v3/lease/revoke", &LeaseIdRequest { id: lease })
            .await
            .map(|_| ())
    }

    async fn revoke_quietly(&self, lease: LeaseId) {
        if let Err(e) = self.revoke(lease).await {
            debug!(lease, error = %e, "Failed to revoke lease");
        }
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<()> {
        self.call::<_, IgnoredAny>("/v3/lease/keepalive", &LeaseIdRequest { id: lease })
            .await
            .map(|_| ())
    }

    /// Renew `lease` every third of the lock TTL until aborted
    fn spawn_keepalive(&self, lease: LeaseId) -> JoinHandle<()> {
        let gateway = self.clone();
        let period = keepalive_period(self.settings.lock_ttl);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                if let Err(e) = gateway.keep_alive(lease).await {
                    warn!(lease, error = %e, "Failed to renew lock lease");
                }
            }
        })
    }
}

fn keepalive_period(ttl: Duration) -> Duration {
    (ttl / 3).max(Duration::from_millis(100))
}

impl EtcdConnection {
    fn keepalives(&self) -> std::sync::MutexGuard<'_, HashMap<LeaseId, JoinHandle<()>>> {
        self.keepalives.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for EtcdConnection {
    fn drop(&mut self) {
        for (_, task) in self.keepalives().drain() {
            task.abort();
        }
    }
}

#[async_trait]
impl StoreConnection for EtcdConnection {
    async fn lock(&self, path: &str, token: &str) -> Result<LeaseId> {
        let key = encode(path);
        let ttl = self.gateway.settings.lock_ttl.as_secs().max(1) as i64;

        loop {
            let lease: LeaseGrantResponse = self
                .gateway
                .call("/v3/lease/grant", &LeaseGrantRequest { ttl })
                .await?;

            let outcome: Result<TxnResponse> =
                self.gateway.call("/v3/kv/txn", &lock_txn(&key, token, lease.id)).await;
            match outcome {
                Ok(txn) if txn.succeeded => {
                    debug!(lock = %path, lease = lease.id, "Lock acquired");
                    let renewal = self.gateway.spawn_keepalive(lease.id);
                    self.keepalives().insert(lease.id, renewal);
                    return Ok(lease.id);
                }
                Ok(_) => {
                    self.gateway.revoke_quietly(lease.id).await;
                    tokio::time::sleep(self.gateway.settings.lock_poll).await;
                }
                Err(e) => {
                    self.gateway.revoke_quietly(lease.id).await;
                    return Err(e);
                }
            }
        }
    }

    async fn unlock(&self, path: &str, lease: LeaseId) -> Result<()> {
        if let Some(renewal) = self.keepalives().remove(&lease) {
            renewal.abort();
        }
        self.gateway.revoke(lease).await?;
        debug!(lock = %path, lease, "Lock released");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let range: RangeResponse = self
            .gateway
            .call("/v3/kv/range", &KeyRequest { key: encode(path) })
            .await?;

        match range.kvs.into_iter().next() {
            None => Ok(None),
            Some(kv) => STANDARD
                .decode(kv.value)
                .map(Some)
                .map_err(|e| Error::store(format!("{}: bad value encoding: {}", path, e))),
        }
    }

    async fn put(&self, path: &str, value: &[u8]) -> Result<()> {
        let request = PutRequest {
            key: encode(path),
            value: encode(value),
        };
        self.gateway.call::<_, IgnoredAny>("/v3/kv/put", &request).await.map(|_| ())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.gateway
            .call::<_, IgnoredAny>("/v3/kv/deleterange", &KeyRequest { key: encode(path) })
            .await
            .map(|_| ())
    }

    async fn close(&self) {
        for (lease, renewal) in self.keepalives().drain() {
            debug!(lease, "Stopping lease renewal on close");
            renewal.abort();
        }
    }
}
