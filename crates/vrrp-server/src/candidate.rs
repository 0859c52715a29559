//! Local VRRP configuration with candidate/committed trees.
//!
//! Accepts `set`/`delete` lines of the form
//! `<set|delete> vrf name <vrf> vrrp <id> [field [value]]` against a
//! candidate tree. A commit hands the document of every changed VRF to the
//! [`Reconciler`] and makes the candidate the committed configuration.

use async_trait::async_trait;
use common::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use tokio::sync::Mutex;
use tracing::{debug, info};
use vrrp::{
    CommandExecutor, InstanceOutcome, Reconciler, Role, UnicastPeer, VirtualAddress,
    VirtualRouterDefinition, decode_document,
};

type Tree = BTreeMap<String, Vec<VirtualRouterDefinition>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Set,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Interface(Option<String>),
    AdvertisementInterval(Option<u32>),
    Preempt,
    Priority(Option<u8>),
    State(Option<Role>),
    VirtualAddress(Option<VirtualAddress>),
    UnicastPeer(Option<IpAddr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Command {
    op: Op,
    vrf: String,
    vrid: u8,
    field: Option<Field>,
}

fn parse_value<T: std::str::FromStr>(field: &str, value: Option<&str>) -> Result<Option<T>> {
    value
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| Error::cli(format!("invalid {} value: {}", field, v)))
        })
        .transpose()
}

fn parse_line(line: &str) -> Result<Command> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    let op = match tokens.first() {
        Some(&"set") => Op::Set,
        Some(&"delete") => Op::Delete,
        _ => return Err(Error::cli(format!("unknown command: {}", line))),
    };
    let (vrf, vrid) = match tokens.get(1..6) {
        Some(["vrf", "name", vrf, "vrrp", vrid]) => (*vrf, *vrid),
        _ => return Err(Error::cli(format!("not a VRRP command: {}", line))),
    };
    let vrid: u8 = vrid
        .parse()
        .map_err(|_| Error::cli(format!("invalid vrrp id: {}", vrid)))?;

    let value = tokens.get(7).copied();
    if tokens.len() > 8 {
        return Err(Error::cli(format!("trailing arguments: {}", line)));
    }

    let field = match tokens.get(6).copied() {
        None => None,
        Some(name) => Some(match name {
            "interface" => Field::Interface(value.map(str::to_string)),
            "advertisement-interval" => Field::AdvertisementInterval(parse_value(name, value)?),
            "preempt" => Field::Preempt,
            "priority" => Field::Priority(parse_value(name, value)?),
            "state" => Field::State(value.map(|v| Role::from(v.to_string()))),
            "virtual-address" => Field::VirtualAddress(parse_value(name, value)?),
            "unicast-peer" => Field::UnicastPeer(parse_value(name, value)?),
            other => return Err(Error::cli(format!("unknown vrrp field: {}", other))),
        }),
    };

    if op == Op::Set {
        let missing = matches!(
            field,
            Some(Field::Interface(None))
                | Some(Field::AdvertisementInterval(None))
                | Some(Field::Priority(None))
                | Some(Field::State(None))
                | Some(Field::VirtualAddress(None))
                | Some(Field::UnicastPeer(None))
        );
        if missing {
            return Err(Error::cli(format!("missing value: {}", line)));
        }
    }

    Ok(Command {
        op,
        vrf: vrf.to_string(),
        vrid,
        field,
    })
}

fn apply(tree: &mut Tree, cmd: Command) -> Result<()> {
    let defs = tree.entry(cmd.vrf.clone()).or_default();
    let position = defs.iter().position(|d| d.vrid == cmd.vrid);

    match (cmd.op, cmd.field) {
        (Op::Set, field) => {
            let index = position.unwrap_or_else(|| {
                defs.push(VirtualRouterDefinition {
                    vrid: cmd.vrid,
                    ..Default::default()
                });
                defs.len() - 1
            });
            let def = &mut defs[index];
            match field {
                None => {}
                Some(Field::Interface(v)) => def.interface = v.unwrap_or_default(),
                Some(Field::AdvertisementInterval(v)) => {
                    def.advertisement_interval = v.unwrap_or_default()
                }
                Some(Field::Preempt) => def.preempt = true,
                Some(Field::Priority(v)) => def.priority = v.unwrap_or_default(),
                Some(Field::State(v)) => def.state = v.unwrap_or_default(),
                Some(Field::VirtualAddress(v)) => def.virtual_address = v,
                Some(Field::UnicastPeer(Some(address))) => {
                    if !def.unicast_peer.iter().any(|p| p.address == address) {
                        def.unicast_peer.push(UnicastPeer { address });
                    }
                }
                Some(Field::UnicastPeer(None)) => {}
            }
        }
        (Op::Delete, field) => {
            let Some(index) = position else {
                return Err(Error::cli(format!(
                    "vrrp {} is not configured in {}",
                    cmd.vrid, cmd.vrf
                )));
            };
            let Some(field) = field else {
                defs.remove(index);
                return Ok(());
            };
            let def = &mut defs[index];
            match field {
                Field::Interface(_) => def.interface.clear(),
                Field::AdvertisementInterval(_) => def.advertisement_interval = 0,
                Field::Preempt => def.preempt = false,
                Field::Priority(_) => def.priority = 0,
                Field::State(_) => def.state = Role::default(),
                Field::VirtualAddress(_) => def.virtual_address = None,
                Field::UnicastPeer(Some(address)) => {
                    def.unicast_peer.retain(|p| p.address != address)
                }
                Field::UnicastPeer(None) => def.unicast_peer.clear(),
            }
        }
    }
    Ok(())
}

fn commit_path(vrf: &str) -> Vec<String> {
    vec![
        "vrf".to_string(),
        "name".to_string(),
        vrf.to_string(),
        "vrrp".to_string(),
    ]
}

#[derive(Default)]
struct Trees {
    candidate: Tree,
    committed: Tree,
}

impl Trees {
    fn changed_vrfs(&self) -> Vec<String> {
        let vrfs: BTreeSet<&String> = self.candidate.keys().chain(self.committed.keys()).collect();
        let empty = Vec::new();
        vrfs.into_iter()
            .filter(|vrf| {
                self.candidate.get(*vrf).unwrap_or(&empty) != self.committed.get(*vrf).unwrap_or(&empty)
            })
            .cloned()
            .collect()
    }

    fn prune(&mut self) {
        self.candidate.retain(|_, defs| !defs.is_empty());
        self.committed.retain(|_, defs| !defs.is_empty());
    }
}

/// Candidate/committed VRRP configuration feeding the [`Reconciler`]
pub struct CandidateConfig {
    reconciler: Reconciler,
    trees: Mutex<Trees>,
}

impl CandidateConfig {
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            reconciler,
            trees: Mutex::new(Trees::default()),
        }
    }

    /// Apply a document committed through the local commit pipeline.
    ///
    /// The committed and candidate trees of the VRF both take the new
    /// definitions so a later candidate commit does not revert them.
    pub async fn apply_commit(&self, path: &[String], json: &str) -> Result<Vec<InstanceOutcome>> {
        let mut trees = self.trees.lock().await;

        let desired = decode_document(json)?;
        let outcomes = self.reconciler.apply_commit(path, json).await?;
        if let Some(vrf) = path.get(2) {
            trees.candidate.insert(vrf.clone(), desired.clone());
            trees.committed.insert(vrf.clone(), desired);
            trees.prune();
        }
        Ok(outcomes)
    }

    /// Committed definitions of `vrf`
    pub async fn committed(&self, vrf: &str) -> Vec<VirtualRouterDefinition> {
        self.trees
            .lock()
            .await
            .committed
            .get(vrf)
            .cloned()
            .unwrap_or_default()
    }

    /// Stop every instance and forget the configuration they came from.
    ///
    /// Runs under the commit lock so no reconcile can repopulate the
    /// registry while it is drained.
    pub async fn stop_all(&self) {
        let mut trees = self.trees.lock().await;
        trees.candidate.clear();
        trees.committed.clear();
        self.reconciler.stop_all().await;
    }

    /// Whether the candidate differs from the committed configuration
    pub async fn has_changes(&self) -> bool {
        !self.trees.lock().await.changed_vrfs().is_empty()
    }
}

#[async_trait]
impl CommandExecutor for CandidateConfig {
    async fn exec_line(&self, line: &str) -> Result<()> {
        let cmd = parse_line(line)?;
        debug!(line = %line, "Applying configuration line");
        apply(&mut self.trees.lock().await.candidate, cmd)
    }

    async fn commit(&self) -> Result<()> {
        let mut trees = self.trees.lock().await;

        for vrf in trees.changed_vrfs() {
            let desired = trees.candidate.get(&vrf).cloned().unwrap_or_default();
            let json = serde_json::to_string(&desired)?;
            let outcomes = self.reconciler.apply_commit(&commit_path(&vrf), &json).await?;
            info!(vrf = %vrf, instances = outcomes.len(), "Committed VRRP configuration");
        }

        trees.committed = trees.candidate.clone();
        trees.prune();
        Ok(())
    }
}
