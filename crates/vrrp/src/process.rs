//! Daemon process lifecycle.
//!
//! [`Supervisor`] is the spawn/register/unregister contract the reconciler
//! relies on. [`ProcessSupervisor`] implements it with `tokio::process`,
//! restarting registered daemons that exit. [`DaemonLauncher`] turns a
//! rendered [`ConfigArtifact`] into a supervised keepalived process.

use crate::render::ConfigArtifact;
use async_trait::async_trait;
use common::{Error, Result};
use dashmap::DashMap;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Command used to enter a VRF network namespace.
pub const IP_CMD: &str = "/sbin/ip";

/// Grace period between SIGTERM and SIGKILL
const TERM_GRACE: Duration = Duration::from_secs(2);

const EXIT_POLL: Duration = Duration::from_millis(20);

/// How to launch one supervised process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub name: String,
    pub binary: String,
    pub args: Vec<String>,
    /// Network namespace the process runs in
    pub vrf: Option<String>,
    /// PID file of the forked worker, signalled on stop
    pub kill_pid_file: Option<PathBuf>,
    /// Delay before restarting a process that exited
    pub start_delay: Duration,
}

/// Reference to a process owned by a [`Supervisor`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    id: u64,
    name: String,
}

impl ProcessHandle {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Process supervision contract
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Launch a process
    async fn spawn(&self, spec: ProcessSpec) -> Result<ProcessHandle>;

    /// Start supervising a spawned process
    async fn register(&self, handle: &ProcessHandle) -> Result<()>;

    /// Stop supervising and terminate; unknown handles are ignored
    async fn unregister(&self, handle: &ProcessHandle);
}

struct Managed {
    spec: ProcessSpec,
    /// Child before registration; the watcher task owns it afterwards.
    child: Mutex<Option<Child>>,
    /// Watcher task; finishes once the process is terminated.
    watcher: Mutex<Option<JoinHandle<()>>>,
    stop: Notify,
}

/// [`Supervisor`] backed by `tokio::process`
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    processes: DashMap<u64, Arc<Managed>>,
    next_id: AtomicU64,
    netns_exec: bool,
}

impl ProcessSupervisor {
    /// Create a supervisor. With `netns_exec`, processes that carry a VRF
    /// are started through `ip netns exec <vrf>`.
    pub fn new(netns_exec: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                processes: DashMap::new(),
                next_id: AtomicU64::new(1),
                netns_exec,
            }),
        }
    }

    /// Number of processes currently known to the supervisor
    pub fn len(&self) -> usize {
        self.inner.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.processes.is_empty()
    }

    #[cfg(test)]
    fn command(&self, spec: &ProcessSpec) -> Command {
        self.inner.command(spec)
    }
}

impl Inner {
    fn command(&self, spec: &ProcessSpec) -> Command {
        let mut cmd = match (&spec.vrf, self.netns_exec) {
            (Some(vrf), true) => {
                let mut cmd = Command::new(IP_CMD);
                cmd.args(["netns", "exec", vrf.as_str(), spec.binary.as_str()]);
                cmd
            }
            _ => Command::new(&spec.binary),
        };
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    fn launch(&self, spec: &ProcessSpec) -> Result<Child> {
        self.command(spec)
            .spawn()
            .map_err(|e| Error::process(format!("failed to spawn {}: {}", spec.binary, e)))
    }

    async fn watch(self: Arc<Self>, id: u64, managed: Arc<Managed>, mut child: Child) {
        let name = managed.spec.name.clone();
        loop {
            tokio::select! {
                status = child.wait() => {
                    warn!(process = %name, status = ?status, "Supervised process exited");
                }
                _ = managed.stop.notified() => {
                    terminate(&mut child, managed.spec.kill_pid_file.as_deref()).await;
                    info!(process = %name, "Supervised process stopped");
                    return;
                }
            }

            tokio::select! {
                _ = sleep(managed.spec.start_delay) => {}
                _ = managed.stop.notified() => {
                    if let Some(worker) = worker_pid(managed.spec.kill_pid_file.as_deref()) {
                        stop_worker(worker).await;
                    }
                    return;
                }
            }

            if !self.processes.contains_key(&id) {
                return;
            }
            match self.launch(&managed.spec) {
                Ok(restarted) => {
                    info!(process = %name, "Restarted supervised process");
                    child = restarted;
                }
                Err(e) => {
                    warn!(process = %name, error = %e, "Failed to restart process");
                    self.processes.remove(&id);
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Supervisor for ProcessSupervisor {
    async fn spawn(&self, spec: ProcessSpec) -> Result<ProcessHandle> {
        let child = self.inner.launch(&spec)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = ProcessHandle::new(id, spec.name.clone());

        debug!(process = %spec.name, pid = ?child.id(), "Spawned process");
        self.inner.processes.insert(
            id,
            Arc::new(Managed {
                spec,
                child: Mutex::new(Some(child)),
                watcher: Mutex::new(None),
                stop: Notify::new(),
            }),
        );
        Ok(handle)
    }

    async fn register(&self, handle: &ProcessHandle) -> Result<()> {
        let managed = self
            .inner
            .processes
            .get(&handle.id())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::process(format!("unknown process {}", handle.name())))?;

        // Held until the watcher handle is stored so unregister always finds it.
        let mut slot = managed.child.lock().await;
        let child = slot
            .take()
            .ok_or_else(|| Error::process(format!("{} is already registered", handle.name())))?;

        let watcher = tokio::spawn(Arc::clone(&self.inner).watch(
            handle.id(),
            Arc::clone(&managed),
            child,
        ));
        *managed.watcher.lock().await = Some(watcher);
        Ok(())
    }

    async fn unregister(&self, handle: &ProcessHandle) {
        let Some((_, managed)) = self.inner.processes.remove(&handle.id()) else {
            debug!(process = %handle.name(), "Unregister of unknown process ignored");
            return;
        };

        // Never registered: the child is still ours to kill.
        let unwatched = managed.child.lock().await.take();
        if let Some(mut child) = unwatched {
            terminate(&mut child, managed.spec.kill_pid_file.as_deref()).await;
            return;
        }

        managed.stop.notify_one();
        let watcher = managed.watcher.lock().await.take();
        if let Some(watcher) = watcher {
            if let Err(e) = watcher.await {
                warn!(process = %handle.name(), error = %e, "Process watcher failed");
            }
        }
    }
}

/// Stop `child` and the worker named in `kill_pid_file`; returns once both are gone.
async fn terminate(child: &mut Child, kill_pid_file: Option<&Path>) {
    let worker = worker_pid(kill_pid_file);
    if let Some(worker) = worker {
        send_signal(worker, Signal::SIGTERM);
    }

    let exited = match child.id() {
        Some(pid) => {
            send_signal(Pid::from_raw(pid as i32), Signal::SIGTERM);
            timeout(TERM_GRACE, child.wait()).await.is_ok()
        }
        None => false,
    };
    if !exited {
        if let Err(e) = child.kill().await {
            debug!(error = %e, "Failed to kill process");
        }
    }

    if let Some(worker) = worker {
        stop_worker(worker).await;
    }
}

/// SIGTERM `worker`, wait out the grace period, then SIGKILL
async fn stop_worker(worker: Pid) {
    send_signal(worker, Signal::SIGTERM);

    let gone = timeout(TERM_GRACE, async {
        while signal::kill(worker, None).is_ok() {
            sleep(EXIT_POLL).await;
        }
    })
    .await
    .is_ok();

    if !gone {
        send_signal(worker, Signal::SIGKILL);
    }
}

fn send_signal(pid: Pid, sig: Signal) {
    if let Err(e) = signal::kill(pid, sig) {
        debug!(pid = pid.as_raw(), signal = ?sig, error = %e, "Failed to signal process");
    }
}

fn worker_pid(path: Option<&Path>) -> Option<Pid> {
    let path = path?;
    let contents = std::fs::read_to_string(path).ok()?;
    match contents.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Some(Pid::from_raw(pid)),
        _ => {
            warn!(path = %path.display(), "Malformed PID file");
            None
        }
    }
}

/// Starts and stops keepalived instances
#[derive(Clone)]
pub struct DaemonLauncher {
    supervisor: Arc<dyn Supervisor>,
    binary: String,
    start_delay: Duration,
}

impl DaemonLauncher {
    pub fn new(supervisor: Arc<dyn Supervisor>, binary: impl Into<String>, start_delay: Duration) -> Self {
        Self {
            supervisor,
            binary: binary.into(),
            start_delay,
        }
    }

    /// Build the process spec for a rendered artifact
    pub fn spec(&self, artifact: &ConfigArtifact) -> ProcessSpec {
        ProcessSpec {
            name: format!("keepalived-{}", artifact.interface),
            binary: self.binary.clone(),
            args: daemon_args(artifact),
            vrf: Some(artifact.vrf.clone()),
            kill_pid_file: Some(artifact.vrrp_pid_file.clone()),
            start_delay: self.start_delay,
        }
    }

    /// Spawn and register the daemon for `artifact`
    pub async fn start(&self, artifact: &ConfigArtifact) -> Result<ProcessHandle> {
        let handle = self.supervisor.spawn(self.spec(artifact)).await?;
        if let Err(e) = self.supervisor.register(&handle).await {
            self.supervisor.unregister(&handle).await;
            return Err(e);
        }
        info!(vrf = %artifact.vrf, interface = %artifact.interface, "Started keepalived");
        Ok(handle)
    }

    /// Unregister and terminate; stopping a stopped process is a no-op
    pub async fn stop(&self, handle: &ProcessHandle) {
        self.supervisor.unregister(handle).await;
    }
}

/// keepalived arguments for one instance
pub fn daemon_args(artifact: &ConfigArtifact) -> Vec<String> {
    vec![
        "--vrrp".to_string(),
        "-D".to_string(),
        "-n".to_string(),
        "-f".to_string(),
        artifact.config_path.display().to_string(),
        "-p".to_string(),
        artifact.pid_file.display().to_string(),
        "-r".to_string(),
        artifact.vrrp_pid_file.display().to_string(),
    ]
}
