//! Daemon configuration rendering.
//!
//! Produces the keepalived configuration for one virtual router plus the
//! per-role, per-VRF notify-script symlink the configuration refers to.

use crate::types::{Role, VirtualRouterDefinition};
use common::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Filesystem layout used for generated artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPaths {
    pub config_dir: PathBuf,
    pub run_dir: PathBuf,
    pub script_dir: PathBuf,
    pub track_script: PathBuf,
}

impl Default for RenderPaths {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/etc/keepalived"),
            run_dir: PathBuf::from("/var/run"),
            script_dir: PathBuf::from("/usr/bin"),
            track_script: PathBuf::from("/usr/bin/keepalived_track.sh"),
        }
    }
}

/// Everything needed to start one daemon instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigArtifact {
    pub interface: String,
    pub vrf: String,
    pub config_path: PathBuf,
    pub pid_file: PathBuf,
    pub vrrp_pid_file: PathBuf,
    /// Shared per-role notify script
    pub notify_target: PathBuf,
    /// Per-role, per-VRF symlink pointing at `notify_target`
    pub notify_link: PathBuf,
    pub content: String,
}

/// Renders definitions into [`ConfigArtifact`]s and writes them out
#[derive(Debug, Clone, Default)]
pub struct ConfigRenderer {
    paths: RenderPaths,
}

impl ConfigRenderer {
    pub fn new(paths: RenderPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &RenderPaths {
        &self.paths
    }

    /// Build the artifact for `def` without touching the filesystem.
    pub fn render(&self, def: &VirtualRouterDefinition, vrf: &str, name: &str) -> ConfigArtifact {
        let role = def.state.as_str();
        let notify_link = self
            .paths
            .script_dir
            .join(format!("keepalived_{}_{}.sh", role, vrf));

        ConfigArtifact {
            interface: def.interface.clone(),
            vrf: vrf.to_string(),
            config_path: self
                .paths
                .config_dir
                .join(format!("keepalived-{}.conf", def.interface)),
            pid_file: self
                .paths
                .run_dir
                .join(format!("keepalived-{}.pid", def.interface)),
            vrrp_pid_file: self
                .paths
                .run_dir
                .join(format!("keepalived_vrrp-{}.pid", def.interface)),
            notify_target: self.paths.script_dir.join(format!("keepalived_{}.sh", role)),
            content: render_config(def, vrf, name, &notify_link, &self.paths.track_script),
            notify_link,
        }
    }

    /// Render `def` and write the symlink and configuration file.
    pub async fn prepare(
        &self,
        def: &VirtualRouterDefinition,
        vrf: &str,
        name: &str,
    ) -> Result<ConfigArtifact> {
        let artifact = self.render(def, vrf, name);

        replace_symlink(&artifact.notify_target, &artifact.notify_link).await?;
        tokio::fs::write(&artifact.config_path, &artifact.content)
            .await
            .map_err(|e| {
                Error::render(format!(
                    "failed to write {}: {}",
                    artifact.config_path.display(),
                    e
                ))
            })?;

        debug!(
            vrf = %vrf,
            interface = %artifact.interface,
            config = %artifact.config_path.display(),
            "Wrote keepalived configuration"
        );
        Ok(artifact)
    }
}

async fn replace_symlink(target: &Path, link: &Path) -> Result<()> {
    match tokio::fs::remove_file(link).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(Error::render(format!(
                "failed to remove {}: {}",
                link.display(),
                e
            )));
        }
    }
    tokio::fs::symlink(target, link).await.map_err(|e| {
        Error::render(format!("failed to link {}: {}", link.display(), e))
    })
}

/// Render the keepalived configuration text.
pub fn render_config(
    def: &VirtualRouterDefinition,
    vrf: &str,
    name: &str,
    notify: &Path,
    track_script: &Path,
) -> String {
    let mut lines = config_lines(def, vrf, name, notify, track_script);
    lines.push(String::new());
    lines.join("\n")
}

fn config_lines(
    def: &VirtualRouterDefinition,
    vrf: &str,
    name: &str,
    notify: &Path,
    track_script: &Path,
) -> Vec<String> {
    let mut out = vec![
        "# Do not edit!".to_string(),
        "# This file is automatically generated by vrrp-server.".to_string(),
        "#".to_string(),
        "vrrp_script bgp_track {".to_string(),
        format!("    script {}", track_script.display()),
        "    interval 1".to_string(),
        "    fall 3".to_string(),
        "    rise 3".to_string(),
    ];
    if def.preempt {
        out.push("    weight 50".to_string());
    }
    out.push("}".to_string());
    out.push(String::new());

    let state = match def.state {
        Role::Master => "MASTER",
        Role::Backup => "BACKUP",
    };
    out.extend([
        format!("vrrp_instance {} {{", name),
        format!("    notify {}", notify.display()),
        format!("    state {}", state),
        format!("    interface {}", vrf),
        format!("    virtual_router_id {}", def.vrid),
        format!("    priority {}", def.priority),
        format!("    advert_int {}", def.effective_advert_interval()),
        "    use_vmac".to_string(),
        "    vmac_xmit_base".to_string(),
    ]);
    if !def.preempt {
        out.push("    nopreempt".to_string());
    }
    out.push("    unicast_peer {".to_string());
    out.extend(def.unicast_peer.iter().map(|peer| format!("        {}", peer.address)));
    out.push("    }".to_string());
    out.push("    virtual_ipaddress {".to_string());
    if let Some(vip) = def.virtual_address {
        out.push(format!("        {} dev {}", vip, def.interface));
    }
    out.extend([
        "    }".to_string(),
        "    track_script {".to_string(),
        "        bgp_track".to_string(),
        "    }".to_string(),
        "    track_interface {".to_string(),
        format!("        {}", def.interface),
        "    }".to_string(),
        "}".to_string(),
    ]);
    out
}
