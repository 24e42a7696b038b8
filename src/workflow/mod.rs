pub mod engine;

use crate::error::AppError;
use crate::wireguard::TunnelConfig;

/// Every provisioning action the setup workflow can run, in a closed set so
/// dispatch stays exhaustive at compile time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum StepId {
    DetectPrivilegedMode,
    EnsureLocalSshKey,
    CreateArcUser,
    AddArcToSudoers,
    CreateArcHushlogin,
    AddArcAuthorizedKey,
    VerifyArcSshLogin,
    InstallServerZsh,
    SetServerDefaultShell,
    InstallServerArcZshPrompt,
    InstallServerArcTmux,
    DetectServerOs,
    InstallServerWireguard,
    WriteServerWgConf,
    OpenServerFirewall,
    EnableServerWg,
    ApplyServerNftables,
    AddLocalHostsAliases,
    InstallLocalArcPrompt,
    InstallLocalZsh,
    SetLocalDefaultShell,
    DetectLocalOs,
    InstallLocalWireguard,
    WriteLocalWgConf,
    EnableLocalWg,
    VerifyTunnelConnectivity,
    ResolveArcUidGid,
    InstallRemoteNfs,
    ExportRemoteArcNfs,
    InstallLocalNfsClient,
    ConfigureLocalArcAutomount,
    VerifyLocalArcNfsMount,
    ConfigureRemoteWaypipe,
    ConfigureLocalWaypipe,
}

impl StepId {
    pub const ALL: [StepId; 34] = [
        StepId::DetectPrivilegedMode,
        StepId::EnsureLocalSshKey,
        StepId::CreateArcUser,
        StepId::AddArcToSudoers,
        StepId::CreateArcHushlogin,
        StepId::AddArcAuthorizedKey,
        StepId::VerifyArcSshLogin,
        StepId::InstallServerZsh,
        StepId::SetServerDefaultShell,
        StepId::InstallServerArcZshPrompt,
        StepId::InstallServerArcTmux,
        StepId::DetectServerOs,
        StepId::InstallServerWireguard,
        StepId::WriteServerWgConf,
        StepId::OpenServerFirewall,
        StepId::EnableServerWg,
        StepId::ApplyServerNftables,
        StepId::AddLocalHostsAliases,
        StepId::InstallLocalArcPrompt,
        StepId::InstallLocalZsh,
        StepId::SetLocalDefaultShell,
        StepId::DetectLocalOs,
        StepId::InstallLocalWireguard,
        StepId::WriteLocalWgConf,
        StepId::EnableLocalWg,
        StepId::VerifyTunnelConnectivity,
        StepId::ResolveArcUidGid,
        StepId::InstallRemoteNfs,
        StepId::ExportRemoteArcNfs,
        StepId::InstallLocalNfsClient,
        StepId::ConfigureLocalArcAutomount,
        StepId::VerifyLocalArcNfsMount,
        StepId::ConfigureRemoteWaypipe,
        StepId::ConfigureLocalWaypipe,
    ];

    /// Stable namespaced identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            StepId::DetectPrivilegedMode => "server.detect_privileged_mode",
            StepId::EnsureLocalSshKey => "local.ensure_ssh_key",
            StepId::CreateArcUser => "server.create_arc_user",
            StepId::AddArcToSudoers => "server.add_arc_to_sudoers",
            StepId::CreateArcHushlogin => "server.create_arc_hushlogin",
            StepId::AddArcAuthorizedKey => "verify.add_arc_authorized_key",
            StepId::VerifyArcSshLogin => "verify.verify_arc_ssh_login",
            StepId::InstallServerZsh => "server.install_zsh",
            StepId::SetServerDefaultShell => "server.set_zsh_default_shell",
            StepId::InstallServerArcZshPrompt => "server.install_arc_zsh_prompt",
            StepId::InstallServerArcTmux => "server.install_arc_tmux_config",
            StepId::DetectServerOs => "server.detect_os",
            StepId::InstallServerWireguard => "server.install_wireguard",
            StepId::WriteServerWgConf => "server.write_wg_conf",
            StepId::OpenServerFirewall => "server.open_ufw_wireguard",
            StepId::EnableServerWg => "server.enable_wg",
            StepId::ApplyServerNftables => "server.apply_nftables_redirect",
            StepId::AddLocalHostsAliases => "local.add_hosts_aliases",
            StepId::InstallLocalArcPrompt => "local.install_arc_prompt",
            StepId::InstallLocalZsh => "local.install_zsh",
            StepId::SetLocalDefaultShell => "local.set_zsh_default_shell",
            StepId::DetectLocalOs => "local.detect_os",
            StepId::InstallLocalWireguard => "local.install_wireguard",
            StepId::WriteLocalWgConf => "local.write_wg_conf",
            StepId::EnableLocalWg => "local.enable_wg",
            StepId::VerifyTunnelConnectivity => "verify.verify_tunnel_connectivity",
            StepId::ResolveArcUidGid => "server.resolve_arc_uid_gid",
            StepId::InstallRemoteNfs => "server.install_nfs_server",
            StepId::ExportRemoteArcNfs => "server.export_arc_nfs",
            StepId::InstallLocalNfsClient => "local.install_nfs_client",
            StepId::ConfigureLocalArcAutomount => "local.configure_arc_automount",
            StepId::VerifyLocalArcNfsMount => "verify.verify_arc_nfs_mount",
            StepId::ConfigureRemoteWaypipe => "server.configure_waypipe_runtime",
            StepId::ConfigureLocalWaypipe => "local.configure_waypipe_tunnel",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StepDefinition {
    pub id: StepId,
    pub label: &'static str,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StepState {
    Pending,
    Running,
    Done,
    Failed,
}

#[derive(Clone, Debug)]
pub struct Step {
    pub id: StepId,
    pub label: &'static str,
    pub state: StepState,
    pub err: Option<String>,
}

/// The fixed, ordered step catalog. Bootstrap trust first, then the server
/// side, then the local side, then cross-machine verification and the
/// NFS/waypipe extras.
pub fn definitions() -> Vec<StepDefinition> {
    vec![
        StepDefinition { id: StepId::DetectPrivilegedMode, label: "Server: detect privileged mode" },
        StepDefinition { id: StepId::EnsureLocalSshKey, label: "Local: ensure SSH key" },
        StepDefinition { id: StepId::CreateArcUser, label: "Server: create arc user" },
        StepDefinition { id: StepId::AddArcToSudoers, label: "Server: add arc to sudoers" },
        StepDefinition { id: StepId::CreateArcHushlogin, label: "Server: create ~/.hushlogin for arc" },
        StepDefinition { id: StepId::AddArcAuthorizedKey, label: "Verify: add arc authorized_keys" },
        StepDefinition { id: StepId::VerifyArcSshLogin, label: "Verify: verify arc SSH login" },
        StepDefinition { id: StepId::InstallServerZsh, label: "Server: install zsh" },
        StepDefinition { id: StepId::SetServerDefaultShell, label: "Server: set zsh as default shell for arc" },
        StepDefinition { id: StepId::InstallServerArcZshPrompt, label: "Server: install ARC zsh prompt" },
        StepDefinition { id: StepId::InstallServerArcTmux, label: "Server: install ARC tmux config" },
        StepDefinition { id: StepId::DetectServerOs, label: "Server: detect OS" },
        StepDefinition { id: StepId::InstallServerWireguard, label: "Server: install WireGuard" },
        StepDefinition { id: StepId::WriteServerWgConf, label: "Server: write wg0.conf" },
        StepDefinition { id: StepId::OpenServerFirewall, label: "Server: open firewall (ufw)" },
        StepDefinition { id: StepId::EnableServerWg, label: "Server: enable wg0" },
        StepDefinition { id: StepId::ApplyServerNftables, label: "Server: apply nftables redirect service" },
        StepDefinition { id: StepId::AddLocalHostsAliases, label: "Local: add hosts aliases" },
        StepDefinition { id: StepId::InstallLocalArcPrompt, label: "Local: install ARC local prompt" },
        StepDefinition { id: StepId::InstallLocalZsh, label: "Local: install zsh" },
        StepDefinition { id: StepId::SetLocalDefaultShell, label: "Local: set zsh as default shell" },
        StepDefinition { id: StepId::DetectLocalOs, label: "Local: detect OS" },
        StepDefinition { id: StepId::InstallLocalWireguard, label: "Local: install WireGuard" },
        StepDefinition { id: StepId::WriteLocalWgConf, label: "Local: write wg0.conf" },
        StepDefinition { id: StepId::EnableLocalWg, label: "Local: enable wg0" },
        StepDefinition { id: StepId::VerifyTunnelConnectivity, label: "Verify: verify tunnel connectivity" },
        StepDefinition { id: StepId::ResolveArcUidGid, label: "Server: resolve arc UID/GID for NFS squash" },
        StepDefinition { id: StepId::InstallRemoteNfs, label: "Server: install NFS server" },
        StepDefinition { id: StepId::ExportRemoteArcNfs, label: "Server: export /home/arc over NFS (WireGuard only)" },
        StepDefinition { id: StepId::InstallLocalNfsClient, label: "Local: install NFS client" },
        StepDefinition { id: StepId::ConfigureLocalArcAutomount, label: "Local: configure /home/arc automount" },
        StepDefinition { id: StepId::VerifyLocalArcNfsMount, label: "Verify: verify /home/arc NFS mount" },
        StepDefinition { id: StepId::ConfigureRemoteWaypipe, label: "Server: configure waypipe runtime" },
        StepDefinition { id: StepId::ConfigureLocalWaypipe, label: "Local: configure persistent waypipe tunnel" },
    ]
}

/// Validated step catalog, built once at startup. A violation here is a
/// build-time mistake surfaced as a fatal configuration error.
pub struct Registry {
    defs: Vec<StepDefinition>,
}

impl Registry {
    pub fn new() -> Result<Self, AppError> {
        let defs = definitions();
        validate(&defs)?;
        Ok(Self { defs })
    }

    pub fn definitions(&self) -> &[StepDefinition] {
        &self.defs
    }

    /// A fresh all-Pending step list for one workflow run.
    pub fn fresh_steps(&self) -> Vec<Step> {
        self.defs
            .iter()
            .map(|def| Step {
                id: def.id,
                label: def.label,
                state: StepState::Pending,
                err: None,
            })
            .collect()
    }
}

pub fn validate(defs: &[StepDefinition]) -> Result<(), AppError> {
    if defs.is_empty() {
        return Err(AppError::Registry("empty setup step definitions".into()));
    }
    let mut seen: Vec<StepId> = Vec::with_capacity(defs.len());
    for (i, def) in defs.iter().enumerate() {
        if def.id.as_str().is_empty() {
            return Err(AppError::Registry(format!("step {i} has empty id")));
        }
        if def.label.trim().is_empty() {
            return Err(AppError::Registry(format!(
                "step {:?} has empty label",
                def.id.as_str()
            )));
        }
        if seen.contains(&def.id) {
            return Err(AppError::Registry(format!(
                "duplicate step id: {:?}",
                def.id.as_str()
            )));
        }
        seen.push(def.id);
    }
    // Every executor variant needs a catalog row, and vice versa.
    for id in StepId::ALL {
        if !seen.contains(&id) {
            return Err(AppError::Registry(format!(
                "executor without step definition: {:?}",
                id.as_str()
            )));
        }
    }
    for id in &seen {
        if !StepId::ALL.contains(id) {
            return Err(AppError::Registry(format!(
                "missing executor for step id: {:?}",
                id.as_str()
            )));
        }
    }
    Ok(())
}

/// Everything a step executor may need, passed by value into its task.
#[derive(Clone, Debug)]
pub struct StepRequest {
    pub bootstrap_user: String,
    pub host: String,
    pub addr: String,
    pub password: String,
    pub use_sudo: bool,
    pub pub_key_line: String,
    pub wg: Option<TunnelConfig>,
    pub step: StepId,
}

/// Discoveries a step hands back. `None` fields leave engine state untouched.
#[derive(Debug, Default)]
pub struct StepOutcome {
    pub use_sudo: Option<bool>,
    pub pub_key_line: Option<String>,
    pub ready_as: Option<String>,
    pub wg: Option<TunnelConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_valid() {
        Registry::new().expect("catalog must validate");
    }

    #[test]
    fn catalog_covers_every_step_id_exactly_once() {
        let defs = definitions();
        assert_eq!(defs.len(), StepId::ALL.len());
        for id in StepId::ALL {
            assert_eq!(defs.iter().filter(|d| d.id == id).count(), 1, "{:?}", id);
        }
    }

    #[test]
    fn ids_are_unique_and_namespaced() {
        let defs = definitions();
        let mut ids: Vec<&str> = defs.iter().map(|d| d.id.as_str()).collect();
        ids.sort_unstable();
        let before = ids.len();
        ids.dedup();
        assert_eq!(before, ids.len());
        for id in ids {
            assert!(
                id.starts_with("server.") || id.starts_with("local.") || id.starts_with("verify."),
                "unnamespaced id {id:?}"
            );
        }
    }

    #[test]
    fn validate_rejects_duplicates() {
        let mut defs = definitions();
        defs.push(StepDefinition {
            id: StepId::CreateArcUser,
            label: "again",
        });
        let err = validate(&defs).unwrap_err();
        assert!(err.to_string().contains("duplicate step id"));
    }

    #[test]
    fn validate_rejects_missing_definition() {
        let defs: Vec<StepDefinition> = definitions()
            .into_iter()
            .filter(|d| d.id != StepId::EnableLocalWg)
            .collect();
        let err = validate(&defs).unwrap_err();
        assert!(err.to_string().contains("executor without step definition"));
    }

    #[test]
    fn validate_rejects_empty_label() {
        let mut defs = definitions();
        defs[0].label = "  ";
        let err = validate(&defs).unwrap_err();
        assert!(err.to_string().contains("empty label"));
    }

    #[test]
    fn fresh_steps_start_pending() {
        let reg = Registry::new().unwrap();
        for step in reg.fresh_steps() {
            assert_eq!(step.state, StepState::Pending);
            assert!(step.err.is_none());
        }
    }
}
