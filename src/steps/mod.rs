//! One executor per catalog step, dispatched over the closed `StepId` enum.

mod local;
mod server;
mod verify;

use crate::error::AppError;
use crate::wireguard;
use crate::workflow::{StepId, StepOutcome, StepRequest};

/// Run one provisioning step. Blocking; the engine calls this off its loop.
///
/// The tunnel material is built on first use and returned through the outcome
/// so the engine pins one key set for the rest of the run.
pub fn execute(req: StepRequest) -> Result<StepOutcome, AppError> {
    let built_here = req.wg.is_none();
    let wg = match &req.wg {
        Some(wg) => wg.clone(),
        None => wireguard::build_tunnel_config(&req.host)?,
    };

    let mut outcome = StepOutcome::default();
    match req.step {
        StepId::DetectPrivilegedMode => server::detect_privileged_mode(&req, &mut outcome)?,
        StepId::EnsureLocalSshKey => local::ensure_ssh_key(&mut outcome)?,
        StepId::CreateArcUser => server::create_arc_user(&req)?,
        StepId::AddArcToSudoers => server::add_arc_to_sudoers(&req)?,
        StepId::CreateArcHushlogin => server::create_arc_hushlogin(&req)?,
        StepId::AddArcAuthorizedKey => verify::add_arc_authorized_key(&req)?,
        StepId::VerifyArcSshLogin => verify::verify_arc_ssh_login(&req)?,
        StepId::InstallServerZsh => server::install_zsh(&req)?,
        StepId::SetServerDefaultShell => server::set_default_shell(&req)?,
        StepId::InstallServerArcZshPrompt => server::install_arc_zsh_prompt(&req)?,
        StepId::InstallServerArcTmux => server::install_arc_tmux_config(&req)?,
        StepId::DetectServerOs => server::detect_os(&req)?,
        StepId::InstallServerWireguard => server::install_wireguard(&req)?,
        StepId::WriteServerWgConf => server::write_wg_conf(&req, &wg)?,
        StepId::OpenServerFirewall => server::open_firewall(&req)?,
        StepId::EnableServerWg => server::enable_wg(&req)?,
        StepId::ApplyServerNftables => server::apply_nftables_redirect(&req)?,
        StepId::AddLocalHostsAliases => local::add_hosts_aliases(&req)?,
        StepId::InstallLocalArcPrompt => local::install_arc_prompt()?,
        StepId::InstallLocalZsh => local::install_zsh()?,
        StepId::SetLocalDefaultShell => local::set_default_shell()?,
        StepId::DetectLocalOs => local::detect_os()?,
        StepId::InstallLocalWireguard => local::install_wireguard()?,
        StepId::WriteLocalWgConf => local::write_wg_conf(&wg)?,
        StepId::EnableLocalWg => local::enable_wg()?,
        StepId::VerifyTunnelConnectivity => {
            verify::verify_tunnel_connectivity(&req, &wg, &mut outcome)?
        }
        StepId::ResolveArcUidGid => server::resolve_arc_uid_gid(&req)?,
        StepId::InstallRemoteNfs => server::install_nfs_server(&req)?,
        StepId::ExportRemoteArcNfs => server::export_arc_nfs(&req)?,
        StepId::InstallLocalNfsClient => local::install_nfs_client()?,
        StepId::ConfigureLocalArcAutomount => local::configure_arc_automount()?,
        StepId::VerifyLocalArcNfsMount => verify::verify_local_arc_nfs_mount()?,
        StepId::ConfigureRemoteWaypipe => server::configure_waypipe_runtime(&req)?,
        StepId::ConfigureLocalWaypipe => local::configure_waypipe_tunnel(&req)?,
    }

    if built_here {
        outcome.wg = Some(wg);
    }
    Ok(outcome)
}
