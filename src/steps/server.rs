//! Remote-side steps. Bootstrap steps dial with the operator's password; the
//! rest log in as arc with the installed key and elevate via `sudo -n`.

use crate::config::{ARC_USER, WG_INTERFACE, WG_PORT};
use crate::error::AppError;
use crate::nfs;
use crate::nftables;
use crate::platform;
use crate::ssh;
use crate::templates;
use crate::wireguard::TunnelConfig;
use crate::workflow::{StepOutcome, StepRequest};
use ssh2::Session;

pub fn detect_privileged_mode(
    req: &StepRequest,
    outcome: &mut StepOutcome,
) -> Result<(), AppError> {
    let sess = ssh::dial_bootstrap(&req.bootstrap_user, &req.addr, &req.password)?;
    let use_sudo = ssh::can_run_privileged(&req.bootstrap_user, &sess, &req.password)?;
    outcome.use_sudo = Some(use_sudo);
    Ok(())
}

pub fn create_arc_user(req: &StepRequest) -> Result<(), AppError> {
    let sess = ssh::dial_bootstrap(&req.bootstrap_user, &req.addr, &req.password)?;
    let script = templates::ensure_arc_user_script();
    ssh::run_remote(&sess, &script, req.use_sudo, &req.password)
        .map_err(|e| AppError::Remote(format!("create user {ARC_USER:?} failed: {e}")))?;
    Ok(())
}

pub fn add_arc_to_sudoers(req: &StepRequest) -> Result<(), AppError> {
    let sess = ssh::dial_bootstrap(&req.bootstrap_user, &req.addr, &req.password)?;
    let script = templates::ensure_arc_sudoers_script();
    ssh::run_remote(&sess, &script, req.use_sudo, &req.password)
        .map_err(|e| AppError::Remote(format!("install sudoers failed: {e}")))?;
    Ok(())
}

pub fn create_arc_hushlogin(req: &StepRequest) -> Result<(), AppError> {
    let sess = ssh::dial_bootstrap(&req.bootstrap_user, &req.addr, &req.password)?;
    let script = templates::ensure_arc_hushlogin_script();
    ssh::run_remote(&sess, &script, req.use_sudo, &req.password)
        .map_err(|e| AppError::Remote(format!("install hushlogin failed: {e}")))?;
    Ok(())
}

pub fn install_zsh(req: &StepRequest) -> Result<(), AppError> {
    let sess = ssh::dial_arc(&req.addr)?;
    let osid = platform::remote_os_id(&sess)?;
    match osid.as_str() {
        "ubuntu" | "debian" => {
            ssh::run_remote(&sess, "sudo -n apt-get update", false, "")?;
            ssh::run_remote(&sess, "sudo -n apt-get install -y zsh", false, "")?;
            Ok(())
        }
        _ => Err(AppError::UnsupportedPlatform(format!(
            "unsupported remote OS ID={osid:?} (supported: ubuntu, debian)"
        ))),
    }
}

pub fn set_default_shell(req: &StepRequest) -> Result<(), AppError> {
    let sess = ssh::dial_arc(&req.addr)?;
    let cmd = format!(r#"sudo -n chsh -s "$(command -v zsh)" {ARC_USER}"#);
    ssh::run_remote(&sess, &cmd, false, "")
        .map_err(|e| AppError::Remote(format!("set default shell failed: {e}")))?;
    Ok(())
}

pub fn install_arc_zsh_prompt(req: &StepRequest) -> Result<(), AppError> {
    let sess = ssh::dial_arc(&req.addr)?;
    let script = templates::upsert_block_script(
        ".zshrc",
        templates::ARC_PROMPT_START,
        templates::ARC_PROMPT_END,
        templates::REMOTE_ZSH_PROMPT_BLOCK,
    );
    ssh::run_remote(&sess, &script, false, "")
        .map_err(|e| AppError::Remote(format!("install zsh prompt failed: {e}")))?;
    Ok(())
}

pub fn install_arc_tmux_config(req: &StepRequest) -> Result<(), AppError> {
    let sess = ssh::dial_arc(&req.addr)?;
    let script = templates::upsert_block_script(
        ".tmux.conf",
        templates::ARC_TMUX_START,
        templates::ARC_TMUX_END,
        templates::REMOTE_TMUX_BLOCK,
    );
    ssh::run_remote(&sess, &script, false, "")
        .map_err(|e| AppError::Remote(format!("install tmux config failed: {e}")))?;
    Ok(())
}

pub fn detect_os(req: &StepRequest) -> Result<(), AppError> {
    let sess = ssh::dial_arc(&req.addr)?;
    let osid = platform::remote_os_id(&sess)?;
    if !platform::SUPPORTED_REMOTE.contains(&osid.as_str()) {
        return Err(AppError::UnsupportedPlatform(format!(
            "unsupported remote OS ID={osid:?} (supported: {})",
            platform::SUPPORTED_REMOTE.join(", ")
        )));
    }
    Ok(())
}

pub fn install_wireguard(req: &StepRequest) -> Result<(), AppError> {
    let sess = ssh::dial_arc(&req.addr)?;
    ssh::run_remote(&sess, "sudo -n apt-get update", false, "")?;
    ssh::run_remote(
        &sess,
        "sudo -n apt-get install -y wireguard wireguard-tools",
        false,
        "",
    )?;
    let osid = platform::remote_os_id(&sess)?;
    platform::ensure_wireguard_kernel_remote(&sess, &osid)
}

pub fn write_wg_conf(req: &StepRequest, wg: &TunnelConfig) -> Result<(), AppError> {
    let sess = ssh::dial_arc(&req.addr)?;

    // A previously-running wg0 would keep stale keys and peers alive.
    let stop = format!("sudo -n systemctl stop wg-quick@{WG_INTERFACE} || true");
    let _ = ssh::run_remote(&sess, &stop, false, "");

    let user_copy = format!(
        "set -eu\ninstall -d -m 0700 ~/.arc/wireguard\ncat > ~/.arc/wireguard/server-{WG_INTERFACE}.conf <<'EOF'\n{conf}EOF\nchmod 600 ~/.arc/wireguard/server-{WG_INTERFACE}.conf\n",
        conf = wg.server_conf,
    );
    ssh::run_remote(&sess, &user_copy, false, "")?;

    let script = format!(
        "umask 077\ninstall -d -m 0700 /etc/wireguard\nrm -f /etc/wireguard/{WG_INTERFACE}.conf\ncat > /etc/wireguard/{WG_INTERFACE}.conf <<'EOF'\n{conf}EOF\nchmod 600 /etc/wireguard/{WG_INTERFACE}.conf\n",
        conf = wg.server_conf,
    );
    let cmd = format!("sudo -n sh -lc {}", ssh::sh_single_quote(&script));
    ssh::run_remote(&sess, &cmd, false, "")?;
    Ok(())
}

pub fn open_firewall(req: &StepRequest) -> Result<(), AppError> {
    let sess = ssh::dial_arc(&req.addr)?;
    // Only touch ufw when it exists and is active; an inactive firewall
    // already lets the tunnel through.
    let script = format!(
        r#"set -eu
if command -v ufw >/dev/null 2>&1; then
	if sudo -n ufw status 2>/dev/null | grep -q 'Status: active'; then
		sudo -n ufw allow {WG_PORT}/udp >/dev/null
	fi
fi
"#
    );
    ssh::run_remote(&sess, &script, false, "")?;
    Ok(())
}

pub fn enable_wg(req: &StepRequest) -> Result<(), AppError> {
    let sess = ssh::dial_arc(&req.addr)?;
    // Always restart so the freshly-written config definitely applies.
    let cmd = format!(
        "sudo -n systemctl enable wg-quick@{WG_INTERFACE} && sudo -n systemctl restart wg-quick@{WG_INTERFACE} && sudo -n systemctl is-active --quiet wg-quick@{WG_INTERFACE}"
    );
    ssh::run_remote(&sess, &cmd, false, "")?;
    Ok(())
}

pub fn apply_nftables_redirect(req: &StepRequest) -> Result<(), AppError> {
    let sess = ssh::dial_arc(&req.addr)?;
    nftables::ensure_remote_redirect_service(&sess)
}

pub fn remote_arc_uid_gid(sess: &Session) -> Result<(String, String), AppError> {
    let uid = ssh::run_remote(sess, &format!("id -u {ARC_USER}"), false, "")
        .map_err(|e| AppError::Remote(format!("resolve remote arc UID: {e}")))?;
    let gid = ssh::run_remote(sess, &format!("id -g {ARC_USER}"), false, "")
        .map_err(|e| AppError::Remote(format!("resolve remote arc GID: {e}")))?;
    let uid = uid.trim().to_string();
    let gid = gid.trim().to_string();
    if uid.is_empty() || gid.is_empty() {
        return Err(AppError::Remote(
            "resolved empty arc UID/GID on remote".into(),
        ));
    }
    Ok((uid, gid))
}

pub fn resolve_arc_uid_gid(req: &StepRequest) -> Result<(), AppError> {
    let sess = ssh::dial_arc(&req.addr)?;
    remote_arc_uid_gid(&sess).map(|_| ())
}

pub fn install_nfs_server(req: &StepRequest) -> Result<(), AppError> {
    let sess = ssh::dial_arc(&req.addr)?;
    ssh::run_remote(&sess, "sudo -n apt-get update", false, "")?;
    ssh::run_remote(
        &sess,
        "sudo -n apt-get install -y nfs-kernel-server",
        false,
        "",
    )?;
    Ok(())
}

pub fn export_arc_nfs(req: &StepRequest) -> Result<(), AppError> {
    let sess = ssh::dial_arc(&req.addr)?;
    let (uid, gid) = remote_arc_uid_gid(&sess)?;
    let exports = nfs::render_exports(&uid, &gid);
    let script = format!(
        r#"set -eu
umask 022
sudo -n install -d -m 0755 /etc/exports.d
sudo -n sh -lc 'cat > {exports_file} <<"EOF"
{exports}EOF'
sudo -n exportfs -ra
if sudo -n systemctl list-unit-files | grep -q '^nfs-server\.service'; then
	sudo -n systemctl enable --now nfs-server
else
	sudo -n systemctl enable --now nfs-kernel-server
fi
if command -v ufw >/dev/null 2>&1; then
	if sudo -n ufw status 2>/dev/null | grep -q 'Status: active'; then
		sudo -n ufw allow in on {WG_INTERFACE} proto tcp from {client_ip} to any port 2049 >/dev/null
	fi
fi
"#,
        exports_file = nfs::NFS_EXPORTS_FILE,
        client_ip = nfs::client_ip(),
    );
    ssh::run_remote(&sess, &script, false, "")
        .map_err(|e| AppError::Remote(format!("configure remote NFS export: {e}")))?;
    Ok(())
}

pub fn configure_waypipe_runtime(req: &StepRequest) -> Result<(), AppError> {
    let sess = ssh::dial_arc(&req.addr)?;
    ssh::run_remote(&sess, "sudo -n apt-get update", false, "")?;
    ssh::run_remote(&sess, "sudo -n apt-get install -y waypipe", false, "")?;
    // Lingering keeps the arc user's services (and /run/user dir) alive
    // without an interactive login.
    ssh::run_remote(
        &sess,
        &format!("sudo -n loginctl enable-linger {ARC_USER}"),
        false,
        "",
    )?;

    let unit = templates::waypipe_remote_unit();
    let script = format!(
        r#"set -eu
install -d -m 0700 "$HOME/.config/systemd/user"
cat > "$HOME/.config/systemd/user/arc-waypipe.service" <<'EOF'
{unit}EOF
export XDG_RUNTIME_DIR="/run/user/$(id -u)"
systemctl --user daemon-reload
systemctl --user enable --now arc-waypipe.service
"#
    );
    ssh::run_remote(&sess, &script, false, "")
        .map_err(|e| AppError::Remote(format!("configure waypipe runtime: {e}")))?;
    Ok(())
}
