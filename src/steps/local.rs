//! Workstation-side steps. File installs under /etc go through `sudo -n`;
//! everything under the operator's home is written directly.

use crate::config::{self, WG_INTERFACE};
use crate::error::AppError;
use crate::hosts;
use crate::localcmd;
use crate::nfs;
use crate::platform;
use crate::ssh;
use crate::steps::server;
use crate::templates;
use crate::textpatch;
use crate::wireguard::TunnelConfig;
use crate::workflow::{StepOutcome, StepRequest};

pub fn add_hosts_aliases(req: &StepRequest) -> Result<(), AppError> {
    hosts::ensure_local_arc_hosts_aliases(&req.host)
}

pub fn ensure_ssh_key(outcome: &mut StepOutcome) -> Result<(), AppError> {
    ssh::ensure_local_keypair()?;
    outcome.pub_key_line = Some(ssh::read_public_key_line()?);
    Ok(())
}

pub fn install_arc_prompt() -> Result<(), AppError> {
    let home = dirs::home_dir().ok_or(AppError::HomeDirNotFound)?;

    let rc_path = home.join(".bashrc");
    let rc = match std::fs::read_to_string(&rc_path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let (updated, changed) = textpatch::upsert_block(
        &rc,
        templates::ARC_PROMPT_START,
        templates::ARC_PROMPT_END,
        templates::LOCAL_BASH_PROMPT_BLOCK,
    );
    if changed {
        textpatch::atomic_write(&rc_path, updated.as_bytes(), 0o600)?;
    }

    let profile_path = home.join(".bash_profile");
    let profile = match std::fs::read_to_string(&profile_path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let (updated, changed) = textpatch::ensure_sources_bashrc(&profile);
    if changed {
        textpatch::atomic_write(&profile_path, updated.as_bytes(), 0o600)?;
    }
    Ok(())
}

pub fn install_zsh() -> Result<(), AppError> {
    match platform::local_os_id()?.as_str() {
        "ubuntu" | "debian" => {
            localcmd::sudo(&["apt-get", "update"])?;
            localcmd::sudo(&["apt-get", "install", "-y", "zsh"])?;
            Ok(())
        }
        "arch" | "manjaro" => {
            localcmd::sudo(&["pacman", "-Sy", "--noconfirm", "zsh"])?;
            Ok(())
        }
        id => Err(AppError::UnsupportedPlatform(format!(
            "unsupported local OS ID={id:?} (supported: {})",
            platform::SUPPORTED_LOCAL.join(", ")
        ))),
    }
}

pub fn set_default_shell() -> Result<(), AppError> {
    let user = localcmd::run("id", &["-un"])?;
    let zsh = localcmd::run("sh", &["-c", "command -v zsh"])?;
    if zsh.is_empty() {
        return Err(AppError::Local("zsh not found on PATH".into()));
    }
    localcmd::sudo(&["chsh", "-s", &zsh, &user])?;
    Ok(())
}

pub fn detect_os() -> Result<(), AppError> {
    let id = platform::local_os_id()?;
    if !platform::SUPPORTED_LOCAL.contains(&id.as_str()) {
        return Err(AppError::UnsupportedPlatform(format!(
            "unsupported local OS ID={id:?} (supported: {})",
            platform::SUPPORTED_LOCAL.join(", ")
        )));
    }
    Ok(())
}

pub fn install_wireguard() -> Result<(), AppError> {
    let id = platform::local_os_id()?;
    match id.as_str() {
        "ubuntu" | "debian" => {
            localcmd::sudo(&["apt-get", "update"])?;
            localcmd::sudo(&["apt-get", "install", "-y", "wireguard", "wireguard-tools"])?;
            platform::ensure_wireguard_kernel_local(&id)
        }
        "arch" | "manjaro" => {
            localcmd::sudo(&["pacman", "-Sy", "--noconfirm", "wireguard-tools"])?;
            platform::ensure_wireguard_kernel_local(&id)
        }
        _ => Err(AppError::UnsupportedPlatform(format!(
            "unsupported local OS ID={id:?}"
        ))),
    }
}

pub fn write_wg_conf(wg: &TunnelConfig) -> Result<(), AppError> {
    let dir = config::wireguard_dir()?;
    std::fs::create_dir_all(&dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }

    let client_copy = dir.join(format!("client-{WG_INTERFACE}.conf"));
    let server_copy = dir.join(format!("server-{WG_INTERFACE}.conf"));
    textpatch::atomic_write(&client_copy, wg.client_conf.as_bytes(), 0o600)?;
    textpatch::atomic_write(&server_copy, wg.server_conf.as_bytes(), 0o600)?;

    // A previously-running wg0 would keep stale keys and peers alive.
    let unit = format!("wg-quick@{WG_INTERFACE}");
    let _ = localcmd::sudo(&["systemctl", "stop", &unit]);

    let tmp = dir.join(format!(".{WG_INTERFACE}.conf.tmp"));
    textpatch::atomic_write(&tmp, wg.client_conf.as_bytes(), 0o600)?;
    let tmp_str = tmp.to_string_lossy().into_owned();
    let target = format!("/etc/wireguard/{WG_INTERFACE}.conf");

    let saved_note = format!(
        "sudo required to install system config; config saved to {}",
        client_copy.display()
    );
    localcmd::sudo(&["install", "-d", "-m", "0700", "/etc/wireguard"])
        .map_err(|_| AppError::Local(saved_note.clone()))?;
    let _ = localcmd::sudo(&["rm", "-f", &target]);
    localcmd::sudo(&["install", "-m", "0600", &tmp_str, &target])
        .map_err(|_| AppError::Local(saved_note))?;
    let _ = std::fs::remove_file(&tmp);
    Ok(())
}

/// Restart-or-fail with `systemctl status` and journal context attached,
/// since a wg-quick failure message alone rarely says what broke.
fn systemctl_error_with_diag(err: AppError, unit: &str) -> AppError {
    let status = localcmd::sudo(&["systemctl", "status", "--no-pager", "-l", unit]).unwrap_or_default();
    let journal =
        localcmd::sudo(&["journalctl", "-u", unit, "-b", "--no-pager", "-n", "120"]).unwrap_or_default();
    if status.is_empty() {
        return err;
    }
    if journal.is_empty() {
        return AppError::Local(format!("{err}; status:\n{status}"));
    }
    AppError::Local(format!("{err}; status:\n{status}\n\njournal:\n{journal}"))
}

pub fn enable_wg() -> Result<(), AppError> {
    let unit = format!("wg-quick@{WG_INTERFACE}");
    localcmd::sudo(&["systemctl", "enable", &unit])?;
    // Always restart so the freshly-written config definitely applies.
    if let Err(e) = localcmd::sudo(&["systemctl", "restart", &unit]) {
        return Err(systemctl_error_with_diag(e, &unit));
    }
    if let Err(e) = localcmd::sudo(&["systemctl", "is-active", "--quiet", &unit]) {
        return Err(systemctl_error_with_diag(e, &unit));
    }
    Ok(())
}

pub fn install_nfs_client() -> Result<(), AppError> {
    match platform::local_os_id()?.as_str() {
        "ubuntu" | "debian" => {
            localcmd::sudo(&["apt-get", "update"])?;
            localcmd::sudo(&["apt-get", "install", "-y", "nfs-common"])?;
            Ok(())
        }
        "arch" | "manjaro" => {
            localcmd::sudo(&["pacman", "-Sy", "--noconfirm", "nfs-utils"])?;
            Ok(())
        }
        id => Err(AppError::UnsupportedPlatform(format!(
            "unsupported local OS ID={id:?} (supported: {})",
            platform::SUPPORTED_LOCAL.join(", ")
        ))),
    }
}

/// The mount target must be an empty directory (or already our mount) before
/// an automount is configured over it.
fn ensure_arc_mount_target() -> Result<(), AppError> {
    let target = nfs::NFS_MOUNT_TARGET;

    if let Ok(out) = localcmd::run("findmnt", &["-n", "-o", "SOURCE,FSTYPE", "-T", target]) {
        let fields: Vec<&str> = out.split_whitespace().collect();
        if fields.len() < 2 {
            return Err(AppError::Local(format!(
                "unexpected findmnt output for {target}: {out:?}"
            )));
        }
        // Until first access, a systemd automount shows up as autofs.
        if fields[1] == "autofs" && fields[0].starts_with("systemd-") {
            return Ok(());
        }
        if fields[0] != nfs::server_export_source() || fields[1] != "nfs4" {
            return Err(AppError::Local(format!(
                "{target} is already mounted as {} ({}), expected {} (nfs4)",
                fields[0],
                fields[1],
                nfs::server_export_source()
            )));
        }
        return Ok(());
    }

    if localcmd::sudo(&["test", "-e", target]).is_err() {
        localcmd::sudo(&["install", "-d", "-m", "0755", target])
            .map_err(|e| AppError::Local(format!("create {target}: {e}")))?;
        return Ok(());
    }

    if localcmd::sudo(&["test", "-d", target]).is_err() {
        return Err(AppError::Local(format!(
            "{target} exists but is not a directory"
        )));
    }

    let probe = format!(
        r#"if [ -z "$(ls -A {target} 2>/dev/null)" ]; then echo empty; else echo nonempty; fi"#
    );
    let out = localcmd::sudo(&["sh", "-lc", &probe])
        .map_err(|e| AppError::Local(format!("inspect {target} contents: {e}")))?;
    if out.trim() == "nonempty" {
        return Err(AppError::Local(format!(
            "{target} exists and is not empty; move existing data first, then retry"
        )));
    }
    Ok(())
}

pub fn configure_arc_automount() -> Result<(), AppError> {
    ensure_arc_mount_target()?;

    let fstab = localcmd::sudo(&["cat", "/etc/fstab"])
        .map_err(|e| AppError::Local(format!("read /etc/fstab: {e}")))?;
    let (updated, changed) =
        textpatch::upsert_entry(&fstab, nfs::is_arc_mount_row, &nfs::render_fstab_line());
    if changed {
        let tmp = std::env::temp_dir().join("arc-fstab.tmp");
        textpatch::atomic_write(&tmp, updated.as_bytes(), 0o644)?;
        let tmp_str = tmp.to_string_lossy().into_owned();
        let res = localcmd::sudo(&["install", "-m", "0644", &tmp_str, "/etc/fstab"])
            .map_err(|e| AppError::Local(format!("update /etc/fstab: {e}")));
        let _ = std::fs::remove_file(&tmp);
        res?;
    }

    localcmd::sudo(&["systemctl", "daemon-reload"])?;
    if let Err(e) = localcmd::sudo(&["systemctl", "restart", "home-arc.automount"]) {
        localcmd::sudo(&["systemctl", "start", "home-arc.automount"]).map_err(|start_err| {
            AppError::Local(format!(
                "restart home-arc.automount: {e}; start fallback failed: {start_err}"
            ))
        })?;
    }
    Ok(())
}

pub fn configure_waypipe_tunnel(req: &StepRequest) -> Result<(), AppError> {
    match platform::local_os_id()?.as_str() {
        "ubuntu" | "debian" => {
            localcmd::sudo(&["apt-get", "install", "-y", "waypipe"])?;
        }
        "arch" | "manjaro" => {
            localcmd::sudo(&["pacman", "-Sy", "--noconfirm", "waypipe"])?;
        }
        id => {
            return Err(AppError::UnsupportedPlatform(format!(
                "unsupported local OS ID={id:?} (supported: {})",
                platform::SUPPORTED_LOCAL.join(", ")
            )))
        }
    }

    // The forward destination lives in the remote arc runtime dir, which is
    // keyed by the remote UID.
    let sess = ssh::dial_arc(&req.addr)?;
    let (uid, _) = server::remote_arc_uid_gid(&sess)?;
    drop(sess);

    let home = dirs::home_dir().ok_or(AppError::HomeDirNotFound)?;
    let unit_dir = home.join(".config/systemd/user");
    std::fs::create_dir_all(&unit_dir)?;
    textpatch::atomic_write(
        &unit_dir.join("arc-waypipe-client.service"),
        templates::waypipe_local_client_unit().as_bytes(),
        0o644,
    )?;
    textpatch::atomic_write(
        &unit_dir.join("arc-waypipe-tunnel.service"),
        templates::waypipe_local_tunnel_unit(&uid).as_bytes(),
        0o644,
    )?;

    localcmd::run("systemctl", &["--user", "daemon-reload"])?;
    localcmd::run(
        "systemctl",
        &["--user", "enable", "--now", "arc-waypipe-client.service"],
    )?;
    localcmd::run(
        "systemctl",
        &["--user", "enable", "--now", "arc-waypipe-tunnel.service"],
    )?;
    Ok(())
}
