//! Cross-machine verification steps. Retry and self-heal live here, inside
//! steps whose failure modes are well understood, never in the engine.

use crate::config::{ARC_USER, WG_SERVER_IP};
use crate::error::AppError;
use crate::localcmd;
use crate::nfs;
use crate::ssh;
use crate::templates;
use crate::wireguard::{heal, TunnelConfig};
use crate::workflow::{StepOutcome, StepRequest};
use std::time::Duration;

pub fn add_arc_authorized_key(req: &StepRequest) -> Result<(), AppError> {
    if req.pub_key_line.trim().is_empty() {
        return Err(AppError::Validation("missing public key line".into()));
    }
    let sess = ssh::dial_bootstrap(&req.bootstrap_user, &req.addr, &req.password)?;
    let script = templates::ensure_arc_authorized_key_script(&req.pub_key_line);
    ssh::run_remote(&sess, &script, req.use_sudo, &req.password)
        .map_err(|e| AppError::Remote(format!("install authorized_keys failed: {e}")))?;
    Ok(())
}

pub fn verify_arc_ssh_login(req: &StepRequest) -> Result<(), AppError> {
    let sess = ssh::dial_arc(&req.addr).map_err(|e| {
        AppError::Auth(format!(
            "arc key login failed for {ARC_USER}@{}: {e}",
            req.host
        ))
    })?;
    ssh::run_remote(&sess, "true", false, "")
        .map_err(|e| AppError::Remote(format!("arc login verification command failed: {e}")))?;
    ssh::run_remote(&sess, "sudo -n true", false, "")
        .map_err(|e| AppError::Elevation(format!("arc sudo verification failed: {e}")))?;
    Ok(())
}

fn ping_server() -> Result<String, AppError> {
    localcmd::run("ping", &["-c", "1", "-W", "2", WG_SERVER_IP])
}

/// One best-effort probe with a single self-heal attempt. A retry loop here
/// would mask real network or firewall problems behind endless repair.
pub fn verify_tunnel_connectivity(
    req: &StepRequest,
    wg: &TunnelConfig,
    outcome: &mut StepOutcome,
) -> Result<(), AppError> {
    let ready_as = format!("{ARC_USER}@{}", req.host);

    let probe_err = match ping_server() {
        Ok(_) => {
            outcome.ready_as = Some(ready_as);
            return Ok(());
        }
        Err(e) => e,
    };

    let sync_result = heal::auto_sync_peer_keys(&req.addr, &wg.endpoint);
    if matches!(sync_result, Ok(true)) && ping_server().is_ok() {
        outcome.ready_as = Some(ready_as);
        return Ok(());
    }

    let local_diag = heal::diag_local();
    let remote_diag = heal::diag_remote(&req.addr);
    let msg = match sync_result {
        Err(sync_err) => format!(
            "tunnel verification failed (ping {WG_SERVER_IP}): {probe_err}\n\nauto-sync error: {sync_err}\n\nlocal wg diag:\n{local_diag}\n\nremote wg diag:\n{remote_diag}"
        ),
        Ok(_) => format!(
            "tunnel verification failed (ping {WG_SERVER_IP}): {probe_err}\n\nlocal wg diag:\n{local_diag}\n\nremote wg diag:\n{remote_diag}"
        ),
    };
    Err(AppError::TunnelDrift(msg))
}

fn verify_mount_once() -> Result<(), AppError> {
    let target = nfs::NFS_MOUNT_TARGET;
    // Listing the directory triggers the automount.
    localcmd::run("ls", &["-la", target])
        .map_err(|e| AppError::Local(format!("trigger automount for {target}: {e}")))?;

    // Validate the real NFS mount, not the autofs trigger layer.
    let out = match localcmd::run(
        "findmnt",
        &["-n", "-t", "nfs4", "-o", "SOURCE,TARGET", "-T", target],
    ) {
        Ok(out) => out,
        Err(e) => {
            let diag = localcmd::run(
                "findmnt",
                &["-n", "-o", "SOURCE,FSTYPE,TARGET", "-T", target],
            )
            .unwrap_or_default();
            if diag.trim().is_empty() {
                return Err(AppError::Local(format!(
                    "nfs4 mount not active for {target}: {e}"
                )));
            }
            return Err(AppError::Local(format!(
                "nfs4 mount not active for {target} ({e}); current mount view: {diag}"
            )));
        }
    };

    let fields: Vec<&str> = out.split_whitespace().collect();
    if fields.len() < 2 {
        return Err(AppError::Local(format!(
            "unexpected findmnt output for {target}: {out:?}"
        )));
    }
    if fields[0] != nfs::server_export_source() {
        return Err(AppError::Local(format!(
            "unexpected NFS source for {target}: got {} want {}",
            fields[0],
            nfs::server_export_source()
        )));
    }
    if fields[1] != target {
        return Err(AppError::Local(format!(
            "unexpected mount target: got {} want {target}",
            fields[1]
        )));
    }
    Ok(())
}

/// The automount may need a moment after daemon-reload; retry with backoff.
pub fn verify_local_arc_nfs_mount() -> Result<(), AppError> {
    const ATTEMPTS: u32 = 5;
    let mut last_err = None;
    for attempt in 1..=ATTEMPTS {
        match verify_mount_once() {
            Ok(()) => return Ok(()),
            Err(e) => last_err = Some(e),
        }
        if attempt < ATTEMPTS {
            std::thread::sleep(Duration::from_secs(1 << (attempt - 1)));
        }
    }
    Err(AppError::Local(format!(
        "verify {} failed after {ATTEMPTS} attempts with backoff: {}",
        nfs::NFS_MOUNT_TARGET,
        last_err.expect("at least one attempt ran")
    )))
}
