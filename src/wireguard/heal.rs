//! Detection and one-shot repair of a live-but-broken tunnel.
//!
//! The realistic failure mode after a partial re-run is both services up with
//! stale peer keys. Repair reads the live configs, derives each side's true
//! public key from its private key, rewrites the peer stanzas, and restarts
//! both ends.

use crate::config::{self, WG_CLIENT_CIDR, WG_INTERFACE, WG_SERVER_IP};
use crate::error::AppError;
use crate::localcmd;
use crate::ssh;
use crate::textpatch;
use crate::wireguard::conf::{self, PeerPatch};
use crate::wireguard::keys;
use ssh2::Session;

fn read_local_conf() -> Result<String, AppError> {
    let path = format!("/etc/wireguard/{WG_INTERFACE}.conf");
    match localcmd::sudo(&["cat", &path]) {
        Ok(out) => Ok(out),
        // Fall back to the running daemon's view.
        Err(_) => localcmd::sudo(&["wg", "showconf", WG_INTERFACE])
            .map_err(|e| AppError::TunnelDrift(format!("read local wg config: {e}"))),
    }
}

fn read_remote_conf(sess: &Session) -> Result<String, AppError> {
    let cat = format!("sudo -n cat /etc/wireguard/{WG_INTERFACE}.conf");
    match ssh::run_remote(sess, &cat, false, "") {
        Ok(out) => Ok(out),
        Err(_) => {
            let showconf = format!("sudo -n wg showconf {WG_INTERFACE}");
            ssh::run_remote(sess, &showconf, false, "")
                .map_err(|e| AppError::TunnelDrift(format!("read remote wg config: {e}")))
        }
    }
}

fn install_local_conf(patched: &str) -> Result<(), AppError> {
    let dir = config::wireguard_dir()?;
    std::fs::create_dir_all(&dir)?;
    let tmp = dir.join(format!(".{WG_INTERFACE}.conf.sync.tmp"));
    let mut data = patched.to_string();
    if !data.ends_with('\n') {
        data.push('\n');
    }
    textpatch::atomic_write(&tmp, data.as_bytes(), 0o600)?;
    let target = format!("/etc/wireguard/{WG_INTERFACE}.conf");
    let tmp_str = tmp.to_string_lossy().into_owned();
    localcmd::sudo(&["install", "-m", "0600", &tmp_str, &target])
        .map_err(|e| AppError::TunnelDrift(format!("install local wg conf: {e}")))?;
    let _ = std::fs::remove_file(&tmp);
    Ok(())
}

fn install_remote_conf(sess: &Session, patched: &str) -> Result<(), AppError> {
    let mut body = patched.to_string();
    if !body.ends_with('\n') {
        body.push('\n');
    }
    let script = format!(
        "umask 077\ninstall -d -m 0700 /etc/wireguard\ncat > /etc/wireguard/{WG_INTERFACE}.conf <<'EOF'\n{body}EOF\nchmod 600 /etc/wireguard/{WG_INTERFACE}.conf\n"
    );
    let cmd = format!("sudo -n sh -lc {}", ssh::sh_single_quote(&script));
    ssh::run_remote(sess, &cmd, false, "")
        .map_err(|e| AppError::TunnelDrift(format!("install remote wg conf: {e}")))?;
    Ok(())
}

/// Repair stale peer keys on both ends, returning whether anything changed.
///
/// Safe to run when nothing is wrong: a no-op patch leaves both services
/// untouched. Only invoked after a failed tunnel probe.
pub fn auto_sync_peer_keys(addr: &str, endpoint: &str) -> Result<bool, AppError> {
    let local_conf = read_local_conf()?;

    let sess = ssh::dial_arc(addr)
        .map_err(|e| AppError::TunnelDrift(format!("dial remote for wg sync: {e}")))?;
    let remote_conf = read_remote_conf(&sess)?;

    let local_priv = conf::parse_private_key(&local_conf)
        .map_err(|e| AppError::TunnelDrift(format!("parse local wg private key: {e}")))?;
    let remote_priv = conf::parse_private_key(&remote_conf)
        .map_err(|e| AppError::TunnelDrift(format!("parse remote wg private key: {e}")))?;

    let local_pub = keys::public_key_from_private_b64(&local_priv)
        .map_err(|e| AppError::TunnelDrift(format!("derive local wg public key: {e}")))?;
    let remote_pub = keys::public_key_from_private_b64(&remote_priv)
        .map_err(|e| AppError::TunnelDrift(format!("derive remote wg public key: {e}")))?;

    // Local peer routes the server address and must carry the remote's key.
    let server_cidr = format!("{WG_SERVER_IP}/32");
    let (local_patched, local_changed) = conf::patch_peer(
        &local_conf,
        &server_cidr,
        &PeerPatch {
            public_key: &remote_pub,
            allowed_ips: &server_cidr,
            endpoint: Some(endpoint),
            keepalive: Some("25"),
        },
    )
    .map_err(|e| AppError::TunnelDrift(format!("patch local wg peer: {e}")))?;

    // Remote peer routes the client address and must carry the local key.
    let client_ip = WG_CLIENT_CIDR.split('/').next().unwrap_or(WG_CLIENT_CIDR);
    let client_cidr = format!("{client_ip}/32");
    let (remote_patched, remote_changed) = conf::patch_peer(
        &remote_conf,
        &client_cidr,
        &PeerPatch {
            public_key: &local_pub,
            allowed_ips: &client_cidr,
            endpoint: None,
            keepalive: None,
        },
    )
    .map_err(|e| AppError::TunnelDrift(format!("patch remote wg peer: {e}")))?;

    if !local_changed && !remote_changed {
        return Ok(false);
    }

    install_local_conf(&local_patched)?;
    install_remote_conf(&sess, &remote_patched)?;

    let unit = format!("wg-quick@{WG_INTERFACE}");
    localcmd::sudo(&["systemctl", "restart", &unit])
        .map_err(|e| AppError::TunnelDrift(format!("restart local wg: {e}")))?;
    localcmd::sudo(&["systemctl", "is-active", "--quiet", &unit])
        .map_err(|e| AppError::TunnelDrift(format!("local wg not active after restart: {e}")))?;

    let remote_restart =
        format!("sudo -n systemctl restart {unit} && sudo -n systemctl is-active --quiet {unit}");
    ssh::run_remote(&sess, &remote_restart, false, "")
        .map_err(|e| AppError::TunnelDrift(format!("restart remote wg: {e}")))?;

    Ok(true)
}

/// Collect `wg show` diagnostics for the local end.
pub fn diag_local() -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut add = |label: &str, args: &[&str]| {
        match localcmd::sudo(args) {
            Ok(out) if out.is_empty() => parts.push(format!("{label}:\n(empty)")),
            Ok(out) => parts.push(format!("{label}:\n{out}")),
            Err(e) => parts.push(format!("{label}: (error: {e})")),
        }
    };
    add("wg show", &["wg", "show", WG_INTERFACE]);
    add(
        "latest-handshakes",
        &["wg", "show", WG_INTERFACE, "latest-handshakes"],
    );
    add("endpoints", &["wg", "show", WG_INTERFACE, "endpoints"]);
    add("transfer", &["wg", "show", WG_INTERFACE, "transfer"]);
    parts.join("\n\n")
}

/// Collect `wg show` diagnostics for the remote end.
pub fn diag_remote(addr: &str) -> String {
    let sess = match ssh::dial_arc(addr) {
        Ok(s) => s,
        Err(e) => return format!("(cannot dial remote: {e})"),
    };
    let mut parts: Vec<String> = Vec::new();
    let mut add = |label: &str, cmd: &str| {
        match ssh::run_remote(&sess, &format!("sudo -n {cmd}"), false, "") {
            Ok(out) if out.is_empty() => parts.push(format!("{label}:\n(empty)")),
            Ok(out) => parts.push(format!("{label}:\n{out}")),
            Err(e) => parts.push(format!("{label}: (error: {e})")),
        }
    };
    add("wg show", &format!("wg show {WG_INTERFACE}"));
    add(
        "latest-handshakes",
        &format!("wg show {WG_INTERFACE} latest-handshakes"),
    );
    add("endpoints", &format!("wg show {WG_INTERFACE} endpoints"));
    add("transfer", &format!("wg show {WG_INTERFACE} transfer"));
    parts.join("\n\n")
}
