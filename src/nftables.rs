//! Remote nftables redirect: DNAT traffic arriving on the tunnel for the
//! server's tunnel address to loopback, so localhost-only services on the
//! remote become reachable over WireGuard without rebinding them.

use crate::config::{WG_INTERFACE, WG_SERVER_IP};
use crate::error::AppError;
use crate::platform;
use crate::ssh;
use ssh2::Session;

pub const REDIRECT_NFT_PATH: &str = "/etc/nftables.d/lh_redirect.nft";
pub const REDIRECT_SERVICE_NAME: &str = "arc-lh-redirect-nftable.service";
pub const REDIRECT_SERVICE_PATH: &str = "/etc/systemd/system/arc-lh-redirect-nftable.service";
pub const REDIRECT_SYSCTL_PATH: &str = "/etc/sysctl.d/99-arc-route-localnet.conf";

pub fn render_nft_table() -> String {
    format!(
        r#"table ip lh_redirect {{
  chain prerouting {{
    type nat hook prerouting priority dstnat; policy accept;

    # Expose localhost services over WireGuard by DNATing wg destination to loopback.
    iifname "{WG_INTERFACE}" ip daddr {WG_SERVER_IP} dnat to 127.0.0.1
  }}
}}
"#
    )
}

pub fn render_redirect_unit(nft_bin: &str) -> String {
    format!(
        r#"[Unit]
Description=ARC nftables redirect rules
After=network-online.target
Wants=network-online.target

[Service]
Type=oneshot
ExecStartPre=-{nft_bin} delete table ip lh_redirect
ExecStart={nft_bin} -f {REDIRECT_NFT_PATH}
RemainAfterExit=yes

[Install]
WantedBy=multi-user.target
"#
    )
}

pub fn render_sysctl() -> String {
    format!(
        "net.ipv4.conf.all.route_localnet=1\nnet.ipv4.conf.{WG_INTERFACE}.route_localnet=1\n"
    )
}

/// nft may live outside a non-login PATH; probe the usual locations.
fn detect_remote_nft_binary(sess: &Session) -> Result<String, AppError> {
    let script = r#"set -eu
p="$(command -v nft || true)"
if [ -z "$p" ]; then
  for c in /usr/sbin/nft /usr/bin/nft /sbin/nft /bin/nft; do
    if [ -x "$c" ]; then p="$c"; break; fi
  done
fi
[ -x "$p" ] || { echo "nft binary not found"; exit 1; }
printf '%s' "$p"
"#;
    let cmd = format!("sh -lc {}", ssh::sh_single_quote(script));
    let out = ssh::run_remote(sess, &cmd, false, "")
        .map_err(|e| AppError::Remote(format!("detect remote nft binary: {e}")))?;
    let p = out.trim();
    if p.is_empty() {
        return Err(AppError::Remote("detect remote nft binary: empty path".into()));
    }
    Ok(p.to_string())
}

/// Install the redirect table, sysctl, and oneshot unit on the remote, then
/// enable the unit and confirm it is active.
pub fn ensure_remote_redirect_service(sess: &Session) -> Result<(), AppError> {
    let osid = platform::remote_os_id(sess)?;
    let install_cmd = match osid.as_str() {
        "ubuntu" | "debian" => "apt-get update\napt-get install -y nftables",
        "arch" | "manjaro" => "pacman -Sy --noconfirm nftables",
        _ => {
            return Err(AppError::UnsupportedPlatform(format!(
                "unsupported remote OS ID={osid:?} (supported: ubuntu, debian, arch, manjaro)"
            )))
        }
    };
    let install = format!(
        "sudo -n sh -lc {}",
        ssh::sh_single_quote(&format!("set -eu\n{install_cmd}"))
    );
    ssh::run_remote(sess, &install, false, "")?;

    let nft_bin = detect_remote_nft_binary(sess)?;
    let nft_content = render_nft_table();
    let unit_content = render_redirect_unit(&nft_bin);
    let sysctl_content = render_sysctl();

    let script = format!(
        "set -eu\n\
cat > {REDIRECT_SYSCTL_PATH} <<'EOF'\n{sysctl_content}EOF\n\
chmod 0644 {REDIRECT_SYSCTL_PATH}\n\
sysctl -w net.ipv4.conf.all.route_localnet=1\n\
sysctl -w net.ipv4.conf.{WG_INTERFACE}.route_localnet=1\n\
sysctl --system >/dev/null\n\
install -d -m 0755 /etc/nftables.d\n\
cat > {REDIRECT_NFT_PATH} <<'EOF'\n{nft_content}EOF\n\
chmod 0644 {REDIRECT_NFT_PATH}\n\
cat > {REDIRECT_SERVICE_PATH} <<'EOF'\n{unit_content}EOF\n\
chmod 0644 {REDIRECT_SERVICE_PATH}\n"
    );
    let cmd = format!("sudo -n sh -lc {}", ssh::sh_single_quote(&script));
    ssh::run_remote(sess, &cmd, false, "")?;

    ssh::run_remote(sess, "sudo -n systemctl daemon-reload", false, "")?;
    ssh::run_remote(
        sess,
        &format!("sudo -n systemctl enable --now {REDIRECT_SERVICE_NAME}"),
        false,
        "",
    )?;

    if let Err(e) = ssh::run_remote(
        sess,
        &format!("sudo -n systemctl is-active --quiet {REDIRECT_SERVICE_NAME}"),
        false,
        "",
    ) {
        let status = ssh::run_remote(
            sess,
            &format!("sudo -n systemctl status --no-pager -l {REDIRECT_SERVICE_NAME}"),
            false,
            "",
        )
        .unwrap_or_default();
        let journal = ssh::run_remote(
            sess,
            &format!("sudo -n journalctl -u {REDIRECT_SERVICE_NAME} -b --no-pager -n 120"),
            false,
            "",
        )
        .unwrap_or_default();
        if status.is_empty() {
            return Err(e);
        }
        if journal.is_empty() {
            return Err(AppError::Remote(format!("{e}; status:\n{status}")));
        }
        return Err(AppError::Remote(format!(
            "{e}; status:\n{status}\n\njournal:\n{journal}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nft_table_targets_tunnel_interface_and_address() {
        let t = render_nft_table();
        assert!(t.contains("table ip lh_redirect"));
        assert!(t.contains("iifname \"wg0\" ip daddr 10.0.0.1 dnat to 127.0.0.1"));
        assert!(t.contains("hook prerouting"));
    }

    #[test]
    fn redirect_unit_is_oneshot_with_cleanup() {
        let u = render_redirect_unit("/usr/sbin/nft");
        assert!(u.contains("Type=oneshot"));
        assert!(u.contains("ExecStartPre=-/usr/sbin/nft delete table ip lh_redirect"));
        assert!(u.contains(&format!("ExecStart=/usr/sbin/nft -f {REDIRECT_NFT_PATH}")));
        assert!(u.contains("RemainAfterExit=yes"));
    }

    #[test]
    fn sysctl_enables_route_localnet_for_tunnel() {
        let s = render_sysctl();
        assert!(s.contains("net.ipv4.conf.all.route_localnet=1"));
        assert!(s.contains("net.ipv4.conf.wg0.route_localnet=1"));
    }
}
