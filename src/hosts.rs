//! Managed aliases in /etc/hosts: `remotehost` points at the tunnel address,
//! `pub.remotehost` at the server's public address.

use crate::config::{HOSTS_ALIAS_PUBLIC, HOSTS_ALIAS_TUNNEL, WG_SERVER_IP};
use crate::error::AppError;
use crate::localcmd;
use crate::textpatch;
use std::net::{IpAddr, ToSocketAddrs};

/// Resolve a hostname to an address, preferring IPv4 to keep /etc/hosts simple.
pub fn resolve_host_to_ip(host: &str) -> Result<String, AppError> {
    let h = host.trim();
    if h.is_empty() {
        return Err(AppError::Validation("host is empty".into()));
    }
    if h.parse::<IpAddr>().is_ok() {
        return Ok(h.to_string());
    }
    let addrs: Vec<IpAddr> = (h, 0)
        .to_socket_addrs()
        .map_err(|e| AppError::Validation(format!("dns lookup failed for {h:?}: {e}")))?
        .map(|sa| sa.ip())
        .collect();
    if addrs.is_empty() {
        return Err(AppError::Validation(format!(
            "dns lookup returned no IPs for {h:?}"
        )));
    }
    for ip in &addrs {
        if ip.is_ipv4() {
            return Ok(ip.to_string());
        }
    }
    Ok(addrs[0].to_string())
}

/// Rewrite hosts content so the managed aliases map to exactly the given
/// addresses. Managed alias tokens are stripped from foreign lines (the line
/// is dropped only when stripping empties it); comments and blanks are never
/// touched; the canonical mappings are appended in stable order.
pub fn rewrite_hosts(content: &str, tunnel_ip: &str, public_ip: &str) -> (String, bool) {
    let managed = [HOSTS_ALIAS_TUNNEL, HOSTS_ALIAS_PUBLIC];
    let mut out: Vec<String> = Vec::new();

    for ln in content.split('\n') {
        let trim = ln.trim();
        if trim.is_empty() || trim.starts_with('#') {
            out.push(ln.to_string());
            continue;
        }
        let fields: Vec<&str> = trim.split_whitespace().collect();
        if fields.len() < 2 {
            out.push(ln.to_string());
            continue;
        }
        let mut kept = vec![fields[0]];
        let mut had_managed = false;
        for f in &fields[1..] {
            if managed.contains(f) {
                had_managed = true;
                continue;
            }
            kept.push(f);
        }
        if had_managed {
            if kept.len() > 1 {
                out.push(kept.join("\t"));
            }
            continue;
        }
        out.push(ln.to_string());
    }

    while out.last().is_some_and(|l| l.trim().is_empty()) {
        out.pop();
    }
    if !tunnel_ip.trim().is_empty() {
        out.push(format!("{}\t{HOSTS_ALIAS_TUNNEL}", tunnel_ip.trim()));
    }
    if !public_ip.trim().is_empty() {
        out.push(format!("{}\t{HOSTS_ALIAS_PUBLIC}", public_ip.trim()));
    }

    let mut new_content = out.join("\n");
    if !new_content.ends_with('\n') {
        new_content.push('\n');
    }
    let changed = new_content != content;
    (new_content, changed)
}

/// Point the managed aliases at the tunnel address and the resolved public
/// address of `pub_host`, updating /etc/hosts in place when needed.
pub fn ensure_local_arc_hosts_aliases(pub_host: &str) -> Result<(), AppError> {
    let pub_ip = resolve_host_to_ip(pub_host)?;

    let current = localcmd::sudo(&["cat", "/etc/hosts"])
        .map_err(|e| AppError::Local(format!("cannot read /etc/hosts: {e}")))?;
    let (updated, changed) = rewrite_hosts(&current, WG_SERVER_IP, &pub_ip);
    if !changed {
        return Ok(());
    }

    let tmp = std::env::temp_dir().join("arc-hosts.tmp");
    textpatch::atomic_write(&tmp, updated.as_bytes(), 0o644)?;
    let tmp_str = tmp.to_string_lossy().into_owned();
    let res = localcmd::sudo(&["install", "-m", "0644", &tmp_str, "/etc/hosts"])
        .map_err(|e| AppError::Local(format!("cannot update /etc/hosts: {e}")));
    let _ = std::fs::remove_file(&tmp);
    res.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_appends_managed_mappings() {
        let (out, changed) = rewrite_hosts("127.0.0.1\tlocalhost\n", "10.0.0.1", "203.0.113.7");
        assert!(changed);
        assert!(out.contains("127.0.0.1\tlocalhost"));
        assert!(out.contains("10.0.0.1\tremotehost"));
        assert!(out.contains("203.0.113.7\tpub.remotehost"));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn rewrite_is_idempotent() {
        let (first, _) = rewrite_hosts("127.0.0.1\tlocalhost\n", "10.0.0.1", "203.0.113.7");
        let (second, changed) = rewrite_hosts(&first, "10.0.0.1", "203.0.113.7");
        assert!(!changed);
        assert_eq!(first, second);
    }

    #[test]
    fn rewrite_moves_stale_mapping() {
        let input = "192.0.2.1\tremotehost\n127.0.0.1\tlocalhost\n";
        let (out, changed) = rewrite_hosts(input, "10.0.0.1", "203.0.113.7");
        assert!(changed);
        assert!(!out.contains("192.0.2.1"));
        assert!(out.contains("10.0.0.1\tremotehost"));
    }

    #[test]
    fn rewrite_strips_only_managed_tokens_from_packed_lines() {
        let input = "192.0.2.1\tmyhost remotehost otherhost\n";
        let (out, _) = rewrite_hosts(input, "10.0.0.1", "");
        assert!(out.contains("192.0.2.1\tmyhost\totherhost"));
        assert!(out.contains("10.0.0.1\tremotehost"));
    }

    #[test]
    fn rewrite_never_touches_comments() {
        let input = "# remotehost used to live here\n127.0.0.1\tlocalhost\n";
        let (out, _) = rewrite_hosts(input, "10.0.0.1", "");
        assert!(out.starts_with("# remotehost used to live here\n"));
    }

    #[test]
    fn resolve_passes_through_literals() {
        assert_eq!(resolve_host_to_ip("203.0.113.7").unwrap(), "203.0.113.7");
        assert_eq!(resolve_host_to_ip("::1").unwrap(), "::1");
        assert!(resolve_host_to_ip("  ").is_err());
    }
}
