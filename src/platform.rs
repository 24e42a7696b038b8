use crate::error::AppError;
use crate::localcmd;
use crate::ssh;
use ssh2::Session;
use std::collections::HashMap;
use std::path::Path;

pub const SUPPORTED_REMOTE: &[&str] = &["ubuntu", "debian"];
pub const SUPPORTED_LOCAL: &[&str] = &["ubuntu", "debian", "arch", "manjaro"];

/// Parse /etc/os-release content into a key/value map, stripping quotes.
pub fn parse_os_release(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for ln in raw.lines() {
        let ln = ln.trim();
        if ln.is_empty() || ln.starts_with('#') {
            continue;
        }
        let Some((k, v)) = ln.split_once('=') else {
            continue;
        };
        let k = k.trim();
        let v = v.trim().trim_matches('"');
        if !k.is_empty() {
            out.insert(k.to_string(), v.to_string());
        }
    }
    out
}

/// OS ID of the local machine from /etc/os-release.
pub fn local_os_id() -> Result<String, AppError> {
    let raw = std::fs::read_to_string("/etc/os-release")?;
    let m = parse_os_release(&raw);
    match m.get("ID").map(|s| s.trim()) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(AppError::UnsupportedPlatform(
            "missing ID in /etc/os-release".into(),
        )),
    }
}

/// OS ID of the remote machine over an existing session.
pub fn remote_os_id(sess: &Session) -> Result<String, AppError> {
    let out = ssh::run_remote(sess, "cat /etc/os-release", false, "")?;
    let m = parse_os_release(&out);
    match m.get("ID").map(|s| s.trim()) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(AppError::UnsupportedPlatform(
            "missing ID in remote /etc/os-release".into(),
        )),
    }
}

fn kernel_release() -> Result<String, AppError> {
    localcmd::run("uname", &["-r"])
}

/// Arch-style kernels record their package base next to the modules.
fn kernel_pkgbase(krel: &str) -> String {
    if krel.trim().is_empty() {
        return String::new();
    }
    let p = Path::new("/usr/lib/modules").join(krel).join("pkgbase");
    std::fs::read_to_string(p)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Manjaro names header packages after major+minor: 6.6.11-1-MANJARO -> linux66-headers.
fn manjaro_headers_pkg(kernel: &str) -> String {
    let mut parts = kernel.splitn(3, '.');
    let (Some(maj_raw), Some(min_raw)) = (parts.next(), parts.next()) else {
        return String::new();
    };
    let maj: String = maj_raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let min: String = min_raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    if maj.is_empty() || min.is_empty() {
        return String::new();
    }
    format!("linux{maj}{min}-headers")
}

/// Make sure the local kernel can load the wireguard module, installing
/// dkms/headers fallbacks per distro when the module is missing.
pub fn ensure_wireguard_kernel_local(osid: &str) -> Result<(), AppError> {
    if localcmd::sudo(&["modprobe", "wireguard"]).is_ok() {
        return Ok(());
    }

    let krel = kernel_release().unwrap_or_default();
    let pkgbase = kernel_pkgbase(&krel);
    let mut install_log: Vec<String> = Vec::new();

    let try_install = |args: &[&str], log: &mut Vec<String>| {
        let rendered = format!("$ sudo -n {}", args.join(" "));
        match localcmd::sudo(args) {
            Ok(out) if out.is_empty() => log.push(format!("{rendered}\n(ok)")),
            Ok(out) => log.push(format!("{rendered}\n{out}")),
            Err(e) => log.push(format!("{rendered}\nERR: {e}")),
        }
    };

    match osid {
        "ubuntu" => {
            let extra = format!("linux-modules-extra-{krel}");
            let headers = format!("linux-headers-{krel}");
            try_install(&["apt-get", "install", "-y", &extra], &mut install_log);
            try_install(
                &["apt-get", "install", "-y", "wireguard-dkms", &headers],
                &mut install_log,
            );
        }
        "debian" => {
            let headers = format!("linux-headers-{krel}");
            try_install(
                &["apt-get", "install", "-y", "wireguard-dkms", &headers],
                &mut install_log,
            );
        }
        "arch" | "manjaro" => {
            try_install(
                &["pacman", "-Sy", "--noconfirm", "dkms", "wireguard-dkms"],
                &mut install_log,
            );
            let mut candidates: Vec<String> = Vec::new();
            if !pkgbase.is_empty() {
                candidates.push(format!("{pkgbase}-headers"));
            }
            let manjaro = manjaro_headers_pkg(&krel);
            if !manjaro.is_empty() {
                candidates.push(manjaro);
            }
            candidates.push("linux-headers".to_string());
            for h in &candidates {
                let rendered = format!("$ sudo -n pacman -Sy --noconfirm {h}");
                match localcmd::sudo(&["pacman", "-Sy", "--noconfirm", h]) {
                    Ok(out) if out.is_empty() => {
                        install_log.push(format!("{rendered}\n(ok)"));
                        break;
                    }
                    Ok(out) => {
                        install_log.push(format!("{rendered}\n{out}"));
                        break;
                    }
                    Err(e) => install_log.push(format!("{rendered}\nERR: {e}")),
                }
            }
        }
        // Unsupported OS is rejected by the detect step before we get here.
        _ => {}
    }

    if let Err(e) = localcmd::sudo(&["depmod", "-a"]) {
        install_log.push(format!("$ sudo -n depmod -a\nERR: {e}"));
    }

    if let Err(e) = localcmd::sudo(&["modprobe", "wireguard"]) {
        let details = if install_log.is_empty() {
            String::new()
        } else {
            format!("\n\ninstall log:\n{}", install_log.join("\n\n"))
        };
        return Err(AppError::UnsupportedPlatform(format!(
            "wireguard kernel support missing (modprobe wireguard failed): {e}{details}"
        )));
    }
    Ok(())
}

/// Remote analogue: best-effort modprobe with a dkms/headers fallback script.
pub fn ensure_wireguard_kernel_remote(sess: &Session, osid: &str) -> Result<(), AppError> {
    if ssh::run_remote(sess, "sudo -n modprobe wireguard", false, "").is_ok() {
        return Ok(());
    }

    let mut script = String::from("set -eu\nkrel=\"$(uname -r)\"\n");
    match osid {
        "ubuntu" => {
            script.push_str("sudo -n apt-get install -y \"linux-modules-extra-${krel}\" || true\n");
            script.push_str(
                "sudo -n apt-get install -y wireguard-dkms \"linux-headers-${krel}\" || true\n",
            );
        }
        "debian" => {
            script.push_str(
                "sudo -n apt-get install -y wireguard-dkms \"linux-headers-${krel}\" || true\n",
            );
        }
        _ => {}
    }
    script.push_str("sudo -n modprobe wireguard\n");
    ssh::run_remote(sess, &script, false, "").map_err(|e| {
        AppError::UnsupportedPlatform(format!(
            "wireguard kernel support missing on remote (modprobe wireguard failed): {e}"
        ))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_os_release_strips_quotes_and_comments() {
        let m = parse_os_release("NAME=Ubuntu\n# comment\nID=ubuntu\nVERSION_ID=\"24.04\"\n");
        assert_eq!(m["ID"], "ubuntu");
        assert_eq!(m["VERSION_ID"], "24.04");
        assert_eq!(m["NAME"], "Ubuntu");
    }

    #[test]
    fn parse_os_release_skips_malformed_lines() {
        let m = parse_os_release("no-equals-here\nID=debian\n");
        assert_eq!(m.len(), 1);
        assert_eq!(m["ID"], "debian");
    }

    #[test]
    fn manjaro_headers_from_kernel_release() {
        assert_eq!(manjaro_headers_pkg("6.6.11-1-MANJARO"), "linux66-headers");
        assert_eq!(manjaro_headers_pkg("6.10.1-3-MANJARO"), "linux610-headers");
        assert_eq!(manjaro_headers_pkg("bogus"), "");
    }
}
