use crate::config;
use crate::error::AppError;
use ssh2::Session;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

/// Connect timeout for the one-time password bootstrap. The first dial may
/// cross a slow WAN path, so it gets more headroom than steady-state dials.
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect timeout for key-based dials as the arc account.
const KEY_AUTH_TIMEOUT: Duration = Duration::from_secs(8);

pub enum Auth<'a> {
    Password(&'a str),
    KeyFile(&'a Path),
}

/// Parse a `user@host[:port]` connect target into (user, host, addr).
pub fn parse_connect_target(target: &str) -> Result<(String, String, String), AppError> {
    let t = target.trim();
    let (user, host) = t.split_once('@').ok_or_else(|| {
        AppError::Validation(format!("invalid target {t:?}, expected user@host"))
    })?;
    let user = user.trim();
    let host = host.trim();
    if user.is_empty() || host.is_empty() {
        return Err(AppError::Validation(format!(
            "invalid target {t:?}, expected user@host"
        )));
    }
    let addr = normalize_ssh_addr(host)?;
    Ok((user.to_string(), host.to_string(), addr))
}

/// Normalize a host into a dialable `host:port` address, defaulting port 22.
/// Accepts `host`, `host:port`, bare IPv6, and `[v6]` / `[v6]:port` forms.
fn normalize_ssh_addr(host: &str) -> Result<String, AppError> {
    if host.is_empty() {
        return Err(AppError::Validation("host is empty".into()));
    }
    if let Some(end) = host.strip_prefix('[').and_then(|_| host.rfind(']')) {
        let rest = &host[end + 1..];
        if rest.is_empty() {
            return Ok(format!("{host}:22"));
        }
        match rest.strip_prefix(':') {
            Some(p) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => {
                Ok(host.to_string())
            }
            _ => Err(AppError::Validation(format!("invalid host {host:?}"))),
        }
    } else {
        match host.matches(':').count() {
            0 => Ok(format!("{host}:22")),
            1 => {
                let (h, p) = host.rsplit_once(':').expect("one colon present");
                if h.is_empty() || p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(AppError::Validation(format!("invalid host {host:?}")));
                }
                Ok(host.to_string())
            }
            // Bare IPv6 literal.
            _ => Ok(format!("[{host}]:22")),
        }
    }
}

/// Open an authenticated SSH session.
///
/// Host keys are not verified: the only remote this tool talks to is the one
/// the operator just typed in, and steady-state traffic rides the tunnel the
/// tool itself issues (trust on first use).
pub fn dial(user: &str, addr: &str, auth: Auth<'_>, timeout: Duration) -> Result<Session, AppError> {
    let sock_addr = addr
        .to_socket_addrs()
        .map_err(|e| AppError::Ssh(format!("resolve {addr}: {e}")))?
        .next()
        .ok_or_else(|| AppError::Ssh(format!("resolve {addr}: no addresses")))?;

    let tcp = TcpStream::connect_timeout(&sock_addr, timeout)
        .map_err(|e| AppError::Ssh(format!("TCP connect to {addr}: {e}")))?;
    let _ = tcp.set_read_timeout(Some(timeout));
    let _ = tcp.set_write_timeout(Some(timeout));

    let mut sess = Session::new().map_err(|e| AppError::Ssh(format!("Session::new: {e}")))?;
    sess.set_timeout(timeout.as_millis() as u32);
    sess.set_tcp_stream(tcp);
    sess.handshake()
        .map_err(|e| AppError::Ssh(format!("SSH handshake with {addr}: {e}")))?;

    match auth {
        Auth::Password(password) => sess
            .userauth_password(user, password)
            .map_err(|e| AppError::Auth(format!("password auth failed for {user}@{addr}: {e}")))?,
        Auth::KeyFile(key) => sess
            .userauth_pubkey_file(user, None, key, None)
            .map_err(|e| AppError::Auth(format!("key auth failed for {user}@{addr}: {e}")))?,
    }

    Ok(sess)
}

/// Password-auth dial used only for the bootstrap phase.
pub fn dial_bootstrap(user: &str, addr: &str, password: &str) -> Result<Session, AppError> {
    dial(user, addr, Auth::Password(password), BOOTSTRAP_TIMEOUT)
}

/// Key-auth dial as the arc account with the local identity.
pub fn dial_arc(addr: &str) -> Result<Session, AppError> {
    let key = config::ssh_private_key_path()?;
    dial(config::ARC_USER, addr, Auth::KeyFile(&key), KEY_AUTH_TIMEOUT)
}

/// Run one command on the remote host and return its combined, trimmed output.
///
/// The command runs under a login shell. With `elevate`, it is prefixed with a
/// non-interactive sudo invocation and the password travels over stdin so it
/// never appears in the remote process list.
pub fn run_remote(
    sess: &Session,
    command: &str,
    elevate: bool,
    sudo_password: &str,
) -> Result<String, AppError> {
    let mut channel = sess
        .channel_session()
        .map_err(|e| AppError::Ssh(format!("open channel: {e}")))?;

    let mut remote_cmd = format!("/bin/sh -lc {}", sh_single_quote(command));
    if elevate {
        remote_cmd = format!("sudo -S -p '' -k {remote_cmd}");
    }

    channel
        .exec(&remote_cmd)
        .map_err(|e| AppError::Ssh(format!("exec command: {e}")))?;

    if elevate {
        channel
            .write_all(format!("{sudo_password}\n").as_bytes())
            .map_err(|e| AppError::Ssh(format!("write sudo password: {e}")))?;
    }
    channel
        .send_eof()
        .map_err(|e| AppError::Ssh(format!("send eof: {e}")))?;

    let mut stdout = String::new();
    channel
        .read_to_string(&mut stdout)
        .map_err(|e| AppError::Ssh(format!("read output: {e}")))?;
    let mut stderr = String::new();
    let _ = channel.stderr().read_to_string(&mut stderr);

    channel
        .wait_close()
        .map_err(|e| AppError::Ssh(format!("wait close: {e}")))?;

    let mut combined = stdout;
    if !stderr.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }
    let output = combined.trim().to_string();

    let exit_status = channel.exit_status().unwrap_or(-1);
    if exit_status != 0 {
        return Err(AppError::Remote(format!(
            "exit status {exit_status}: {output}"
        )));
    }
    Ok(output)
}

/// Detect whether the remaining remote steps need sudo.
///
/// A root bootstrap needs no elevation; anyone else must pass a trivial
/// elevated probe or the rest of the workflow cannot proceed.
pub fn can_run_privileged(
    bootstrap_user: &str,
    sess: &Session,
    password: &str,
) -> Result<bool, AppError> {
    if bootstrap_user == "root" {
        return Ok(false);
    }
    run_remote(sess, "true", true, password).map_err(|e| {
        AppError::Elevation(format!(
            "bootstrap user {bootstrap_user:?} is not root and sudo failed: {e}"
        ))
    })?;
    Ok(true)
}

/// Quote a string for safe inclusion in a single-quoted shell context.
pub fn sh_single_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

/// Ensure ~/.ssh/id_ed25519[.pub] exist, generating via ssh-keygen if needed.
///
/// If only the private half exists the public line is re-derived with
/// `ssh-keygen -y` rather than regenerating the pair.
pub fn ensure_local_keypair() -> Result<(), AppError> {
    let ssh_dir = config::user_ssh_dir()?;
    std::fs::create_dir_all(&ssh_dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&ssh_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    let priv_path = config::ssh_private_key_path()?;
    let pub_path = config::ssh_public_key_path()?;

    if priv_path.is_file() && pub_path.is_file() {
        return Ok(());
    }

    if priv_path.is_file() {
        let out = std::process::Command::new("ssh-keygen")
            .arg("-y")
            .arg("-f")
            .arg(&priv_path)
            .output()
            .map_err(|e| AppError::SshKeyGen(format!("failed to run ssh-keygen -y: {e}")))?;
        if !out.status.success() {
            return Err(AppError::SshKeyGen(format!(
                "ssh-keygen -y failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        let pub_line = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if pub_line.is_empty() {
            return Err(AppError::SshKeyGen("derived public key is empty".into()));
        }
        std::fs::write(&pub_path, format!("{pub_line}\n"))?;
        return Ok(());
    }

    let status = std::process::Command::new("ssh-keygen")
        .args(["-t", "ed25519", "-f"])
        .arg(&priv_path)
        .args(["-N", "", "-q"])
        .status()
        .map_err(|e| AppError::SshKeyGen(format!("failed to run ssh-keygen: {e}")))?;
    if !status.success() {
        return Err(AppError::SshKeyGen(
            "ssh-keygen exited with non-zero status".into(),
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&priv_path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Read the first line of the local public key file.
pub fn read_public_key_line() -> Result<String, AppError> {
    let pub_path = config::ssh_public_key_path()?;
    let raw = std::fs::read_to_string(&pub_path)?;
    let line = raw.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return Err(AppError::SshKeyGen(format!(
            "{} is empty",
            pub_path.display()
        )));
    }
    Ok(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_connect_target_basic() {
        let (user, host, addr) = parse_connect_target("alice@10.0.0.5").unwrap();
        assert_eq!(user, "alice");
        assert_eq!(host, "10.0.0.5");
        assert_eq!(addr, "10.0.0.5:22");
    }

    #[test]
    fn parse_connect_target_with_port() {
        let (_, host, addr) = parse_connect_target("bob@example.com:2222").unwrap();
        assert_eq!(host, "example.com:2222");
        assert_eq!(addr, "example.com:2222");
    }

    #[test]
    fn parse_connect_target_trims_whitespace() {
        let (user, host, addr) = parse_connect_target("  carol@server  ").unwrap();
        assert_eq!(user, "carol");
        assert_eq!(host, "server");
        assert_eq!(addr, "server:22");
    }

    #[test]
    fn parse_connect_target_rejects_missing_at() {
        assert!(matches!(
            parse_connect_target("bad-input"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn parse_connect_target_rejects_empty_parts() {
        assert!(parse_connect_target("@host").is_err());
        assert!(parse_connect_target("user@").is_err());
        assert!(parse_connect_target("@").is_err());
    }

    #[test]
    fn normalize_addr_ipv6() {
        assert_eq!(normalize_ssh_addr("::1").unwrap(), "[::1]:22");
        assert_eq!(normalize_ssh_addr("[::1]").unwrap(), "[::1]:22");
        assert_eq!(normalize_ssh_addr("[::1]:2022").unwrap(), "[::1]:2022");
    }

    #[test]
    fn normalize_addr_rejects_bad_port() {
        assert!(normalize_ssh_addr("host:abc").is_err());
        assert!(normalize_ssh_addr("host:").is_err());
    }

    #[test]
    fn single_quote_escapes_quotes() {
        assert_eq!(sh_single_quote("abc"), "'abc'");
        assert_eq!(sh_single_quote("a'b"), r#"'a'"'"'b'"#);
    }
}
