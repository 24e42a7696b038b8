//! Text blocks and remote shell scripts installed by the steps.

use crate::config::{ARC_HOME, ARC_USER};
use crate::ssh;

pub const ARC_PROMPT_START: &str = "### ARC_PROMPT_START";
pub const ARC_PROMPT_END: &str = "### ARC_PROMPT_END";

pub const ARC_TMUX_START: &str = "### ARC_TMUX_START";
pub const ARC_TMUX_END: &str = "### ARC_TMUX_END";

/// Prompt block for the arc account on the remote (~/.zshrc).
pub const REMOTE_ZSH_PROMPT_BLOCK: &str = r#"autoload -Uz colors && colors
setopt PROMPT_SUBST
PROMPT='%F{magenta}arc%f@%F{cyan}%m%f %F{blue}%1~%f %(?.%F{green}.%F{red})>%f '
export EDITOR=vim"#;

/// Prompt block for the operator's workstation (~/.bashrc).
pub const LOCAL_BASH_PROMPT_BLOCK: &str = r#"PS1='\[\e[35m\]arc\[\e[0m\]:\[\e[34m\]\W\[\e[0m\] > '
alias remote='ssh arc@remotehost'"#;

/// tmux defaults for the arc account on the remote (~/.tmux.conf).
pub const REMOTE_TMUX_BLOCK: &str = r#"set -g default-terminal "tmux-256color"
set -g history-limit 50000
set -g mouse on
set -g status-style bg=colour235,fg=colour250"#;

/// Script that idempotently installs a marker-delimited block into a file in
/// the remote user's home: strip any prior region, trim trailing blanks,
/// append the fresh block after one separating blank line.
pub fn upsert_block_script(file: &str, start: &str, end: &str, block: &str) -> String {
    let body = block.trim_end_matches('\n');
    format!(
        r#"set -eu
f="$HOME/{file}"
tmp="$(mktemp)"
if [ -f "$f" ]; then
  awk -v start={start_q} -v end={end_q} '
    $0 == start {{skip=1; next}}
    $0 == end {{skip=0; next}}
    skip {{next}}
    {{lines[++n]=$0}}
    END {{
      while (n > 0 && lines[n] ~ /^[[:space:]]*$/) n--
      for (i=1; i<=n; i++) print lines[i]
    }}' "$f" > "$tmp"
fi
if [ -s "$tmp" ]; then printf '\n' >> "$tmp"; fi
cat >> "$tmp" <<'ARC_BLOCK_EOF'
{start}
{body}
{end}
ARC_BLOCK_EOF
mv "$tmp" "$f"
chmod 600 "$f"
"#,
        start_q = ssh::sh_single_quote(start),
        end_q = ssh::sh_single_quote(end),
    )
}

/// Create the arc account if missing and normalize its home.
pub fn ensure_arc_user_script() -> String {
    format!(
        r#"set -eu
id -u {ARC_USER} >/dev/null 2>&1 || useradd --create-home --home-dir {ARC_HOME} --shell /bin/bash {ARC_USER}
chown {ARC_USER}:{ARC_USER} {ARC_HOME}
chmod 755 {ARC_HOME}
"#
    )
}

/// Grant arc passwordless sudo; the infra steps run `sudo -n` as arc.
pub fn ensure_arc_sudoers_script() -> String {
    format!(
        r#"set -eu
cat > /etc/sudoers.d/{ARC_USER} <<'SUDOEOF'
{ARC_USER} ALL=(ALL) NOPASSWD: ALL
SUDOEOF
chmod 440 /etc/sudoers.d/{ARC_USER}
chown root:root /etc/sudoers.d/{ARC_USER}
visudo -cf /etc/sudoers.d/{ARC_USER}
"#
    )
}

pub fn ensure_arc_hushlogin_script() -> String {
    format!(
        r#"set -eu
touch {ARC_HOME}/.hushlogin
chown {ARC_USER}:{ARC_USER} {ARC_HOME}/.hushlogin
chmod 644 {ARC_HOME}/.hushlogin
"#
    )
}

/// Append the workstation's public key to arc's authorized_keys once.
pub fn ensure_arc_authorized_key_script(pub_key_line: &str) -> String {
    let quoted = ssh::sh_single_quote(pub_key_line);
    format!(
        r#"set -eu
install -d -m 0700 {ARC_HOME}/.ssh
touch {ARC_HOME}/.ssh/authorized_keys
grep -qxF {quoted} {ARC_HOME}/.ssh/authorized_keys || printf '%s\n' {quoted} >> {ARC_HOME}/.ssh/authorized_keys
chmod 600 {ARC_HOME}/.ssh/authorized_keys
chown -R {ARC_USER}:{ARC_USER} {ARC_HOME}/.ssh
"#
    )
}

/// Remote waypipe server socket as a systemd user unit for arc.
pub fn waypipe_remote_unit() -> String {
    r#"[Unit]
Description=ARC waypipe server socket

[Service]
ExecStart=/usr/bin/waypipe --socket %t/waypipe-arc.sock server -- /usr/bin/sleep infinity
Restart=on-failure
RestartSec=5

[Install]
WantedBy=default.target
"#
    .to_string()
}

/// Local waypipe client half, paired with the SSH tunnel unit below.
pub fn waypipe_local_client_unit() -> String {
    r#"[Unit]
Description=ARC waypipe client socket

[Service]
ExecStart=/usr/bin/waypipe --socket %t/waypipe-arc-client.sock client
Restart=on-failure
RestartSec=5

[Install]
WantedBy=default.target
"#
    .to_string()
}

/// Forward the remote waypipe socket to the local client over the tunnel.
/// `remote_uid` pins the remote runtime dir; %U is only valid locally.
pub fn waypipe_local_tunnel_unit(remote_uid: &str) -> String {
    format!(
        r#"[Unit]
Description=ARC persistent waypipe tunnel
After=network-online.target arc-waypipe-client.service
Requires=arc-waypipe-client.service

[Service]
ExecStart=/usr/bin/ssh -NT -o ExitOnForwardFailure=yes -o ServerAliveInterval=25 -R /run/user/{remote_uid}/waypipe-arc.sock:%t/waypipe-arc-client.sock {ARC_USER}@remotehost
Restart=on-failure
RestartSec=5

[Install]
WantedBy=default.target
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_script_embeds_markers_and_block() {
        let s = upsert_block_script(".zshrc", ARC_PROMPT_START, ARC_PROMPT_END, "PROMPT='x'");
        assert!(s.contains("### ARC_PROMPT_START\nPROMPT='x'\n### ARC_PROMPT_END"));
        assert!(s.contains("$HOME/.zshrc"));
        assert!(s.contains("mktemp"));
    }

    #[test]
    fn sudoers_script_validates_with_visudo() {
        let s = ensure_arc_sudoers_script();
        assert!(s.contains("visudo -cf /etc/sudoers.d/arc"));
        assert!(s.contains("arc ALL=(ALL) NOPASSWD: ALL"));
        assert!(s.contains("chmod 440"));
    }

    #[test]
    fn authorized_key_script_appends_only_once() {
        let s = ensure_arc_authorized_key_script("ssh-ed25519 AAAA user@host");
        assert!(s.contains("grep -qxF 'ssh-ed25519 AAAA user@host'"));
        assert!(s.contains("chmod 600 /home/arc/.ssh/authorized_keys"));
    }

    #[test]
    fn waypipe_tunnel_unit_pins_remote_uid() {
        let u = waypipe_local_tunnel_unit("1001");
        assert!(u.contains("-R /run/user/1001/waypipe-arc.sock:%t/waypipe-arc-client.sock"));
        assert!(u.contains("arc@remotehost"));
    }
}
