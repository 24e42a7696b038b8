//! Shared-home export: /home/arc served over NFSv4, reachable only across
//! the tunnel, squashed to the arc account on the server.

use crate::config::{ARC_HOME, WG_CLIENT_CIDR, WG_SERVER_IP};

pub const NFS_MOUNT_TARGET: &str = ARC_HOME;
pub const NFS_EXPORTS_FILE: &str = "/etc/exports.d/arc.exports";

pub fn client_ip() -> &'static str {
    WG_CLIENT_CIDR.split('/').next().unwrap_or(WG_CLIENT_CIDR)
}

pub fn client_cidr() -> String {
    format!("{}/32", client_ip())
}

pub fn server_export_source() -> String {
    format!("{WG_SERVER_IP}:{NFS_MOUNT_TARGET}")
}

/// Render the exports.d entry. All access is squashed to the arc account's
/// UID/GID so files land owned by arc regardless of the client-side user.
pub fn render_exports(anon_uid: &str, anon_gid: &str) -> String {
    format!(
        "{NFS_MOUNT_TARGET} {}(rw,sync,all_squash,no_subtree_check,anonuid={},anongid={},sec=sys)\n",
        client_cidr(),
        anon_uid.trim(),
        anon_gid.trim()
    )
}

/// Render the fstab row for the automount. Soft, systemd-automounted, and
/// failure-tolerant so a dead tunnel cannot hang the workstation's boot.
pub fn render_fstab_line() -> String {
    let opts = [
        "rw",
        "soft",
        "noauto",
        "x-systemd.automount",
        "x-systemd.idle-timeout=300",
        "x-systemd.mount-timeout=8s",
        "_netdev",
        "nofail",
        "nfsvers=4.2",
        "proto=tcp",
        "timeo=10",
        "retrans=1",
    ];
    format!(
        "{} {NFS_MOUNT_TARGET} nfs4 {} 0 0",
        server_export_source(),
        opts.join(",")
    )
}

/// fstab row predicate: the second whitespace field is the mount target.
pub fn is_arc_mount_row(line: &str) -> bool {
    line.split_whitespace().nth(1) == Some(NFS_MOUNT_TARGET)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::textpatch;

    #[test]
    fn exports_rendering_is_exact() {
        assert_eq!(
            render_exports("1001", "1001"),
            "/home/arc 10.0.0.2/32(rw,sync,all_squash,no_subtree_check,anonuid=1001,anongid=1001,sec=sys)\n"
        );
    }

    #[test]
    fn fstab_line_carries_required_options() {
        let line = render_fstab_line();
        for need in [
            "10.0.0.1:/home/arc",
            "/home/arc",
            "nfs4",
            "x-systemd.automount",
            "_netdev",
            "nofail",
            "nfsvers=4.2",
        ] {
            assert!(line.contains(need), "fstab line missing {need:?}: {line}");
        }
    }

    #[test]
    fn fstab_upsert_appends_when_missing() {
        let input = "# /etc/fstab\nUUID=abc / ext4 defaults 0 1\n";
        let (out, changed) = textpatch::upsert_entry(input, is_arc_mount_row, &render_fstab_line());
        assert!(changed);
        assert!(out.contains(&render_fstab_line()));
        assert!(out.contains("UUID=abc / ext4 defaults 0 1"));
    }

    #[test]
    fn fstab_upsert_replaces_stale_entry() {
        let input = "# /etc/fstab\n10.0.0.1:/home/arc /home/arc nfs4 defaults 0 0\n";
        let (out, changed) = textpatch::upsert_entry(input, is_arc_mount_row, &render_fstab_line());
        assert!(changed);
        assert!(!out.contains("nfs4 defaults 0 0"));
        assert!(out.contains(&render_fstab_line()));
    }

    #[test]
    fn fstab_upsert_unchanged_for_canonical_entry() {
        let input = format!("{}\n", render_fstab_line());
        let (out, changed) = textpatch::upsert_entry(&input, is_arc_mount_row, &render_fstab_line());
        assert!(!changed);
        assert_eq!(out, input);
    }
}
