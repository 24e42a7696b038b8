//! Reading and surgically editing wg-quick configuration text.

use crate::error::AppError;

/// Desired values for one peer stanza. `public_key` and `allowed_ips` are
/// always enforced; `endpoint` and `keepalive` only on the client side.
#[derive(Debug, Default)]
pub struct PeerPatch<'a> {
    pub public_key: &'a str,
    pub allowed_ips: &'a str,
    pub endpoint: Option<&'a str>,
    pub keepalive: Option<&'a str>,
}

fn section_header(line: &str) -> Option<&str> {
    let t = line.trim();
    if t.starts_with('[') && t.ends_with(']') {
        Some(t[1..t.len() - 1].trim())
    } else {
        None
    }
}

fn key_value(line: &str) -> Option<(&str, &str)> {
    let t = line.trim();
    if t.is_empty() || t.starts_with('#') || t.starts_with(';') {
        return None;
    }
    let (k, v) = t.split_once('=')?;
    Some((k.trim(), v.trim()))
}

/// Extract the `[Interface]` PrivateKey value.
pub fn parse_private_key(conf: &str) -> Result<String, AppError> {
    let mut section = String::new();
    for ln in conf.split('\n') {
        if let Some(name) = section_header(ln) {
            section = name.to_string();
            continue;
        }
        if !section.eq_ignore_ascii_case("Interface") {
            continue;
        }
        if let Some((k, v)) = key_value(ln) {
            if k.eq_ignore_ascii_case("PrivateKey") && !v.is_empty() {
                return Ok(v.to_string());
            }
        }
    }
    Err(AppError::WgKey(
        "wg conf missing [Interface] PrivateKey".into(),
    ))
}

/// A peer block is the run of lines from its `[Peer]` header up to the next
/// section header (exclusive).
struct PeerBlock {
    start: usize,
    end: usize,
    allowed: String,
}

fn find_peer_blocks(lines: &[&str]) -> Vec<PeerBlock> {
    let mut blocks: Vec<PeerBlock> = Vec::new();
    let mut current: Option<PeerBlock> = None;

    for (i, ln) in lines.iter().enumerate() {
        if let Some(name) = section_header(ln) {
            if let Some(mut b) = current.take() {
                b.end = i;
                blocks.push(b);
            }
            if name.eq_ignore_ascii_case("Peer") {
                current = Some(PeerBlock {
                    start: i,
                    end: lines.len(),
                    allowed: String::new(),
                });
            }
            continue;
        }
        if let Some(b) = current.as_mut() {
            if let Some((k, v)) = key_value(ln) {
                if k.eq_ignore_ascii_case("AllowedIPs") {
                    b.allowed = v.to_string();
                }
            }
        }
    }
    if let Some(b) = current.take() {
        blocks.push(b);
    }
    blocks
}

fn allowed_contains(allowed_raw: &str, want: &str) -> bool {
    let want = want.trim();
    if want.is_empty() {
        return false;
    }
    allowed_raw.split(',').any(|part| part.trim() == want)
}

/// Upsert one field inside a peer block's lines. Missing fields are inserted
/// right after the `[Peer]` header so they stay in the same section.
fn upsert_field(block: &mut Vec<String>, key: &str, value: &str, changed: &mut bool) {
    let canonical = format!("{key} = {value}");
    for ln in block.iter_mut().skip(1) {
        if let Some((k, _)) = key_value(ln) {
            if k.eq_ignore_ascii_case(key) {
                if ln.trim() != canonical {
                    *ln = canonical;
                    *changed = true;
                }
                return;
            }
        }
    }
    block.insert(1, canonical);
    *changed = true;
}

/// Patch the peer stanza that routes `match_allowed_ips` (falling back to the
/// first stanza) to the desired values, leaving everything else untouched.
///
/// Returns the new text and whether anything changed.
pub fn patch_peer(
    conf: &str,
    match_allowed_ips: &str,
    patch: &PeerPatch<'_>,
) -> Result<(String, bool), AppError> {
    let lines: Vec<&str> = conf.split('\n').collect();
    let blocks = find_peer_blocks(&lines);
    if blocks.is_empty() {
        return Err(AppError::TunnelDrift("wg conf missing [Peer] section".into()));
    }

    let want = match_allowed_ips.trim();
    let target = blocks
        .iter()
        .find(|b| allowed_contains(&b.allowed, want))
        // Configs this tool writes carry a single peer; fall back to it.
        .unwrap_or(&blocks[0]);

    let mut block: Vec<String> = lines[target.start..target.end]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut changed = false;
    // Insertion is last-in-first-out at the header, so apply in reverse of
    // the order the rendered configs use.
    if let Some(keep) = patch.keepalive.filter(|s| !s.trim().is_empty()) {
        upsert_field(&mut block, "PersistentKeepalive", keep.trim(), &mut changed);
    }
    if let Some(endp) = patch.endpoint.filter(|s| !s.trim().is_empty()) {
        upsert_field(&mut block, "Endpoint", endp.trim(), &mut changed);
    }
    if !want.is_empty() {
        upsert_field(&mut block, "AllowedIPs", want, &mut changed);
    }
    upsert_field(&mut block, "PublicKey", patch.public_key.trim(), &mut changed);

    if !changed {
        return Ok((conf.to_string(), false));
    }

    let mut out: Vec<String> = lines[..target.start].iter().map(|s| s.to_string()).collect();
    out.extend(block);
    out.extend(lines[target.end..].iter().map(|s| s.to_string()));
    Ok((out.join("\n"), true))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_client_conf() -> String {
        [
            "[Interface]",
            "Address = 10.0.0.2/32",
            "PrivateKey = CPRIV",
            "",
            "[Peer]",
            "PublicKey = OLD",
            "Endpoint = wrong:51820",
            "AllowedIPs = 10.0.0.1/32",
            "PersistentKeepalive = 25",
            "",
        ]
        .join("\n")
    }

    #[test]
    fn parse_private_key_reads_interface_section() {
        assert_eq!(parse_private_key(&sample_client_conf()).unwrap(), "CPRIV");
    }

    #[test]
    fn parse_private_key_ignores_peer_section_keys() {
        let conf = "[Peer]\nPrivateKey = WRONG\n[Interface]\nPrivateKey = RIGHT\n";
        assert_eq!(parse_private_key(conf).unwrap(), "RIGHT");
    }

    #[test]
    fn parse_private_key_missing_is_error() {
        assert!(parse_private_key("[Interface]\nAddress = 10.0.0.1/32\n").is_err());
    }

    #[test]
    fn patch_updates_matching_peer() {
        let patch = PeerPatch {
            public_key: "NEWPUB",
            allowed_ips: "10.0.0.1/32",
            endpoint: Some("example.com:51820"),
            keepalive: Some("25"),
        };
        let (out, changed) = patch_peer(&sample_client_conf(), "10.0.0.1/32", &patch).unwrap();
        assert!(changed);
        assert!(out.contains("PublicKey = NEWPUB"));
        assert!(out.contains("Endpoint = example.com:51820"));
        assert!(out.contains("AllowedIPs = 10.0.0.1/32"));
        assert!(out.contains("PersistentKeepalive = 25"));
        assert!(!out.contains("OLD"));
    }

    #[test]
    fn patch_is_idempotent() {
        let patch = PeerPatch {
            public_key: "NEWPUB",
            allowed_ips: "10.0.0.1/32",
            endpoint: Some("example.com:51820"),
            keepalive: Some("25"),
        };
        let (first, changed1) = patch_peer(&sample_client_conf(), "10.0.0.1/32", &patch).unwrap();
        assert!(changed1);
        let (second, changed2) = patch_peer(&first, "10.0.0.1/32", &patch).unwrap();
        assert!(!changed2);
        assert_eq!(first, second);
        assert_eq!(parse_private_key(&second).unwrap(), "CPRIV");
    }

    #[test]
    fn patch_inserts_missing_fields_inside_peer_section() {
        let conf = [
            "[Interface]",
            "PrivateKey = P",
            "",
            "[Peer]",
            "AllowedIPs = 10.0.0.1/32",
            "",
        ]
        .join("\n");
        let patch = PeerPatch {
            public_key: "PK",
            allowed_ips: "10.0.0.1/32",
            endpoint: Some("h:51820"),
            keepalive: Some("25"),
        };
        let (out, changed) = patch_peer(&conf, "10.0.0.1/32", &patch).unwrap();
        assert!(changed);
        // All inserted lines must land after the [Peer] header.
        let peer_at = out.find("[Peer]").unwrap();
        for field in ["PublicKey = PK", "Endpoint = h:51820", "PersistentKeepalive = 25"] {
            assert!(out.find(field).unwrap() > peer_at, "{field} outside peer block");
        }
    }

    #[test]
    fn patch_selects_peer_by_allowed_ips() {
        let conf = [
            "[Peer]",
            "PublicKey = A",
            "AllowedIPs = 192.168.0.1/32",
            "",
            "[Peer]",
            "PublicKey = B",
            "AllowedIPs = 10.0.0.1/32, 10.0.0.9/32",
            "",
        ]
        .join("\n");
        let patch = PeerPatch {
            public_key: "NEW",
            allowed_ips: "10.0.0.1/32",
            ..Default::default()
        };
        let (out, _) = patch_peer(&conf, "10.0.0.1/32", &patch).unwrap();
        assert!(out.contains("PublicKey = A"));
        assert!(!out.contains("PublicKey = B"));
        assert!(out.contains("PublicKey = NEW"));
        // AllowedIPs of the untouched peer survives byte-for-byte.
        assert!(out.contains("AllowedIPs = 192.168.0.1/32"));
    }

    #[test]
    fn patch_preserves_content_outside_target_block() {
        let conf = sample_client_conf();
        let patch = PeerPatch {
            public_key: "NEWPUB",
            allowed_ips: "10.0.0.1/32",
            ..Default::default()
        };
        let (out, _) = patch_peer(&conf, "10.0.0.1/32", &patch).unwrap();
        assert!(out.starts_with("[Interface]\nAddress = 10.0.0.2/32\nPrivateKey = CPRIV\n"));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn patch_without_any_peer_is_error() {
        let patch = PeerPatch {
            public_key: "X",
            ..Default::default()
        };
        assert!(patch_peer("[Interface]\nPrivateKey = P\n", "10.0.0.1/32", &patch).is_err());
    }
}
