pub mod conf;
pub mod heal;
pub mod keys;

use crate::config::{WG_CLIENT_CIDR, WG_PORT, WG_SERVER_CIDR, WG_SERVER_IP};
use crate::error::AppError;

/// Everything needed to stand up both ends of the tunnel. Either absent or
/// fully populated; the key fields are never filled in piecemeal.
#[derive(Clone, Debug, Default)]
pub struct TunnelConfig {
    pub server_priv: String,
    pub server_pub: String,
    pub client_priv: String,
    pub client_pub: String,

    pub server_conf: String,
    pub client_conf: String,
    pub endpoint: String,
}

/// Generate both key pairs and render the interface configs for both ends.
///
/// Both pairs are generated locally; the remote never produces its own key.
pub fn build_tunnel_config(endpoint_host: &str) -> Result<TunnelConfig, AppError> {
    let host = endpoint_host.trim();
    if host.is_empty() {
        return Err(AppError::Validation(
            "missing host for WireGuard endpoint".into(),
        ));
    }

    let (server_priv, server_pub) = keys::generate_keypair();
    let (client_priv, client_pub) = keys::generate_keypair();

    let endpoint = format!("{host}:{WG_PORT}");
    let client_ip = WG_CLIENT_CIDR.split('/').next().unwrap_or(WG_CLIENT_CIDR);

    let server_conf = [
        "[Interface]".to_string(),
        format!("Address = {WG_SERVER_CIDR}"),
        format!("ListenPort = {WG_PORT}"),
        format!("PrivateKey = {server_priv}"),
        String::new(),
        "[Peer]".to_string(),
        format!("PublicKey = {client_pub}"),
        format!("AllowedIPs = {client_ip}/32"),
        String::new(),
    ]
    .join("\n");

    let client_conf = [
        "[Interface]".to_string(),
        format!("Address = {WG_CLIENT_CIDR}"),
        format!("PrivateKey = {client_priv}"),
        String::new(),
        "[Peer]".to_string(),
        format!("PublicKey = {server_pub}"),
        format!("Endpoint = {endpoint}"),
        format!("AllowedIPs = {WG_SERVER_IP}/32"),
        "PersistentKeepalive = 25".to_string(),
        String::new(),
    ]
    .join("\n");

    Ok(TunnelConfig {
        server_priv,
        server_pub,
        client_priv,
        client_pub,
        server_conf,
        client_conf,
        endpoint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_rejects_empty_host() {
        assert!(build_tunnel_config("  ").is_err());
    }

    #[test]
    fn build_renders_expected_fields() {
        let wg = build_tunnel_config("example.com").unwrap();
        assert_eq!(wg.endpoint, "example.com:51820");
        assert!(wg.server_conf.contains("[Interface]"));
        assert!(wg.server_conf.contains("[Peer]"));
        assert!(wg.server_conf.contains("ListenPort = 51820"));
        assert!(wg.server_conf.contains("Address = 10.0.0.1/32"));
        assert!(wg.client_conf.contains("Endpoint = example.com:51820"));
        assert!(wg.client_conf.contains("AllowedIPs = 10.0.0.1/32"));
        assert!(wg.client_conf.contains("PersistentKeepalive = 25"));
    }

    #[test]
    fn build_threads_keys_into_both_confs() {
        let wg = build_tunnel_config("example.com").unwrap();
        assert!(wg.server_conf.contains(&format!("PrivateKey = {}", wg.server_priv)));
        assert!(wg.server_conf.contains(&format!("PublicKey = {}", wg.client_pub)));
        assert!(wg.client_conf.contains(&format!("PrivateKey = {}", wg.client_priv)));
        assert!(wg.client_conf.contains(&format!("PublicKey = {}", wg.server_pub)));
    }

    #[test]
    fn rendered_confs_parse_back() {
        let wg = build_tunnel_config("example.com").unwrap();
        assert_eq!(conf::parse_private_key(&wg.server_conf).unwrap(), wg.server_priv);
        assert_eq!(conf::parse_private_key(&wg.client_conf).unwrap(), wg.client_priv);
    }
}
