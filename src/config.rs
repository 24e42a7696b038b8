use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ARC_USER: &str = "arc";
pub const ARC_HOME: &str = "/home/arc";

pub const WG_INTERFACE: &str = "wg0";
pub const WG_PORT: u16 = 51820;
pub const WG_SERVER_CIDR: &str = "10.0.0.1/32";
pub const WG_CLIENT_CIDR: &str = "10.0.0.2/32";
pub const WG_SERVER_IP: &str = "10.0.0.1";

/// Hostname aliases managed in /etc/hosts: `remotehost` resolves over the
/// tunnel, `pub.remotehost` keeps the public address reachable by name.
pub const HOSTS_ALIAS_TUNNEL: &str = "remotehost";
pub const HOSTS_ALIAS_PUBLIC: &str = "pub.remotehost";

/// Resolve the app data directory: ~/.arc/
pub fn app_dir() -> Result<PathBuf, AppError> {
    let home = dirs::home_dir().ok_or(AppError::HomeDirNotFound)?;
    Ok(home.join(".arc"))
}

/// ~/.arc/wireguard/ — user-readable copies of the tunnel configs.
pub fn wireguard_dir() -> Result<PathBuf, AppError> {
    Ok(app_dir()?.join("wireguard"))
}

/// ~/.arc/provision/ — records of completed runs.
pub fn provision_dir() -> Result<PathBuf, AppError> {
    Ok(app_dir()?.join("provision"))
}

/// ~/.ssh/ for the invoking user.
pub fn user_ssh_dir() -> Result<PathBuf, AppError> {
    let home = dirs::home_dir().ok_or(AppError::HomeDirNotFound)?;
    Ok(home.join(".ssh"))
}

/// ~/.ssh/id_ed25519 — the identity installed for the arc account.
pub fn ssh_private_key_path() -> Result<PathBuf, AppError> {
    Ok(user_ssh_dir()?.join("id_ed25519"))
}

pub fn ssh_public_key_path() -> Result<PathBuf, AppError> {
    Ok(user_ssh_dir()?.join("id_ed25519.pub"))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProvisionRecord {
    pub id: String,
    pub host: String,
    pub addr: String,
    pub ready_as: String,
    pub endpoint: String,
    pub created_at: DateTime<Utc>,
}

impl ProvisionRecord {
    pub fn save(&self) -> Result<PathBuf, AppError> {
        let dir = provision_dir()?;
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", self.id));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}
