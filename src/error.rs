use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Invalid step registry: {0}")]
    Registry(String),

    #[error("SSH auth error: {0}")]
    Auth(String),

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("Privilege elevation error: {0}")]
    Elevation(String),

    #[error("Remote command failed: {0}")]
    Remote(String),

    #[error("Local command failed: {0}")]
    Local(String),

    #[error("SSH key generation error: {0}")]
    SshKeyGen(String),

    #[error("WireGuard key error: {0}")]
    WgKey(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Tunnel verification failed: {0}")]
    TunnelDrift(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
