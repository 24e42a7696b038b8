use crate::error::AppError;
use std::process::Command;

/// Run a local subprocess and return its combined, trimmed output.
///
/// Non-zero exit returns the output inside the error so callers can decide
/// from a single value (e.g. a package manager reporting "already installed").
pub fn run(name: &str, args: &[&str]) -> Result<String, AppError> {
    let out = Command::new(name)
        .args(args)
        .output()
        .map_err(|e| AppError::Local(format!("spawn {name}: {e}")))?;

    let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&out.stderr);
    if !stderr.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }
    let output = combined.trim().to_string();

    if !out.status.success() {
        if output.is_empty() {
            return Err(AppError::Local(format!("{name} exited with {}", out.status)));
        }
        return Err(AppError::Local(format!(
            "{name} exited with {} ({output})",
            out.status
        )));
    }
    Ok(output)
}

/// Run a command under non-interactive sudo.
pub fn sudo(args: &[&str]) -> Result<String, AppError> {
    let mut full = vec!["-n"];
    full.extend_from_slice(args);
    run("sudo", &full)
}

/// Preflight: the workflow needs cached local sudo credentials.
pub fn check_local_sudo() -> Result<(), AppError> {
    sudo(&["true"]).map(|_| ())
}
