//! X25519 key material for the tunnel, base64-encoded the way wg(8) expects.

use crate::error::AppError;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

/// Clamp per X25519: clear the low 3 bits of byte 0, clear the high bit and
/// set bit 6 of byte 31.
fn clamp(bytes: &mut [u8; 32]) {
    bytes[0] &= 248;
    bytes[31] = (bytes[31] & 127) | 64;
}

fn derive_public(private: [u8; 32]) -> [u8; 32] {
    let secret = StaticSecret::from(private);
    *PublicKey::from(&secret).as_bytes()
}

/// Generate a fresh key pair, returning (private, public) in base64.
pub fn generate_keypair() -> (String, String) {
    let mut private = [0u8; 32];
    OsRng.fill_bytes(&mut private);
    clamp(&mut private);
    let public = derive_public(private);
    (B64.encode(private), B64.encode(public))
}

/// Derive the public key from a base64 private key.
///
/// Stored private keys are already clamped, but clamping is re-applied so a
/// foreign (hand-written) key yields the same public key wg would compute.
pub fn public_key_from_private_b64(priv_b64: &str) -> Result<String, AppError> {
    let raw = B64
        .decode(priv_b64.trim())
        .map_err(|e| AppError::WgKey(format!("decode wg private key: {e}")))?;
    if raw.len() != 32 {
        return Err(AppError::WgKey(format!(
            "wg private key must be 32 bytes, got {}",
            raw.len()
        )));
    }
    let mut private = [0u8; 32];
    private.copy_from_slice(&raw);
    clamp(&mut private);
    Ok(B64.encode(derive_public(private)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_32_bytes_base64() {
        let (priv_b64, pub_b64) = generate_keypair();
        assert_eq!(B64.decode(&priv_b64).unwrap().len(), 32);
        assert_eq!(B64.decode(&pub_b64).unwrap().len(), 32);
    }

    #[test]
    fn generated_private_key_is_clamped() {
        let (priv_b64, _) = generate_keypair();
        let raw = B64.decode(&priv_b64).unwrap();
        assert_eq!(raw[0] & 7, 0);
        assert_eq!(raw[31] & 128, 0);
        assert_eq!(raw[31] & 64, 64);
    }

    #[test]
    fn derived_public_matches_generated() {
        let (priv_b64, pub_b64) = generate_keypair();
        let derived = public_key_from_private_b64(&priv_b64).unwrap();
        assert_eq!(derived, pub_b64);
    }

    #[test]
    fn derive_rejects_bad_input() {
        assert!(public_key_from_private_b64("not base64!!").is_err());
        assert!(public_key_from_private_b64(&B64.encode([0u8; 16])).is_err());
    }
}
