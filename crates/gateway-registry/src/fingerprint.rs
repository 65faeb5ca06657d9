use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::error::RegistryError;

/// Stable fingerprint of a PEM public key: SHA-256 of the base64-decoded
/// body between the BEGIN/END markers, hex-encoded (§4.1).
///
/// Insensitive to header/footer wording and to whitespace in the base64
/// body, so re-wrapped or re-indented copies of the same key fingerprint
/// identically (§8 "Fingerprint stability").
pub fn fingerprint(pem: &str) -> Result<String, RegistryError> {
    let body = extract_body(pem).ok_or(RegistryError::InvalidPublicKey)?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(body.as_bytes())
        .map_err(|_| RegistryError::InvalidPublicKey)?;
    let digest = Sha256::digest(&decoded);
    Ok(hex_encode(&digest))
}

/// The short, human-displayed form: first 32 hex chars in 4-char groups.
pub fn human_fingerprint(full_hex: &str) -> String {
    full_hex
        .as_bytes()
        .chunks(4)
        .take(8)
        .map(|c| std::str::from_utf8(c).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(":")
}

fn extract_body(pem: &str) -> Option<String> {
    let mut body = String::new();
    let mut in_body = false;
    for line in pem.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("-----BEGIN") {
            in_body = true;
            continue;
        }
        if trimmed.starts_with("-----END") {
            break;
        }
        if in_body {
            body.push_str(trimmed);
        }
    }
    if body.is_empty() { None } else { Some(body) }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: &str = "-----BEGIN PUBLIC KEY-----\nAAAA\nBBBB\n-----END PUBLIC KEY-----\n";
    // Same bytes, re-wrapped with different whitespace/header casing.
    const KEY_A_REWRAPPED: &str = "-----BEGIN PUBLIC KEY-----\n  AAAABBBB  \n-----END PUBLIC KEY-----";

    #[test]
    fn fingerprint_is_insensitive_to_whitespace_and_formatting() {
        let a = fingerprint(KEY_A).unwrap();
        let b = fingerprint(KEY_A_REWRAPPED).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn human_fingerprint_groups_first_32_chars() {
        let full = "0123456789abcdef0123456789abcdef00000000000000000000000000000";
        let human = human_fingerprint(full);
        assert_eq!(human, "0123:4567:89ab:cdef:0123:4567:89ab:cdef");
    }

    #[test]
    fn rejects_non_pem_input() {
        assert!(fingerprint("not a pem").is_err());
    }
}
