use base64::{Engine as _, engine::general_purpose::STANDARD};
use openssl::{hash::MessageDigest, pkey::PKey, sign::Signer};

use crate::error::ClientError;

/// Sign `message` with `private_key_pem` using the given digest algorithm,
/// returning the base64-encoded signature the `authenticate` frame carries
/// (§4.9, mirrors the verify side in `gateway-core::signature`).
pub fn sign(private_key_pem: &str, algorithm: &str, message: &[u8]) -> Result<String, ClientError> {
    let digest = digest_for(algorithm)
        .ok_or_else(|| ClientError::Signing(format!("unsupported algorithm '{algorithm}'")))?;
    let pkey = PKey::private_key_from_pem(private_key_pem.as_bytes())
        .map_err(|e| ClientError::Signing(e.to_string()))?;
    let mut signer = Signer::new(digest, &pkey).map_err(|e| ClientError::Signing(e.to_string()))?;
    signer.update(message).map_err(|e| ClientError::Signing(e.to_string()))?;
    let signature = signer.sign_to_vec().map_err(|e| ClientError::Signing(e.to_string()))?;
    Ok(STANDARD.encode(signature))
}

fn digest_for(algorithm: &str) -> Option<MessageDigest> {
    match algorithm.to_ascii_uppercase().as_str() {
        "SHA256" => Some(MessageDigest::sha256()),
        "SHA384" => Some(MessageDigest::sha384()),
        "SHA512" => Some(MessageDigest::sha512()),
        _ => None,
    }
}
