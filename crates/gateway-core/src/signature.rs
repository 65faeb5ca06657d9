use base64::Engine as _;
use openssl::{hash::MessageDigest, pkey::PKey, sign::Verifier};

use crate::error::CoreError;

/// Verify `signature_b64` over `message` against `public_key_pem`, using the
/// digest named by `algorithm` (C4). Works uniformly across RSA and EC keys
/// since `openssl::sign::Verifier` only needs a digest and a `PKey`.
pub fn verify(
    public_key_pem: &str,
    algorithm: &str,
    message: &[u8],
    signature_b64: &str,
) -> Result<(), CoreError> {
    let digest = digest_for(algorithm).ok_or(CoreError::InvalidSignature)?;

    let key =
        PKey::public_key_from_pem(public_key_pem.as_bytes()).map_err(|_| CoreError::InvalidSignature)?;

    let signature = base64::engine::general_purpose::STANDARD
        .decode(signature_b64)
        .map_err(|_| CoreError::InvalidSignature)?;

    let mut verifier = Verifier::new(digest, &key).map_err(|_| CoreError::InvalidSignature)?;
    verifier
        .update(message)
        .map_err(|_| CoreError::InvalidSignature)?;

    match verifier.verify(&signature) {
        Ok(true) => Ok(()),
        _ => Err(CoreError::InvalidSignature),
    }
}

fn digest_for(algorithm: &str) -> Option<MessageDigest> {
    if algorithm.eq_ignore_ascii_case("SHA256") {
        Some(MessageDigest::sha256())
    } else if algorithm.eq_ignore_ascii_case("SHA384") {
        Some(MessageDigest::sha384())
    } else if algorithm.eq_ignore_ascii_case("SHA512") {
        Some(MessageDigest::sha512())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use openssl::{pkey::PKey, rsa::Rsa, sign::Signer};

    use super::*;

    fn keypair() -> (String, PKey<openssl::pkey::Private>) {
        let rsa = Rsa::generate(2048).unwrap();
        let private = PKey::from_rsa(rsa).unwrap();
        let public_pem = String::from_utf8(private.public_key_to_pem().unwrap()).unwrap();
        (public_pem, private)
    }

    fn sign(private: &PKey<openssl::pkey::Private>, message: &[u8]) -> String {
        let mut signer = Signer::new(MessageDigest::sha256(), private).unwrap();
        signer.update(message).unwrap();
        let sig = signer.sign_to_vec().unwrap();
        base64::engine::general_purpose::STANDARD.encode(sig)
    }

    #[test]
    fn verifies_correct_signature() {
        let (public_pem, private) = keypair();
        let message = b"challenge-bytes";
        let sig = sign(&private, message);
        assert!(verify(&public_pem, "SHA256", message, &sig).is_ok());
    }

    #[test]
    fn rejects_tampered_message() {
        let (public_pem, private) = keypair();
        let sig = sign(&private, b"challenge-bytes");
        assert!(verify(&public_pem, "SHA256", b"different-bytes", &sig).is_err());
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let (public_pem, private) = keypair();
        let sig = sign(&private, b"challenge-bytes");
        assert!(verify(&public_pem, "MD5", b"challenge-bytes", &sig).is_err());
    }
}
