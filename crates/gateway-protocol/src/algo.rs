/// Digest algorithms the signature verifier (C4) accepts, enforced both at
/// registration time (C1) and verify time so the two never drift apart (§9
/// "Signature algorithm surface").
pub const SUPPORTED_SIGNATURE_ALGORITHMS: &[&str] = &["SHA256", "SHA384", "SHA512"];

pub fn is_supported_signature_algorithm(name: &str) -> bool {
    SUPPORTED_SIGNATURE_ALGORITHMS
        .iter()
        .any(|a| a.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_default_case_insensitively() {
        assert!(is_supported_signature_algorithm("sha256"));
        assert!(is_supported_signature_algorithm("SHA256"));
    }

    #[test]
    fn rejects_unknown_digest() {
        assert!(!is_supported_signature_algorithm("MD5"));
    }
}
