//! HMAC signature generation and verification.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Number of random bytes in a generated subscription secret.
const SECRET_BYTES: usize = 32;

/// Webhook signer for generating and verifying payload signatures.
///
/// Signatures are HMAC-SHA256 over the exact serialized body, hex-encoded.
pub struct WebhookSigner {
    secret: Vec<u8>,
}

impl WebhookSigner {
    /// Creates a new signer with the given secret.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Generates the hex signature for the given payload.
    pub fn sign(&self, payload: &[u8]) -> String {
        hex::encode(self.mac(payload).finalize().into_bytes())
    }

    /// Verifies a hex signature against the payload in constant time.
    pub fn verify(&self, payload: &[u8], signature_hex: &str) -> bool {
        let Ok(signature) = hex::decode(signature_hex.trim()) else {
            return false;
        };
        self.mac(payload).verify_slice(&signature).is_ok()
    }

    fn mac(&self, payload: &[u8]) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(payload);
        mac
    }
}

/// Generates a fresh random subscription secret (hex text).
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &[u8], secret: &str) -> String {
        WebhookSigner::new(secret).sign(payload)
    }

    fn verify(payload: &[u8], signature_hex: &str, secret: &str) -> bool {
        WebhookSigner::new(secret).verify(payload, signature_hex)
    }

    #[test]
    fn test_sign_and_verify() {
        let payload = br#"{"event":"shipment.created","data":{}}"#;
        let signature = sign(payload, "test-secret");

        assert_eq!(signature.len(), 64);
        assert!(verify(payload, &signature, "test-secret"));
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2.
        let signature = sign(b"what do ya want for nothing?", "Jefe");
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_any_altered_byte_fails() {
        let payload = b"test payload".to_vec();
        let signature = sign(&payload, "secret");

        let mut tampered = payload.clone();
        tampered[0] ^= 0x01;
        assert!(!verify(&tampered, &signature, "secret"));

        let mut bad_sig = signature.clone().into_bytes();
        bad_sig[10] = if bad_sig[10] == b'a' { b'b' } else { b'a' };
        assert!(!verify(&payload, std::str::from_utf8(&bad_sig).unwrap(), "secret"));

        assert!(!verify(&payload, &signature, "secreT"));
    }

    #[test]
    fn test_malformed_signature_is_rejected() {
        let payload = b"payload";
        assert!(!verify(payload, "not-hex", "secret"));
        assert!(!verify(payload, "", "secret"));
        assert!(!verify(payload, "abcd", "secret"));
    }

    #[test]
    fn test_generated_secrets_are_unique() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), SECRET_BYTES * 2);
        assert_ne!(a, b);
    }
}
