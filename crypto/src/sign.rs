//! Ed25519 signing over digests.
//!
//! The chain always signs a 32-byte digest, never raw messages, so the
//! thing being signed is pinned down by the digest scheme of the caller
//! (block header digest, transaction signing digest).

use cascade_types::{Digest, PrivateKey, PublicKey, Signature};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};

/// Sign a digest with a private key.
pub fn sign_digest(digest: &Digest, private_key: &PrivateKey) -> Signature {
    let signing_key = SigningKey::from_bytes(&private_key.0);
    let sig = signing_key.sign(digest.as_bytes());
    Signature(sig.to_bytes())
}

/// Verify a signature over a digest against a public key.
///
/// Returns `false` for malformed keys as well as invalid signatures.
pub fn verify_digest(digest: &Digest, signature: &Signature, public_key: &PublicKey) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key.0) else {
        return false;
    };
    let dalek_sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    verifying_key.verify(digest.as_bytes(), &dalek_sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::digest;
    use crate::keys::keypair_from_seed;

    #[test]
    fn sign_and_verify() {
        let kp = keypair_from_seed(&[3u8; 32]);
        let d = digest(b"block header bytes");
        let sig = sign_digest(&d, &kp.private);
        assert!(verify_digest(&d, &sig, &kp.public));
    }

    #[test]
    fn wrong_digest_fails() {
        let kp = keypair_from_seed(&[3u8; 32]);
        let sig = sign_digest(&digest(b"one"), &kp.private);
        assert!(!verify_digest(&digest(b"two"), &sig, &kp.public));
    }

    #[test]
    fn wrong_key_fails() {
        let kp1 = keypair_from_seed(&[4u8; 32]);
        let kp2 = keypair_from_seed(&[5u8; 32]);
        let d = digest(b"payload");
        let sig = sign_digest(&d, &kp1.private);
        assert!(!verify_digest(&d, &sig, &kp2.public));
    }

    #[test]
    fn null_key_fails_gracefully() {
        let kp = keypair_from_seed(&[6u8; 32]);
        let d = digest(b"payload");
        let sig = sign_digest(&d, &kp.private);
        assert!(!verify_digest(&d, &sig, &PublicKey::NULL));
    }

    #[test]
    fn signing_is_deterministic() {
        let kp = keypair_from_seed(&[7u8; 32]);
        let d = digest(b"payload");
        assert_eq!(sign_digest(&d, &kp.private).0, sign_digest(&d, &kp.private).0);
    }
}
