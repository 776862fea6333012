use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

const HOLD_KEY_BYTES: usize = 32;

/// Fresh confirmation key: 256 bits from the OS RNG, URL-safe base64.
pub fn generate_hold_key() -> String {
    let mut bytes = [0u8; HOLD_KEY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Digest stored in the ledger in place of the raw key.
pub fn key_digest(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_are_unique_and_url_safe() {
        let keys: HashSet<String> = (0..256).map(|_| generate_hold_key()).collect();
        assert_eq!(keys.len(), 256);
        for key in &keys {
            assert_eq!(key.len(), 43);
            assert!(key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
    }

    #[test]
    fn digest_is_stable_and_differs_from_key() {
        let key = generate_hold_key();
        assert_eq!(key_digest(&key), key_digest(&key));
        assert_ne!(key_digest(&key), key);
        assert_ne!(key_digest(&key), key_digest(&generate_hold_key()));
    }
}
