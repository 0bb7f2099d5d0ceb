use sha2::{Digest, Sha256};

/// Cryptographic 160-bit digest of `owner:value`, rendered lowercase hex.
/// Used both for content-change detection and for deriving collision-free
/// tag and buffer-path suffixes, so two different owners hashing the same
/// value never collide.
pub fn hash(owner: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner.as_bytes());
    hasher.update(b":");
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[0..20])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic() {
        assert_eq!(hash("ns", "hello"), hash("ns", "hello"));
    }

    #[test]
    fn is_160_bits() {
        // 20 bytes -> 40 hex chars
        assert_eq!(hash("a", "b").len(), 40);
    }

    #[test]
    fn owner_separates_values() {
        assert_ne!(hash("a", "x"), hash("b", "x"));
    }
}
