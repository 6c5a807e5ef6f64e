/// Random generation backed by the operating system RNG.
///
/// Used for chain identifiers and randomized block histories, where the only
/// requirement is that two draws practically never collide.
use rand::rngs::OsRng;
use rand::RngCore;

use super::Hash;

/// Generate random bytes from the OS RNG
///
/// # Example
/// ```
/// use mockchain_common::crypto::random::secure_random_bytes;
///
/// let nonce = secure_random_bytes::<32>();
/// assert_eq!(nonce.len(), 32);
/// ```
pub fn secure_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a random u64 from the OS RNG
pub fn secure_random_u64() -> u64 {
    OsRng.next_u64()
}

/// Generate a random 32 bytes hash
pub fn random_hash() -> Hash {
    Hash::new(secure_random_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_random_bytes() {
        let bytes1 = secure_random_bytes::<32>();
        let bytes2 = secure_random_bytes::<32>();

        // Random bytes should be different each time
        assert_ne!(bytes1, bytes2);
        assert_eq!(bytes1.len(), 32);
    }

    #[test]
    fn test_secure_random_u64() {
        assert_ne!(secure_random_u64(), secure_random_u64());
    }

    #[test]
    fn test_random_hash() {
        assert_ne!(random_hash(), random_hash());
    }
}
