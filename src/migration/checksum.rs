//! Checksum calculation for migration definition files

use sha2::{Digest, Sha256};

/// Calculate the 32-bit fingerprint of a migration file's raw bytes
///
/// The SHA-256 digest is truncated to its first four bytes, read big-endian as a
/// signed integer. The function is pure: no digest state outlives the call.
#[must_use]
pub fn calculate_checksum(content: &[u8]) -> i32 {
    let digest = Sha256::digest(content);
    i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable() {
        let content = b"requests:\n  - method: PUT\n    path: /orders\n";
        assert_eq!(calculate_checksum(content), calculate_checksum(content));
    }

    #[test]
    fn test_checksum_known_value() {
        // sha256("") = e3b0c442...
        assert_eq!(calculate_checksum(b""), i32::from_be_bytes([0xe3, 0xb0, 0xc4, 0x42]));
    }

    #[test]
    fn test_single_byte_change_alters_checksum() {
        let original = b"requests:\n  - method: PUT\n    path: /orders\n";
        let mut modified = original.to_vec();
        modified[20] ^= 0x01;
        assert_ne!(calculate_checksum(original), calculate_checksum(&modified));
    }
}
