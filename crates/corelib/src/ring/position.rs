//! Ring position implementation.

use std::fmt;

use sha2::{Digest, Sha256};

/// A position on the consistent hash ring.
///
/// Positions are SHA-256 digests interpreted as 256-bit unsigned integers.
/// Byte-wise lexicographic ordering over the big-endian digest is exactly
/// unsigned integer ordering, so the derived `Ord` is the ring order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RingPosition([u8; 32]);

impl RingPosition {
    /// Hash an input string to its position on the ring.
    pub fn digest(input: &str) -> Self {
        Self(Sha256::digest(input.as_bytes()).into())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for RingPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The leading 8 bytes are plenty to identify a position in logs.
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for RingPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RingPosition({self})")
    }
}
