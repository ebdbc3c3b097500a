//! Core type definitions for the threshold relay beacon.
//!
//! This crate provides the wire-level data structures shared across the
//! beacon system: compressed curve point encodings, scalar encodings, and
//! group member identifiers.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

// =========================
// CRYPTOGRAPHIC PRIMITIVES
// =========================

/// Identifier of a group member, assigned at group creation and stable for
/// the duration of one DKG session.
///
/// Member identifiers are strictly positive: they double as secret-sharing
/// polynomial evaluation points, and evaluating at zero would expose the
/// polynomial's constant term.
pub type MemberId = u32;

/// Compressed G1 point on BLS12-381 (48 bytes)
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct G1Point(#[serde_as(as = "[_; 48]")] pub [u8; 48]);

impl Default for G1Point {
    fn default() -> Self {
        Self([0u8; 48])
    }
}

/// Compressed G2 point on BLS12-381 (96 bytes)
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct G2Point(#[serde_as(as = "[_; 96]")] pub [u8; 96]);

impl Default for G2Point {
    fn default() -> Self {
        Self([0u8; 96])
    }
}

/// Scalar field element (32 bytes, big-endian)
///
/// This is the wire encoding of secret shares and of ephemeral private keys
/// disclosed during accusation resolution.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Scalar(#[serde_as(as = "[_; 32]")] pub [u8; 32]);

impl Default for Scalar {
    fn default() -> Self {
        Self([0u8; 32])
    }
}

// =========================
// GROUP MEMBERSHIP
// =========================

/// Operator address (32 bytes), derived from an operator public key by the
/// configured signing scheme. Used by the broadcast authorization filter.
pub type Address = [u8; 32];

// =========================
// HELPER FUNCTIONS
// =========================

/// Compute SHA-256 hash
pub fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    Sha256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_g1_point_serialization() {
        let point = G1Point([42u8; 48]);
        let encoded = borsh::to_vec(&point).unwrap();
        let decoded: G1Point = borsh::from_slice(&encoded).unwrap();
        assert_eq!(point, decoded);
    }

    #[test]
    fn test_g2_point_serialization() {
        let point = G2Point([7u8; 96]);
        let encoded = borsh::to_vec(&point).unwrap();
        let decoded: G2Point = borsh::from_slice(&encoded).unwrap();
        assert_eq!(point, decoded);
    }

    #[test]
    fn test_scalar_serialization() {
        let scalar = Scalar([3u8; 32]);
        let encoded = borsh::to_vec(&scalar).unwrap();
        let decoded: Scalar = borsh::from_slice(&encoded).unwrap();
        assert_eq!(scalar, decoded);
    }

    #[test]
    fn test_sha256_is_deterministic() {
        assert_eq!(sha256(b"beacon"), sha256(b"beacon"));
        assert_ne!(sha256(b"beacon"), sha256(b"relay"));
    }
}
