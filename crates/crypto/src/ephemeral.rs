//! Ephemeral key pairs and ECDH symmetric key derivation.
//!
//! Every ordered pair of group members gets a fresh ephemeral key pair per
//! DKG session. Both sides of a pair derive the same symmetric key by
//! combining their own private half with the peer's public half; that key
//! encrypts the share conversation between exactly those two members.
//!
//! Ephemeral keys are single use. A private key disclosed during accusation
//! resolution lets every other member recompute the pairwise symmetric key
//! and re-check the exchanged shares, and is never used for encryption
//! again afterwards.

use bls12_381::{G1Affine, G1Projective, Scalar};
use group::Curve;
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use beacon_types::{G1Point, Scalar as ScalarBytes};

use crate::curve::{compress_g1, decompress_g1, random_scalar, scalar_from_bytes, scalar_to_bytes};
use crate::error::CryptoError;
use crate::symmetric::SymmetricKey;

/// HKDF info string binding derived keys to this protocol.
const KEY_DERIVATION_INFO: &[u8] = b"BEACON-DKG-PAIRWISE-KEY-V1";

/// Private half of an ephemeral key pair. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EphemeralPrivateKey(Scalar);

impl EphemeralPrivateKey {
    /// Big-endian encoding, used when the key is disclosed in an accusation.
    pub fn to_bytes(&self) -> ScalarBytes {
        scalar_to_bytes(&self.0)
    }

    /// Decode a disclosed private key, rejecting non-canonical encodings.
    pub fn from_bytes(bytes: &ScalarBytes) -> Result<Self, CryptoError> {
        Ok(Self(scalar_from_bytes(bytes)?))
    }

    /// The public half this private key corresponds to.
    pub fn public_key(&self) -> EphemeralPublicKey {
        EphemeralPublicKey((G1Projective::generator() * self.0).to_affine())
    }
}

/// Public half of an ephemeral key pair, a point on G1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EphemeralPublicKey(G1Affine);

impl EphemeralPublicKey {
    /// Compressed encoding for the wire.
    pub fn to_point(&self) -> G1Point {
        compress_g1(&self.0)
    }

    /// Decode a peer's announced public key. Rejects encodings that do not
    /// land on the curve, as well as the identity point (an identity key
    /// would make the derived symmetric key independent of our secret).
    pub fn from_point(point: &G1Point) -> Result<Self, CryptoError> {
        let point = decompress_g1(point)?;
        if point.is_identity().into() {
            return Err(CryptoError::InvalidG1Point);
        }
        Ok(Self(point))
    }
}

/// Ephemeral key pair generated by one member for one peer.
#[derive(Clone)]
pub struct EphemeralKeyPair {
    pub private_key: EphemeralPrivateKey,
    pub public_key: EphemeralPublicKey,
}

impl EphemeralKeyPair {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let private = random_scalar(rng);
        let public = (G1Projective::generator() * private).to_affine();
        Self {
            private_key: EphemeralPrivateKey(private),
            public_key: EphemeralPublicKey(public),
        }
    }
}

/// Derive the pairwise symmetric key from our private half and the peer's
/// public half. Both directions of a pair arrive at the same key:
/// `priv_i · pub_j = priv_i · priv_j · G = priv_j · pub_i`.
pub fn ecdh(
    private_key: &EphemeralPrivateKey,
    public_key: &EphemeralPublicKey,
) -> Result<SymmetricKey, CryptoError> {
    let shared = (G1Projective::from(public_key.0) * private_key.0).to_affine();
    if shared.is_identity().into() {
        return Err(CryptoError::KeyDerivationFailed);
    }

    let hk = Hkdf::<Sha256>::new(None, &shared.to_compressed());
    let mut key = [0u8; 32];
    hk.expand(KEY_DERIVATION_INFO, &mut key)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;

    Ok(SymmetricKey::new(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_both_sides_derive_same_key() {
        let mut rng = OsRng;
        // i's pair intended for j, and j's pair intended for i.
        let pair_ij = EphemeralKeyPair::generate(&mut rng);
        let pair_ji = EphemeralKeyPair::generate(&mut rng);

        let key_i = ecdh(&pair_ij.private_key, &pair_ji.public_key).unwrap();
        let key_j = ecdh(&pair_ji.private_key, &pair_ij.public_key).unwrap();

        let payload = key_i.encrypt(b"share", &mut rng).unwrap();
        assert_eq!(key_j.decrypt(&payload).unwrap(), b"share");
    }

    #[test]
    fn test_different_pairs_derive_different_keys() {
        let mut rng = OsRng;
        let a = EphemeralKeyPair::generate(&mut rng);
        let b = EphemeralKeyPair::generate(&mut rng);
        let c = EphemeralKeyPair::generate(&mut rng);

        let key_ab = ecdh(&a.private_key, &b.public_key).unwrap();
        let key_ac = ecdh(&a.private_key, &c.public_key).unwrap();

        let payload = key_ab.encrypt(b"share", &mut rng).unwrap();
        assert!(key_ac.decrypt(&payload).is_err());
    }

    #[test]
    fn test_private_key_bytes_roundtrip() {
        let pair = EphemeralKeyPair::generate(&mut OsRng);
        let decoded = EphemeralPrivateKey::from_bytes(&pair.private_key.to_bytes()).unwrap();
        assert_eq!(decoded.public_key(), pair.public_key);
    }

    #[test]
    fn test_disclosed_key_matches_announced_public_key() {
        let pair = EphemeralKeyPair::generate(&mut OsRng);
        assert_eq!(pair.private_key.public_key(), pair.public_key);
    }

    #[test]
    fn test_identity_public_key_rejected() {
        let identity = compress_g1(&G1Affine::identity());
        assert!(EphemeralPublicKey::from_point(&identity).is_err());
    }
}
