//! Pedersen commitments on BLS12-381 G1.
//!
//! A Pedersen commitment C = g^v · h^r is:
//! - **Hiding**: Given C, cannot determine v without r
//! - **Binding**: Cannot find different (v', r') with same C
//!
//! Used to commit to secret-sharing polynomial coefficient pairs so that
//! every share recipient can verify its shares without learning anything
//! about the underlying secrets.

use bls12_381::{
    hash_to_curve::{ExpandMsgXmd, HashToCurve},
    G1Affine, G1Projective, Scalar,
};
use group::Curve;
use sha2::Sha256;

/// Seed string hashed to the curve to obtain the second base.
const H_GENERATION_SEED: &[u8] = b"BEACON_PEDERSEN_H_POINT_V1";

/// RFC 9380 domain separation tag for deriving `h`.
const H_GENERATION_DST: &[u8] = b"BEACON_PEDERSEN_H:BLS12381G1_XMD:SHA-256_SSWU_RO_";

/// Parameters for Pedersen commitments.
#[derive(Clone)]
pub struct PedersenParams {
    /// Base point g
    pub g: G1Affine,
    /// Base point h (nothing-up-my-sleeve generation)
    pub h: G1Affine,
}

impl Default for PedersenParams {
    fn default() -> Self {
        Self::new()
    }
}

impl PedersenParams {
    /// Create new Pedersen parameters with standard bases.
    ///
    /// Uses the G1 generator as g and a hash-to-curve derived point as h.
    pub fn new() -> Self {
        Self {
            g: G1Affine::generator(),
            h: derive_h_point(),
        }
    }

    /// Compute C = g^value · h^blinding.
    pub fn commit(&self, value: &Scalar, blinding: &Scalar) -> G1Affine {
        (G1Projective::from(self.g) * value + G1Projective::from(self.h) * blinding).to_affine()
    }
}

/// Derive the h point by hashing a fixed seed to the curve.
///
/// log_g(h) must stay unknown to every participant; hash-to-curve produces
/// a point with no known scalar relation to the generator.
fn derive_h_point() -> G1Affine {
    let point = <G1Projective as HashToCurve<ExpandMsgXmd<Sha256>>>::hash_to_curve(
        H_GENERATION_SEED,
        H_GENERATION_DST,
    );
    point.to_affine()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::random_scalar;
    use rand::rngs::OsRng;

    #[test]
    fn test_h_differs_from_generator() {
        let params = PedersenParams::new();
        assert_ne!(params.g, params.h);
        assert!(!bool::from(params.h.is_identity()));
    }

    #[test]
    fn test_commitment_is_deterministic() {
        let params = PedersenParams::new();
        let value = random_scalar(&mut OsRng);
        let blinding = random_scalar(&mut OsRng);

        assert_eq!(
            params.commit(&value, &blinding),
            params.commit(&value, &blinding)
        );
    }

    #[test]
    fn test_commitment_hides_value() {
        let params = PedersenParams::new();
        let value = random_scalar(&mut OsRng);

        // Same value, different blinding -> different commitments
        let c1 = params.commit(&value, &random_scalar(&mut OsRng));
        let c2 = params.commit(&value, &random_scalar(&mut OsRng));
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_commitment_is_homomorphic() {
        let params = PedersenParams::new();
        let mut rng = OsRng;

        let (v1, b1) = (random_scalar(&mut rng), random_scalar(&mut rng));
        let (v2, b2) = (random_scalar(&mut rng), random_scalar(&mut rng));

        let sum = (G1Projective::from(params.commit(&v1, &b1))
            + G1Projective::from(params.commit(&v2, &b2)))
        .to_affine();

        assert_eq!(sum, params.commit(&(v1 + v2), &(b1 + b2)));
    }
}
