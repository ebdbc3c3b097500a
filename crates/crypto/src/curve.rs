//! Point and scalar codecs for BLS12-381.
//!
//! All protocol messages carry curve points in compressed form and scalars
//! as 32-byte big-endian encodings. Decoding always validates: a point must
//! decompress onto the curve and into the prime-order subgroup, a scalar
//! must be canonical (smaller than the group order).

use bls12_381::{G1Affine, G2Affine, Scalar};
use rand::{CryptoRng, RngCore};

use beacon_types::{G1Point, G2Point, Scalar as ScalarBytes};

use crate::error::CryptoError;

/// Sample a scalar uniformly from the field.
pub fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    let mut bytes = [0u8; 64];
    rng.fill_bytes(&mut bytes);
    Scalar::from_bytes_wide(&bytes)
}

/// Compress a G1 point to bytes.
pub fn compress_g1(point: &G1Affine) -> G1Point {
    G1Point(point.to_compressed())
}

/// Decompress a G1 point from bytes.
pub fn decompress_g1(point: &G1Point) -> Result<G1Affine, CryptoError> {
    let point = G1Affine::from_compressed(&point.0);
    if point.is_some().into() {
        Ok(point.unwrap())
    } else {
        Err(CryptoError::InvalidG1Point)
    }
}

/// Compress a G2 point to bytes.
pub fn compress_g2(point: &G2Affine) -> G2Point {
    G2Point(point.to_compressed())
}

/// Decompress a G2 point from bytes.
pub fn decompress_g2(point: &G2Point) -> Result<G2Affine, CryptoError> {
    let point = G2Affine::from_compressed(&point.0);
    if point.is_some().into() {
        Ok(point.unwrap())
    } else {
        Err(CryptoError::InvalidG2Point)
    }
}

/// Encode a scalar as 32 big-endian bytes.
pub fn scalar_to_bytes(scalar: &Scalar) -> ScalarBytes {
    let mut bytes = scalar.to_bytes();
    bytes.reverse();
    ScalarBytes(bytes)
}

/// Decode a scalar from its 32-byte big-endian encoding, rejecting
/// non-canonical values.
pub fn scalar_from_bytes(bytes: &ScalarBytes) -> Result<Scalar, CryptoError> {
    let mut le = bytes.0;
    le.reverse();
    let scalar = Scalar::from_bytes(&le);
    if scalar.is_some().into() {
        Ok(scalar.unwrap())
    } else {
        Err(CryptoError::InvalidScalar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bls12_381::{G1Projective, G2Projective};
    use group::Curve;
    use rand::rngs::OsRng;

    #[test]
    fn test_scalar_bytes_roundtrip() {
        let scalar = random_scalar(&mut OsRng);
        let bytes = scalar_to_bytes(&scalar);
        let decoded = scalar_from_bytes(&bytes).unwrap();
        assert_eq!(scalar, decoded);
    }

    #[test]
    fn test_scalar_bytes_are_big_endian() {
        let bytes = scalar_to_bytes(&Scalar::from(0x0102u64));
        assert_eq!(bytes.0[31], 0x02);
        assert_eq!(bytes.0[30], 0x01);
        assert!(bytes.0[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_non_canonical_scalar_rejected() {
        // The field order is well below 2^256 - 1.
        let result = scalar_from_bytes(&ScalarBytes([0xff; 32]));
        assert!(matches!(result, Err(CryptoError::InvalidScalar)));
    }

    #[test]
    fn test_g1_roundtrip() {
        let point = (G1Projective::generator() * random_scalar(&mut OsRng)).to_affine();
        let decoded = decompress_g1(&compress_g1(&point)).unwrap();
        assert_eq!(point, decoded);
    }

    #[test]
    fn test_g2_roundtrip() {
        let point = (G2Projective::generator() * random_scalar(&mut OsRng)).to_affine();
        let decoded = decompress_g2(&compress_g2(&point)).unwrap();
        assert_eq!(point, decoded);
    }

    #[test]
    fn test_garbage_point_rejected() {
        assert!(decompress_g1(&G1Point([0x11; 48])).is_err());
        assert!(decompress_g2(&G2Point([0x11; 96])).is_err());
    }
}
