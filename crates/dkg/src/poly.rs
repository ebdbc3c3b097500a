//! Secret-sharing polynomials over the BLS12-381 scalar field.

use bls12_381::Scalar;
use ff::Field;
use rand::{CryptoRng, RngCore};

use beacon_crypto::random_scalar;
use beacon_types::MemberId;

/// Sample a random polynomial of the given degree.
///
/// Returns `degree + 1` coefficients `[a_0, a_1, ..., a_degree]` where
/// f(x) = a_0 + a_1*x + ... + a_degree*x^degree. The constant term a_0 is
/// the secret the polynomial shares.
pub fn generate<R: RngCore + CryptoRng>(degree: usize, rng: &mut R) -> Vec<Scalar> {
    (0..=degree).map(|_| random_scalar(rng)).collect()
}

/// Evaluate a polynomial at a point.
///
/// f(x) = a_0 + a_1*x + a_2*x^2 + ... using Horner's method
pub fn evaluate(coefficients: &[Scalar], x: &Scalar) -> Scalar {
    let mut result = Scalar::ZERO;
    for coeff in coefficients.iter().rev() {
        result = result * x + coeff;
    }
    result
}

/// Evaluate a polynomial at a member's identifier.
///
/// Identifiers are strictly positive by group construction, so this never
/// evaluates at zero (which would return the secret constant term).
pub fn evaluate_at_member(coefficients: &[Scalar], id: MemberId) -> Scalar {
    debug_assert!(id > 0, "member id must be positive");
    evaluate(coefficients, &Scalar::from(id as u64))
}

/// Combine shares using Lagrange interpolation to reconstruct the secret.
///
/// Given shares (x_i, y_i), computes f(0) = Σ y_i * λ_i
/// where λ_i = Π_{j≠i} (x_j / (x_j - x_i))
pub fn interpolate_at_zero(shares: &[(MemberId, Scalar)]) -> Option<Scalar> {
    if shares.is_empty() {
        return None;
    }

    let mut result = Scalar::ZERO;

    for (i, (x_i, y_i)) in shares.iter().enumerate() {
        let x_i_scalar = Scalar::from(*x_i as u64);

        let mut numerator = Scalar::ONE;
        let mut denominator = Scalar::ONE;

        for (j, (x_j, _)) in shares.iter().enumerate() {
            if i == j {
                continue;
            }
            let x_j_scalar = Scalar::from(*x_j as u64);

            numerator *= x_j_scalar;
            denominator *= x_j_scalar - x_i_scalar;
        }

        let denominator_inverted = denominator.invert();
        if denominator_inverted.is_none().into() {
            return None;
        }
        result += y_i * numerator * denominator_inverted.unwrap();
    }

    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_polynomial_evaluation() {
        // f(x) = 5 + 3x + 2x^2
        let coefficients = vec![Scalar::from(5u64), Scalar::from(3u64), Scalar::from(2u64)];

        // f(0) = 5
        assert_eq!(evaluate(&coefficients, &Scalar::ZERO), Scalar::from(5u64));

        // f(1) = 5 + 3 + 2 = 10
        assert_eq!(evaluate(&coefficients, &Scalar::ONE), Scalar::from(10u64));

        // f(2) = 5 + 6 + 8 = 19
        assert_eq!(
            evaluate(&coefficients, &Scalar::from(2u64)),
            Scalar::from(19u64)
        );
    }

    #[test]
    fn test_generated_degree() {
        let coefficients = generate(2, &mut OsRng);
        assert_eq!(coefficients.len(), 3);
    }

    #[test]
    fn test_reconstruction_from_any_threshold_subset() {
        let coefficients = generate(2, &mut OsRng);
        let secret = coefficients[0];

        let shares: Vec<(MemberId, Scalar)> = (1..=5)
            .map(|id| (id, evaluate_at_member(&coefficients, id)))
            .collect();

        assert_eq!(interpolate_at_zero(&shares[..3]).unwrap(), secret);
        assert_eq!(interpolate_at_zero(&shares[2..5]).unwrap(), secret);
        assert_eq!(
            interpolate_at_zero(&[shares[0], shares[2], shares[4]]).unwrap(),
            secret
        );
    }

    #[test]
    fn test_interpolation_of_no_shares() {
        assert!(interpolate_at_zero(&[]).is_none());
    }
}
