//! Cryptographic primitives for the threshold relay beacon DKG.
//!
//! # Overview
//!
//! The distributed key generation protocol leans on three primitives,
//! all provided by this crate:
//!
//! 1. **Ephemeral ECDH**: each ordered pair of group members exchanges a
//!    fresh ephemeral key pair per session and derives a shared symmetric
//!    key. Disclosing a private half during accusation resolution lets any
//!    third member recompute the pair's key and audit their conversation.
//!
//! 2. **Authenticated share encryption**: pairwise secret shares travel
//!    over the public broadcast channel encrypted with AES-256-GCM under
//!    the ECDH-derived key, so tampering and misdelivery are always
//!    detectable.
//!
//! 3. **Pedersen commitments**: members commit to their secret-sharing
//!    polynomial coefficients on G1 with a dual-base commitment whose
//!    second base has an unknown discrete log, making the commitments
//!    perfectly hiding and computationally binding.

pub mod curve;
pub mod ephemeral;
pub mod error;
pub mod pedersen;
pub mod symmetric;

pub use curve::{
    compress_g1, compress_g2, decompress_g1, decompress_g2, random_scalar, scalar_from_bytes,
    scalar_to_bytes,
};
pub use ephemeral::{ecdh, EphemeralKeyPair, EphemeralPrivateKey, EphemeralPublicKey};
pub use error::CryptoError;
pub use pedersen::PedersenParams;
pub use symmetric::SymmetricKey;
