//! Phase message payloads exchanged over the broadcast channel.
//!
//! Every payload carries its sender's member identifier and is broadcast
//! to the whole group; there are no direct messages. Payloads addressed to
//! a single receiver (the encrypted share pairs) are still broadcast, with
//! confidentiality provided by the pairwise symmetric keys. The borsh
//! encoding of [`DkgMessage`] is the broadcast channel payload format.

use std::collections::BTreeMap;

use bls12_381::Scalar;
use borsh::{BorshDeserialize, BorshSerialize};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use beacon_crypto::{scalar_from_bytes, scalar_to_bytes, CryptoError, SymmetricKey};
use beacon_types::{G1Point, G2Point, MemberId, Scalar as ScalarBytes};

/// Phase 1: the sender's ephemeral public keys, one per peer.
///
/// The receiver performs ECDH between the key addressed to it and its own
/// private half, producing the symmetric key for that pair. The full map is
/// broadcast so that accusations can later be resolved by any member: a
/// private key disclosed in phase 5 or 8 is checked against this
/// announcement before it is trusted.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct EphemeralPublicKeyMessage {
    pub sender: MemberId,
    /// peer id -> public key the sender generated for that peer
    pub ephemeral_public_keys: BTreeMap<MemberId, G1Point>,
}

/// Phase 3: Pedersen commitments to the sender's polynomial coefficients.
///
/// Commitment k binds the coefficient pair (a_k, b_k) of the sender's two
/// secret-sharing polynomials; the sequence has length T+1.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct MemberCommitmentsMessage {
    pub sender: MemberId,
    pub commitments: Vec<G1Point>,
}

/// Encrypted share pair addressed to a single receiver.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct EncryptedShares {
    /// AEAD payload carrying the big-endian encoding of s_ij.
    pub share_s: Vec<u8>,
    /// AEAD payload carrying the big-endian encoding of t_ij.
    pub share_t: Vec<u8>,
}

/// Phase 3: shares `s_ij`, `t_ij` calculated by sender `i` for every other
/// member `j`, each pair encrypted with the symmetric key of the pair
/// {i, j}. Broadcast; only the addressee can decrypt its entry.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct PeerSharesMessage {
    pub sender: MemberId,
    /// receiver id -> encrypted (s, t) pair
    pub shares: BTreeMap<MemberId, EncryptedShares>,
}

impl PeerSharesMessage {
    pub fn new(sender: MemberId) -> Self {
        Self {
            sender,
            shares: BTreeMap::new(),
        }
    }

    /// Encrypt and record the share pair for one receiver.
    pub fn add_shares<R: RngCore + CryptoRng>(
        &mut self,
        receiver: MemberId,
        share_s: &Scalar,
        share_t: &Scalar,
        symmetric_key: &SymmetricKey,
        rng: &mut R,
    ) -> Result<(), CryptoError> {
        let encrypted_s = symmetric_key.encrypt(&scalar_to_bytes(share_s).0, rng)?;
        let encrypted_t = symmetric_key.encrypt(&scalar_to_bytes(share_t).0, rng)?;
        self.shares.insert(
            receiver,
            EncryptedShares {
                share_s: encrypted_s,
                share_t: encrypted_t,
            },
        );
        Ok(())
    }

    /// Decrypt and decode the S share addressed to `receiver`.
    pub fn decrypt_share_s(
        &self,
        receiver: MemberId,
        symmetric_key: &SymmetricKey,
    ) -> Result<Scalar, CryptoError> {
        let shares = self
            .shares
            .get(&receiver)
            .ok_or(CryptoError::InvalidCiphertextFormat)?;
        decode_share(&symmetric_key.decrypt(&shares.share_s)?)
    }

    /// Decrypt and decode the T share addressed to `receiver`.
    pub fn decrypt_share_t(
        &self,
        receiver: MemberId,
        symmetric_key: &SymmetricKey,
    ) -> Result<Scalar, CryptoError> {
        let shares = self
            .shares
            .get(&receiver)
            .ok_or(CryptoError::InvalidCiphertextFormat)?;
        decode_share(&symmetric_key.decrypt(&shares.share_t)?)
    }

    /// Pre-filter: whether the entry addressed to `receiver` exists and
    /// both of its payloads decrypt under `symmetric_key`.
    ///
    /// Run before the shares are decoded, so that decoding only ever sees
    /// decryptable payloads. Only the receiver can observe a failure here
    /// (the entry is opaque ciphertext to everyone else), so a failing
    /// entry is grounds for an accusation rather than direct elimination.
    pub fn can_decrypt(&self, receiver: MemberId, symmetric_key: &SymmetricKey) -> bool {
        match self.shares.get(&receiver) {
            Some(shares) => {
                symmetric_key.decrypt(&shares.share_s).is_ok()
                    && symmetric_key.decrypt(&shares.share_t).is_ok()
            }
            None => false,
        }
    }
}

/// Decode a decrypted share payload as a canonical scalar.
fn decode_share(plaintext: &[u8]) -> Result<Scalar, CryptoError> {
    let bytes: [u8; 32] = plaintext
        .try_into()
        .map_err(|_| CryptoError::InvalidScalar)?;
    scalar_from_bytes(&ScalarBytes(bytes))
}

/// Phase 5: the sender's accusations after share verification.
///
/// Each entry discloses the sender's ephemeral private key for the accused
/// member, letting every other member recompute the pairwise symmetric key
/// and re-run the share checks. Members with nothing to report broadcast
/// the message with an empty map; silence is indistinguishable from
/// censorship, so an empty report is still mandatory.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct SecretSharesAccusationsMessage {
    pub sender: MemberId,
    /// accused id -> sender's disclosed private ephemeral key for them
    pub accused_members_keys: BTreeMap<MemberId, ScalarBytes>,
}

/// Phase 7: the sender's public key share points `A_k = g2^{a_k}`.
///
/// These expose the coefficients of the sender's S polynomial in the
/// exponent, in G2; the sequence has length T+1. The constant-term points
/// of all qualified members multiply into the group public key.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct MemberPublicKeySharePointsMessage {
    pub sender: MemberId,
    pub public_key_share_points: Vec<G2Point>,
}

/// Phase 8: the sender's accusations after share point verification.
///
/// Same disclosure mechanism and empty-map rule as
/// [`SecretSharesAccusationsMessage`].
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct PointsAccusationsMessage {
    pub sender: MemberId,
    /// accused id -> sender's disclosed private ephemeral key for them
    pub accused_members_keys: BTreeMap<MemberId, ScalarBytes>,
}

/// Phase-tagged envelope for broadcast payloads.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum DkgMessage {
    EphemeralPublicKey(EphemeralPublicKeyMessage),
    MemberCommitments(MemberCommitmentsMessage),
    PeerShares(PeerSharesMessage),
    SecretSharesAccusations(SecretSharesAccusationsMessage),
    MemberPublicKeySharePoints(MemberPublicKeySharePointsMessage),
    PointsAccusations(PointsAccusationsMessage),
}

/// Discriminant of a [`DkgMessage`], used for inbox routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageKind {
    EphemeralPublicKey,
    MemberCommitments,
    PeerShares,
    SecretSharesAccusations,
    MemberPublicKeySharePoints,
    PointsAccusations,
}

impl DkgMessage {
    pub fn sender(&self) -> MemberId {
        match self {
            Self::EphemeralPublicKey(m) => m.sender,
            Self::MemberCommitments(m) => m.sender,
            Self::PeerShares(m) => m.sender,
            Self::SecretSharesAccusations(m) => m.sender,
            Self::MemberPublicKeySharePoints(m) => m.sender,
            Self::PointsAccusations(m) => m.sender,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::EphemeralPublicKey(_) => MessageKind::EphemeralPublicKey,
            Self::MemberCommitments(_) => MessageKind::MemberCommitments,
            Self::PeerShares(_) => MessageKind::PeerShares,
            Self::SecretSharesAccusations(_) => MessageKind::SecretSharesAccusations,
            Self::MemberPublicKeySharePoints(_) => MessageKind::MemberPublicKeySharePoints,
            Self::PointsAccusations(_) => MessageKind::PointsAccusations,
        }
    }

    /// Protocol phase in which this payload is produced.
    pub fn phase(&self) -> u8 {
        self.kind().phase()
    }
}

impl MessageKind {
    /// Protocol phase in which payloads of this kind are produced.
    pub fn phase(&self) -> u8 {
        match self {
            Self::EphemeralPublicKey => 1,
            Self::MemberCommitments | Self::PeerShares => 3,
            Self::SecretSharesAccusations => 5,
            Self::MemberPublicKeySharePoints => 7,
            Self::PointsAccusations => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_crypto::{ecdh, random_scalar, EphemeralKeyPair};
    use rand::rngs::OsRng;

    fn pairwise_keys() -> (SymmetricKey, SymmetricKey) {
        let mut rng = OsRng;
        let pair_ij = EphemeralKeyPair::generate(&mut rng);
        let pair_ji = EphemeralKeyPair::generate(&mut rng);
        (
            ecdh(&pair_ij.private_key, &pair_ji.public_key).unwrap(),
            ecdh(&pair_ji.private_key, &pair_ij.public_key).unwrap(),
        )
    }

    #[test]
    fn test_shares_roundtrip_through_encryption() {
        let mut rng = OsRng;
        let (sender_key, receiver_key) = pairwise_keys();

        let share_s = random_scalar(&mut rng);
        let share_t = random_scalar(&mut rng);

        let mut message = PeerSharesMessage::new(1);
        message
            .add_shares(2, &share_s, &share_t, &sender_key, &mut rng)
            .unwrap();

        assert!(message.can_decrypt(2, &receiver_key));
        assert_eq!(message.decrypt_share_s(2, &receiver_key).unwrap(), share_s);
        assert_eq!(message.decrypt_share_t(2, &receiver_key).unwrap(), share_t);
    }

    #[test]
    fn test_missing_entry_fails_prefilter() {
        let (_, receiver_key) = pairwise_keys();
        let message = PeerSharesMessage::new(1);
        assert!(!message.can_decrypt(2, &receiver_key));
    }

    #[test]
    fn test_wrong_key_fails_prefilter() {
        let mut rng = OsRng;
        let (sender_key, _) = pairwise_keys();
        let (_, other_key) = pairwise_keys();

        let mut message = PeerSharesMessage::new(1);
        message
            .add_shares(
                2,
                &random_scalar(&mut rng),
                &random_scalar(&mut rng),
                &sender_key,
                &mut rng,
            )
            .unwrap();

        assert!(!message.can_decrypt(2, &other_key));
    }

    #[test]
    fn test_garbage_plaintext_decodes_as_invalid_scalar() {
        let mut rng = OsRng;
        let (sender_key, receiver_key) = pairwise_keys();

        // A well-encrypted payload that does not carry a scalar encoding.
        let mut message = PeerSharesMessage::new(1);
        message.shares.insert(
            2,
            EncryptedShares {
                share_s: sender_key.encrypt(b"not a scalar", &mut rng).unwrap(),
                share_t: sender_key.encrypt(b"not a scalar", &mut rng).unwrap(),
            },
        );

        // The pre-filter passes (the AEAD layer is intact)...
        assert!(message.can_decrypt(2, &receiver_key));
        // ...but decoding rejects the plaintext.
        assert!(matches!(
            message.decrypt_share_s(2, &receiver_key),
            Err(CryptoError::InvalidScalar)
        ));
    }

    #[test]
    fn test_envelope_roundtrip() {
        let message = DkgMessage::MemberCommitments(MemberCommitmentsMessage {
            sender: 3,
            commitments: vec![G1Point([1u8; 48]), G1Point([2u8; 48])],
        });

        let encoded = borsh::to_vec(&message).unwrap();
        let decoded: DkgMessage = borsh::from_slice(&encoded).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.sender(), 3);
        assert_eq!(decoded.phase(), 3);
    }
}
