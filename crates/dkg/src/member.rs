//! Per-member phase state machine of the distributed key generation
//! protocol.
//!
//! The protocol is a fixed sequence of phases; every member executes the
//! same phase in the same round, exchanging broadcast messages in between.
//! Each phase is modeled as its own state type with a consuming transition
//! to the next, so a member can neither skip a phase nor revisit one, and
//! the state a phase no longer needs is dropped (and its secrets wiped)
//! at the transition.
//!
//! Message exchange is the caller's concern: transitions accept the
//! messages collected for a phase in any order, and the outcome is
//! invariant under reordering. Misbehaving peers never abort a phase; they
//! are either eliminated directly (missing or malformed broadcasts) or
//! accused and judged by the whole group (bad shares, bad share points).

use std::collections::{BTreeMap, BTreeSet};

use bls12_381::{G1Affine, G1Projective, G2Affine, G2Projective, Scalar};
use ff::Field;
use group::Curve;
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use beacon_crypto::{
    compress_g1, compress_g2, decompress_g1, decompress_g2, ecdh, scalar_to_bytes,
    EphemeralKeyPair, EphemeralPrivateKey, EphemeralPublicKey, PedersenParams, SymmetricKey,
};
use beacon_types::{G2Point, MemberId, Scalar as ScalarBytes};

use crate::error::DkgError;
use crate::group::Group;
use crate::messages::{
    EphemeralPublicKeyMessage, MemberCommitmentsMessage, MemberPublicKeySharePointsMessage,
    PeerSharesMessage, PointsAccusationsMessage, SecretSharesAccusationsMessage,
};
use crate::poly;

/// Final output of a DKG session, retained after all per-session secrets
/// are discarded.
#[derive(Clone, Debug)]
pub struct DkgOutput {
    pub member_id: MemberId,
    /// Compressed group public key `Y = Π A_i0` in G2. Identical for every
    /// honest member.
    pub group_public_key: G2Point,
    /// This member's share of the group private key, big-endian encoded.
    /// Any T+1 shares interpolate to the group private key.
    pub group_private_key_share: ScalarBytes,
    /// Members qualified at the end of the protocol.
    pub qualified: Vec<MemberId>,
    /// Every qualified member's public key share points. Derived data, but
    /// handed over so the caller can compute individual member public keys
    /// for threshold signature verification.
    pub public_key_share_points: BTreeMap<MemberId, Vec<G2Point>>,
}

/// State carried through every phase: own identity, group bookkeeping, and
/// the commitment parameters.
struct MemberCore {
    id: MemberId,
    group: Group,
    params: PedersenParams,
}

/// Secret polynomial coefficients, wiped from memory on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
struct SecretCoefficients(Vec<Scalar>);

/// Share scalars received from peers, wiped from memory on drop.
#[derive(Default)]
struct SecretShares(BTreeMap<MemberId, Scalar>);

impl Drop for SecretShares {
    fn drop(&mut self) {
        for share in self.0.values_mut() {
            share.zeroize();
        }
    }
}

/// Outcome of judging a single accusation.
enum Verdict {
    /// The disclosed evidence proves the accused sent bad shares.
    AccusedMisbehaved,
    /// The evidence exonerates the accused; the accusation was false.
    AccusationUnjustified,
}

// ---------------------------------------------------------------------
// Phase 1: ephemeral key generation
// ---------------------------------------------------------------------

/// Member entering phase 1 of the protocol.
pub struct EphemeralKeyGeneratingMember {
    core: MemberCore,
}

impl EphemeralKeyGeneratingMember {
    /// Create the initial state for one member of `group`.
    pub fn new(id: MemberId, group: Group) -> Self {
        assert!(group.is_member(id), "member must belong to the group");
        Self {
            core: MemberCore {
                id,
                group,
                params: PedersenParams::new(),
            },
        }
    }

    pub fn group(&self) -> &Group {
        &self.core.group
    }

    /// Phase 1: generate one ephemeral key pair per peer and announce all
    /// the public halves. Every peer must be covered; a partial
    /// announcement gets its sender eliminated by the receivers in
    /// phase 2.
    pub fn generate_ephemeral_keys<R: RngCore + CryptoRng>(
        self,
        rng: &mut R,
    ) -> (SymmetricKeyGeneratingMember, EphemeralPublicKeyMessage) {
        let mut ephemeral_key_pairs = BTreeMap::new();
        let mut ephemeral_public_keys = BTreeMap::new();

        for peer in self.core.group.qualified_peers(self.core.id) {
            let key_pair = EphemeralKeyPair::generate(rng);
            ephemeral_public_keys.insert(peer, key_pair.public_key.to_point());
            ephemeral_key_pairs.insert(peer, key_pair);
        }

        let message = EphemeralPublicKeyMessage {
            sender: self.core.id,
            ephemeral_public_keys,
        };

        (
            SymmetricKeyGeneratingMember {
                core: self.core,
                ephemeral_key_pairs,
            },
            message,
        )
    }
}

// ---------------------------------------------------------------------
// Phase 2: symmetric key derivation
// ---------------------------------------------------------------------

/// Member entering phase 2 with its generated ephemeral key pairs.
pub struct SymmetricKeyGeneratingMember {
    core: MemberCore,
    ephemeral_key_pairs: BTreeMap<MemberId, EphemeralKeyPair>,
}

impl SymmetricKeyGeneratingMember {
    pub fn group(&self) -> &Group {
        &self.core.group
    }

    /// Phase 2: derive a pairwise symmetric key for every peer that
    /// announced a well-formed key set.
    ///
    /// A peer is eliminated when its announcement is missing, covers a set
    /// of members other than exactly its peers, carries an undecodable
    /// point, or when key derivation fails. The full announcements of the
    /// surviving peers are retained: accusation resolution later validates
    /// disclosed private keys against them.
    pub fn derive_symmetric_keys(
        mut self,
        messages: &[EphemeralPublicKeyMessage],
    ) -> CommittingMember {
        let me = self.core.id;
        let mut symmetric_keys = BTreeMap::new();
        let mut peer_ephemeral_keys = BTreeMap::new();

        for peer in self.core.group.qualified_peers(me) {
            let Some(message) = messages.iter().find(|m| m.sender == peer) else {
                self.core.group.eliminate(peer);
                continue;
            };
            let Some(announced) = decode_ephemeral_keys(&self.core.group, message) else {
                self.core.group.eliminate(peer);
                continue;
            };

            // Coverage was just validated, so the entry for us exists.
            let public_key_for_me = &announced[&me];
            let key_pair = &self.ephemeral_key_pairs[&peer];
            match ecdh(&key_pair.private_key, public_key_for_me) {
                Ok(symmetric_key) => {
                    symmetric_keys.insert(peer, symmetric_key);
                    peer_ephemeral_keys.insert(peer, announced);
                }
                Err(_) => self.core.group.eliminate(peer),
            }
        }

        CommittingMember {
            core: self.core,
            ephemeral_key_pairs: self.ephemeral_key_pairs,
            symmetric_keys,
            peer_ephemeral_keys,
        }
    }
}

/// Validate that a phase-1 announcement covers exactly the member list
/// minus the sender, and decode every announced point.
fn decode_ephemeral_keys(
    group: &Group,
    message: &EphemeralPublicKeyMessage,
) -> Option<BTreeMap<MemberId, EphemeralPublicKey>> {
    let expected: BTreeSet<MemberId> = group
        .member_ids()
        .iter()
        .copied()
        .filter(|id| *id != message.sender)
        .collect();
    let actual: BTreeSet<MemberId> = message.ephemeral_public_keys.keys().copied().collect();
    if expected != actual {
        return None;
    }

    let mut decoded = BTreeMap::new();
    for (id, point) in &message.ephemeral_public_keys {
        decoded.insert(*id, EphemeralPublicKey::from_point(point).ok()?);
    }
    Some(decoded)
}

// ---------------------------------------------------------------------
// Phase 3: commitments and share distribution
// ---------------------------------------------------------------------

/// Member entering phase 3 with a symmetric key per surviving peer.
pub struct CommittingMember {
    core: MemberCore,
    ephemeral_key_pairs: BTreeMap<MemberId, EphemeralKeyPair>,
    symmetric_keys: BTreeMap<MemberId, SymmetricKey>,
    peer_ephemeral_keys: BTreeMap<MemberId, BTreeMap<MemberId, EphemeralPublicKey>>,
}

impl CommittingMember {
    pub fn group(&self) -> &Group {
        &self.core.group
    }

    /// Phase 3: sample the two degree-T secret-sharing polynomials, commit
    /// to the coefficient pairs, and encrypt a share pair for every peer a
    /// symmetric key was derived with.
    pub fn commit_and_share<R: RngCore + CryptoRng>(
        self,
        rng: &mut R,
    ) -> Result<
        (
            SharesVerifyingMember,
            MemberCommitmentsMessage,
            PeerSharesMessage,
        ),
        DkgError,
    > {
        let me = self.core.id;
        let degree = self.core.group.dishonest_threshold() as usize;

        let secret_coefficients = SecretCoefficients(poly::generate(degree, rng));
        let blinding_coefficients = SecretCoefficients(poly::generate(degree, rng));

        let own_commitments: Vec<G1Affine> = secret_coefficients
            .0
            .iter()
            .zip(blinding_coefficients.0.iter())
            .map(|(a, b)| self.core.params.commit(a, b))
            .collect();

        let mut shares_message = PeerSharesMessage::new(me);
        for (peer, symmetric_key) in &self.symmetric_keys {
            let share_s = poly::evaluate_at_member(&secret_coefficients.0, *peer);
            let share_t = poly::evaluate_at_member(&blinding_coefficients.0, *peer);
            shares_message.add_shares(*peer, &share_s, &share_t, symmetric_key, rng)?;
        }

        let self_share_s = poly::evaluate_at_member(&secret_coefficients.0, me);

        let commitments_message = MemberCommitmentsMessage {
            sender: me,
            commitments: own_commitments.iter().map(compress_g1).collect(),
        };

        Ok((
            SharesVerifyingMember {
                core: self.core,
                ephemeral_key_pairs: self.ephemeral_key_pairs,
                symmetric_keys: self.symmetric_keys,
                peer_ephemeral_keys: self.peer_ephemeral_keys,
                secret_coefficients,
                self_share_s,
                own_commitments,
                own_shares_message: shares_message.clone(),
            },
            commitments_message,
            shares_message,
        ))
    }
}

// ---------------------------------------------------------------------
// Phase 4: share verification
// ---------------------------------------------------------------------

/// Member entering phase 4, holding its own secrets and outgoing messages
/// for later justification rounds.
pub struct SharesVerifyingMember {
    core: MemberCore,
    ephemeral_key_pairs: BTreeMap<MemberId, EphemeralKeyPair>,
    symmetric_keys: BTreeMap<MemberId, SymmetricKey>,
    peer_ephemeral_keys: BTreeMap<MemberId, BTreeMap<MemberId, EphemeralPublicKey>>,
    secret_coefficients: SecretCoefficients,
    self_share_s: Scalar,
    own_commitments: Vec<G1Affine>,
    own_shares_message: PeerSharesMessage,
}

impl SharesVerifyingMember {
    pub fn group(&self) -> &Group {
        &self.core.group
    }

    /// Phase 4: decrypt and verify the share pair addressed to this member
    /// from every qualified peer.
    ///
    /// Peers that never delivered a message, or whose message carries no
    /// entry for this member, are eliminated as non-responsive; both facts
    /// are visible to the whole group. Peers whose entry is present but
    /// fails to decrypt, decodes to a non-canonical scalar, or fails the
    /// commitment check are accused in the returned message; the returned
    /// message is broadcast even when no accusations were raised.
    pub fn verify_shares(
        mut self,
        commitments_messages: &[MemberCommitmentsMessage],
        shares_messages: &[PeerSharesMessage],
    ) -> (SharesJustifyingMember, SecretSharesAccusationsMessage) {
        let me = self.core.id;
        let expected_commitments = self.core.group.dishonest_threshold() as usize + 1;

        let mut accused_members_keys = BTreeMap::new();
        let mut received_shares_s = SecretShares::default();
        let mut received_shares_t = SecretShares::default();
        let mut received_commitments: BTreeMap<MemberId, Vec<G1Affine>> = BTreeMap::new();
        let mut peer_shares_messages: BTreeMap<MemberId, PeerSharesMessage> = BTreeMap::new();

        for peer in self.core.group.qualified_peers(me) {
            let Some(symmetric_key) = self.symmetric_keys.get(&peer) else {
                self.core.group.eliminate(peer);
                continue;
            };

            let commitments_message = commitments_messages.iter().find(|m| m.sender == peer);
            let shares_message = shares_messages.iter().find(|m| m.sender == peer);
            let (Some(commitments_message), Some(shares_message)) =
                (commitments_message, shares_message)
            else {
                self.core.group.eliminate(peer);
                continue;
            };

            // A message with no entry addressed to us is as good as no
            // message; the map is broadcast in the clear, so every member
            // reaches the same verdict.
            if !shares_message.shares.contains_key(&me) {
                self.core.group.eliminate(peer);
                continue;
            }

            let Some(commitments) = decode_commitments(commitments_message, expected_commitments)
            else {
                self.core.group.eliminate(peer);
                continue;
            };

            // Retain the raw message and commitments for accusation
            // resolution, whatever the verdict on the shares themselves.
            peer_shares_messages.insert(peer, shares_message.clone());
            received_commitments.insert(peer, commitments);
            let commitments = &received_commitments[&peer];

            // An entry that is present but does not decrypt is observable
            // only by its receiver; the sender is accused, and the
            // disclosed key lets everyone repeat the failing decryption.
            if !shares_message.can_decrypt(me, symmetric_key) {
                accused_members_keys
                    .insert(peer, self.ephemeral_key_pairs[&peer].private_key.to_bytes());
                continue;
            }

            let decrypted = shares_message
                .decrypt_share_s(me, symmetric_key)
                .and_then(|s| Ok((s, shares_message.decrypt_share_t(me, symmetric_key)?)));
            let (share_s, share_t) = match decrypted {
                Ok(shares) => shares,
                Err(_) => {
                    // Decryptable, but not a canonical scalar.
                    accused_members_keys
                        .insert(peer, self.ephemeral_key_pairs[&peer].private_key.to_bytes());
                    continue;
                }
            };

            if !shares_valid_against_commitments(
                &self.core.params,
                me,
                &share_s,
                &share_t,
                commitments,
            ) {
                accused_members_keys
                    .insert(peer, self.ephemeral_key_pairs[&peer].private_key.to_bytes());
                continue;
            }

            received_shares_s.0.insert(peer, share_s);
            received_shares_t.0.insert(peer, share_t);
        }

        let message = SecretSharesAccusationsMessage {
            sender: me,
            accused_members_keys,
        };

        (
            SharesJustifyingMember {
                core: self.core,
                ephemeral_key_pairs: self.ephemeral_key_pairs,
                peer_ephemeral_keys: self.peer_ephemeral_keys,
                secret_coefficients: self.secret_coefficients,
                self_share_s: self.self_share_s,
                own_commitments: self.own_commitments,
                own_shares_message: self.own_shares_message,
                received_shares_s,
                received_shares_t,
                received_commitments,
                peer_shares_messages,
            },
            message,
        )
    }
}

/// Check the Pedersen relation `g^s · h^t = Π C_k^{j^k}` for receiver j.
fn shares_valid_against_commitments(
    params: &PedersenParams,
    receiver: MemberId,
    share_s: &Scalar,
    share_t: &Scalar,
    commitments: &[G1Affine],
) -> bool {
    let expected = params.commit(share_s, share_t);

    let x = Scalar::from(receiver as u64);
    let mut x_power = Scalar::ONE;
    let mut combined = G1Projective::identity();
    for commitment in commitments {
        combined += G1Projective::from(*commitment) * x_power;
        x_power *= x;
    }

    expected == combined.to_affine()
}

/// Decode a commitments sequence, insisting on exactly T+1 valid points.
fn decode_commitments(
    message: &MemberCommitmentsMessage,
    expected_len: usize,
) -> Option<Vec<G1Affine>> {
    if message.commitments.len() != expected_len {
        return None;
    }
    message
        .commitments
        .iter()
        .map(|point| decompress_g1(point).ok())
        .collect()
}

// ---------------------------------------------------------------------
// Phase 5: share accusation resolution
// ---------------------------------------------------------------------

/// Member entering phase 5 with everything needed to judge accusations:
/// all announced ephemeral keys, all share messages, all commitments.
pub struct SharesJustifyingMember {
    core: MemberCore,
    ephemeral_key_pairs: BTreeMap<MemberId, EphemeralKeyPair>,
    peer_ephemeral_keys: BTreeMap<MemberId, BTreeMap<MemberId, EphemeralPublicKey>>,
    secret_coefficients: SecretCoefficients,
    self_share_s: Scalar,
    own_commitments: Vec<G1Affine>,
    own_shares_message: PeerSharesMessage,
    received_shares_s: SecretShares,
    received_shares_t: SecretShares,
    received_commitments: BTreeMap<MemberId, Vec<G1Affine>>,
    peer_shares_messages: BTreeMap<MemberId, PeerSharesMessage>,
}

impl SharesJustifyingMember {
    pub fn group(&self) -> &Group {
        &self.core.group
    }

    /// Phase 5: resolve the broadcast share accusations.
    ///
    /// Every member judges each accusation from the disclosed ephemeral
    /// private key and eliminates whichever party was in the wrong.
    /// Members that failed to broadcast an accusations message, even an
    /// empty one, are eliminated as non-responsive. Self-accusations and
    /// accusations naming a non-qualified member are ignored. Verdicts are
    /// formed against a snapshot of the qualified set taken at phase
    /// entry, so the outcome does not depend on processing order.
    ///
    /// The qualified set is final for share purposes after this phase;
    /// fewer than T+1 qualified members abort the session.
    pub fn resolve_accusations(
        mut self,
        messages: &[SecretSharesAccusationsMessage],
    ) -> Result<ShareCombiningMember, DkgError> {
        let me = self.core.id;

        for peer in self.core.group.qualified_peers(me) {
            if !messages.iter().any(|m| m.sender == peer) {
                self.core.group.eliminate(peer);
            }
        }

        let qualified: BTreeSet<MemberId> = self.core.group.qualified_ids().into_iter().collect();
        let mut eliminations: BTreeSet<MemberId> = BTreeSet::new();

        for message in messages {
            let accuser = message.sender;
            if !qualified.contains(&accuser) {
                continue;
            }
            for (accused, revealed_key) in &message.accused_members_keys {
                if *accused == accuser || !qualified.contains(accused) {
                    continue;
                }
                match self.judge_share_accusation(accuser, *accused, revealed_key) {
                    Verdict::AccusedMisbehaved => eliminations.insert(*accused),
                    Verdict::AccusationUnjustified => eliminations.insert(accuser),
                };
            }
        }
        for id in eliminations {
            self.core.group.eliminate(id);
        }

        if !self.core.group.is_threshold_satisfied() {
            return Err(DkgError::InsufficientQualifiedMembers {
                qualified: self.core.group.qualified_ids(),
            });
        }

        Ok(ShareCombiningMember {
            core: self.core,
            ephemeral_key_pairs: self.ephemeral_key_pairs,
            peer_ephemeral_keys: self.peer_ephemeral_keys,
            secret_coefficients: self.secret_coefficients,
            self_share_s: self.self_share_s,
            own_shares_message: self.own_shares_message,
            received_shares_s: self.received_shares_s,
            received_shares_t: self.received_shares_t,
            peer_shares_messages: self.peer_shares_messages,
        })
    }

    fn judge_share_accusation(
        &self,
        accuser: MemberId,
        accused: MemberId,
        revealed_key: &ScalarBytes,
    ) -> Verdict {
        let context = AccusationContext {
            me: self.core.id,
            ephemeral_key_pairs: &self.ephemeral_key_pairs,
            peer_ephemeral_keys: &self.peer_ephemeral_keys,
            own_shares_message: &self.own_shares_message,
            peer_shares_messages: &self.peer_shares_messages,
        };
        let symmetric_key = match context.recompute_symmetric_key(accuser, accused, revealed_key) {
            Ok(key) => key,
            Err(verdict) => return verdict,
        };
        let Some(shares_message) = context.shares_message_of(accused) else {
            return Verdict::AccusedMisbehaved;
        };

        let decrypted = shares_message
            .decrypt_share_s(accuser, &symmetric_key)
            .and_then(|s| Ok((s, shares_message.decrypt_share_t(accuser, &symmetric_key)?)));
        let Ok((share_s, share_t)) = decrypted else {
            return Verdict::AccusedMisbehaved;
        };

        let commitments = if accused == self.core.id {
            &self.own_commitments
        } else {
            match self.received_commitments.get(&accused) {
                Some(commitments) => commitments,
                None => return Verdict::AccusedMisbehaved,
            }
        };

        if shares_valid_against_commitments(
            &self.core.params,
            accuser,
            &share_s,
            &share_t,
            commitments,
        ) {
            Verdict::AccusationUnjustified
        } else {
            Verdict::AccusedMisbehaved
        }
    }
}

/// Shared lookups for judging accusations in phases 5 and 8.
struct AccusationContext<'a> {
    me: MemberId,
    ephemeral_key_pairs: &'a BTreeMap<MemberId, EphemeralKeyPair>,
    peer_ephemeral_keys: &'a BTreeMap<MemberId, BTreeMap<MemberId, EphemeralPublicKey>>,
    own_shares_message: &'a PeerSharesMessage,
    peer_shares_messages: &'a BTreeMap<MemberId, PeerSharesMessage>,
}

impl AccusationContext<'_> {
    /// The ephemeral public key `owner` announced for `target` in phase 1.
    fn announced_public_key(
        &self,
        owner: MemberId,
        target: MemberId,
    ) -> Option<EphemeralPublicKey> {
        if owner == self.me {
            self.ephemeral_key_pairs
                .get(&target)
                .map(|pair| pair.public_key.clone())
        } else {
            self.peer_ephemeral_keys
                .get(&owner)
                .and_then(|keys| keys.get(&target))
                .cloned()
        }
    }

    fn shares_message_of(&self, id: MemberId) -> Option<&PeerSharesMessage> {
        if id == self.me {
            Some(self.own_shares_message)
        } else {
            self.peer_shares_messages.get(&id)
        }
    }

    /// Validate the disclosed private key and recompute the pair's
    /// symmetric key. An `Err` verdict settles the accusation without
    /// further checks: a forged or malformed disclosure convicts the
    /// accuser, a missing counterparty announcement convicts the accused.
    fn recompute_symmetric_key(
        &self,
        accuser: MemberId,
        accused: MemberId,
        revealed_key: &ScalarBytes,
    ) -> Result<SymmetricKey, Verdict> {
        let Ok(private_key) = EphemeralPrivateKey::from_bytes(revealed_key) else {
            return Err(Verdict::AccusationUnjustified);
        };
        let Some(announced) = self.announced_public_key(accuser, accused) else {
            return Err(Verdict::AccusationUnjustified);
        };
        if private_key.public_key() != announced {
            return Err(Verdict::AccusationUnjustified);
        }

        let Some(accused_public_key) = self.announced_public_key(accused, accuser) else {
            return Err(Verdict::AccusedMisbehaved);
        };
        ecdh(&private_key, &accused_public_key).map_err(|_| Verdict::AccusedMisbehaved)
    }
}

// ---------------------------------------------------------------------
// Phase 6: share combination
// ---------------------------------------------------------------------

/// Member entering phase 6, after the qualified set settled for shares.
pub struct ShareCombiningMember {
    core: MemberCore,
    ephemeral_key_pairs: BTreeMap<MemberId, EphemeralKeyPair>,
    peer_ephemeral_keys: BTreeMap<MemberId, BTreeMap<MemberId, EphemeralPublicKey>>,
    secret_coefficients: SecretCoefficients,
    self_share_s: Scalar,
    own_shares_message: PeerSharesMessage,
    received_shares_s: SecretShares,
    received_shares_t: SecretShares,
    peer_shares_messages: BTreeMap<MemberId, PeerSharesMessage>,
}

impl ShareCombiningMember {
    pub fn group(&self) -> &Group {
        &self.core.group
    }

    /// Phase 6: combine the self share with every qualified peer's share
    /// into this member's share of the group private key. The blinding
    /// (T) shares have served their purpose and are discarded here.
    pub fn combine_shares(self) -> PointsSharingMember {
        let me = self.core.id;

        let mut group_private_key_share = self.self_share_s;
        let mut combined_over = BTreeSet::from([me]);
        for (peer, peer_share) in &self.received_shares_s.0 {
            if self.core.group.is_qualified(*peer) {
                group_private_key_share += peer_share;
                combined_over.insert(*peer);
            }
        }

        drop(self.received_shares_t);

        PointsSharingMember {
            core: self.core,
            ephemeral_key_pairs: self.ephemeral_key_pairs,
            peer_ephemeral_keys: self.peer_ephemeral_keys,
            secret_coefficients: self.secret_coefficients,
            own_shares_message: self.own_shares_message,
            received_shares_s: self.received_shares_s,
            peer_shares_messages: self.peer_shares_messages,
            group_private_key_share,
            combined_over,
        }
    }
}

// ---------------------------------------------------------------------
// Phase 7: public key share point distribution
// ---------------------------------------------------------------------

/// Member entering phase 7 with its combined private-key share.
pub struct PointsSharingMember {
    core: MemberCore,
    ephemeral_key_pairs: BTreeMap<MemberId, EphemeralKeyPair>,
    peer_ephemeral_keys: BTreeMap<MemberId, BTreeMap<MemberId, EphemeralPublicKey>>,
    secret_coefficients: SecretCoefficients,
    own_shares_message: PeerSharesMessage,
    received_shares_s: SecretShares,
    peer_shares_messages: BTreeMap<MemberId, PeerSharesMessage>,
    group_private_key_share: Scalar,
    /// Members whose shares went into the combined private-key share.
    combined_over: BTreeSet<MemberId>,
}

impl PointsSharingMember {
    pub fn group(&self) -> &Group {
        &self.core.group
    }

    /// Phase 7: publish the public key share points `A_k = g2^{a_k}`, the
    /// S polynomial coefficients in the exponent, in G2.
    pub fn calculate_public_key_share_points(
        self,
    ) -> (PointsVerifyingMember, MemberPublicKeySharePointsMessage) {
        let own_share_points: Vec<G2Affine> = self
            .secret_coefficients
            .0
            .iter()
            .map(|coefficient| (G2Projective::generator() * coefficient).to_affine())
            .collect();

        let message = MemberPublicKeySharePointsMessage {
            sender: self.core.id,
            public_key_share_points: own_share_points.iter().map(compress_g2).collect(),
        };

        (
            PointsVerifyingMember {
                core: self.core,
                ephemeral_key_pairs: self.ephemeral_key_pairs,
                peer_ephemeral_keys: self.peer_ephemeral_keys,
                own_shares_message: self.own_shares_message,
                received_shares_s: self.received_shares_s,
                peer_shares_messages: self.peer_shares_messages,
                group_private_key_share: self.group_private_key_share,
                combined_over: self.combined_over,
                own_share_points,
            },
            message,
        )
    }
}

// ---------------------------------------------------------------------
// Phase 8: share point verification and accusation resolution
// ---------------------------------------------------------------------

/// Member entering phase 8 with its own share points published.
pub struct PointsVerifyingMember {
    core: MemberCore,
    ephemeral_key_pairs: BTreeMap<MemberId, EphemeralKeyPair>,
    peer_ephemeral_keys: BTreeMap<MemberId, BTreeMap<MemberId, EphemeralPublicKey>>,
    own_shares_message: PeerSharesMessage,
    received_shares_s: SecretShares,
    peer_shares_messages: BTreeMap<MemberId, PeerSharesMessage>,
    group_private_key_share: Scalar,
    combined_over: BTreeSet<MemberId>,
    own_share_points: Vec<G2Affine>,
}

impl PointsVerifyingMember {
    pub fn group(&self) -> &Group {
        &self.core.group
    }

    /// Phase 8: verify every qualified peer's share points against the
    /// share received from them in phase 3: `Π A_ik^{j^k} = g2^{s_ij}`.
    ///
    /// Peers with missing or malformed announcements are eliminated;
    /// failed verifications produce accusations. As in phase 4, the
    /// returned message is broadcast even when empty.
    pub fn verify_points(
        mut self,
        messages: &[MemberPublicKeySharePointsMessage],
    ) -> (PointsJustifyingMember, PointsAccusationsMessage) {
        let me = self.core.id;
        let expected_points = self.core.group.dishonest_threshold() as usize + 1;

        let mut accused_members_keys = BTreeMap::new();
        let mut received_share_points: BTreeMap<MemberId, Vec<G2Affine>> = BTreeMap::new();

        for peer in self.core.group.qualified_peers(me) {
            let Some(message) = messages.iter().find(|m| m.sender == peer) else {
                self.core.group.eliminate(peer);
                continue;
            };
            let Some(points) = decode_share_points(message, expected_points) else {
                self.core.group.eliminate(peer);
                continue;
            };
            let Some(share_s) = self.received_shares_s.0.get(&peer) else {
                self.core.group.eliminate(peer);
                continue;
            };

            if !points_valid_against_share(me, share_s, &points) {
                accused_members_keys
                    .insert(peer, self.ephemeral_key_pairs[&peer].private_key.to_bytes());
            }
            // Announced points are kept either way; resolution needs them.
            received_share_points.insert(peer, points);
        }

        let message = PointsAccusationsMessage {
            sender: me,
            accused_members_keys,
        };

        (
            PointsJustifyingMember {
                core: self.core,
                ephemeral_key_pairs: self.ephemeral_key_pairs,
                peer_ephemeral_keys: self.peer_ephemeral_keys,
                own_shares_message: self.own_shares_message,
                received_shares_s: self.received_shares_s,
                peer_shares_messages: self.peer_shares_messages,
                group_private_key_share: self.group_private_key_share,
                combined_over: self.combined_over,
                own_share_points: self.own_share_points,
                received_share_points,
            },
            message,
        )
    }
}

/// Check `Π A_k^{j^k} = g2^s` for receiver j.
fn points_valid_against_share(receiver: MemberId, share_s: &Scalar, points: &[G2Affine]) -> bool {
    let expected = G2Projective::generator() * share_s;

    let x = Scalar::from(receiver as u64);
    let mut x_power = Scalar::ONE;
    let mut combined = G2Projective::identity();
    for point in points {
        combined += G2Projective::from(*point) * x_power;
        x_power *= x;
    }

    combined == expected
}

/// Decode a share points sequence, insisting on exactly T+1 valid points.
fn decode_share_points(
    message: &MemberPublicKeySharePointsMessage,
    expected_len: usize,
) -> Option<Vec<G2Affine>> {
    if message.public_key_share_points.len() != expected_len {
        return None;
    }
    message
        .public_key_share_points
        .iter()
        .map(|point| decompress_g2(point).ok())
        .collect()
}

/// Member entering the phase-8 justification round.
pub struct PointsJustifyingMember {
    core: MemberCore,
    ephemeral_key_pairs: BTreeMap<MemberId, EphemeralKeyPair>,
    peer_ephemeral_keys: BTreeMap<MemberId, BTreeMap<MemberId, EphemeralPublicKey>>,
    own_shares_message: PeerSharesMessage,
    received_shares_s: SecretShares,
    peer_shares_messages: BTreeMap<MemberId, PeerSharesMessage>,
    group_private_key_share: Scalar,
    combined_over: BTreeSet<MemberId>,
    own_share_points: Vec<G2Affine>,
    received_share_points: BTreeMap<MemberId, Vec<G2Affine>>,
}

impl PointsJustifyingMember {
    pub fn group(&self) -> &Group {
        &self.core.group
    }

    /// Phase 8 resolution: judge the broadcast point accusations exactly
    /// like phase 5 judged share accusations, then settle the books.
    ///
    /// Members eliminated after share combination have their phase-3 share
    /// contribution subtracted from the combined private-key share again,
    /// keeping `g2^{gsk}` consistent with the group public key assembled
    /// from the final qualified set.
    pub fn resolve_accusations(
        mut self,
        messages: &[PointsAccusationsMessage],
    ) -> Result<FinalizingMember, DkgError> {
        let me = self.core.id;

        for peer in self.core.group.qualified_peers(me) {
            if !messages.iter().any(|m| m.sender == peer) {
                self.core.group.eliminate(peer);
            }
        }

        let qualified: BTreeSet<MemberId> = self.core.group.qualified_ids().into_iter().collect();
        let mut eliminations: BTreeSet<MemberId> = BTreeSet::new();

        for message in messages {
            let accuser = message.sender;
            if !qualified.contains(&accuser) {
                continue;
            }
            for (accused, revealed_key) in &message.accused_members_keys {
                if *accused == accuser || !qualified.contains(accused) {
                    continue;
                }
                match self.judge_points_accusation(accuser, *accused, revealed_key) {
                    Verdict::AccusedMisbehaved => eliminations.insert(*accused),
                    Verdict::AccusationUnjustified => eliminations.insert(accuser),
                };
            }
        }
        for id in eliminations {
            self.core.group.eliminate(id);
        }

        // Settle the private-key share against eliminations that happened
        // after phase 6 combined it.
        for peer in self.combined_over.clone() {
            if peer != me && !self.core.group.is_qualified(peer) {
                if let Some(share) = self.received_shares_s.0.get(&peer) {
                    self.group_private_key_share -= share;
                }
                self.combined_over.remove(&peer);
            }
        }

        // Collect the share points of the final qualified set. A qualified
        // peer without retained points cannot contribute to the group key;
        // eliminate defensively (every honest member sees the same data
        // and reaches the same set).
        let mut qualified_share_points: BTreeMap<MemberId, Vec<G2Affine>> = BTreeMap::new();
        qualified_share_points.insert(me, self.own_share_points);
        for peer in self.core.group.qualified_peers(me) {
            match self.received_share_points.remove(&peer) {
                Some(points) => {
                    qualified_share_points.insert(peer, points);
                }
                None => self.core.group.eliminate(peer),
            }
        }

        if !self.core.group.is_threshold_satisfied() {
            return Err(DkgError::InsufficientQualifiedMembers {
                qualified: self.core.group.qualified_ids(),
            });
        }

        Ok(FinalizingMember {
            core: self.core,
            group_private_key_share: self.group_private_key_share,
            qualified_share_points,
        })
    }

    fn judge_points_accusation(
        &self,
        accuser: MemberId,
        accused: MemberId,
        revealed_key: &ScalarBytes,
    ) -> Verdict {
        let context = AccusationContext {
            me: self.core.id,
            ephemeral_key_pairs: &self.ephemeral_key_pairs,
            peer_ephemeral_keys: &self.peer_ephemeral_keys,
            own_shares_message: &self.own_shares_message,
            peer_shares_messages: &self.peer_shares_messages,
        };
        let symmetric_key = match context.recompute_symmetric_key(accuser, accused, revealed_key) {
            Ok(key) => key,
            Err(verdict) => return verdict,
        };
        let Some(shares_message) = context.shares_message_of(accused) else {
            return Verdict::AccusedMisbehaved;
        };
        let Ok(share_s) = shares_message.decrypt_share_s(accuser, &symmetric_key) else {
            return Verdict::AccusedMisbehaved;
        };

        let points = if accused == self.core.id {
            &self.own_share_points
        } else {
            match self.received_share_points.get(&accused) {
                Some(points) => points,
                None => return Verdict::AccusedMisbehaved,
            }
        };

        if points_valid_against_share(accuser, &share_s, points) {
            Verdict::AccusationUnjustified
        } else {
            Verdict::AccusedMisbehaved
        }
    }
}

// ---------------------------------------------------------------------
// Phase 9: final assembly
// ---------------------------------------------------------------------

/// Member entering the final phase. All per-pair secrets are gone; only
/// the combined private-key share and the qualified share points remain.
pub struct FinalizingMember {
    core: MemberCore,
    group_private_key_share: Scalar,
    qualified_share_points: BTreeMap<MemberId, Vec<G2Affine>>,
}

impl FinalizingMember {
    pub fn group(&self) -> &Group {
        &self.core.group
    }

    /// Phase 9: multiply the qualified members' constant-term share points
    /// into the group public key. Every honest member computes the same
    /// value.
    pub fn finalize(self) -> DkgOutput {
        let mut group_public_key = G2Projective::identity();
        for points in self.qualified_share_points.values() {
            group_public_key += G2Projective::from(points[0]);
        }

        let public_key_share_points = self
            .qualified_share_points
            .iter()
            .map(|(id, points)| (*id, points.iter().map(compress_g2).collect()))
            .collect();

        DkgOutput {
            member_id: self.core.id,
            group_public_key: compress_g2(&group_public_key.to_affine()),
            group_private_key_share: scalar_to_bytes(&self.group_private_key_share),
            qualified: self.core.group.qualified_ids(),
            public_key_share_points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_crypto::scalar_from_bytes;
    use rand::rngs::OsRng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn verification_fixture(
        receiver: MemberId,
    ) -> (PedersenParams, Vec<Scalar>, Vec<Scalar>, Vec<G1Affine>) {
        let mut rng = ChaCha8Rng::seed_from_u64(receiver as u64);
        let params = PedersenParams::new();
        let secret = poly::generate(2, &mut rng);
        let blinding = poly::generate(2, &mut rng);
        let commitments = secret
            .iter()
            .zip(blinding.iter())
            .map(|(a, b)| params.commit(a, b))
            .collect();
        (params, secret, blinding, commitments)
    }

    #[test]
    fn test_valid_shares_pass_commitment_check() {
        let (params, secret, blinding, commitments) = verification_fixture(4);
        let share_s = poly::evaluate_at_member(&secret, 4);
        let share_t = poly::evaluate_at_member(&blinding, 4);
        assert!(shares_valid_against_commitments(
            &params,
            4,
            &share_s,
            &share_t,
            &commitments
        ));
    }

    #[test]
    fn test_tampered_share_fails_commitment_check() {
        let (params, secret, blinding, commitments) = verification_fixture(4);
        let share_s = poly::evaluate_at_member(&secret, 4) + Scalar::ONE;
        let share_t = poly::evaluate_at_member(&blinding, 4);
        assert!(!shares_valid_against_commitments(
            &params,
            4,
            &share_s,
            &share_t,
            &commitments
        ));
    }

    #[test]
    fn test_share_for_wrong_receiver_fails_commitment_check() {
        let (params, secret, blinding, commitments) = verification_fixture(4);
        let share_s = poly::evaluate_at_member(&secret, 5);
        let share_t = poly::evaluate_at_member(&blinding, 5);
        assert!(!shares_valid_against_commitments(
            &params,
            4,
            &share_s,
            &share_t,
            &commitments
        ));
    }

    #[test]
    fn test_valid_points_pass_share_check() {
        let mut rng = OsRng;
        let secret = poly::generate(2, &mut rng);
        let points: Vec<G2Affine> = secret
            .iter()
            .map(|a| (G2Projective::generator() * a).to_affine())
            .collect();
        let share = poly::evaluate_at_member(&secret, 3);
        assert!(points_valid_against_share(3, &share, &points));
    }

    #[test]
    fn test_corrupted_point_fails_share_check() {
        let mut rng = OsRng;
        let secret = poly::generate(2, &mut rng);
        let mut points: Vec<G2Affine> = secret
            .iter()
            .map(|a| (G2Projective::generator() * a).to_affine())
            .collect();
        points[1] = (G2Projective::from(points[1]) + G2Projective::from(points[1])).to_affine();
        let share = poly::evaluate_at_member(&secret, 3);
        assert!(!points_valid_against_share(3, &share, &points));
    }

    /// Drive a whole group through all nine phases with honest members.
    fn run_honest_dkg(group_size: u32, threshold: u32) -> Vec<DkgOutput> {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let ids: Vec<MemberId> = (1..=group_size).collect();

        let members: Vec<EphemeralKeyGeneratingMember> = ids
            .iter()
            .map(|id| {
                EphemeralKeyGeneratingMember::new(*id, Group::new(threshold, ids.clone()))
            })
            .collect();

        // Phase 1 + 2
        let mut key_messages = Vec::new();
        let members: Vec<SymmetricKeyGeneratingMember> = members
            .into_iter()
            .map(|member| {
                let (member, message) = member.generate_ephemeral_keys(&mut rng);
                key_messages.push(message);
                member
            })
            .collect();
        let members: Vec<CommittingMember> = members
            .into_iter()
            .map(|member| member.derive_symmetric_keys(&key_messages))
            .collect();

        // Phase 3 + 4
        let mut commitments_messages = Vec::new();
        let mut shares_messages = Vec::new();
        let members: Vec<SharesVerifyingMember> = members
            .into_iter()
            .map(|member| {
                let (member, commitments, shares) = member.commit_and_share(&mut rng).unwrap();
                commitments_messages.push(commitments);
                shares_messages.push(shares);
                member
            })
            .collect();

        // Phase 5
        let mut accusation_messages = Vec::new();
        let members: Vec<SharesJustifyingMember> = members
            .into_iter()
            .map(|member| {
                let (member, accusations) =
                    member.verify_shares(&commitments_messages, &shares_messages);
                assert!(accusations.accused_members_keys.is_empty());
                accusation_messages.push(accusations);
                member
            })
            .collect();
        let members: Vec<ShareCombiningMember> = members
            .into_iter()
            .map(|member| member.resolve_accusations(&accusation_messages).unwrap())
            .collect();

        // Phase 6 + 7
        let mut points_messages = Vec::new();
        let members: Vec<PointsVerifyingMember> = members
            .into_iter()
            .map(|member| {
                let (member, points) = member.combine_shares().calculate_public_key_share_points();
                points_messages.push(points);
                member
            })
            .collect();

        // Phase 8 + 9
        let mut points_accusation_messages = Vec::new();
        let members: Vec<PointsJustifyingMember> = members
            .into_iter()
            .map(|member| {
                let (member, accusations) = member.verify_points(&points_messages);
                assert!(accusations.accused_members_keys.is_empty());
                points_accusation_messages.push(accusations);
                member
            })
            .collect();

        members
            .into_iter()
            .map(|member| {
                member
                    .resolve_accusations(&points_accusation_messages)
                    .unwrap()
                    .finalize()
            })
            .collect()
    }

    #[test]
    fn test_honest_run_produces_matching_outputs() {
        let outputs = run_honest_dkg(3, 1);

        assert_eq!(outputs.len(), 3);
        for output in &outputs {
            assert_eq!(output.qualified, vec![1, 2, 3]);
            assert_eq!(output.group_public_key, outputs[0].group_public_key);
        }
    }

    #[test]
    fn test_honest_run_shares_interpolate_to_group_key() {
        let outputs = run_honest_dkg(3, 1);

        let shares: Vec<(MemberId, Scalar)> = outputs
            .iter()
            .take(2)
            .map(|output| {
                (
                    output.member_id,
                    scalar_from_bytes(&output.group_private_key_share).unwrap(),
                )
            })
            .collect();

        let secret = poly::interpolate_at_zero(&shares).unwrap();
        let expected = compress_g2(&(G2Projective::generator() * secret).to_affine());
        assert_eq!(expected, outputs[0].group_public_key);
    }
}
