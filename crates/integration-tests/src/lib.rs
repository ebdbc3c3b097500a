//! End-to-end scenarios for the threshold relay beacon DKG.
//!
//! These tests drive whole groups through all nine protocol phases:
//! 1. Honest runs of various sizes, checking that every member derives the
//!    same group public key and a consistent private-key share
//! 2. Adversarial runs with malformed shares, false accusations, and
//!    corrupted public key share points
//! 3. Boundary behavior at and below the qualification threshold
//! 4. A full async session over the in-process network with block-height
//!    round synchronization
//!
//! Adversaries are simulated outside the protocol state machine, built
//! only from broadcast data and their own secrets, the same way a real
//! attacker would operate.
#![cfg(test)]

use std::collections::{BTreeMap, BTreeSet};

use bls12_381::{G2Projective, Scalar};
use ff::Field;
use group::Curve;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use beacon_chain::{HashSigning, Signing};
use beacon_crypto::{
    compress_g1, compress_g2, decompress_g2, ecdh, scalar_from_bytes, scalar_to_bytes,
    EphemeralKeyPair, EphemeralPublicKey, PedersenParams, SymmetricKey,
};
use beacon_dkg::{
    member::{
        DkgOutput, EphemeralKeyGeneratingMember, PointsJustifyingMember, PointsVerifyingMember,
        ShareCombiningMember, SharesJustifyingMember, SharesVerifyingMember,
        SymmetricKeyGeneratingMember,
    },
    messages::{
        EncryptedShares, EphemeralPublicKeyMessage, MemberCommitmentsMessage,
        MemberPublicKeySharePointsMessage, PeerSharesMessage, PointsAccusationsMessage,
        SecretSharesAccusationsMessage,
    },
    poly, DkgError, Group,
};
use beacon_types::{MemberId, Scalar as ScalarBytes};

// ---------------------------------------------------------------------
// Scenario harness
// ---------------------------------------------------------------------

/// Scripted misbehavior for one simulated adversary.
#[derive(Clone, Default)]
struct Misbehavior {
    /// Receivers whose S share entry is raw garbage that fails AEAD
    /// decryption outright.
    garbage_ciphertext_for: Vec<MemberId>,
    /// Receivers that get a random blob instead of their S share.
    corrupt_shares_for: Vec<MemberId>,
    /// Members to accuse in phase 5 despite their shares being valid.
    falsely_accuse: Vec<MemberId>,
    /// Identifier outside the group to accuse in phase 5.
    accuse_nonmember: Option<MemberId>,
    /// Share point index to corrupt in phase 7.
    corrupt_point_index: Option<usize>,
}

/// A member simulated outside the protocol state machine, following its
/// misbehavior script but otherwise playing along.
struct ScriptedMember {
    id: MemberId,
    misbehavior: Misbehavior,
    params: PedersenParams,
    rng: ChaCha8Rng,
    key_pairs: BTreeMap<MemberId, EphemeralKeyPair>,
    symmetric_keys: BTreeMap<MemberId, SymmetricKey>,
    secret_coefficients: Vec<Scalar>,
    blinding_coefficients: Vec<Scalar>,
}

impl ScriptedMember {
    fn new(
        id: MemberId,
        peers: &[MemberId],
        misbehavior: Misbehavior,
    ) -> (Self, EphemeralPublicKeyMessage) {
        let mut rng = ChaCha8Rng::seed_from_u64(0x5c81_0000 + id as u64);

        let mut key_pairs = BTreeMap::new();
        let mut ephemeral_public_keys = BTreeMap::new();
        for peer in peers {
            let key_pair = EphemeralKeyPair::generate(&mut rng);
            ephemeral_public_keys.insert(*peer, key_pair.public_key.to_point());
            key_pairs.insert(*peer, key_pair);
        }

        let message = EphemeralPublicKeyMessage {
            sender: id,
            ephemeral_public_keys,
        };

        (
            Self {
                id,
                misbehavior,
                params: PedersenParams::new(),
                rng,
                key_pairs,
                symmetric_keys: BTreeMap::new(),
                secret_coefficients: Vec::new(),
                blinding_coefficients: Vec::new(),
            },
            message,
        )
    }

    fn derive_keys(&mut self, messages: &[EphemeralPublicKeyMessage]) {
        for message in messages {
            if message.sender == self.id {
                continue;
            }
            let point = &message.ephemeral_public_keys[&self.id];
            let public_key = EphemeralPublicKey::from_point(point).unwrap();
            let key_pair = &self.key_pairs[&message.sender];
            self.symmetric_keys.insert(
                message.sender,
                ecdh(&key_pair.private_key, &public_key).unwrap(),
            );
        }
    }

    fn commit_and_share(
        &mut self,
        threshold: u32,
    ) -> (MemberCommitmentsMessage, PeerSharesMessage) {
        self.secret_coefficients = poly::generate(threshold as usize, &mut self.rng);
        self.blinding_coefficients = poly::generate(threshold as usize, &mut self.rng);

        let commitments = self
            .secret_coefficients
            .iter()
            .zip(self.blinding_coefficients.iter())
            .map(|(a, b)| compress_g1(&self.params.commit(a, b)))
            .collect();

        let mut shares_message = PeerSharesMessage::new(self.id);
        for (peer, symmetric_key) in &self.symmetric_keys {
            let share_s = poly::evaluate_at_member(&self.secret_coefficients, *peer);
            let share_t = poly::evaluate_at_member(&self.blinding_coefficients, *peer);

            if self.misbehavior.garbage_ciphertext_for.contains(peer) {
                let mut garbage = [0u8; 44];
                self.rng.fill_bytes(&mut garbage);
                shares_message.shares.insert(
                    *peer,
                    EncryptedShares {
                        share_s: garbage.to_vec(),
                        share_t: symmetric_key
                            .encrypt(&scalar_to_bytes(&share_t).0, &mut self.rng)
                            .unwrap(),
                    },
                );
            } else if self.misbehavior.corrupt_shares_for.contains(peer) {
                let mut blob = [0u8; 32];
                self.rng.fill_bytes(&mut blob);
                shares_message.shares.insert(
                    *peer,
                    EncryptedShares {
                        share_s: symmetric_key.encrypt(&blob, &mut self.rng).unwrap(),
                        share_t: symmetric_key
                            .encrypt(&scalar_to_bytes(&share_t).0, &mut self.rng)
                            .unwrap(),
                    },
                );
            } else {
                shares_message
                    .add_shares(*peer, &share_s, &share_t, symmetric_key, &mut self.rng)
                    .unwrap();
            }
        }

        (
            MemberCommitmentsMessage {
                sender: self.id,
                commitments,
            },
            shares_message,
        )
    }

    fn share_accusations(&self) -> SecretSharesAccusationsMessage {
        let mut accused_members_keys = BTreeMap::new();
        for id in &self.misbehavior.falsely_accuse {
            accused_members_keys.insert(*id, self.key_pairs[id].private_key.to_bytes());
        }
        if let Some(id) = self.misbehavior.accuse_nonmember {
            accused_members_keys.insert(id, ScalarBytes([7u8; 32]));
        }
        SecretSharesAccusationsMessage {
            sender: self.id,
            accused_members_keys,
        }
    }

    fn share_points(&self) -> MemberPublicKeySharePointsMessage {
        let mut points: Vec<G2Projective> = self
            .secret_coefficients
            .iter()
            .map(|coefficient| G2Projective::generator() * coefficient)
            .collect();
        if let Some(index) = self.misbehavior.corrupt_point_index {
            points[index] = points[index].double();
        }
        MemberPublicKeySharePointsMessage {
            sender: self.id,
            public_key_share_points: points
                .iter()
                .map(|point| compress_g2(&point.to_affine()))
                .collect(),
        }
    }

    fn points_accusations(&self) -> PointsAccusationsMessage {
        PointsAccusationsMessage {
            sender: self.id,
            accused_members_keys: BTreeMap::new(),
        }
    }
}

fn maybe_reverse<T>(messages: &mut [T], reverse: bool) {
    if reverse {
        messages.reverse();
    }
}

/// Run a DKG with `group_size` members, the scripted ones simulated by the
/// harness and the rest driven honestly through the state machine. Returns
/// the honest members' session results keyed by identifier.
fn run_scenario(
    group_size: u32,
    threshold: u32,
    scripted: Vec<(MemberId, Misbehavior)>,
    reverse_delivery: bool,
) -> BTreeMap<MemberId, Result<DkgOutput, DkgError>> {
    let ids: Vec<MemberId> = (1..=group_size).collect();
    let scripted_ids: BTreeSet<MemberId> = scripted.iter().map(|(id, _)| *id).collect();
    let honest_ids: Vec<MemberId> = ids
        .iter()
        .copied()
        .filter(|id| !scripted_ids.contains(id))
        .collect();

    let mut rngs: BTreeMap<MemberId, ChaCha8Rng> = honest_ids
        .iter()
        .map(|id| (*id, ChaCha8Rng::seed_from_u64(0xbeac_0000 + *id as u64)))
        .collect();

    let mut results: BTreeMap<MemberId, Result<DkgOutput, DkgError>> = BTreeMap::new();

    // Phase 1: everyone announces ephemeral public keys.
    let mut key_messages = Vec::new();
    let mut honest: Vec<(MemberId, SymmetricKeyGeneratingMember)> = honest_ids
        .iter()
        .map(|id| {
            let member =
                EphemeralKeyGeneratingMember::new(*id, Group::new(threshold, ids.clone()));
            let (member, message) = member.generate_ephemeral_keys(rngs.get_mut(id).unwrap());
            key_messages.push(message);
            (*id, member)
        })
        .collect();
    let mut adversaries: Vec<ScriptedMember> = scripted
        .into_iter()
        .map(|(id, misbehavior)| {
            let peers: Vec<MemberId> = ids.iter().copied().filter(|peer| *peer != id).collect();
            let (member, message) = ScriptedMember::new(id, &peers, misbehavior);
            key_messages.push(message);
            member
        })
        .collect();
    maybe_reverse(&mut key_messages, reverse_delivery);

    // Phase 2 + 3.
    let mut commitments_messages = Vec::new();
    let mut shares_messages = Vec::new();
    let honest: Vec<(MemberId, SharesVerifyingMember)> = honest
        .drain(..)
        .map(|(id, member)| {
            let member = member.derive_symmetric_keys(&key_messages);
            let (member, commitments, shares) = member
                .commit_and_share(rngs.get_mut(&id).unwrap())
                .unwrap();
            commitments_messages.push(commitments);
            shares_messages.push(shares);
            (id, member)
        })
        .collect();
    for adversary in adversaries.iter_mut() {
        adversary.derive_keys(&key_messages);
        let (commitments, shares) = adversary.commit_and_share(threshold);
        commitments_messages.push(commitments);
        shares_messages.push(shares);
    }
    maybe_reverse(&mut commitments_messages, reverse_delivery);
    maybe_reverse(&mut shares_messages, reverse_delivery);

    // Phase 4 + 5.
    let mut accusation_messages = Vec::new();
    let honest: Vec<(MemberId, SharesJustifyingMember)> = honest
        .into_iter()
        .map(|(id, member)| {
            let (member, accusations) =
                member.verify_shares(&commitments_messages, &shares_messages);
            accusation_messages.push(accusations);
            (id, member)
        })
        .collect();
    for adversary in &adversaries {
        accusation_messages.push(adversary.share_accusations());
    }
    maybe_reverse(&mut accusation_messages, reverse_delivery);

    let mut survivors: Vec<(MemberId, ShareCombiningMember)> = Vec::new();
    for (id, member) in honest {
        match member.resolve_accusations(&accusation_messages) {
            Ok(member) => survivors.push((id, member)),
            Err(error) => {
                results.insert(id, Err(error));
            }
        }
    }
    if survivors.is_empty() {
        return results;
    }

    // Phase 6 + 7.
    let mut points_messages = Vec::new();
    let honest: Vec<(MemberId, PointsVerifyingMember)> = survivors
        .into_iter()
        .map(|(id, member)| {
            let (member, points) = member.combine_shares().calculate_public_key_share_points();
            points_messages.push(points);
            (id, member)
        })
        .collect();
    for adversary in &adversaries {
        points_messages.push(adversary.share_points());
    }
    maybe_reverse(&mut points_messages, reverse_delivery);

    // Phase 8 + 9.
    let mut points_accusation_messages = Vec::new();
    let honest: Vec<(MemberId, PointsJustifyingMember)> = honest
        .into_iter()
        .map(|(id, member)| {
            let (member, accusations) = member.verify_points(&points_messages);
            points_accusation_messages.push(accusations);
            (id, member)
        })
        .collect();
    for adversary in &adversaries {
        points_accusation_messages.push(adversary.points_accusations());
    }
    maybe_reverse(&mut points_accusation_messages, reverse_delivery);

    for (id, member) in honest {
        let result = member
            .resolve_accusations(&points_accusation_messages)
            .map(|member| member.finalize());
        results.insert(id, result);
    }

    results
}

fn unwrap_outputs(
    results: &BTreeMap<MemberId, Result<DkgOutput, DkgError>>,
) -> Vec<&DkgOutput> {
    results
        .values()
        .map(|result| result.as_ref().expect("member should complete the DKG"))
        .collect()
}

/// Assert the outcome every honest member must agree on: one group key,
/// one qualified set, and a private-key share consistent with the
/// published share points.
fn assert_group_consistency(outputs: &[&DkgOutput], expected_qualified: &[MemberId]) {
    let reference = outputs[0];
    for output in outputs {
        assert_eq!(output.qualified, expected_qualified);
        assert_eq!(output.group_public_key, reference.group_public_key);
    }

    // The group key is the product of the qualified constant-term points.
    let mut group_key = G2Projective::identity();
    for points in reference.public_key_share_points.values() {
        group_key += G2Projective::from(decompress_g2(&points[0]).unwrap());
    }
    assert_eq!(
        compress_g2(&group_key.to_affine()),
        reference.group_public_key
    );

    // Each member's share lifts to the product of the qualified share
    // point polynomials evaluated at its identifier.
    for output in outputs {
        let share = scalar_from_bytes(&output.group_private_key_share).unwrap();
        let expected = G2Projective::generator() * share;

        let x = Scalar::from(output.member_id as u64);
        let mut combined = G2Projective::identity();
        for points in output.public_key_share_points.values() {
            let mut x_power = Scalar::ONE;
            for point in points {
                combined += G2Projective::from(decompress_g2(point).unwrap()) * x_power;
                x_power *= x;
            }
        }
        assert_eq!(combined, expected);
    }
}

/// Assert that interpolating `count` of the produced shares at zero
/// recovers a scalar lifting to the group public key.
fn assert_shares_reconstruct(outputs: &[&DkgOutput], count: usize) {
    let shares: Vec<(MemberId, Scalar)> = outputs
        .iter()
        .take(count)
        .map(|output| {
            (
                output.member_id,
                scalar_from_bytes(&output.group_private_key_share).unwrap(),
            )
        })
        .collect();

    let secret = poly::interpolate_at_zero(&shares).unwrap();
    assert_eq!(
        compress_g2(&(G2Projective::generator() * secret).to_affine()),
        outputs[0].group_public_key
    );
}

// ---------------------------------------------------------------------
// End-to-end scenarios
// ---------------------------------------------------------------------

#[test]
fn test_all_honest_run() {
    let results = run_scenario(5, 2, vec![], false);
    let outputs = unwrap_outputs(&results);

    assert_eq!(outputs.len(), 5);
    assert_group_consistency(&outputs, &[1, 2, 3, 4, 5]);
    assert_shares_reconstruct(&outputs, 3);
}

#[test]
fn test_one_malformed_share_disqualifies_sender() {
    // Member 3 encrypts a random blob instead of member 2's S share.
    let misbehavior = Misbehavior {
        corrupt_shares_for: vec![2],
        ..Default::default()
    };
    let results = run_scenario(5, 2, vec![(3, misbehavior)], false);
    let outputs = unwrap_outputs(&results);

    assert_eq!(outputs.len(), 4);
    assert_group_consistency(&outputs, &[1, 2, 4, 5]);
    assert_shares_reconstruct(&outputs, 3);
}

#[test]
fn test_undecryptable_share_entry_disqualifies_sender_for_everyone() {
    // Member 3 sends valid shares to everyone except member 2, whose
    // entry fails AEAD decryption. Only member 2 can observe the failure,
    // so it must travel as an accusation; every honest member still ends
    // with the same qualified set and group key.
    let misbehavior = Misbehavior {
        garbage_ciphertext_for: vec![2],
        ..Default::default()
    };
    let results = run_scenario(5, 2, vec![(3, misbehavior)], false);
    let outputs = unwrap_outputs(&results);

    assert_eq!(outputs.len(), 4);
    assert_group_consistency(&outputs, &[1, 2, 4, 5]);
    assert_shares_reconstruct(&outputs, 3);
}

#[test]
fn test_false_accusation_disqualifies_accuser() {
    // Member 2 accuses member 3 despite valid shares.
    let misbehavior = Misbehavior {
        falsely_accuse: vec![3],
        ..Default::default()
    };
    let results = run_scenario(5, 2, vec![(2, misbehavior)], false);
    let outputs = unwrap_outputs(&results);

    assert_eq!(outputs.len(), 4);
    assert_group_consistency(&outputs, &[1, 3, 4, 5]);
    assert_shares_reconstruct(&outputs, 3);
}

#[test]
fn test_corrupted_share_point_disqualifies_sender() {
    // Member 4 is honest through phase 6, then doubles A_42 in phase 7.
    let misbehavior = Misbehavior {
        corrupt_point_index: Some(2),
        ..Default::default()
    };
    let results = run_scenario(5, 2, vec![(4, misbehavior)], false);
    let outputs = unwrap_outputs(&results);

    assert_eq!(outputs.len(), 4);
    // Member 4's shares were combined in phase 6 and must be backed out
    // again when phase 8 eliminates it; consistency checks both.
    assert_group_consistency(&outputs, &[1, 2, 3, 5]);
    assert_shares_reconstruct(&outputs, 3);
}

#[test]
fn test_collapse_to_exact_threshold_completes() {
    // Members 4 and 5 send malformed shares to everyone; |Q| = T + 1.
    let corrupt_for_all = |id: MemberId| Misbehavior {
        corrupt_shares_for: (1..=5).filter(|peer| *peer != id).collect(),
        ..Default::default()
    };
    let results = run_scenario(
        5,
        2,
        vec![(4, corrupt_for_all(4)), (5, corrupt_for_all(5))],
        false,
    );
    let outputs = unwrap_outputs(&results);

    assert_eq!(outputs.len(), 3);
    assert_group_consistency(&outputs, &[1, 2, 3]);
    assert_shares_reconstruct(&outputs, 3);
}

#[test]
fn test_below_threshold_aborts() {
    // Members 3, 4 and 5 all send malformed shares; |Q| = T.
    let corrupt_for_all = |id: MemberId| Misbehavior {
        corrupt_shares_for: (1..=5).filter(|peer| *peer != id).collect(),
        ..Default::default()
    };
    let results = run_scenario(
        5,
        2,
        vec![
            (3, corrupt_for_all(3)),
            (4, corrupt_for_all(4)),
            (5, corrupt_for_all(5)),
        ],
        false,
    );

    assert_eq!(results.len(), 2);
    for result in results.values() {
        match result {
            Err(DkgError::InsufficientQualifiedMembers { qualified }) => {
                assert_eq!(qualified, &vec![1, 2]);
            }
            other => panic!("expected insufficient-members abort, got {other:?}"),
        }
    }
}

#[test]
fn test_accusation_against_nonmember_is_noop() {
    let misbehavior = Misbehavior {
        accuse_nonmember: Some(99),
        ..Default::default()
    };
    let results = run_scenario(5, 2, vec![(2, misbehavior)], false);
    let outputs = unwrap_outputs(&results);

    // Nobody is eliminated, the accuser included.
    assert_eq!(outputs.len(), 4);
    assert_group_consistency(&outputs, &[1, 2, 3, 4, 5]);
}

#[test]
fn test_outcome_is_permutation_invariant() {
    let in_order = run_scenario(5, 2, vec![], false);
    let reversed = run_scenario(5, 2, vec![], true);

    for (id, result) in &in_order {
        let a = result.as_ref().unwrap();
        let b = reversed[id].as_ref().unwrap();
        assert_eq!(a.group_public_key, b.group_public_key);
        assert_eq!(a.group_private_key_share, b.group_private_key_share);
        assert_eq!(a.qualified, b.qualified);
    }
}

// ---------------------------------------------------------------------
// Async session driver
// ---------------------------------------------------------------------

fn operator_key(id: MemberId) -> Vec<u8> {
    format!("operator-{id}").into_bytes()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_async_session_over_in_process_network() {
    use beacon_chain::SimulatedChain;
    use beacon_net::{BroadcastChannel, InProcessNetwork};
    use beacon_dkg::{execute_dkg, DkgConfig, GroupMember};
    use std::time::Duration;

    let group_size = 5u32;
    let signing = HashSigning;
    let members: Vec<GroupMember> = (1..=group_size)
        .map(|id| GroupMember {
            id,
            address: signing.public_key_to_address(&operator_key(id)),
        })
        .collect();
    let config = DkgConfig {
        dishonest_threshold: 2,
        phase_duration_blocks: 10,
    };

    let network = InProcessNetwork::new(256);
    let chain = SimulatedChain::new();

    // An outsider spams the channel; the authorization filter must shield
    // the session from it.
    let outsider = network.channel(b"outsider".to_vec());

    let mut sessions = Vec::new();
    for id in 1..=group_size {
        let mut channel = network.channel(operator_key(id));
        let chain = chain.clone();
        let members = members.clone();
        let config = config.clone();
        sessions.push(tokio::spawn(async move {
            let mut rng = ChaCha8Rng::seed_from_u64(0xd1c0 + id as u64);
            execute_dkg(
                &config,
                &members,
                id,
                1,
                &mut channel,
                &chain,
                HashSigning,
                &mut rng,
            )
            .await
        }));
    }

    outsider.send(b"not a protocol message".to_vec()).await.unwrap();
    let ticker = chain.auto_advance(Duration::from_millis(5));

    let mut outputs = Vec::new();
    for session in sessions {
        outputs.push(session.await.unwrap().unwrap());
    }
    ticker.abort();

    let output_refs: Vec<&DkgOutput> = outputs.iter().collect();
    assert_eq!(output_refs.len(), 5);
    assert_group_consistency(&output_refs, &[1, 2, 3, 4, 5]);
    assert_shares_reconstruct(&output_refs, 3);
}
