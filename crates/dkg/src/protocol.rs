//! One member's end-to-end DKG session over the broadcast channel.
//!
//! The driver owns everything the pure phase state machine does not:
//! installing the group authorization filter, broadcasting the messages a
//! phase produces, collecting the messages the next phase consumes, and
//! synchronizing phase boundaries against the chain's block height. Each
//! exchange round ends when either every expected message arrived or the
//! round's deadline block was reached, whichever comes first.
//!
//! The session future is cancellable at every await point; dropping it
//! drops the member state, wiping per-session secrets.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rand::{CryptoRng, RngCore};
use tracing::{debug, info, warn};

use beacon_chain::{BlockCounter, Signing};
use beacon_net::{BroadcastChannel, BroadcastFilter};
use beacon_types::{Address, MemberId};

use crate::error::DkgError;
use crate::group::Group;
use crate::member::{DkgOutput, EphemeralKeyGeneratingMember};
use crate::messages::{DkgMessage, MessageKind};

/// Static parameters of one DKG session.
#[derive(Clone, Debug)]
pub struct DkgConfig {
    /// Maximum number of misbehaving members the session tolerates.
    pub dishonest_threshold: u32,
    /// Number of blocks each message exchange round may take.
    pub phase_duration_blocks: u64,
}

/// One registered member of the DKG group.
#[derive(Clone, Debug)]
pub struct GroupMember {
    pub id: MemberId,
    /// Operator address authorized to broadcast on this member's behalf.
    pub address: Address,
}

/// Build the broadcast authorization predicate admitting only messages
/// authored by registered group member addresses. Installed once, at
/// session start.
pub fn group_member_filter<S>(members: &[GroupMember], signing: S) -> BroadcastFilter
where
    S: Signing + 'static,
{
    let authorized: HashSet<Address> = members.iter().map(|member| member.address).collect();
    Arc::new(move |public_key: &[u8]| {
        let address = signing.public_key_to_address(public_key);
        let is_authorized = authorized.contains(&address);
        if !is_authorized {
            debug!(
                ?address,
                "rejecting message; author is not a member of the group"
            );
        }
        is_authorized
    })
}

/// Execute one member's DKG session.
///
/// Resolves with the member's [`DkgOutput`] on success, or with a session
/// failure when too few members stay qualified or the broadcast channel
/// dies. Per-sender problems never abort the session; they eliminate the
/// sender inside the state machine.
#[allow(clippy::too_many_arguments)]
pub async fn execute_dkg<C, B, S, R>(
    config: &DkgConfig,
    members: &[GroupMember],
    member_id: MemberId,
    start_block: u64,
    channel: &mut C,
    block_counter: &B,
    signing: S,
    rng: &mut R,
) -> Result<DkgOutput, DkgError>
where
    C: BroadcastChannel,
    B: BlockCounter,
    S: Signing + 'static,
    R: RngCore + CryptoRng,
{
    let ids: Vec<MemberId> = members.iter().map(|member| member.id).collect();
    let group = Group::new(config.dishonest_threshold, ids);

    channel.set_filter(group_member_filter(members, signing));

    info!(
        member_id,
        group_size = members.len(),
        dishonest_threshold = config.dishonest_threshold,
        start_block,
        "starting DKG session"
    );
    block_counter.wait_for_block(start_block).await;

    let mut inbox = Inbox::default();
    let round_deadline = |round: u64| start_block + round * config.phase_duration_blocks;

    // Phase 1: announce ephemeral public keys.
    let member = EphemeralKeyGeneratingMember::new(member_id, group);
    let (member, key_message) = member.generate_ephemeral_keys(rng);
    broadcast(channel, &DkgMessage::EphemeralPublicKey(key_message)).await?;

    // Phase 2: collect announcements and derive pairwise symmetric keys.
    let messages = exchange(
        channel,
        block_counter,
        &mut inbox,
        round_deadline(1),
        &[MessageKind::EphemeralPublicKey],
        &member.group().qualified_peers(member_id),
        member_id,
    )
    .await?;
    let mut key_messages = Vec::new();
    for message in messages {
        if let DkgMessage::EphemeralPublicKey(message) = message {
            key_messages.push(message);
        }
    }
    let member = member.derive_symmetric_keys(&key_messages);
    debug!(
        member_id,
        qualified = member.group().qualified_ids().len(),
        "derived symmetric keys"
    );

    // Phase 3: broadcast commitments and encrypted shares.
    let (member, commitments_message, shares_message) = member.commit_and_share(rng)?;
    broadcast(channel, &DkgMessage::MemberCommitments(commitments_message)).await?;
    broadcast(channel, &DkgMessage::PeerShares(shares_message)).await?;

    // Phase 4: collect both phase-3 broadcasts and verify our shares.
    let messages = exchange(
        channel,
        block_counter,
        &mut inbox,
        round_deadline(2),
        &[MessageKind::MemberCommitments, MessageKind::PeerShares],
        &member.group().qualified_peers(member_id),
        member_id,
    )
    .await?;
    let mut commitments_messages = Vec::new();
    let mut shares_messages = Vec::new();
    for message in messages {
        match message {
            DkgMessage::MemberCommitments(message) => commitments_messages.push(message),
            DkgMessage::PeerShares(message) => shares_messages.push(message),
            _ => {}
        }
    }
    let (member, accusations) = member.verify_shares(&commitments_messages, &shares_messages);
    if !accusations.accused_members_keys.is_empty() {
        warn!(
            member_id,
            accused = ?accusations.accused_members_keys.keys().collect::<Vec<_>>(),
            "raising share accusations"
        );
    }

    // Phase 5: broadcast accusations (empty or not) and resolve them all.
    let own_accusations = accusations.clone();
    broadcast(channel, &DkgMessage::SecretSharesAccusations(accusations)).await?;
    let messages = exchange(
        channel,
        block_counter,
        &mut inbox,
        round_deadline(3),
        &[MessageKind::SecretSharesAccusations],
        &member.group().qualified_peers(member_id),
        member_id,
    )
    .await?;
    let mut accusation_messages = vec![own_accusations];
    for message in messages {
        if let DkgMessage::SecretSharesAccusations(message) = message {
            accusation_messages.push(message);
        }
    }
    let member = member.resolve_accusations(&accusation_messages)?;
    debug!(
        member_id,
        qualified = member.group().qualified_ids().len(),
        "share accusations resolved"
    );

    // Phase 6 + 7: combine shares, publish public key share points.
    let member = member.combine_shares();
    let (member, points_message) = member.calculate_public_key_share_points();
    broadcast(
        channel,
        &DkgMessage::MemberPublicKeySharePoints(points_message),
    )
    .await?;

    // Phase 8: collect and verify share points.
    let messages = exchange(
        channel,
        block_counter,
        &mut inbox,
        round_deadline(4),
        &[MessageKind::MemberPublicKeySharePoints],
        &member.group().qualified_peers(member_id),
        member_id,
    )
    .await?;
    let mut points_messages = Vec::new();
    for message in messages {
        if let DkgMessage::MemberPublicKeySharePoints(message) = message {
            points_messages.push(message);
        }
    }
    let (member, points_accusations) = member.verify_points(&points_messages);
    if !points_accusations.accused_members_keys.is_empty() {
        warn!(
            member_id,
            accused = ?points_accusations.accused_members_keys.keys().collect::<Vec<_>>(),
            "raising share point accusations"
        );
    }

    let own_points_accusations = points_accusations.clone();
    broadcast(channel, &DkgMessage::PointsAccusations(points_accusations)).await?;
    let messages = exchange(
        channel,
        block_counter,
        &mut inbox,
        round_deadline(5),
        &[MessageKind::PointsAccusations],
        &member.group().qualified_peers(member_id),
        member_id,
    )
    .await?;
    let mut points_accusation_messages = vec![own_points_accusations];
    for message in messages {
        if let DkgMessage::PointsAccusations(message) = message {
            points_accusation_messages.push(message);
        }
    }
    let member = member.resolve_accusations(&points_accusation_messages)?;

    // Phase 9: final assembly.
    let output = member.finalize();
    info!(
        member_id,
        qualified = ?output.qualified,
        "DKG session completed"
    );
    Ok(output)
}

async fn broadcast<C: BroadcastChannel>(
    channel: &mut C,
    message: &DkgMessage,
) -> Result<(), DkgError> {
    let payload = borsh::to_vec(message)
        .map_err(|e| beacon_net::NetError::SendFailed(e.to_string()))?;
    channel.send(payload).await?;
    Ok(())
}

/// Collect one round of broadcast messages.
///
/// Returns once every expected (kind, sender) pair arrived or the deadline
/// block was reached. Whatever arrived by then is handed to the phase;
/// missing messages surface there as sender eliminations.
async fn exchange<C: BroadcastChannel, B: BlockCounter>(
    channel: &mut C,
    block_counter: &B,
    inbox: &mut Inbox,
    deadline_block: u64,
    kinds: &[MessageKind],
    expected_senders: &[MemberId],
    me: MemberId,
) -> Result<Vec<DkgMessage>, DkgError> {
    let current_phase = kinds.iter().map(|kind| kind.phase()).min().unwrap_or(1);

    let deadline = block_counter.wait_for_block(deadline_block);
    tokio::pin!(deadline);

    while !inbox.has_all(kinds, expected_senders) {
        tokio::select! {
            _ = &mut deadline => {
                debug!(deadline_block, "round deadline reached");
                break;
            }
            envelope = channel.recv() => {
                let envelope = envelope?;
                match borsh::from_slice::<DkgMessage>(&envelope.payload) {
                    Ok(message) => inbox.accept(message, current_phase, me),
                    Err(error) => debug!(%error, "dropping undecodable broadcast payload"),
                }
            }
        }
    }

    Ok(inbox.take(kinds))
}

/// Buffer for broadcast messages, with lookahead for future phases.
///
/// Messages for phases already passed are discarded; messages for later
/// phases wait here until their round collects them. The first message per
/// (kind, sender) pair wins, duplicates are dropped.
#[derive(Default)]
struct Inbox {
    messages: BTreeMap<(MessageKind, MemberId), DkgMessage>,
}

impl Inbox {
    fn accept(&mut self, message: DkgMessage, current_phase: u8, me: MemberId) {
        let sender = message.sender();
        if sender == me {
            return;
        }
        if message.phase() < current_phase {
            debug!(sender, phase = message.phase(), "discarding stale message");
            return;
        }
        self.messages.entry((message.kind(), sender)).or_insert(message);
    }

    fn has_all(&self, kinds: &[MessageKind], senders: &[MemberId]) -> bool {
        kinds.iter().all(|kind| {
            senders
                .iter()
                .all(|sender| self.messages.contains_key(&(*kind, *sender)))
        })
    }

    fn take(&mut self, kinds: &[MessageKind]) -> Vec<DkgMessage> {
        let keys: Vec<(MessageKind, MemberId)> = self
            .messages
            .keys()
            .filter(|(kind, _)| kinds.contains(kind))
            .copied()
            .collect();
        let mut collected = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(message) = self.messages.remove(&key) {
                collected.push(message);
            }
        }
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::EphemeralPublicKeyMessage;

    fn key_message(sender: MemberId) -> DkgMessage {
        DkgMessage::EphemeralPublicKey(EphemeralPublicKeyMessage {
            sender,
            ephemeral_public_keys: BTreeMap::new(),
        })
    }

    #[test]
    fn test_inbox_ignores_own_messages() {
        let mut inbox = Inbox::default();
        inbox.accept(key_message(1), 1, 1);
        assert!(inbox.take(&[MessageKind::EphemeralPublicKey]).is_empty());
    }

    #[test]
    fn test_inbox_discards_stale_phases() {
        let mut inbox = Inbox::default();
        inbox.accept(key_message(2), 3, 1);
        assert!(inbox.take(&[MessageKind::EphemeralPublicKey]).is_empty());
    }

    #[test]
    fn test_inbox_buffers_future_phases() {
        let mut inbox = Inbox::default();
        inbox.accept(key_message(2), 1, 1);
        assert!(inbox.has_all(&[MessageKind::EphemeralPublicKey], &[2]));
        assert!(!inbox.has_all(&[MessageKind::EphemeralPublicKey], &[2, 3]));

        let collected = inbox.take(&[MessageKind::EphemeralPublicKey]);
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].sender(), 2);
    }

    #[test]
    fn test_inbox_keeps_first_message_per_sender() {
        let mut inbox = Inbox::default();

        let mut first = EphemeralPublicKeyMessage {
            sender: 2,
            ephemeral_public_keys: BTreeMap::new(),
        };
        first
            .ephemeral_public_keys
            .insert(1, beacon_types::G1Point([1u8; 48]));

        inbox.accept(DkgMessage::EphemeralPublicKey(first.clone()), 1, 1);
        inbox.accept(key_message(2), 1, 1);

        let collected = inbox.take(&[MessageKind::EphemeralPublicKey]);
        assert_eq!(collected, vec![DkgMessage::EphemeralPublicKey(first)]);
    }
}
