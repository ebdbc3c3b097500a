//! Distributed key generation for the threshold relay beacon.
//!
//! Implements the GJKR joint-Feldman protocol: a group of N members
//! jointly computes a group public key for which no single member knows
//! the private key. Each member instead holds a share of it, such that any
//! T+1 shares suffice to sign as the group while T or fewer reveal
//! nothing.
//!
//! The protocol runs in nine phases:
//!
//! 1. Every member generates an ephemeral key pair per peer and broadcasts
//!    the public halves.
//! 2. Every pair of members derives a shared symmetric key by ECDH.
//! 3. Every member samples two degree-T polynomials, broadcasts Pedersen
//!    commitments to the coefficient pairs and an encrypted share pair per
//!    peer.
//! 4. Every member decrypts its shares and verifies them against the
//!    commitments, collecting accusations against bad senders.
//! 5. Accusations are broadcast (with the relevant ephemeral private keys
//!    disclosed) and judged by the whole group; the loser of each
//!    accusation is eliminated.
//! 6. Every qualified member sums the received shares into its share of
//!    the group private key.
//! 7. Every qualified member broadcasts its public key share points.
//! 8. Share points are verified against the phase-3 shares; a second
//!    accusation round eliminates members that published bad points.
//! 9. The group public key is assembled from the qualified members'
//!    constant-term points.
//!
//! # Security
//!
//! - Requires an honest majority: T < N/2
//! - The run aborts only when fewer than T+1 members stay qualified
//! - Misbehavior is attributable: accusations are judged from disclosed
//!   ephemeral keys, so every honest member reaches the same verdict
//!
//! The per-phase state machine lives in [`member`] and is pure; the async
//! session driver in [`protocol`] connects it to a broadcast channel and a
//! block-height clock.

pub mod error;
pub mod group;
pub mod member;
pub mod messages;
pub mod poly;
pub mod protocol;

pub use error::DkgError;
pub use group::Group;
pub use member::{DkgOutput, EphemeralKeyGeneratingMember};
pub use messages::DkgMessage;
pub use protocol::{execute_dkg, group_member_filter, DkgConfig, GroupMember};
