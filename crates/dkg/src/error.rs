//! Error types for the DKG protocol.

use thiserror::Error;

use beacon_crypto::CryptoError;
use beacon_net::NetError;
use beacon_types::MemberId;

/// Errors that abort a DKG session.
///
/// Per-message validation failures never surface here; they are scoped to
/// the offending sender and converted into protocol-level eliminations.
/// Only session-level failures reach the caller.
#[derive(Debug, Error)]
pub enum DkgError {
    #[error("crypto operation failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("broadcast channel failed: {0}")]
    Network(#[from] NetError),

    #[error("too few qualified members to continue: {qualified:?}")]
    InsufficientQualifiedMembers { qualified: Vec<MemberId> },
}
