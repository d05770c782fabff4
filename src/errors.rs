use bitcoin::Amount;

use crate::ContractId;

/// Identifies which signature failed verification, so that blame can be
/// assigned to a specific CET, funding input, or companion transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    /// The adaptor signature covering the CET at this index.
    CetAdaptor { cet_index: usize },
    /// The plain signature on the refund transaction.
    Refund,
    /// The witness on the funding input at this index.
    FundingInput { input_index: usize },
    /// The signature on a cooperative close transaction.
    Close,
}

impl std::fmt::Display for SignatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SignatureKind::CetAdaptor { cet_index } => write!(f, "CET {} adaptor", cet_index),
            SignatureKind::Refund => f.write_str("refund"),
            SignatureKind::FundingInput { input_index } => {
                write!(f, "funding input {}", input_index)
            }
            SignatureKind::Close => f.write_str("close"),
        }
    }
}

/// The crate-wide error type. Every variant is terminal for the operation
/// which produced it: the contract is left in its last good state and the
/// caller decides whether to restart the negotiation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A message or parameter failed validation before any state changed.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// The field or parameter that was rejected.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Coin selection ran out of candidate UTXOs before covering the
    /// party's collateral plus fees.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds {
        /// Total value of the available (or fixed) inputs.
        have: Amount,
        /// Collateral plus fees the inputs must cover.
        need: Amount,
    },

    /// An operation was invoked out of order, or against a contract id
    /// the engine does not know.
    #[error("contract {contract_id} is {found}, operation requires {expected}")]
    StateMismatch {
        /// The contract the operation targeted.
        contract_id: ContractId,
        /// State(s) the operation requires.
        expected: &'static str,
        /// State the contract was actually in, or "unknown".
        found: String,
    },

    /// An adaptor or plain signature failed verification.
    #[error("signature verification failed for {kind} of contract {contract_id}")]
    SignatureVerification {
        /// The contract the signature belongs to.
        contract_id: ContractId,
        /// Which signature failed.
        kind: SignatureKind,
    },

    /// An oracle attestation does not correspond to any payout group of
    /// the contract, or contradicts an earlier settlement.
    #[error("attestation outcome \"{outcome}\" matches no payout group of contract {contract_id}")]
    OutcomeMismatch {
        /// The contract being settled.
        contract_id: ContractId,
        /// The outcome the attestation revealed.
        outcome: String,
    },

    /// Wire bytes could not be decoded into a message.
    #[error("malformed message at byte {offset}: expected {context}")]
    Serialization {
        /// Offset into the input where decoding failed.
        offset: usize,
        /// What the decoder was trying to read.
        context: &'static str,
    },
}

impl Error {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Validation {
            field,
            reason: reason.into(),
        }
    }
}

impl From<secp::errors::InvalidPointBytes> for Error {
    fn from(_: secp::errors::InvalidPointBytes) -> Self {
        Error::validation("public key", "invalid point encoding")
    }
}

impl From<secp::errors::InvalidScalarBytes> for Error {
    fn from(_: secp::errors::InvalidScalarBytes) -> Self {
        Error::validation("secret key", "invalid scalar encoding")
    }
}
