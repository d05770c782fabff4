use bitcoin::Transaction;
use serde::{Deserialize, Serialize};

use crate::errors::Error;
use crate::messages::{AcceptDlc, OfferDlc, SignDlc};
use crate::payout::CetSpec;
use crate::transactions::DlcTransactions;
use crate::ContractId;

/// Which side of the negotiation this engine plays for a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Created the offer; verifies the Accept and emits the Sign message.
    Offerer,
    /// Accepted the offer; verifies the Sign message and can broadcast
    /// the funding transaction.
    Acceptor,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Role::Offerer => f.write_str("offerer"),
            Role::Acceptor => f.write_str("acceptor"),
        }
    }
}

/// Where a contract stands in the negotiation. States only ever advance;
/// a failed operation leaves the contract where it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractState {
    /// Offer emitted, waiting for the counterparty (offerer side).
    Offered,
    /// Offer accepted and counterparty signatures emitted, waiting for
    /// the offerer's Sign message (acceptor side).
    Accepted,
    /// Counterparty signatures verified and own signatures emitted
    /// (offerer side). Settlement operations are available.
    Signed,
    /// Every signature verified and the funding transaction fully
    /// signed (acceptor side). Settlement operations are available.
    Broadcastable,
    /// Settled by a CET matching an oracle attestation.
    Executed,
    /// Settled by the time-locked refund transaction.
    Refunded,
    /// Settled cooperatively outside the CET set.
    Closed,
}

impl std::fmt::Display for ContractState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            ContractState::Offered => "Offered",
            ContractState::Accepted => "Accepted",
            ContractState::Signed => "Signed",
            ContractState::Broadcastable => "Broadcastable",
            ContractState::Executed => "Executed",
            ContractState::Refunded => "Refunded",
            ContractState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// The recorded result of executing a contract: which outcome the oracle
/// revealed and the settlement transaction it unlocked. Kept so repeated
/// `execute` calls with the same attestation return the same
/// transaction instead of re-deriving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// The attested outcome strings.
    pub outcomes: Vec<String>,
    /// The fully-signed settlement transaction.
    pub transaction: Transaction,
}

/// The aggregate root for one negotiation. Owned by the engine's
/// registry and only ever mutated through state-machine transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    /// The contract's immutable identity.
    pub id: ContractId,

    /// Which side this engine plays.
    pub role: Role,

    /// Current protocol state.
    pub state: ContractState,

    /// The offer that opened the negotiation.
    pub offer: OfferDlc,

    /// The Accept message, once known.
    pub accept: Option<AcceptDlc>,

    /// The Sign message, once known.
    pub sign: Option<SignDlc>,

    /// The pre-signed transaction family, built when the acceptor's
    /// inputs become known and immutable afterwards.
    pub transactions: Option<DlcTransactions>,

    /// The ordered payout groups; index-aligned with the CET list and
    /// with every adaptor signature batch.
    pub cet_specs: Vec<CetSpec>,

    /// The settlement, once the contract has executed.
    pub settlement: Option<Settlement>,
}

impl Contract {
    /// Guard a transition: the contract must currently be in one of
    /// `allowed`, described as `expected` in the error.
    pub(crate) fn require_state(
        &self,
        allowed: &[ContractState],
        expected: &'static str,
    ) -> Result<(), Error> {
        if !allowed.contains(&self.state) {
            return Err(Error::StateMismatch {
                contract_id: self.id,
                expected,
                found: self.state.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn require_role(&self, role: Role, expected: &'static str) -> Result<(), Error> {
        if self.role != role {
            return Err(Error::StateMismatch {
                contract_id: self.id,
                expected,
                found: format!("{} side", self.role),
            });
        }
        Ok(())
    }

    /// The transaction family, which must exist in any settlement state.
    pub(crate) fn transactions(&self) -> Result<&DlcTransactions, Error> {
        self.transactions.as_ref().ok_or(Error::StateMismatch {
            contract_id: self.id,
            expected: "a contract with built transactions",
            found: self.state.to_string(),
        })
    }
}
