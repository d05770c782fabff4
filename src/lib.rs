//! # dlcpact
//!
//! A negotiation and settlement engine for two-party Discreet Log
//! Contracts (DLCs) on Bitcoin.
//!
//! Two parties lock collateral into a jointly controlled funding output
//! and pre-sign a family of contract execution transactions (CETs), one
//! per possible oracle outcome group, using oracle-conditioned adaptor
//! signatures. Once the oracle attests to the real outcome, either party
//! can complete exactly one CET and settle on-chain. If the oracle never
//! attests, a time-locked refund transaction returns both collaterals.
//!
//! The crate owns the protocol: the [`engine::DlcEngine`] state machine
//! sequencing Offer → Accept → Sign → Finalize → Execute/Refund/Close,
//! the [`payout`] curve evaluation and digit-prefix CET compression, the
//! deterministic [`transactions`] family, the [`adaptor`] signature
//! lifecycle, and the [`messages`] wire codec. It does not manage keys,
//! track the chain, or broadcast transactions; those live behind the
//! narrow collaborator interfaces in [`adaptor`] and
//! [`engine::PartyWallet`].

mod errors;

pub mod adaptor;
pub mod coin_select;
pub mod consts;
pub mod engine;
pub mod messages;
pub mod oracle;
pub mod payout;
pub mod transactions;

pub use adaptor::{AdaptorSignature, AdaptorSigner, CompactEcdsaSignature, ZkpSigner};
pub use engine::{
    CloseTerms, CollateralTerms, Contract, ContractState, DlcEngine, PartyWallet, Role,
};
pub use errors::{Error, SignatureKind};
pub use messages::{AcceptDlc, ContractDescriptor, ContractInfo, OfferDlc, SignDlc};
pub use oracle::{
    EventDescriptor, OracleAnnouncement, OracleAttestation, OracleEvent, OracleInfo,
};
pub use payout::{CetSpec, OutcomeClaim, Payout, PayoutFunction, RoundingIntervals};
pub use transactions::{DlcTransactions, FeeTerms, FundingInput, PartyParams};

// Re-export dependencies whose types appear in our public API.
pub use bitcoin;
pub use secp;
pub use secp256k1_zkp;

use sha2::Digest as _;

/// Compute the SHA256 hash of some input data.
pub fn sha256(input: &[u8]) -> [u8; 32] {
    sha2::Sha256::new().chain_update(input).finalize().into()
}

/// Identifies one contract for its whole lifetime. Assigned randomly when
/// the offer is created and immutable thereafter; every engine operation
/// after the offer looks the contract up by this id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContractId([u8; 32]);

impl ContractId {
    /// Draw a fresh random contract id.
    pub fn random<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> Self {
        let mut id = [0u8; 32];
        rng.fill_bytes(&mut id);
        ContractId(id)
    }

    /// The raw id bytes.
    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }
}

impl From<[u8; 32]> for ContractId {
    fn from(bytes: [u8; 32]) -> Self {
        ContractId(bytes)
    }
}

impl std::fmt::Display for ContractId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for ContractId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "ContractId({})", self)
    }
}

impl std::str::FromStr for ContractId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut id = [0u8; 32];
        hex::decode_to_slice(s, &mut id)
            .map_err(|_| Error::validation("contract id", "expected 64 hex characters"))?;
        Ok(ContractId(id))
    }
}

impl serde::Serialize for ContractId {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        serdect::array::serialize_hex_lower_or_bin(&self.0, ser)
    }
}

impl<'de> serde::Deserialize<'de> for ContractId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut id = [0u8; 32];
        serdect::array::deserialize_hex_or_bin(&mut id, deserializer)?;
        Ok(ContractId(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_id_hex_round_trip() {
        let id = ContractId([7u8; 32]);
        let s = id.to_string();
        assert_eq!(s.len(), 64);
        assert_eq!(s.parse::<ContractId>().unwrap(), id);
        assert!("zz".parse::<ContractId>().is_err());
    }
}
