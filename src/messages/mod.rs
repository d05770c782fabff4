//! The negotiation messages — Offer, Accept, Sign — and their binary
//! TLV codec.
//!
//! Each message serializes as a `u16` type tag followed by its fields in
//! declaration order, with network byte order integers and bigsize
//! length prefixes. `deserialize(serialize(msg)) == msg` holds for every
//! message, including nested contract, oracle, and funding-input
//! structures.

pub(crate) mod wire;

use bitcoin::hashes::Hash as _;
use bitcoin::{Amount, FeeRate, OutPoint, ScriptBuf, Txid};
use secp::Point;
use serde::{Deserialize, Serialize};

use crate::adaptor::{AdaptorSignature, CompactEcdsaSignature};
use crate::errors::Error;
use crate::oracle::{read_oracle_info, write_oracle_info, EventDescriptor, OracleInfo};
use crate::payout::{
    numeric_cet_specs, CetSpec, OutcomeClaim, Payout, PayoutFunction, PayoutFunctionPiece,
    PayoutPoint, RoundingInterval, RoundingIntervals,
};
use crate::transactions::{FeeTerms, FundingInput, PartyParams};
use crate::ContractId;
use wire::{type_ids, Reader, Writer};

/// One outcome of an enumerated contract and what it pays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumeratedPayout {
    /// The outcome label the oracle would attest.
    pub outcome: String,
    /// The settlement split under this outcome.
    pub payout: Payout,
}

/// What the contract pays under each possible outcome. The variant must
/// agree with the oracle's announced event descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractDescriptor {
    /// One payout per enumerated outcome label.
    Enumerated {
        /// Payout table, one entry per announced outcome.
        outcome_payouts: Vec<EnumeratedPayout>,
    },

    /// A payout curve over a numeric outcome domain, rounded and then
    /// compressed into digit-prefix groups.
    NumericDecomposition {
        /// Number of digits the oracle signs; fixes the domain together
        /// with the announced base.
        nb_digits: u16,
        /// The offerer's payout as a function of the outcome.
        payout_function: PayoutFunction,
        /// Rounding applied before grouping outcomes into CETs.
        rounding_intervals: RoundingIntervals,
    },
}

/// The contract terms both parties must agree on: the collateral at
/// stake, the payout rule, and the oracle(s) deciding the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInfo {
    /// Combined collateral of both parties.
    pub total_collateral: Amount,

    /// The payout rule.
    pub descriptor: ContractDescriptor,

    /// The oracle terms.
    pub oracle_info: OracleInfo,
}

impl ContractInfo {
    /// Validate internal consistency and agreement between the payout
    /// descriptor and the announced event.
    pub fn validate(&self) -> Result<(), Error> {
        if self.total_collateral < crate::consts::DUST_LIMIT {
            return Err(Error::validation(
                "contract info",
                "total collateral below dust",
            ));
        }
        self.oracle_info.validate()?;

        let event_descriptor = &self.oracle_info.primary().event.descriptor;
        match (&self.descriptor, event_descriptor) {
            (
                ContractDescriptor::Enumerated { outcome_payouts },
                EventDescriptor::Enumerated { outcomes },
            ) => {
                if outcome_payouts.len() != outcomes.len() {
                    return Err(Error::validation(
                        "contract descriptor",
                        format!(
                            "{} payouts for {} announced outcomes",
                            outcome_payouts.len(),
                            outcomes.len()
                        ),
                    ));
                }
                for outcome in outcomes {
                    let hits = outcome_payouts
                        .iter()
                        .filter(|entry| &entry.outcome == outcome)
                        .count();
                    if hits != 1 {
                        return Err(Error::validation(
                            "contract descriptor",
                            format!("outcome \"{}\" has {} payout entries", outcome, hits),
                        ));
                    }
                }
                for entry in outcome_payouts {
                    if entry.payout.total() != self.total_collateral {
                        return Err(Error::validation(
                            "contract descriptor",
                            format!("outcome \"{}\" does not conserve collateral", entry.outcome),
                        ));
                    }
                }
            }
            (
                ContractDescriptor::NumericDecomposition {
                    nb_digits,
                    rounding_intervals,
                    ..
                },
                EventDescriptor::DigitDecomposition {
                    nb_digits: announced_digits,
                    ..
                },
            ) => {
                if nb_digits != announced_digits {
                    return Err(Error::validation(
                        "contract descriptor",
                        format!(
                            "descriptor covers {} digits, oracle signs {}",
                            nb_digits, announced_digits
                        ),
                    ));
                }
                rounding_intervals.validate()?;
            }
            _ => {
                return Err(Error::validation(
                    "contract descriptor",
                    "descriptor kind does not match the announced event",
                ));
            }
        }
        Ok(())
    }

    /// Expand the descriptor into the ordered CET list. Enumerated
    /// contracts follow the announced outcome order; numeric contracts
    /// follow payout-range order then grouping order.
    pub fn cet_specs(&self) -> Result<Vec<CetSpec>, Error> {
        match &self.descriptor {
            ContractDescriptor::Enumerated { outcome_payouts } => {
                let announced = match &self.oracle_info.primary().event.descriptor {
                    EventDescriptor::Enumerated { outcomes } => outcomes,
                    EventDescriptor::DigitDecomposition { .. } => {
                        return Err(Error::validation(
                            "contract descriptor",
                            "enumerated descriptor against a numeric event",
                        ));
                    }
                };
                announced
                    .iter()
                    .map(|outcome| {
                        let entry = outcome_payouts
                            .iter()
                            .find(|entry| &entry.outcome == outcome)
                            .ok_or_else(|| {
                                Error::validation(
                                    "contract descriptor",
                                    format!("no payout for outcome \"{}\"", outcome),
                                )
                            })?;
                        Ok(CetSpec {
                            payout: entry.payout,
                            claim: OutcomeClaim::Enumerated(outcome.clone()),
                        })
                    })
                    .collect()
            }
            ContractDescriptor::NumericDecomposition {
                nb_digits,
                payout_function,
                rounding_intervals,
            } => {
                let base = match &self.oracle_info.primary().event.descriptor {
                    EventDescriptor::DigitDecomposition { base, .. } => *base,
                    EventDescriptor::Enumerated { .. } => {
                        return Err(Error::validation(
                            "contract descriptor",
                            "numeric descriptor against an enumerated event",
                        ));
                    }
                };
                numeric_cet_specs(
                    payout_function,
                    self.total_collateral,
                    rounding_intervals,
                    base,
                    *nb_digits,
                )
            }
        }
    }
}

/// The message opening a negotiation: the offerer's terms, funding, and
/// identity. Carries the contract id used for the rest of the contract's
/// life.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferDlc {
    /// Contract id assigned by the offerer, immutable from here on.
    pub contract_id: ContractId,

    /// The contract terms.
    pub contract_info: ContractInfo,

    /// Key the offerer signs the funding multisig with.
    pub funding_pubkey: Point,

    /// Where the offerer's settlement payouts go.
    pub payout_script_pubkey: ScriptBuf,

    /// Collateral the offerer locks up; the acceptor covers the rest of
    /// the total.
    pub offer_collateral: Amount,

    /// The offerer's funding inputs.
    pub funding_inputs: Vec<FundingInput>,

    /// Where the offerer's fund-transaction change goes.
    pub change_script_pubkey: ScriptBuf,

    /// Fee rate both parties use for every pre-signed transaction.
    pub fee_rate: FeeRate,

    /// `nLockTime` for every CET.
    pub cet_locktime: u32,

    /// `nLockTime` for the refund transaction.
    pub refund_locktime: u32,
}

impl OfferDlc {
    pub fn validate(&self) -> Result<(), Error> {
        self.contract_info.validate()?;
        self.fee_terms().validate()?;
        if self.offer_collateral > self.contract_info.total_collateral {
            return Err(Error::validation(
                "offer",
                "offer collateral exceeds total collateral",
            ));
        }
        if self.funding_inputs.is_empty() {
            return Err(Error::validation("offer", "no funding inputs"));
        }
        Ok(())
    }

    /// The acceptor's share of the collateral.
    pub fn accept_collateral(&self) -> Amount {
        self.contract_info.total_collateral - self.offer_collateral
    }

    pub fn fee_terms(&self) -> FeeTerms {
        FeeTerms {
            fee_rate: self.fee_rate,
            cet_locktime: self.cet_locktime,
            refund_locktime: self.refund_locktime,
        }
    }

    pub(crate) fn party_params(&self) -> PartyParams {
        PartyParams {
            fund_pubkey: self.funding_pubkey,
            change_script_pubkey: self.change_script_pubkey.clone(),
            payout_script_pubkey: self.payout_script_pubkey.clone(),
            collateral: self.offer_collateral,
            inputs: self.funding_inputs.clone(),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u16(type_ids::OFFER_DLC);
        w.write_bytes(&self.contract_id.to_bytes());
        write_contract_info(&mut w, &self.contract_info);
        w.write_point(self.funding_pubkey);
        w.write_var_bytes(self.payout_script_pubkey.as_bytes());
        w.write_u64(self.offer_collateral.to_sat());
        write_funding_inputs(&mut w, &self.funding_inputs);
        w.write_var_bytes(self.change_script_pubkey.as_bytes());
        w.write_u64(self.fee_rate.to_sat_per_vb_floor());
        w.write_u32(self.cet_locktime);
        w.write_u32(self.refund_locktime);
        w.into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(bytes);
        r.expect_type(type_ids::OFFER_DLC, "offer message type")?;
        let offer = OfferDlc {
            contract_id: ContractId::from(r.read_array::<32>("contract id")?),
            contract_info: read_contract_info(&mut r)?,
            funding_pubkey: r.read_point("offer funding pubkey")?,
            payout_script_pubkey: ScriptBuf::from_bytes(r.read_var_bytes("payout script")?),
            offer_collateral: Amount::from_sat(r.read_u64("offer collateral")?),
            funding_inputs: read_funding_inputs(&mut r)?,
            change_script_pubkey: ScriptBuf::from_bytes(r.read_var_bytes("change script")?),
            fee_rate: read_fee_rate(&mut r)?,
            cet_locktime: r.read_u32("cet locktime")?,
            refund_locktime: r.read_u32("refund locktime")?,
        };
        r.finish("end of offer message")?;
        Ok(offer)
    }
}

/// The counterparty's response: its funding, its adaptor signatures over
/// every CET, and its refund signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptDlc {
    /// Echoes the offer's contract id.
    pub contract_id: ContractId,

    /// Collateral the acceptor locks up.
    pub accept_collateral: Amount,

    /// Key the acceptor signs the funding multisig with.
    pub funding_pubkey: Point,

    /// Where the acceptor's settlement payouts go.
    pub payout_script_pubkey: ScriptBuf,

    /// The acceptor's funding inputs.
    pub funding_inputs: Vec<FundingInput>,

    /// Where the acceptor's fund-transaction change goes.
    pub change_script_pubkey: ScriptBuf,

    /// One adaptor signature per CET, in CET index order.
    pub cet_adaptor_signatures: Vec<AdaptorSignature>,

    /// The acceptor's signature on the refund transaction.
    pub refund_signature: CompactEcdsaSignature,
}

impl AcceptDlc {
    pub(crate) fn party_params(&self) -> PartyParams {
        PartyParams {
            fund_pubkey: self.funding_pubkey,
            change_script_pubkey: self.change_script_pubkey.clone(),
            payout_script_pubkey: self.payout_script_pubkey.clone(),
            collateral: self.accept_collateral,
            inputs: self.funding_inputs.clone(),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u16(type_ids::ACCEPT_DLC);
        w.write_bytes(&self.contract_id.to_bytes());
        w.write_u64(self.accept_collateral.to_sat());
        w.write_point(self.funding_pubkey);
        w.write_var_bytes(self.payout_script_pubkey.as_bytes());
        write_funding_inputs(&mut w, &self.funding_inputs);
        w.write_var_bytes(self.change_script_pubkey.as_bytes());
        write_adaptor_signatures(&mut w, &self.cet_adaptor_signatures);
        w.write_bytes(&self.refund_signature.0);
        w.into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(bytes);
        r.expect_type(type_ids::ACCEPT_DLC, "accept message type")?;
        let accept = AcceptDlc {
            contract_id: ContractId::from(r.read_array::<32>("contract id")?),
            accept_collateral: Amount::from_sat(r.read_u64("accept collateral")?),
            funding_pubkey: r.read_point("accept funding pubkey")?,
            payout_script_pubkey: ScriptBuf::from_bytes(r.read_var_bytes("payout script")?),
            funding_inputs: read_funding_inputs(&mut r)?,
            change_script_pubkey: ScriptBuf::from_bytes(r.read_var_bytes("change script")?),
            cet_adaptor_signatures: read_adaptor_signatures(&mut r)?,
            refund_signature: CompactEcdsaSignature(r.read_array("refund signature")?),
        };
        r.finish("end of accept message")?;
        Ok(accept)
    }
}

/// The offerer's closing message: its own adaptor and refund signatures,
/// plus witnesses for its funding inputs so the acceptor can assemble
/// the fully-signed funding transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignDlc {
    /// Echoes the contract id.
    pub contract_id: ContractId,

    /// One adaptor signature per CET, in CET index order.
    pub cet_adaptor_signatures: Vec<AdaptorSignature>,

    /// The offerer's signature on the refund transaction.
    pub refund_signature: CompactEcdsaSignature,

    /// Witness stacks for the offerer's funding inputs, aligned with the
    /// offer message's funding input order.
    pub funding_signatures: Vec<Vec<Vec<u8>>>,
}

impl SignDlc {
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u16(type_ids::SIGN_DLC);
        w.write_bytes(&self.contract_id.to_bytes());
        write_adaptor_signatures(&mut w, &self.cet_adaptor_signatures);
        w.write_bytes(&self.refund_signature.0);
        w.write_bigsize(self.funding_signatures.len() as u64);
        for witness in &self.funding_signatures {
            w.write_bigsize(witness.len() as u64);
            for element in witness {
                w.write_var_bytes(element);
            }
        }
        w.into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(bytes);
        r.expect_type(type_ids::SIGN_DLC, "sign message type")?;
        let contract_id = ContractId::from(r.read_array::<32>("contract id")?);
        let cet_adaptor_signatures = read_adaptor_signatures(&mut r)?;
        let refund_signature = CompactEcdsaSignature(r.read_array("refund signature")?);
        let witness_count = r.read_count("funding signature count")?;
        let mut funding_signatures = Vec::with_capacity(witness_count);
        for _ in 0..witness_count {
            let element_count = r.read_count("witness element count")?;
            let witness = (0..element_count)
                .map(|_| r.read_var_bytes("witness element"))
                .collect::<Result<_, _>>()?;
            funding_signatures.push(witness);
        }
        let sign = SignDlc {
            contract_id,
            cet_adaptor_signatures,
            refund_signature,
            funding_signatures,
        };
        r.finish("end of sign message")?;
        Ok(sign)
    }
}

fn read_fee_rate(r: &mut Reader) -> Result<FeeRate, Error> {
    let sat_per_vb = r.read_u64("fee rate")?;
    FeeRate::from_sat_per_vb(sat_per_vb).ok_or(Error::Serialization {
        offset: 0,
        context: "fee rate",
    })
}

fn write_contract_info(w: &mut Writer, info: &ContractInfo) {
    w.write_u64(info.total_collateral.to_sat());
    write_contract_descriptor(w, &info.descriptor);
    write_oracle_info(w, &info.oracle_info);
}

fn read_contract_info(r: &mut Reader) -> Result<ContractInfo, Error> {
    Ok(ContractInfo {
        total_collateral: Amount::from_sat(r.read_u64("total collateral")?),
        descriptor: read_contract_descriptor(r)?,
        oracle_info: read_oracle_info(r)?,
    })
}

fn write_contract_descriptor(w: &mut Writer, descriptor: &ContractDescriptor) {
    match descriptor {
        ContractDescriptor::Enumerated { outcome_payouts } => {
            w.write_u16(type_ids::CONTRACT_DESCRIPTOR_ENUM);
            w.write_bigsize(outcome_payouts.len() as u64);
            for entry in outcome_payouts {
                w.write_string(&entry.outcome);
                w.write_u64(entry.payout.offer.to_sat());
                w.write_u64(entry.payout.accept.to_sat());
            }
        }
        ContractDescriptor::NumericDecomposition {
            nb_digits,
            payout_function,
            rounding_intervals,
        } => {
            w.write_u16(type_ids::CONTRACT_DESCRIPTOR_NUMERIC);
            w.write_u16(*nb_digits);
            w.write_bigsize(payout_function.pieces().len() as u64);
            for piece in payout_function.pieces() {
                w.write_u64(piece.left.event_outcome);
                w.write_u64(piece.left.outcome_payout);
                w.write_u64(piece.right.event_outcome);
                w.write_u64(piece.right.outcome_payout);
            }
            w.write_bigsize(rounding_intervals.intervals.len() as u64);
            for interval in &rounding_intervals.intervals {
                w.write_u64(interval.begin_interval);
                w.write_u64(interval.rounding_mod);
            }
        }
    }
}

fn read_contract_descriptor(r: &mut Reader) -> Result<ContractDescriptor, Error> {
    match r.peek_type("contract descriptor type")? {
        type_ids::CONTRACT_DESCRIPTOR_ENUM => {
            r.expect_type(type_ids::CONTRACT_DESCRIPTOR_ENUM, "contract descriptor type")?;
            let count = r.read_count("outcome payout count")?;
            let outcome_payouts = (0..count)
                .map(|_| {
                    Ok(EnumeratedPayout {
                        outcome: r.read_string("outcome label")?,
                        payout: Payout {
                            offer: Amount::from_sat(r.read_u64("offer payout")?),
                            accept: Amount::from_sat(r.read_u64("accept payout")?),
                        },
                    })
                })
                .collect::<Result<_, Error>>()?;
            Ok(ContractDescriptor::Enumerated { outcome_payouts })
        }
        type_ids::CONTRACT_DESCRIPTOR_NUMERIC => {
            r.expect_type(
                type_ids::CONTRACT_DESCRIPTOR_NUMERIC,
                "contract descriptor type",
            )?;
            let nb_digits = r.read_u16("descriptor digit count")?;
            let piece_count = r.read_count("payout piece count")?;
            let pieces = (0..piece_count)
                .map(|_| {
                    Ok(PayoutFunctionPiece {
                        left: PayoutPoint {
                            event_outcome: r.read_u64("piece left outcome")?,
                            outcome_payout: r.read_u64("piece left payout")?,
                        },
                        right: PayoutPoint {
                            event_outcome: r.read_u64("piece right outcome")?,
                            outcome_payout: r.read_u64("piece right payout")?,
                        },
                    })
                })
                .collect::<Result<Vec<_>, Error>>()?;
            let payout_function = PayoutFunction::new(pieces).map_err(|_| {
                Error::Serialization {
                    offset: 0,
                    context: "well-formed payout function",
                }
            })?;
            let interval_count = r.read_count("rounding interval count")?;
            let intervals = (0..interval_count)
                .map(|_| {
                    Ok(RoundingInterval {
                        begin_interval: r.read_u64("rounding begin")?,
                        rounding_mod: r.read_u64("rounding modulus")?,
                    })
                })
                .collect::<Result<_, Error>>()?;
            Ok(ContractDescriptor::NumericDecomposition {
                nb_digits,
                payout_function,
                rounding_intervals: RoundingIntervals { intervals },
            })
        }
        _ => Err(Error::Serialization {
            offset: 0,
            context: "contract descriptor type",
        }),
    }
}

fn write_funding_inputs(w: &mut Writer, inputs: &[FundingInput]) {
    w.write_bigsize(inputs.len() as u64);
    for input in inputs {
        w.write_u16(type_ids::FUNDING_INPUT);
        w.write_bytes(input.outpoint.txid.as_ref());
        w.write_u32(input.outpoint.vout);
        w.write_u64(input.value.to_sat());
        w.write_var_bytes(input.script_pubkey.as_bytes());
        w.write_var_bytes(input.redeem_script.as_bytes());
        w.write_u16(input.max_witness_len as u16);
    }
}

fn read_funding_inputs(r: &mut Reader) -> Result<Vec<FundingInput>, Error> {
    let count = r.read_count("funding input count")?;
    (0..count)
        .map(|_| {
            r.expect_type(type_ids::FUNDING_INPUT, "funding input type")?;
            let txid_bytes: [u8; 32] = r.read_array("funding input txid")?;
            Ok(FundingInput {
                outpoint: OutPoint {
                    txid: Txid::from_byte_array(txid_bytes),
                    vout: r.read_u32("funding input vout")?,
                },
                value: Amount::from_sat(r.read_u64("funding input value")?),
                script_pubkey: ScriptBuf::from_bytes(r.read_var_bytes("funding input script")?),
                redeem_script: ScriptBuf::from_bytes(r.read_var_bytes("redeem script")?),
                max_witness_len: r.read_u16("max witness length")? as usize,
            })
        })
        .collect()
}

fn write_adaptor_signatures(w: &mut Writer, signatures: &[AdaptorSignature]) {
    w.write_bigsize(signatures.len() as u64);
    for signature in signatures {
        w.write_bytes(&signature.0);
    }
}

fn read_adaptor_signatures(r: &mut Reader) -> Result<Vec<AdaptorSignature>, Error> {
    let count = r.read_count("adaptor signature count")?;
    (0..count)
        .map(|_| Ok(AdaptorSignature(r.read_array("adaptor signature")?)))
        .collect()
}
