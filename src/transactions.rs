//! Deterministic construction of the DLC transaction family: the funding
//! transaction, the ordered CET set, and the refund transaction.
//!
//! Both parties independently run this builder over the negotiated
//! parameters and must arrive at byte-identical unsigned transactions,
//! so every ordering here is canonical: funding inputs sort by outpoint,
//! change outputs sort by script then value, and CETs follow the payout
//! group order.

use bitcoin::{
    absolute::LockTime, script::PushBytesBuf, Amount, FeeRate, OutPoint, ScriptBuf, Transaction,
    TxIn, TxOut, Witness,
};
use secp::Point;
use serde::{Deserialize, Serialize};

use crate::consts::{
    weight_to_fee, CET_BASE_WEIGHT, DUST_LIMIT, FUND_TX_BASE_WEIGHT, P2WPKH_MAX_WITNESS_SIZE,
    SEQUENCE_ENFORCE_LOCKTIME, SEQUENCE_IGNORE_LOCKTIME, TX_INPUT_BASE_WEIGHT, TX_VERSION,
};
use crate::errors::Error;
use crate::payout::Payout;

/// A UTXO one party commits to the funding transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingInput {
    /// The outpoint being spent.
    pub outpoint: OutPoint,

    /// Value of the spent output.
    pub value: Amount,

    /// The spent output's locking script, needed for signature hashing
    /// and for the counterparty to audit ownership.
    pub script_pubkey: ScriptBuf,

    /// Redeem script for P2SH-wrapped segwit inputs, empty otherwise.
    pub redeem_script: ScriptBuf,

    /// Upper bound on this input's witness size, so fees can be computed
    /// before the input is signed.
    pub max_witness_len: usize,
}

impl FundingInput {
    /// The weight this input contributes to the fund transaction.
    pub fn weight(&self) -> usize {
        let script_sig_len = script_sig_for_redeem(&self.redeem_script).len();
        let witness_len = if self.max_witness_len == 0 {
            P2WPKH_MAX_WITNESS_SIZE
        } else {
            self.max_witness_len
        };
        TX_INPUT_BASE_WEIGHT + 4 * script_sig_len + witness_len
    }
}

/// The scriptSig for a P2SH-wrapped segwit input: a single push of the
/// redeem script. Native segwit inputs have an empty scriptSig.
pub(crate) fn script_sig_for_redeem(redeem_script: &ScriptBuf) -> ScriptBuf {
    if redeem_script.is_empty() {
        return ScriptBuf::new();
    }
    let push = PushBytesBuf::try_from(redeem_script.to_bytes())
        .expect("redeem scripts are far below the push limit");
    bitcoin::script::Builder::new()
        .push_slice(push)
        .into_script()
}

/// Shared fee terms both parties apply when pre-signing transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTerms {
    /// Fee rate in effect for the fund TX, CETs, and refund TX.
    pub fee_rate: FeeRate,

    /// `nLockTime` applied to every CET.
    pub cet_locktime: u32,

    /// `nLockTime` applied to the refund transaction. Must postdate the
    /// CET locktime, since the refund path only exists for oracles that
    /// never attest.
    pub refund_locktime: u32,
}

impl FeeTerms {
    pub fn validate(&self) -> Result<(), Error> {
        if self.fee_rate == FeeRate::ZERO {
            return Err(Error::validation("fee terms", "zero fee rate"));
        }
        if self.cet_locktime >= self.refund_locktime {
            return Err(Error::validation(
                "fee terms",
                format!(
                    "refund locktime {} does not postdate CET locktime {}",
                    self.refund_locktime, self.cet_locktime
                ),
            ));
        }
        Ok(())
    }

    pub(crate) fn sat_per_vb(&self) -> u64 {
        self.fee_rate.to_sat_per_vb_floor()
    }
}

/// One party's contribution to the transaction family: the common fields
/// of the Offer and Accept messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyParams {
    /// Key this party signs the funding multisig with.
    pub fund_pubkey: Point,

    /// Where this party's change from the fund transaction goes.
    pub change_script_pubkey: ScriptBuf,

    /// Where this party's CET and refund payouts go.
    pub payout_script_pubkey: ScriptBuf,

    /// Collateral this party locks up.
    pub collateral: Amount,

    /// The inputs this party funds with.
    pub inputs: Vec<FundingInput>,
}

impl PartyParams {
    /// Sum of this party's input values.
    pub fn input_amount(&self) -> Amount {
        self.inputs.iter().map(|input| input.value).sum()
    }

    /// This party's change output plus the fees it bears: its own inputs
    /// and change on the fund TX, and its payout output's share of each
    /// settlement transaction. The change value already accounts for both.
    pub fn change_output_and_fees(
        &self,
        fee_rate_sat_per_vb: u64,
    ) -> Result<(TxOut, Amount, Amount), Error> {
        let (fund_fee, settlement_fee) = party_fees(
            &self.inputs,
            fee_rate_sat_per_vb,
            self.change_script_pubkey.len(),
            self.payout_script_pubkey.len(),
        );

        let need = self.collateral + fund_fee + settlement_fee;
        let have = self.input_amount();
        let change_value = have
            .checked_sub(need)
            .ok_or(Error::InsufficientFunds { have, need })?;

        let change_output = TxOut {
            value: change_value,
            script_pubkey: self.change_script_pubkey.clone(),
        };
        Ok((change_output, fund_fee, settlement_fee))
    }
}

/// Fees one party bears, split into its fund-transaction share and its
/// settlement (CET or refund) share. Each party pays for its own inputs
/// and outputs plus half of each transaction's fixed weight, so the two
/// sides reconcile without negotiating.
fn party_fees(
    inputs: &[FundingInput],
    fee_rate_sat_per_vb: u64,
    change_spk_len: usize,
    payout_spk_len: usize,
) -> (Amount, Amount) {
    let inputs_weight: usize = inputs.iter().map(FundingInput::weight).sum();

    // Half the shared base weight, own inputs, own change output, and a
    // half share of the funding output itself (36 weight units).
    let fund_weight = FUND_TX_BASE_WEIGHT / 2 + inputs_weight + change_spk_len * 4 + 36;
    let fund_fee = weight_to_fee(fund_weight, fee_rate_sat_per_vb);

    let settlement_weight = CET_BASE_WEIGHT / 2 + payout_spk_len * 4;
    let settlement_fee = weight_to_fee(settlement_weight, fee_rate_sat_per_vb);

    (fund_fee, settlement_fee)
}

/// Collateral plus every fee a party must fund, given a set of inputs.
/// The coin selector iterates this as it admits inputs.
pub fn party_required_funds(
    inputs: &[FundingInput],
    collateral: Amount,
    fee_rate_sat_per_vb: u64,
    change_spk_len: usize,
    payout_spk_len: usize,
) -> Amount {
    let (fund_fee, settlement_fee) = party_fees(
        inputs,
        fee_rate_sat_per_vb,
        change_spk_len,
        payout_spk_len,
    );
    collateral + fund_fee + settlement_fee
}

/// The sorted-key 2-of-2 multisig script controlling the funding output.
pub fn funding_redeem_script(a: Point, b: Point) -> ScriptBuf {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    bitcoin::script::Builder::new()
        .push_opcode(bitcoin::opcodes::all::OP_PUSHNUM_2)
        .push_slice(first.serialize())
        .push_slice(second.serialize())
        .push_opcode(bitcoin::opcodes::all::OP_PUSHNUM_2)
        .push_opcode(bitcoin::opcodes::all::OP_CHECKMULTISIG)
        .into_script()
}

/// The complete pre-signed transaction family for one contract. Built
/// once per contract and treated as immutable once both parties have
/// signed; the CET order is the index space adaptor signatures refer to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlcTransactions {
    /// The funding transaction locking both collaterals.
    pub fund: Transaction,

    /// One CET per payout group, index-aligned with the group order.
    pub cets: Vec<Transaction>,

    /// The time-locked refund transaction returning both collaterals.
    pub refund: Transaction,

    /// The funding output's witness script (the 2-of-2 multisig).
    pub funding_script: ScriptBuf,
}

impl DlcTransactions {
    /// The funding output every CET and the refund transaction spend.
    pub fn fund_outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.fund.txid(),
            vout: 0,
        }
    }

    /// Value locked in the funding output.
    pub fn fund_output_value(&self) -> Amount {
        self.fund.output[0].value
    }
}

/// Build the funding transaction, the CET set, and the refund
/// transaction for the negotiated parameters.
pub fn create_dlc_transactions(
    offer_params: &PartyParams,
    accept_params: &PartyParams,
    payouts: &[Payout],
    fee_terms: &FeeTerms,
) -> Result<DlcTransactions, Error> {
    fee_terms.validate()?;
    if payouts.is_empty() {
        return Err(Error::validation("payouts", "no payout groups"));
    }

    let total_collateral = offer_params.collateral + accept_params.collateral;
    for (i, payout) in payouts.iter().enumerate() {
        if payout.total() != total_collateral {
            return Err(Error::validation(
                "payouts",
                format!(
                    "group {} pays {} of {} total collateral",
                    i,
                    payout.total(),
                    total_collateral
                ),
            ));
        }
    }

    let fee_rate = fee_terms.sat_per_vb();
    let (offer_change, offer_fund_fee, offer_settlement_fee) =
        offer_params.change_output_and_fees(fee_rate)?;
    let (accept_change, accept_fund_fee, accept_settlement_fee) =
        accept_params.change_output_and_fees(fee_rate)?;

    // The funding output holds both collaterals plus both parties'
    // settlement fee reserves, so CETs and the refund TX pay their own
    // way without dipping into the payouts.
    let fund_output_value = total_collateral + offer_settlement_fee + accept_settlement_fee;
    debug_assert_eq!(
        offer_params.input_amount() + accept_params.input_amount(),
        fund_output_value
            + offer_change.value
            + accept_change.value
            + offer_fund_fee
            + accept_fund_fee
    );
    if fund_output_value <= DUST_LIMIT {
        return Err(Error::validation("funding output", "below dust"));
    }

    // Canonical input ordering: both parties' inputs merged and sorted
    // by outpoint.
    let mut all_inputs: Vec<&FundingInput> = offer_params
        .inputs
        .iter()
        .chain(accept_params.inputs.iter())
        .collect();
    all_inputs.sort_by_key(|input| input.outpoint);
    for pair in all_inputs.windows(2) {
        if pair[0].outpoint == pair[1].outpoint {
            return Err(Error::validation(
                "funding inputs",
                format!("outpoint {} contributed twice", pair[0].outpoint),
            ));
        }
    }

    let fund_inputs: Vec<TxIn> = all_inputs
        .iter()
        .map(|input| TxIn {
            previous_output: input.outpoint,
            script_sig: script_sig_for_redeem(&input.redeem_script),
            sequence: SEQUENCE_IGNORE_LOCKTIME,
            witness: Witness::new(),
        })
        .collect();

    let funding_script =
        funding_redeem_script(offer_params.fund_pubkey, accept_params.fund_pubkey);
    let fund_output = TxOut {
        value: fund_output_value,
        script_pubkey: funding_script.to_p2wsh(),
    };

    // Funding output first, then change outputs in canonical order.
    let mut change_outputs = [offer_change, accept_change];
    change_outputs.sort_by(|a, b| {
        a.script_pubkey
            .cmp(&b.script_pubkey)
            .then(a.value.cmp(&b.value))
    });
    let fund_outputs: Vec<TxOut> = std::iter::once(fund_output)
        .chain(change_outputs.into_iter().filter(|o| o.value >= DUST_LIMIT))
        .collect();

    let fund = Transaction {
        version: TX_VERSION,
        lock_time: LockTime::ZERO,
        input: fund_inputs,
        output: fund_outputs,
    };

    let fund_outpoint = OutPoint {
        txid: fund.txid(),
        vout: 0,
    };

    let cets = payouts
        .iter()
        .map(|payout| {
            create_cet(
                fund_outpoint,
                payout,
                &offer_params.payout_script_pubkey,
                &accept_params.payout_script_pubkey,
                fee_terms.cet_locktime,
            )
        })
        .collect();

    let refund_input = TxIn {
        previous_output: fund_outpoint,
        script_sig: ScriptBuf::new(),
        sequence: SEQUENCE_ENFORCE_LOCKTIME,
        witness: Witness::new(),
    };
    let refund_outputs: Vec<TxOut> = [
        TxOut {
            value: offer_params.collateral,
            script_pubkey: offer_params.payout_script_pubkey.clone(),
        },
        TxOut {
            value: accept_params.collateral,
            script_pubkey: accept_params.payout_script_pubkey.clone(),
        },
    ]
    .into_iter()
    .filter(|output| output.value >= DUST_LIMIT)
    .collect();

    let refund = Transaction {
        version: TX_VERSION,
        lock_time: LockTime::from_consensus(fee_terms.refund_locktime),
        input: vec![refund_input],
        output: refund_outputs,
    };

    log::debug!(
        "built dlc transactions: fund {} ({} inputs), {} cets, refund {}",
        fund.txid(),
        fund.input.len(),
        payouts.len(),
        refund.txid(),
    );

    Ok(DlcTransactions {
        fund,
        cets,
        refund,
        funding_script,
    })
}

/// One contract execution transaction: spend the funding output, pay
/// each party its amount for this outcome group. A zero or dust payout
/// omits that party's output entirely.
fn create_cet(
    fund_outpoint: OutPoint,
    payout: &Payout,
    offer_payout_spk: &ScriptBuf,
    accept_payout_spk: &ScriptBuf,
    cet_locktime: u32,
) -> Transaction {
    let outputs: Vec<TxOut> = [
        TxOut {
            value: payout.offer,
            script_pubkey: offer_payout_spk.clone(),
        },
        TxOut {
            value: payout.accept,
            script_pubkey: accept_payout_spk.clone(),
        },
    ]
    .into_iter()
    .filter(|output| output.value >= DUST_LIMIT)
    .collect();

    Transaction {
        version: TX_VERSION,
        lock_time: LockTime::from_consensus(cet_locktime),
        input: vec![TxIn {
            previous_output: fund_outpoint,
            script_sig: ScriptBuf::new(),
            sequence: SEQUENCE_ENFORCE_LOCKTIME,
            witness: Witness::new(),
        }],
        output: outputs,
    }
}
