//! Deterministic UTXO selection for a party's side of the funding
//! transaction.

use bitcoin::Amount;

use crate::consts::weight_to_fee;
use crate::errors::Error;
use crate::transactions::{party_required_funds, FundingInput};

/// Select funding inputs covering `collateral` plus this party's fee
/// share.
///
/// If `fixed_inputs` are supplied they are used exactly as given and must
/// cover the target on their own. Otherwise candidates are accumulated
/// largest-first until the target is met. Each admitted input enlarges
/// the fund transaction and therefore the fee target, so the requirement
/// is recomputed after every step until it stabilizes; selection either
/// converges or exhausts the candidates with [`Error::InsufficientFunds`].
///
/// Selection is deterministic: equal inputs are ordered by outpoint, and
/// no randomization is applied, so re-running with the same candidates
/// reproduces the same inputs (and thus the same funding transaction).
pub fn select_funding_inputs(
    candidates: &[FundingInput],
    fixed_inputs: Option<&[FundingInput]>,
    collateral: Amount,
    fee_rate_sat_per_vb: u64,
    change_spk_len: usize,
    payout_spk_len: usize,
) -> Result<Vec<FundingInput>, Error> {
    let required = |inputs: &[FundingInput]| {
        party_required_funds(
            inputs,
            collateral,
            fee_rate_sat_per_vb,
            change_spk_len,
            payout_spk_len,
        )
    };

    if let Some(fixed) = fixed_inputs {
        let have: Amount = fixed.iter().map(|input| input.value).sum();
        let need = required(fixed);
        if have < need {
            return Err(Error::InsufficientFunds { have, need });
        }
        return Ok(fixed.to_vec());
    }

    let mut ordered: Vec<&FundingInput> = candidates.iter().collect();
    ordered.sort_by(|a, b| b.value.cmp(&a.value).then(a.outpoint.cmp(&b.outpoint)));

    let mut selected: Vec<FundingInput> = Vec::new();
    let mut have = Amount::ZERO;
    for input in ordered {
        selected.push(input.clone());
        have += input.value;
        if have >= required(&selected) {
            log::debug!(
                "selected {} inputs totalling {} for target {}",
                selected.len(),
                have,
                required(&selected),
            );
            return Ok(selected);
        }
    }

    Err(Error::InsufficientFunds {
        have,
        need: required(&selected),
    })
}

/// The incremental fee cost of adding one input at the given fee rate.
/// Exposed so wallets can pre-filter candidates that cannot pay for
/// themselves.
pub fn input_fee_cost(input: &FundingInput, fee_rate_sat_per_vb: u64) -> Amount {
    weight_to_fee(input.weight(), fee_rate_sat_per_vb)
}
