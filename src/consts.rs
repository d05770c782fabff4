use bitcoin::{Amount, Sequence};

/// Minimum value for a transaction output. Anything below this is
/// discarded instead of being included in a fund TX, CET, or refund TX.
pub const DUST_LIMIT: Amount = Amount::from_sat(1000);

/// The version used for every pre-signed transaction.
pub const TX_VERSION: bitcoin::transaction::Version = bitcoin::transaction::Version::TWO;

/// Sequence number which disables both RBF signalling and `nLockTime`.
pub const SEQUENCE_IGNORE_LOCKTIME: Sequence = Sequence::MAX;

/// Sequence number which disables RBF signalling but keeps `nLockTime`
/// enforcement active. Used on CET and refund inputs.
pub const SEQUENCE_ENFORCE_LOCKTIME: Sequence = Sequence(0xFFFF_FFFE);

/// The shared base weight of a fund transaction: version, locktime,
/// input/output counts and the funding output itself. Split evenly
/// between the two parties for fee purposes.
pub const FUND_TX_BASE_WEIGHT: usize = 214;

/// The weight of a CET or refund transaction excluding the payout
/// outputs. Split evenly between the two parties.
pub const CET_BASE_WEIGHT: usize = 500;

/// The base weight of one transaction input:
/// `(outpoint(36) + sequence(4) + script_sig_len(1)) * 4`.
pub const TX_INPUT_BASE_WEIGHT: usize = 164;

/// The worst-case witness size of a P2WPKH spend, used as the default
/// witness bound when a funding input does not declare its own.
pub const P2WPKH_MAX_WITNESS_SIZE: usize = 107;

/// Serialized length of an ECDSA adaptor signature, proof included.
pub const ADAPTOR_SIGNATURE_SIZE: usize = 162;

/// Convert a transaction weight to a fee amount at the given
/// sat-per-vbyte rate, rounding vbytes up.
pub fn weight_to_fee(weight: usize, fee_rate_sat_per_vb: u64) -> Amount {
    let vbytes = (weight as u64 + 3) / 4;
    Amount::from_sat(vbytes * fee_rate_sat_per_vb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_to_fee_rounds_up() {
        assert_eq!(weight_to_fee(4, 1), Amount::from_sat(1));
        assert_eq!(weight_to_fee(5, 1), Amount::from_sat(2));
        assert_eq!(weight_to_fee(8, 10), Amount::from_sat(20));
        assert_eq!(weight_to_fee(0, 10), Amount::ZERO);
    }
}
