use dlcpact::bitcoin::hashes::Hash as _;
use dlcpact::bitcoin::{Amount, FeeRate, OutPoint, ScriptBuf};
use dlcpact::secp::Scalar;
use dlcpact::secp256k1_zkp::{Keypair, Message, Secp256k1};
use dlcpact::{
    CloseTerms, CollateralTerms, ContractDescriptor, ContractInfo, ContractState, DlcEngine,
    Error, EventDescriptor, FeeTerms, FundingInput, OfferDlc, OracleAnnouncement, OracleEvent,
    OracleInfo, PartyWallet, PayoutFunction, RoundingIntervals, SignatureKind, ZkpSigner,
};
use dlcpact::payout::{PayoutFunctionPiece, PayoutPoint, RoundingInterval};
use dlcpact::oracle::SchnorrSignature;

/*
    This exercises the full two-party negotiation: Alice offers a numeric
    contract, Bob accepts and adaptor-signs every CET, Alice verifies and
    counter-signs, Bob assembles the funding transaction, and the oracle's
    attestation settles exactly one CET. Refund and cooperative close are
    covered separately.
*/

/// A deterministic oracle for tests: fixed secret key, one fixed secret
/// nonce per digit. Keys are normalized so every announced point is
/// even-y, as the BIP340 wire encoding assumes.
struct TestOracle {
    seckey: Scalar,
    secnonces: Vec<Scalar>,
}

fn even_y_key(n: u32) -> Scalar {
    let raw = Scalar::try_from(n as u128).unwrap();
    raw.negate_if(raw.base_point_mul().parity())
}

impl TestOracle {
    fn new(nb_digits: u16) -> Self {
        TestOracle {
            seckey: even_y_key(938),
            secnonces: (0..nb_digits).map(|i| even_y_key(284 + i as u32 * 31)).collect(),
        }
    }

    fn announce(&self, base: u16, nb_digits: u16) -> OracleAnnouncement {
        let event = OracleEvent {
            nonce_points: self.secnonces.iter().map(|k| k.base_point_mul()).collect(),
            maturity_epoch: 1_617_170_572,
            descriptor: EventDescriptor::DigitDecomposition {
                base,
                is_signed: false,
                unit: "BTC-USD".to_string(),
                precision: 0,
                nb_digits,
            },
            event_id: "btc/usd".to_string(),
        };

        let digest = dlcpact::sha256(&event.signable_bytes());
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, &self.seckey.serialize()).unwrap();
        let sig = secp.sign_schnorr_no_aux_rand(&Message::from_digest(digest), &keypair);
        let mut sig_bytes = [0u8; 64];
        sig_bytes.copy_from_slice(sig.as_ref());

        OracleAnnouncement {
            announcement_signature: SchnorrSignature(sig_bytes),
            oracle_pubkey: self.seckey.base_point_mul(),
            event,
        }
    }
}

fn p2wpkh_script(pubkey: dlcpact::secp::Point) -> ScriptBuf {
    let hash = dlcpact::bitcoin::hashes::hash160::Hash::hash(&pubkey.serialize());
    ScriptBuf::new_p2wpkh(&dlcpact::bitcoin::WPubkeyHash::from_raw_hash(hash))
}

/// A party wallet with P2WPKH UTXOs controlled by deterministic keys.
fn wallet(seed: u32, txid_byte: u8, utxo_values: &[u64]) -> PartyWallet {
    let fund_seckey = Scalar::try_from(seed as u128).unwrap();
    let input_seckeys: Vec<Scalar> = (0..utxo_values.len())
        .map(|i| Scalar::try_from((seed + 1000 + i as u32) as u128).unwrap())
        .collect();

    let utxos = utxo_values
        .iter()
        .zip(&input_seckeys)
        .enumerate()
        .map(|(vout, (&value, seckey))| FundingInput {
            outpoint: OutPoint {
                txid: dlcpact::bitcoin::Txid::from_byte_array([txid_byte; 32]),
                vout: vout as u32,
            },
            value: Amount::from_sat(value),
            script_pubkey: p2wpkh_script(seckey.base_point_mul()),
            redeem_script: ScriptBuf::new(),
            max_witness_len: 107,
        })
        .collect();

    PartyWallet {
        fund_seckey,
        payout_script_pubkey: p2wpkh_script(
            Scalar::try_from((seed + 500) as u128).unwrap().base_point_mul(),
        ),
        change_script_pubkey: p2wpkh_script(
            Scalar::try_from((seed + 600) as u128).unwrap().base_point_mul(),
        ),
        utxos,
        input_seckeys,
    }
}

fn fee_terms() -> FeeTerms {
    FeeTerms {
        fee_rate: FeeRate::from_sat_per_vb_unchecked(10),
        cet_locktime: 1_617_170_572,
        refund_locktime: 1_617_775_372,
    }
}

/// A strike-style payout curve: the offerer gets nothing below the
/// strike outcome, then a linear payout up to the domain edge.
fn strike_contract_info(
    oracle: &TestOracle,
    base: u16,
    nb_digits: u16,
    strike: u64,
    total: u64,
    rounding_mod: u64,
) -> ContractInfo {
    let max_outcome = (base as u64).pow(nb_digits as u32) - 1;
    ContractInfo {
        total_collateral: Amount::from_sat(total),
        descriptor: ContractDescriptor::NumericDecomposition {
            nb_digits,
            payout_function: PayoutFunction::new(vec![
                PayoutFunctionPiece {
                    left: PayoutPoint {
                        event_outcome: 0,
                        outcome_payout: 0,
                    },
                    right: PayoutPoint {
                        event_outcome: strike,
                        outcome_payout: 0,
                    },
                },
                PayoutFunctionPiece {
                    left: PayoutPoint {
                        event_outcome: strike,
                        outcome_payout: 0,
                    },
                    right: PayoutPoint {
                        event_outcome: max_outcome,
                        outcome_payout: total - 4000,
                    },
                },
            ])
            .unwrap(),
            rounding_intervals: RoundingIntervals {
                intervals: vec![RoundingInterval {
                    begin_interval: 0,
                    rounding_mod,
                }],
            },
        },
        oracle_info: OracleInfo::Single(oracle.announce(base, nb_digits)),
    }
}

struct NegotiatedPair {
    alice: DlcEngine<ZkpSigner>,
    bob: DlcEngine<ZkpSigner>,
    alice_wallet: PartyWallet,
    bob_wallet: PartyWallet,
    offer: OfferDlc,
}

/// Run the negotiation up to the point where both sides can settle,
/// shuttling every message through its wire encoding.
fn negotiate(contract_info: ContractInfo, offer_collateral: u64) -> NegotiatedPair {
    let alice = DlcEngine::new(ZkpSigner::new());
    let bob = DlcEngine::new(ZkpSigner::new());
    let alice_wallet = wallet(1111, 0xAA, &[1_500_000]);
    let bob_wallet = wallet(2222, 0xBB, &[900_000]);

    let offer = alice
        .create_offer(
            &mut rand::thread_rng(),
            contract_info,
            CollateralTerms {
                offer_collateral: Amount::from_sat(offer_collateral),
            },
            fee_terms(),
            &alice_wallet,
            None,
        )
        .expect("offer should build");
    let offer_wire = OfferDlc::deserialize(&offer.serialize()).expect("offer round-trips");
    assert_eq!(offer_wire, offer);

    let (accept, bob_txs) = bob
        .accept_offer(&offer_wire, &bob_wallet, None)
        .expect("accept should build");
    let accept_wire =
        dlcpact::AcceptDlc::deserialize(&accept.serialize()).expect("accept round-trips");
    assert_eq!(accept_wire, accept);

    let (sign, alice_txs) = alice
        .sign_accept(&accept_wire, &alice_wallet)
        .expect("accept signatures should verify");
    let sign_wire = dlcpact::SignDlc::deserialize(&sign.serialize()).expect("sign round-trips");
    assert_eq!(sign_wire, sign);

    // Both parties must derive the identical transaction family.
    assert_eq!(alice_txs.fund.txid(), bob_txs.fund.txid());
    assert_eq!(alice_txs.refund.txid(), bob_txs.refund.txid());
    assert_eq!(alice_txs.cets.len(), bob_txs.cets.len());

    let fund = bob
        .finalize_sign(&sign_wire, &bob_wallet)
        .expect("offerer signatures should verify");
    assert_eq!(fund.txid(), bob_txs.fund.txid());
    assert!(fund.input.iter().all(|input| !input.witness.is_empty()));

    assert_eq!(
        alice.export_contract(offer.contract_id).unwrap().state,
        ContractState::Signed
    );
    assert_eq!(
        bob.export_contract(offer.contract_id).unwrap().state,
        ContractState::Broadcastable
    );

    NegotiatedPair {
        alice,
        bob,
        alice_wallet,
        bob_wallet,
        offer,
    }
}

#[test]
fn strike_contract_executes_on_attestation() {
    let nb_digits = 17;
    let oracle = TestOracle::new(nb_digits);
    let contract_info = strike_contract_info(&oracle, 2, nb_digits, 4000, 1_000_000, 5000);

    let pair = negotiate(contract_info, 600_000);
    let contract_id = pair.offer.contract_id;

    // Digit-prefix grouping keeps the CET count far below the 2^17
    // outcome domain.
    let cet_count = pair
        .bob
        .export_contract(contract_id)
        .unwrap()
        .cet_specs
        .len();
    assert!(cet_count > 100, "suspiciously few CETs: {}", cet_count);
    assert!(
        cet_count < (1 << 17) / 10,
        "grouping ineffective: {} CETs",
        cet_count
    );

    // Outcome 3000 is below the strike, so the zero-payout group wins
    // and the whole pot goes to Bob.
    let announcement = pair.offer.contract_info.oracle_info.primary().clone();
    let attestation = announcement
        .attestation_for_value(oracle.seckey, &oracle.secnonces, 3000)
        .expect("oracle secrets match the announcement");

    let cet = pair
        .bob
        .execute(contract_id, &[attestation.clone()], &pair.bob_wallet)
        .expect("execution should settle");
    assert_eq!(cet.output.len(), 1);
    assert_eq!(cet.output[0].value, Amount::from_sat(1_000_000));
    assert_eq!(
        cet.output[0].script_pubkey,
        pair.bob_wallet.payout_script_pubkey
    );
    assert_eq!(cet.input[0].witness.len(), 4);

    // Executing again with the same attestation returns the identical
    // settlement instead of re-deriving one.
    let again = pair
        .bob
        .execute(contract_id, &[attestation.clone()], &pair.bob_wallet)
        .unwrap();
    assert_eq!(again, cet);

    // The offerer settles the same CET from its own side.
    let alice_cet = pair
        .alice
        .execute(contract_id, &[attestation.clone()], &pair.alice_wallet)
        .unwrap();
    assert_eq!(alice_cet.txid(), cet.txid());

    // A different attestation now contradicts the recorded outcome.
    let other = announcement
        .attestation_for_value(oracle.seckey, &oracle.secnonces, 90_000)
        .unwrap();
    let err = pair
        .bob
        .execute(contract_id, &[other], &pair.bob_wallet)
        .unwrap_err();
    assert!(matches!(err, Error::OutcomeMismatch { .. }));
}

#[test]
fn refund_returns_both_collaterals() {
    let oracle = TestOracle::new(5);
    let contract_info = strike_contract_info(&oracle, 2, 5, 10, 1_000_000, 100_000);
    let pair = negotiate(contract_info, 600_000);
    let contract_id = pair.offer.contract_id;

    let refund = pair
        .bob
        .refund(contract_id, &pair.bob_wallet)
        .expect("refund should assemble");
    assert_eq!(refund.output.len(), 2);
    assert_eq!(refund.output[0].value, Amount::from_sat(600_000));
    assert_eq!(refund.output[1].value, Amount::from_sat(400_000));
    assert_eq!(refund.input[0].witness.len(), 4);
    assert_eq!(
        pair.bob.export_contract(contract_id).unwrap().state,
        ContractState::Refunded
    );

    // The offerer's engine produces the same refund transaction.
    let alice_refund = pair.alice.refund(contract_id, &pair.alice_wallet).unwrap();
    assert_eq!(alice_refund.txid(), refund.txid());

    // Settled is settled: no executing a refunded contract.
    let attestation = pair
        .offer
        .contract_info
        .oracle_info
        .primary()
        .attestation_for_value(oracle.seckey, &oracle.secnonces, 3)
        .unwrap();
    let err = pair
        .bob
        .execute(contract_id, &[attestation], &pair.bob_wallet)
        .unwrap_err();
    assert!(matches!(err, Error::StateMismatch { .. }));
}

#[test]
fn cooperative_close_completes_with_both_signatures() {
    let oracle = TestOracle::new(5);
    let contract_info = strike_contract_info(&oracle, 2, 5, 10, 1_000_000, 100_000);
    let pair = negotiate(contract_info, 600_000);
    let contract_id = pair.offer.contract_id;

    let offer_payout = Amount::from_sat(250_000);

    // Alice proposes: she gets her half-signed close and stays settable.
    let proposal = pair
        .alice
        .close(
            contract_id,
            CloseTerms {
                offer_payout,
                counterparty_signature: None,
            },
            &pair.alice_wallet,
        )
        .unwrap();
    assert!(!proposal.complete);
    assert_eq!(
        pair.alice.export_contract(contract_id).unwrap().state,
        ContractState::Signed
    );

    // Bob completes with Alice's signature.
    let bob_close = pair
        .bob
        .close(
            contract_id,
            CloseTerms {
                offer_payout,
                counterparty_signature: Some(proposal.signature),
            },
            &pair.bob_wallet,
        )
        .unwrap();
    assert!(bob_close.complete);
    assert_eq!(bob_close.transaction.txid(), proposal.transaction.txid());
    assert_eq!(bob_close.transaction.output[0].value, offer_payout);
    assert_eq!(
        pair.bob.export_contract(contract_id).unwrap().state,
        ContractState::Closed
    );

    // And Alice completes with Bob's.
    let alice_close = pair
        .alice
        .close(
            contract_id,
            CloseTerms {
                offer_payout,
                counterparty_signature: Some(bob_close.signature),
            },
            &pair.alice_wallet,
        )
        .unwrap();
    assert!(alice_close.complete);
    assert_eq!(alice_close.transaction, bob_close.transaction);
}

#[test]
fn out_of_order_transitions_are_rejected() {
    let oracle = TestOracle::new(5);
    let contract_info = strike_contract_info(&oracle, 2, 5, 10, 1_000_000, 100_000);

    let alice = DlcEngine::new(ZkpSigner::new());
    let bob = DlcEngine::new(ZkpSigner::new());
    let alice_wallet = wallet(1111, 0xAA, &[1_500_000]);
    let bob_wallet = wallet(2222, 0xBB, &[900_000]);

    let offer = alice
        .create_offer(
            &mut rand::thread_rng(),
            contract_info,
            CollateralTerms {
                offer_collateral: Amount::from_sat(600_000),
            },
            fee_terms(),
            &alice_wallet,
            None,
        )
        .unwrap();

    let (accept, _) = bob.accept_offer(&offer, &bob_wallet, None).unwrap();
    let (sign, _) = alice.sign_accept(&accept, &alice_wallet).unwrap();

    // finalize_sign against an engine that never accepted: unknown id.
    let stranger = DlcEngine::new(ZkpSigner::new());
    let err = stranger.finalize_sign(&sign, &bob_wallet).unwrap_err();
    assert!(matches!(
        err,
        Error::StateMismatch { contract_id, .. } if contract_id == offer.contract_id
    ));

    // Executing before the acceptor finalized is out of order.
    let attestation = offer
        .contract_info
        .oracle_info
        .primary()
        .attestation_for_value(oracle.seckey, &oracle.secnonces, 3)
        .unwrap();
    let err = bob
        .execute(offer.contract_id, &[attestation], &bob_wallet)
        .unwrap_err();
    assert!(matches!(err, Error::StateMismatch { .. }));

    // Signing the same Accept twice is out of order too.
    let err = alice.sign_accept(&accept, &alice_wallet).unwrap_err();
    assert!(matches!(err, Error::StateMismatch { .. }));

    bob.finalize_sign(&sign, &bob_wallet).unwrap();
}

#[test]
fn tampered_accept_signature_is_blamed_on_its_cet() {
    let oracle = TestOracle::new(5);
    let contract_info = strike_contract_info(&oracle, 2, 5, 10, 1_000_000, 100_000);

    let alice = DlcEngine::new(ZkpSigner::new());
    let bob = DlcEngine::new(ZkpSigner::new());
    let alice_wallet = wallet(1111, 0xAA, &[1_500_000]);
    let bob_wallet = wallet(2222, 0xBB, &[900_000]);

    let offer = alice
        .create_offer(
            &mut rand::thread_rng(),
            contract_info,
            CollateralTerms {
                offer_collateral: Amount::from_sat(600_000),
            },
            fee_terms(),
            &alice_wallet,
            None,
        )
        .unwrap();
    let (mut accept, _) = bob.accept_offer(&offer, &bob_wallet, None).unwrap();

    accept.cet_adaptor_signatures[2].0[40] ^= 0x01;
    let err = alice.sign_accept(&accept, &alice_wallet).unwrap_err();
    match err {
        Error::SignatureVerification { contract_id, kind } => {
            assert_eq!(contract_id, offer.contract_id);
            assert_eq!(kind, SignatureKind::CetAdaptor { cet_index: 2 });
        }
        other => panic!("expected SignatureVerification, got {:?}", other),
    }

    // The failed verification left the offerer in its last good state,
    // so the untampered message still goes through.
    assert_eq!(
        alice.export_contract(offer.contract_id).unwrap().state,
        ContractState::Offered
    );
}

#[test]
fn attestation_from_wrong_event_is_rejected() {
    let oracle = TestOracle::new(5);
    let contract_info = strike_contract_info(&oracle, 2, 5, 10, 1_000_000, 100_000);
    let pair = negotiate(contract_info, 600_000);

    // Same oracle key, different event announcement.
    let mut other_announcement = TestOracle::new(5).announce(2, 5);
    other_announcement.event.event_id = "eth/usd".to_string();
    let attestation = other_announcement
        .attestation_for_value(oracle.seckey, &oracle.secnonces, 3)
        .unwrap();

    let err = pair
        .bob
        .execute(pair.offer.contract_id, &[attestation], &pair.bob_wallet)
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}
