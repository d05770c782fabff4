//! The per-contract negotiation state machine and the registry that owns
//! every live contract.
//!
//! One engine instance serves one party. It sequences the protocol —
//! Offer → Accept → Sign → Finalize, then Execute, Refund, or Close —
//! and owns the id-keyed contract registry. Lookups take a registry-wide
//! lock only long enough to fetch the per-contract handle; all work,
//! including calls across the signing boundary, happens under that
//! contract's own lock, so operations on different contracts never
//! contend.

mod contract;

pub use contract::{Contract, ContractState, Role, Settlement};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bitcoin::hashes::Hash as _;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{absolute::LockTime, Amount, ScriptBuf, Transaction, TxIn, TxOut, Witness};
use secp::{MaybeScalar, Point, Scalar};

use crate::adaptor::{
    funding_spend_sighash, funding_spend_witness, sign_cets, sign_refund, verify_cet_signatures,
    verify_refund_signature, AdaptorSigner, CompactEcdsaSignature,
};
use crate::coin_select::select_funding_inputs;
use crate::consts::{weight_to_fee, CET_BASE_WEIGHT, DUST_LIMIT, SEQUENCE_IGNORE_LOCKTIME, TX_VERSION};
use crate::errors::{Error, SignatureKind};
use crate::messages::{AcceptDlc, ContractInfo, OfferDlc, SignDlc};
use crate::oracle::{EventDescriptor, OracleAttestation};
use crate::transactions::{create_dlc_transactions, DlcTransactions, FeeTerms, FundingInput};
use crate::ContractId;

/// How much collateral the offering party locks up. The acceptor covers
/// the remainder of the contract info's total collateral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollateralTerms {
    pub offer_collateral: Amount,
}

/// One party's funding and settlement details, supplied by the wallet
/// collaborator per operation. The engine never derives addresses or
/// enumerates UTXOs itself.
#[derive(Debug, Clone)]
pub struct PartyWallet {
    /// Key this party signs the funding multisig and settlement
    /// transactions with.
    pub fund_seckey: Scalar,

    /// Where this party's settlement payouts go.
    pub payout_script_pubkey: ScriptBuf,

    /// Where this party's fund-transaction change goes.
    pub change_script_pubkey: ScriptBuf,

    /// Candidate UTXOs for funding; all P2WPKH in this engine.
    pub utxos: Vec<FundingInput>,

    /// Spending keys aligned with `utxos`.
    pub input_seckeys: Vec<Scalar>,
}

impl PartyWallet {
    /// The funding pubkey announced to the counterparty.
    pub fn fund_pubkey(&self) -> Point {
        self.fund_seckey.base_point_mul()
    }

    fn seckey_for(&self, input: &FundingInput) -> Result<Scalar, Error> {
        self.utxos
            .iter()
            .position(|utxo| utxo.outpoint == input.outpoint)
            .and_then(|index| self.input_seckeys.get(index).copied())
            .ok_or_else(|| {
                Error::validation(
                    "funding input",
                    format!("no spending key for outpoint {}", input.outpoint),
                )
            })
    }
}

/// Terms for a cooperative close: the offerer's payout is exact, the
/// acceptor receives the rest of the funding output minus the close fee.
#[derive(Debug, Clone)]
pub struct CloseTerms {
    /// Amount paid to the offering party.
    pub offer_payout: Amount,

    /// The counterparty's signature on the close transaction, once it
    /// has been exchanged. With it the close completes; without it the
    /// output is a half-signed proposal.
    pub counterparty_signature: Option<CompactEcdsaSignature>,
}

/// The result of a [`DlcEngine::close`] call.
#[derive(Debug, Clone)]
pub struct CloseOutput {
    /// The close transaction; witnessed when `complete`.
    pub transaction: Transaction,

    /// This party's signature over the close transaction, for the
    /// counterparty to complete its half.
    pub signature: CompactEcdsaSignature,

    /// Whether both signatures are in place.
    pub complete: bool,
}

/// The negotiation engine for one party. Generic over the signing
/// boundary; construct it with an already-initialized signer, after
/// which every operation is immediately available.
pub struct DlcEngine<S: AdaptorSigner> {
    signer: S,
    contracts: Mutex<HashMap<ContractId, Arc<Mutex<Contract>>>>,
}

impl<S: AdaptorSigner> DlcEngine<S> {
    pub fn new(signer: S) -> Self {
        DlcEngine {
            signer,
            contracts: Mutex::new(HashMap::new()),
        }
    }

    /// The signing boundary in use.
    pub fn signer(&self) -> &S {
        &self.signer
    }

    // -- Registry -----------------------------------------------------

    fn insert_contract(&self, contract: Contract) -> Result<(), Error> {
        let mut contracts = self.contracts.lock().expect("contract registry poisoned");
        if contracts.contains_key(&contract.id) {
            return Err(Error::validation(
                "contract id",
                format!("{} is already registered", contract.id),
            ));
        }
        contracts.insert(contract.id, Arc::new(Mutex::new(contract)));
        Ok(())
    }

    /// Fetch a contract's handle. The registry lock is released before
    /// the handle is used, so other ids stay available while this
    /// contract works.
    fn contract_handle(&self, contract_id: ContractId) -> Result<Arc<Mutex<Contract>>, Error> {
        self.contracts
            .lock()
            .expect("contract registry poisoned")
            .get(&contract_id)
            .cloned()
            .ok_or(Error::StateMismatch {
                contract_id,
                expected: "a registered contract",
                found: "unknown".to_string(),
            })
    }

    pub fn has_contract(&self, contract_id: ContractId) -> bool {
        self.contracts
            .lock()
            .expect("contract registry poisoned")
            .contains_key(&contract_id)
    }

    /// Snapshot one contract.
    pub fn export_contract(&self, contract_id: ContractId) -> Result<Contract, Error> {
        let handle = self.contract_handle(contract_id)?;
        let contract = handle.lock().expect("contract lock poisoned");
        Ok(contract.clone())
    }

    /// Snapshot every registered contract.
    pub fn export_contracts(&self) -> Vec<Contract> {
        let handles: Vec<Arc<Mutex<Contract>>> = self
            .contracts
            .lock()
            .expect("contract registry poisoned")
            .values()
            .cloned()
            .collect();
        handles
            .iter()
            .map(|handle| handle.lock().expect("contract lock poisoned").clone())
            .collect()
    }

    /// Register a previously exported contract, e.g. when restoring
    /// state from storage.
    pub fn import_contract(&self, contract: Contract) -> Result<(), Error> {
        log::info!("importing contract {} in state {}", contract.id, contract.state);
        self.insert_contract(contract)
    }

    /// Remove a contract from the registry. Contracts are never removed
    /// implicitly, whatever state they are in.
    pub fn delete_contract(&self, contract_id: ContractId) -> Result<(), Error> {
        let removed = self
            .contracts
            .lock()
            .expect("contract registry poisoned")
            .remove(&contract_id);
        match removed {
            Some(_) => {
                log::info!("deleted contract {}", contract_id);
                Ok(())
            }
            None => Err(Error::StateMismatch {
                contract_id,
                expected: "a registered contract",
                found: "unknown".to_string(),
            }),
        }
    }

    // -- Negotiation --------------------------------------------------

    /// Open a negotiation: select the offerer's funding inputs, register
    /// the contract in `Offered` state, and produce the Offer message.
    pub fn create_offer<R: rand::RngCore + rand::CryptoRng>(
        &self,
        rng: &mut R,
        contract_info: ContractInfo,
        collateral: CollateralTerms,
        fee_terms: FeeTerms,
        wallet: &PartyWallet,
        fixed_inputs: Option<&[FundingInput]>,
    ) -> Result<OfferDlc, Error> {
        contract_info.validate()?;
        fee_terms.validate()?;
        if collateral.offer_collateral > contract_info.total_collateral {
            return Err(Error::validation(
                "collateral terms",
                "offer collateral exceeds total collateral",
            ));
        }

        // Expanding the payout curve also validates it, so a bad curve
        // fails here rather than after the counterparty accepted.
        let cet_specs = contract_info.cet_specs()?;

        let funding_inputs = select_funding_inputs(
            &wallet.utxos,
            fixed_inputs,
            collateral.offer_collateral,
            fee_terms.sat_per_vb(),
            wallet.change_script_pubkey.len(),
            wallet.payout_script_pubkey.len(),
        )?;

        let contract_id = ContractId::random(rng);
        let cet_count = cet_specs.len();
        let offer = OfferDlc {
            contract_id,
            contract_info,
            funding_pubkey: wallet.fund_pubkey(),
            payout_script_pubkey: wallet.payout_script_pubkey.clone(),
            offer_collateral: collateral.offer_collateral,
            funding_inputs,
            change_script_pubkey: wallet.change_script_pubkey.clone(),
            fee_rate: fee_terms.fee_rate,
            cet_locktime: fee_terms.cet_locktime,
            refund_locktime: fee_terms.refund_locktime,
        };

        self.insert_contract(Contract {
            id: contract_id,
            role: Role::Offerer,
            state: ContractState::Offered,
            offer: offer.clone(),
            accept: None,
            sign: None,
            transactions: None,
            cet_specs,
            settlement: None,
        })?;

        log::info!(
            "contract {}: offered with {} CETs, {} collateral of {} total",
            contract_id,
            cet_count,
            offer.offer_collateral,
            offer.contract_info.total_collateral,
        );
        Ok(offer)
    }

    /// Accept a received offer: select our inputs, build the transaction
    /// family, adaptor-sign every CET, sign the refund transaction, and
    /// register the contract in `Accepted` state.
    pub fn accept_offer(
        &self,
        offer: &OfferDlc,
        wallet: &PartyWallet,
        fixed_inputs: Option<&[FundingInput]>,
    ) -> Result<(AcceptDlc, DlcTransactions), Error> {
        offer.validate()?;
        let cet_specs = offer.contract_info.cet_specs()?;
        let fee_terms = offer.fee_terms();
        let accept_collateral = offer.accept_collateral();

        let funding_inputs = select_funding_inputs(
            &wallet.utxos,
            fixed_inputs,
            accept_collateral,
            fee_terms.sat_per_vb(),
            wallet.change_script_pubkey.len(),
            wallet.payout_script_pubkey.len(),
        )?;

        let accept = AcceptDlc {
            contract_id: offer.contract_id,
            accept_collateral,
            funding_pubkey: wallet.fund_pubkey(),
            payout_script_pubkey: wallet.payout_script_pubkey.clone(),
            funding_inputs,
            change_script_pubkey: wallet.change_script_pubkey.clone(),
            // Placeholder until the transactions exist below.
            cet_adaptor_signatures: vec![],
            refund_signature: CompactEcdsaSignature([0u8; 64]),
        };

        let transactions = create_dlc_transactions(
            &offer.party_params(),
            &accept.party_params(),
            &cet_specs.iter().map(|spec| spec.payout).collect::<Vec<_>>(),
            &fee_terms,
        )?;

        let claims: Vec<_> = cet_specs.iter().map(|spec| spec.claim.clone()).collect();
        let adaptor_points = offer.contract_info.oracle_info.adaptor_points(&claims)?;

        let cet_adaptor_signatures = sign_cets(
            &self.signer,
            &transactions.cets,
            &transactions.funding_script,
            transactions.fund_output_value(),
            &adaptor_points,
            wallet.fund_seckey,
        )?;
        let refund_signature = sign_refund(
            &self.signer,
            &transactions.refund,
            &transactions.funding_script,
            transactions.fund_output_value(),
            wallet.fund_seckey,
        )?;

        let accept = AcceptDlc {
            cet_adaptor_signatures,
            refund_signature,
            ..accept
        };

        self.insert_contract(Contract {
            id: offer.contract_id,
            role: Role::Acceptor,
            state: ContractState::Accepted,
            offer: offer.clone(),
            accept: Some(accept.clone()),
            sign: None,
            transactions: Some(transactions.clone()),
            cet_specs,
            settlement: None,
        })?;

        log::info!(
            "contract {}: accepted, {} CET adaptor signatures emitted",
            offer.contract_id,
            accept.cet_adaptor_signatures.len(),
        );
        Ok((accept, transactions))
    }

    /// Process the counterparty's Accept message as the offerer: verify
    /// every adaptor signature and the refund signature, then produce our
    /// own signatures plus witnesses for our funding inputs.
    pub fn sign_accept(
        &self,
        accept: &AcceptDlc,
        wallet: &PartyWallet,
    ) -> Result<(SignDlc, DlcTransactions), Error> {
        let handle = self.contract_handle(accept.contract_id)?;
        let mut contract = handle.lock().expect("contract lock poisoned");
        contract.require_role(Role::Offerer, "the offering side")?;
        contract.require_state(&[ContractState::Offered], "Offered")?;

        let offer = &contract.offer;
        if accept.accept_collateral != offer.accept_collateral() {
            return Err(Error::validation(
                "accept",
                format!(
                    "collateral {} does not complete the total",
                    accept.accept_collateral
                ),
            ));
        }

        let transactions = create_dlc_transactions(
            &offer.party_params(),
            &accept.party_params(),
            &contract
                .cet_specs
                .iter()
                .map(|spec| spec.payout)
                .collect::<Vec<_>>(),
            &offer.fee_terms(),
        )?;

        let claims: Vec<_> = contract
            .cet_specs
            .iter()
            .map(|spec| spec.claim.clone())
            .collect();
        let adaptor_points = offer.contract_info.oracle_info.adaptor_points(&claims)?;

        // Fail closed before producing anything of our own.
        verify_cet_signatures(
            &self.signer,
            contract.id,
            &transactions.cets,
            &transactions.funding_script,
            transactions.fund_output_value(),
            &adaptor_points,
            accept.funding_pubkey,
            &accept.cet_adaptor_signatures,
        )?;
        verify_refund_signature(
            &self.signer,
            contract.id,
            &transactions.refund,
            &transactions.funding_script,
            transactions.fund_output_value(),
            accept.funding_pubkey,
            &accept.refund_signature,
        )?;

        let cet_adaptor_signatures = sign_cets(
            &self.signer,
            &transactions.cets,
            &transactions.funding_script,
            transactions.fund_output_value(),
            &adaptor_points,
            wallet.fund_seckey,
        )?;
        let refund_signature = sign_refund(
            &self.signer,
            &transactions.refund,
            &transactions.funding_script,
            transactions.fund_output_value(),
            wallet.fund_seckey,
        )?;
        let funding_signatures =
            self.sign_own_funding_inputs(&transactions.fund, &offer.funding_inputs, wallet)?;

        let sign = SignDlc {
            contract_id: contract.id,
            cet_adaptor_signatures,
            refund_signature,
            funding_signatures,
        };

        contract.accept = Some(accept.clone());
        contract.sign = Some(sign.clone());
        contract.transactions = Some(transactions.clone());
        contract.state = ContractState::Signed;
        log::info!("contract {}: counterparty verified, now Signed", contract.id);

        Ok((sign, transactions))
    }

    /// Process the offerer's Sign message as the acceptor: verify its
    /// adaptor, refund, and funding signatures, then assemble the
    /// fully-signed funding transaction.
    pub fn finalize_sign(
        &self,
        sign: &SignDlc,
        wallet: &PartyWallet,
    ) -> Result<Transaction, Error> {
        let handle = self.contract_handle(sign.contract_id)?;
        let mut contract = handle.lock().expect("contract lock poisoned");
        contract.require_role(Role::Acceptor, "the accepting side")?;
        contract.require_state(&[ContractState::Accepted], "Accepted")?;

        let transactions = contract.transactions()?.clone();
        let offer = &contract.offer;

        let claims: Vec<_> = contract
            .cet_specs
            .iter()
            .map(|spec| spec.claim.clone())
            .collect();
        let adaptor_points = offer.contract_info.oracle_info.adaptor_points(&claims)?;

        verify_cet_signatures(
            &self.signer,
            contract.id,
            &transactions.cets,
            &transactions.funding_script,
            transactions.fund_output_value(),
            &adaptor_points,
            offer.funding_pubkey,
            &sign.cet_adaptor_signatures,
        )?;
        verify_refund_signature(
            &self.signer,
            contract.id,
            &transactions.refund,
            &transactions.funding_script,
            transactions.fund_output_value(),
            offer.funding_pubkey,
            &sign.refund_signature,
        )?;

        // Verify and place the offerer's funding witnesses, then sign
        // our own inputs; every input of the canonical fund TX belongs
        // to one side or the other.
        let mut fund = transactions.fund.clone();
        if sign.funding_signatures.len() != offer.funding_inputs.len() {
            return Err(Error::validation(
                "funding signatures",
                format!(
                    "{} witnesses for {} offer inputs",
                    sign.funding_signatures.len(),
                    offer.funding_inputs.len()
                ),
            ));
        }
        for (input, witness) in offer.funding_inputs.iter().zip(&sign.funding_signatures) {
            let input_index = fund_input_index(&fund, input)?;
            verify_p2wpkh_witness(&self.signer, contract.id, &fund, input_index, input, witness)?;
            fund.input[input_index].witness = Witness::from(witness.clone());
        }

        let accept_inputs = contract
            .accept
            .as_ref()
            .expect("acceptor stores its accept message")
            .funding_inputs
            .clone();
        let own_witnesses =
            self.sign_own_funding_inputs(&transactions.fund, &accept_inputs, wallet)?;
        for (input, witness) in accept_inputs.iter().zip(own_witnesses) {
            let input_index = fund_input_index(&fund, input)?;
            fund.input[input_index].witness = Witness::from(witness);
        }

        if fund.input.iter().any(|input| input.witness.is_empty()) {
            return Err(Error::validation(
                "funding transaction",
                "an input is missing its witness",
            ));
        }

        contract.sign = Some(sign.clone());
        contract.state = ContractState::Broadcastable;
        log::info!(
            "contract {}: funding transaction {} fully signed, now Broadcastable",
            contract.id,
            fund.txid(),
        );
        Ok(fund)
    }

    // -- Settlement ---------------------------------------------------

    /// Settle with an oracle attestation: find the payout group the
    /// revealed outcome falls under, decrypt the counterparty's adaptor
    /// signature for that CET, add our own signature, and return the
    /// broadcastable settlement transaction.
    ///
    /// Repeating the call with the same attestation returns the stored
    /// settlement unchanged.
    pub fn execute(
        &self,
        contract_id: ContractId,
        attestations: &[OracleAttestation],
        wallet: &PartyWallet,
    ) -> Result<Transaction, Error> {
        let handle = self.contract_handle(contract_id)?;
        let mut contract = handle.lock().expect("contract lock poisoned");
        contract.require_state(
            &[
                ContractState::Signed,
                ContractState::Broadcastable,
                ContractState::Executed,
            ],
            "Signed or Broadcastable",
        )?;

        let announcements = contract.offer.contract_info.oracle_info.announcements();
        if attestations.len() != announcements.len() {
            return Err(Error::validation(
                "attestations",
                format!(
                    "{} attestations for {} oracles",
                    attestations.len(),
                    announcements.len()
                ),
            ));
        }
        for (attestation, announcement) in attestations.iter().zip(announcements) {
            attestation.verify_against(announcement)?;
        }
        if attestations
            .iter()
            .any(|attestation| attestation.outcomes != attestations[0].outcomes)
        {
            return Err(Error::validation(
                "attestations",
                "oracles attested to different outcomes",
            ));
        }

        let outcome_display = attestations[0].outcomes.join("");
        let base = event_base(&contract.offer.contract_info);
        let cet_index = contract
            .cet_specs
            .iter()
            .position(|spec| attestations[0].matches_claim(&spec.claim, base))
            .ok_or_else(|| Error::OutcomeMismatch {
                contract_id,
                outcome: outcome_display.clone(),
            })?;
        let claim = contract.cet_specs[cet_index].claim.clone();

        // Idempotency: same attestation returns the same settlement; a
        // different one contradicts the recorded outcome.
        if contract.state == ContractState::Executed {
            let settlement = contract
                .settlement
                .as_ref()
                .expect("executed contracts store their settlement");
            if settlement.outcomes == attestations[0].outcomes {
                return Ok(settlement.transaction.clone());
            }
            return Err(Error::OutcomeMismatch {
                contract_id,
                outcome: outcome_display,
            });
        }

        let transactions = contract.transactions()?;
        let counterparty_adaptor_sig = match contract.role {
            Role::Offerer => contract
                .accept
                .as_ref()
                .expect("signed contracts store the accept message")
                .cet_adaptor_signatures[cet_index],
            Role::Acceptor => contract
                .sign
                .as_ref()
                .expect("broadcastable contracts store the sign message")
                .cet_adaptor_signatures[cet_index],
        };

        // Sum the attestation secrets across oracles; with a single
        // oracle this is just its digit-prefix scalar sum.
        let mut secret_sum = MaybeScalar::Zero;
        for attestation in attestations {
            secret_sum = secret_sum + attestation.adaptor_secret(&claim)?;
        }
        let adaptor_secret = match secret_sum {
            MaybeScalar::Valid(secret) => secret,
            MaybeScalar::Zero => {
                return Err(Error::validation(
                    "attestations",
                    "attestation secrets sum to zero",
                ));
            }
        };

        let cet = transactions.cets[cet_index].clone();
        let sighash = funding_spend_sighash(
            &cet,
            &transactions.funding_script,
            transactions.fund_output_value(),
        )?;

        let decrypted = self
            .signer
            .decrypt_adaptor_signature(&counterparty_adaptor_sig, adaptor_secret)?;
        let counterparty_pubkey = match contract.role {
            Role::Offerer => contract.accept.as_ref().expect("checked above").funding_pubkey,
            Role::Acceptor => contract.offer.funding_pubkey,
        };
        if !self.signer.verify_ecdsa(sighash, counterparty_pubkey, &decrypted) {
            return Err(Error::OutcomeMismatch {
                contract_id,
                outcome: outcome_display,
            });
        }

        let own_signature = self.signer.sign_ecdsa(sighash, wallet.fund_seckey)?;
        let (offer_sig, accept_sig) = match contract.role {
            Role::Offerer => (own_signature, decrypted),
            Role::Acceptor => (decrypted, own_signature),
        };
        let accept_pubkey = contract
            .accept
            .as_ref()
            .expect("checked above")
            .funding_pubkey;

        let mut cet = cet;
        cet.input[0].witness = funding_spend_witness(
            &transactions.funding_script,
            contract.offer.funding_pubkey,
            accept_pubkey,
            &offer_sig,
            &accept_sig,
        )?;

        contract.settlement = Some(Settlement {
            outcomes: attestations[0].outcomes.clone(),
            transaction: cet.clone(),
        });
        contract.state = ContractState::Executed;
        log::info!(
            "contract {}: executed CET {} for outcome \"{}\"",
            contract_id,
            cet_index,
            outcome_display,
        );
        Ok(cet)
    }

    /// Combine both refund signatures into the broadcastable refund
    /// transaction. Only meaningful once the refund locktime has passed;
    /// the transaction itself enforces that on-chain.
    pub fn refund(
        &self,
        contract_id: ContractId,
        wallet: &PartyWallet,
    ) -> Result<Transaction, Error> {
        let handle = self.contract_handle(contract_id)?;
        let mut contract = handle.lock().expect("contract lock poisoned");
        contract.require_state(
            &[ContractState::Signed, ContractState::Broadcastable],
            "Signed or Broadcastable",
        )?;

        let transactions = contract.transactions()?;
        let counterparty_signature = match contract.role {
            Role::Offerer => {
                contract
                    .accept
                    .as_ref()
                    .expect("signed contracts store the accept message")
                    .refund_signature
            }
            Role::Acceptor => {
                contract
                    .sign
                    .as_ref()
                    .expect("broadcastable contracts store the sign message")
                    .refund_signature
            }
        };

        let own_signature = sign_refund(
            &self.signer,
            &transactions.refund,
            &transactions.funding_script,
            transactions.fund_output_value(),
            wallet.fund_seckey,
        )?;
        let (offer_sig, accept_sig) = match contract.role {
            Role::Offerer => (own_signature, counterparty_signature),
            Role::Acceptor => (counterparty_signature, own_signature),
        };
        let accept_pubkey = contract
            .accept
            .as_ref()
            .expect("settling contracts store the accept message")
            .funding_pubkey;

        let mut refund = transactions.refund.clone();
        refund.input[0].witness = funding_spend_witness(
            &transactions.funding_script,
            contract.offer.funding_pubkey,
            accept_pubkey,
            &offer_sig,
            &accept_sig,
        )?;

        contract.state = ContractState::Refunded;
        log::info!("contract {}: refund transaction assembled", contract_id);
        Ok(refund)
    }

    /// Cooperative early settlement outside the CET set. Both parties
    /// derive the same close transaction from the same terms; each signs
    /// its half, and whoever holds both signatures completes it.
    pub fn close(
        &self,
        contract_id: ContractId,
        terms: CloseTerms,
        wallet: &PartyWallet,
    ) -> Result<CloseOutput, Error> {
        let handle = self.contract_handle(contract_id)?;
        let mut contract = handle.lock().expect("contract lock poisoned");
        contract.require_state(
            &[ContractState::Signed, ContractState::Broadcastable],
            "Signed or Broadcastable",
        )?;

        let transactions = contract.transactions()?;
        let accept = contract
            .accept
            .as_ref()
            .expect("settling contracts store the accept message");

        let close_tx = build_close_transaction(
            transactions,
            &contract.offer,
            &accept.payout_script_pubkey,
            terms.offer_payout,
        )?;

        let sighash = funding_spend_sighash(
            &close_tx,
            &transactions.funding_script,
            transactions.fund_output_value(),
        )?;
        let own_signature = self.signer.sign_ecdsa(sighash, wallet.fund_seckey)?;

        let Some(counterparty_signature) = terms.counterparty_signature else {
            log::info!(
                "contract {}: close proposed, offer payout {}",
                contract_id,
                terms.offer_payout,
            );
            return Ok(CloseOutput {
                transaction: close_tx,
                signature: own_signature,
                complete: false,
            });
        };

        let counterparty_pubkey = match contract.role {
            Role::Offerer => accept.funding_pubkey,
            Role::Acceptor => contract.offer.funding_pubkey,
        };
        if !self
            .signer
            .verify_ecdsa(sighash, counterparty_pubkey, &counterparty_signature)
        {
            return Err(Error::SignatureVerification {
                contract_id,
                kind: SignatureKind::Close,
            });
        }

        let (offer_sig, accept_sig) = match contract.role {
            Role::Offerer => (own_signature, counterparty_signature),
            Role::Acceptor => (counterparty_signature, own_signature),
        };
        let accept_pubkey = accept.funding_pubkey;
        let mut close_tx = close_tx;
        close_tx.input[0].witness = funding_spend_witness(
            &transactions.funding_script,
            contract.offer.funding_pubkey,
            accept_pubkey,
            &offer_sig,
            &accept_sig,
        )?;

        contract.state = ContractState::Closed;
        log::info!("contract {}: closed cooperatively", contract_id);
        Ok(CloseOutput {
            transaction: close_tx,
            signature: own_signature,
            complete: true,
        })
    }

    // -- Internals ----------------------------------------------------

    /// P2WPKH-sign this party's funding inputs, returning witness stacks
    /// aligned with `inputs`.
    fn sign_own_funding_inputs(
        &self,
        fund: &Transaction,
        inputs: &[FundingInput],
        wallet: &PartyWallet,
    ) -> Result<Vec<Vec<Vec<u8>>>, Error> {
        inputs
            .iter()
            .map(|input| {
                let input_index = fund_input_index(fund, input)?;
                let seckey = wallet.seckey_for(input)?;
                let pubkey = seckey.base_point_mul();
                if p2wpkh_script(pubkey) != input.script_pubkey {
                    return Err(Error::validation(
                        "funding input",
                        format!("{} is not spendable by our key", input.outpoint),
                    ));
                }
                let sighash = p2wpkh_sighash(fund, input_index, input)?;
                let signature = self.signer.sign_ecdsa(sighash, seckey)?;
                Ok(vec![
                    signature.witness_bytes()?,
                    pubkey.serialize().to_vec(),
                ])
            })
            .collect()
    }
}

fn event_base(contract_info: &ContractInfo) -> u16 {
    match &contract_info.oracle_info.primary().event.descriptor {
        EventDescriptor::DigitDecomposition { base, .. } => *base,
        EventDescriptor::Enumerated { .. } => 0,
    }
}

fn fund_input_index(fund: &Transaction, input: &FundingInput) -> Result<usize, Error> {
    fund.input
        .iter()
        .position(|tx_in| tx_in.previous_output == input.outpoint)
        .ok_or_else(|| {
            Error::validation(
                "funding input",
                format!("{} is not part of the funding transaction", input.outpoint),
            )
        })
}

fn p2wpkh_script(pubkey: Point) -> ScriptBuf {
    let hash = bitcoin::hashes::hash160::Hash::hash(&pubkey.serialize());
    ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_raw_hash(hash))
}

fn p2wpkh_sighash(
    fund: &Transaction,
    input_index: usize,
    input: &FundingInput,
) -> Result<[u8; 32], Error> {
    let sighash = SighashCache::new(fund)
        .p2wpkh_signature_hash(
            input_index,
            &input.script_pubkey,
            input.value,
            EcdsaSighashType::All,
        )
        .map_err(|e| Error::validation("funding input", e.to_string()))?;
    Ok(sighash.to_byte_array())
}

/// Check a counterparty's `[signature, pubkey]` witness against its
/// declared funding input.
fn verify_p2wpkh_witness<S: AdaptorSigner>(
    signer: &S,
    contract_id: ContractId,
    fund: &Transaction,
    input_index: usize,
    input: &FundingInput,
    witness: &[Vec<u8>],
) -> Result<(), Error> {
    let fail = || Error::SignatureVerification {
        contract_id,
        kind: SignatureKind::FundingInput { input_index },
    };

    let [sig_bytes, pubkey_bytes] = witness else {
        return Err(fail());
    };
    let pubkey = Point::from_slice(pubkey_bytes).map_err(|_| fail())?;
    if p2wpkh_script(pubkey) != input.script_pubkey {
        return Err(fail());
    }

    // Witness signatures are DER plus the sighash flag.
    let Some((&sighash_flag, der)) = sig_bytes.split_last() else {
        return Err(fail());
    };
    if sighash_flag != EcdsaSighashType::All as u8 {
        return Err(fail());
    }
    let signature = secp256k1_zkp::ecdsa::Signature::from_der(der).map_err(|_| fail())?;
    let compact = CompactEcdsaSignature(signature.serialize_compact());

    let sighash = p2wpkh_sighash(fund, input_index, input)?;
    if !signer.verify_ecdsa(sighash, pubkey, &compact) {
        return Err(fail());
    }
    Ok(())
}

/// The canonical cooperative close transaction: one input spending the
/// funding output, the offerer's exact payout, and the remainder minus
/// the close fee to the acceptor.
fn build_close_transaction(
    transactions: &DlcTransactions,
    offer: &OfferDlc,
    accept_payout_spk: &ScriptBuf,
    offer_payout: Amount,
) -> Result<Transaction, Error> {
    let available = transactions.fund_output_value();
    let fee_weight =
        CET_BASE_WEIGHT + 4 * (offer.payout_script_pubkey.len() + accept_payout_spk.len());
    let fee = weight_to_fee(fee_weight, offer.fee_terms().sat_per_vb());

    let after_fee = available
        .checked_sub(fee)
        .ok_or_else(|| Error::validation("close terms", "fee exceeds funding output"))?;
    let accept_payout = after_fee
        .checked_sub(offer_payout)
        .ok_or_else(|| {
            Error::validation(
                "close terms",
                format!("offer payout {} exceeds available {}", offer_payout, after_fee),
            )
        })?;

    let outputs: Vec<TxOut> = [
        TxOut {
            value: offer_payout,
            script_pubkey: offer.payout_script_pubkey.clone(),
        },
        TxOut {
            value: accept_payout,
            script_pubkey: accept_payout_spk.clone(),
        },
    ]
    .into_iter()
    .filter(|output| output.value >= DUST_LIMIT)
    .collect();
    if outputs.is_empty() {
        return Err(Error::validation("close terms", "all outputs below dust"));
    }

    Ok(Transaction {
        version: TX_VERSION,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: transactions.fund_outpoint(),
            script_sig: ScriptBuf::new(),
            sequence: SEQUENCE_IGNORE_LOCKTIME,
            witness: Witness::new(),
        }],
        output: outputs,
    })
}
