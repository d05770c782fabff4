//! The adaptor-signature lifecycle: creating, verifying, and decrypting
//! the oracle-conditioned signatures that bind each CET to its outcome
//! group.
//!
//! The cryptographic primitives live behind the narrow [`AdaptorSigner`]
//! boundary. The engine never touches curve arithmetic itself; it hands
//! sighashes, keys, and adaptor points across this interface and gets
//! opaque signature bytes back. [`ZkpSigner`] is the shipped
//! implementation, backed by libsecp256k1's ECDSA adaptor module.

use bitcoin::hashes::Hash as _;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, ScriptBuf, Transaction, Witness};
use secp::{Point, Scalar};
use secp256k1_zkp::{ecdsa, All, EcdsaAdaptorSignature, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};

use crate::consts::ADAPTOR_SIGNATURE_SIZE;
use crate::errors::{Error, SignatureKind};
use crate::ContractId;

/// An encrypted signature bound to one CET and one oracle outcome point.
/// Carries its discrete-log-equality proof, so it can be verified without
/// being decrypted.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AdaptorSignature(pub [u8; ADAPTOR_SIGNATURE_SIZE]);

impl AdaptorSignature {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; ADAPTOR_SIGNATURE_SIZE] = bytes.try_into().map_err(|_| {
            Error::validation(
                "adaptor signature",
                format!("expected {} bytes, got {}", ADAPTOR_SIGNATURE_SIZE, bytes.len()),
            )
        })?;
        Ok(AdaptorSignature(bytes))
    }
}

impl std::fmt::Debug for AdaptorSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "AdaptorSignature({})", hex::encode(self.0))
    }
}

impl Serialize for AdaptorSignature {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        serdect::array::serialize_hex_lower_or_bin(&self.0, ser)
    }
}

impl<'de> Deserialize<'de> for AdaptorSignature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut bytes = [0u8; ADAPTOR_SIGNATURE_SIZE];
        serdect::array::deserialize_hex_or_bin(&mut bytes, deserializer)?;
        Ok(AdaptorSignature(bytes))
    }
}

/// A plain ECDSA signature in 64-byte compact form.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CompactEcdsaSignature(pub [u8; 64]);

impl CompactEcdsaSignature {
    /// DER encoding with the `SIGHASH_ALL` byte appended, ready for a
    /// witness stack.
    pub fn witness_bytes(&self) -> Result<Vec<u8>, Error> {
        let signature = ecdsa::Signature::from_compact(&self.0)
            .map_err(|_| Error::validation("signature", "not a valid compact ECDSA signature"))?;
        let mut bytes = signature.serialize_der().to_vec();
        bytes.push(EcdsaSighashType::All as u8);
        Ok(bytes)
    }
}

impl std::fmt::Debug for CompactEcdsaSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "CompactEcdsaSignature({})", hex::encode(self.0))
    }
}

impl Serialize for CompactEcdsaSignature {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        serdect::array::serialize_hex_lower_or_bin(&self.0, ser)
    }
}

impl<'de> Deserialize<'de> for CompactEcdsaSignature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut bytes = [0u8; 64];
        serdect::array::deserialize_hex_or_bin(&mut bytes, deserializer)?;
        Ok(CompactEcdsaSignature(bytes))
    }
}

/// The external signing boundary. Implementations must be fully
/// initialized before they are handed to the engine; no operation is
/// exposed until then, so nothing in the protocol ever waits on a
/// half-constructed backend.
pub trait AdaptorSigner {
    /// Produce a plain ECDSA signature over a sighash.
    fn sign_ecdsa(&self, sighash: [u8; 32], seckey: Scalar)
        -> Result<CompactEcdsaSignature, Error>;

    /// Verify a plain ECDSA signature over a sighash.
    fn verify_ecdsa(
        &self,
        sighash: [u8; 32],
        pubkey: Point,
        signature: &CompactEcdsaSignature,
    ) -> bool;

    /// Create an adaptor signature over `sighash`, encrypted under
    /// `adaptor_point`.
    fn create_adaptor_signature(
        &self,
        sighash: [u8; 32],
        seckey: Scalar,
        adaptor_point: Point,
    ) -> Result<AdaptorSignature, Error>;

    /// Check an adaptor signature and its proof against the signer's
    /// public key and the adaptor point, without decrypting it.
    fn verify_adaptor_signature(
        &self,
        sighash: [u8; 32],
        pubkey: Point,
        adaptor_point: Point,
        signature: &AdaptorSignature,
    ) -> bool;

    /// Decrypt an adaptor signature into a valid ECDSA signature using
    /// the adaptor secret (the discrete log of the adaptor point).
    fn decrypt_adaptor_signature(
        &self,
        signature: &AdaptorSignature,
        secret: Scalar,
    ) -> Result<CompactEcdsaSignature, Error>;

    /// Recover the adaptor secret from an adaptor signature and its
    /// decryption. This is how a party that sees the counterparty's
    /// settlement on-chain learns the attestation secret.
    fn recover_adaptor_secret(
        &self,
        signature: &AdaptorSignature,
        decrypted: &CompactEcdsaSignature,
        adaptor_point: Point,
    ) -> Result<Scalar, Error>;
}

/// [`AdaptorSigner`] implementation over libsecp256k1's ECDSA adaptor
/// module. Constructing it performs all context initialization up front.
pub struct ZkpSigner {
    secp: Secp256k1<All>,
}

impl ZkpSigner {
    pub fn new() -> Self {
        ZkpSigner {
            secp: Secp256k1::new(),
        }
    }
}

impl Default for ZkpSigner {
    fn default() -> Self {
        ZkpSigner::new()
    }
}

fn to_secret_key(seckey: Scalar) -> Result<SecretKey, Error> {
    SecretKey::from_slice(&seckey.serialize())
        .map_err(|_| Error::validation("secret key", "scalar is not a valid secret key"))
}

fn to_public_key(point: Point) -> Result<PublicKey, Error> {
    PublicKey::from_slice(&point.serialize())
        .map_err(|_| Error::validation("public key", "point is not a valid public key"))
}

impl AdaptorSigner for ZkpSigner {
    fn sign_ecdsa(
        &self,
        sighash: [u8; 32],
        seckey: Scalar,
    ) -> Result<CompactEcdsaSignature, Error> {
        let message = Message::from_digest(sighash);
        let signature = self.secp.sign_ecdsa(&message, &to_secret_key(seckey)?);
        Ok(CompactEcdsaSignature(signature.serialize_compact()))
    }

    fn verify_ecdsa(
        &self,
        sighash: [u8; 32],
        pubkey: Point,
        signature: &CompactEcdsaSignature,
    ) -> bool {
        let Ok(signature) = ecdsa::Signature::from_compact(&signature.0) else {
            return false;
        };
        let Ok(pubkey) = to_public_key(pubkey) else {
            return false;
        };
        let message = Message::from_digest(sighash);
        self.secp.verify_ecdsa(&message, &signature, &pubkey).is_ok()
    }

    fn create_adaptor_signature(
        &self,
        sighash: [u8; 32],
        seckey: Scalar,
        adaptor_point: Point,
    ) -> Result<AdaptorSignature, Error> {
        let message = Message::from_digest(sighash);
        let signature = EcdsaAdaptorSignature::encrypt_no_aux_rand(
            &self.secp,
            &message,
            &to_secret_key(seckey)?,
            &to_public_key(adaptor_point)?,
        );
        AdaptorSignature::from_slice(signature.as_ref())
    }

    fn verify_adaptor_signature(
        &self,
        sighash: [u8; 32],
        pubkey: Point,
        adaptor_point: Point,
        signature: &AdaptorSignature,
    ) -> bool {
        let Ok(signature) = EcdsaAdaptorSignature::from_slice(&signature.0) else {
            return false;
        };
        let (Ok(pubkey), Ok(adaptor_point)) = (to_public_key(pubkey), to_public_key(adaptor_point))
        else {
            return false;
        };
        let message = Message::from_digest(sighash);
        signature
            .verify(&self.secp, &message, &pubkey, &adaptor_point)
            .is_ok()
    }

    fn decrypt_adaptor_signature(
        &self,
        signature: &AdaptorSignature,
        secret: Scalar,
    ) -> Result<CompactEcdsaSignature, Error> {
        let signature = EcdsaAdaptorSignature::from_slice(&signature.0)
            .map_err(|_| Error::validation("adaptor signature", "malformed signature bytes"))?;
        let decrypted = signature
            .decrypt(&to_secret_key(secret)?)
            .map_err(|_| Error::validation("adaptor signature", "decryption failed"))?;
        Ok(CompactEcdsaSignature(decrypted.serialize_compact()))
    }

    fn recover_adaptor_secret(
        &self,
        signature: &AdaptorSignature,
        decrypted: &CompactEcdsaSignature,
        adaptor_point: Point,
    ) -> Result<Scalar, Error> {
        let signature = EcdsaAdaptorSignature::from_slice(&signature.0)
            .map_err(|_| Error::validation("adaptor signature", "malformed signature bytes"))?;
        let decrypted = ecdsa::Signature::from_compact(&decrypted.0)
            .map_err(|_| Error::validation("signature", "not a valid compact ECDSA signature"))?;
        let secret = signature
            .recover(&self.secp, &decrypted, &to_public_key(adaptor_point)?)
            .map_err(|_| {
                Error::validation("adaptor signature", "decryption does not match signature")
            })?;
        Ok(Scalar::from_slice(&secret.secret_bytes())?)
    }
}

/// The BIP143 sighash for spending the P2WSH funding output with the
/// given transaction.
pub fn funding_spend_sighash(
    spending_tx: &Transaction,
    funding_script: &ScriptBuf,
    fund_value: Amount,
) -> Result<[u8; 32], Error> {
    let sighash = SighashCache::new(spending_tx)
        .p2wsh_signature_hash(0, funding_script, fund_value, EcdsaSighashType::All)
        .map_err(|e| Error::validation("sighash", e.to_string()))?;
    Ok(sighash.to_byte_array())
}

/// Create one adaptor signature per CET, each encrypted under its
/// outcome group's adaptor point.
pub fn sign_cets<S: AdaptorSigner>(
    signer: &S,
    cets: &[Transaction],
    funding_script: &ScriptBuf,
    fund_value: Amount,
    adaptor_points: &[Point],
    seckey: Scalar,
) -> Result<Vec<AdaptorSignature>, Error> {
    if adaptor_points.len() != cets.len() {
        return Err(Error::validation(
            "adaptor points",
            format!("{} points for {} CETs", adaptor_points.len(), cets.len()),
        ));
    }
    cets.iter()
        .zip(adaptor_points)
        .map(|(cet, &point)| {
            let sighash = funding_spend_sighash(cet, funding_script, fund_value)?;
            signer.create_adaptor_signature(sighash, seckey, point)
        })
        .collect()
}

/// Verify a counterparty's full CET adaptor signature batch. Fails closed
/// on the first invalid signature, reporting which CET it covers.
pub fn verify_cet_signatures<S: AdaptorSigner>(
    signer: &S,
    contract_id: ContractId,
    cets: &[Transaction],
    funding_script: &ScriptBuf,
    fund_value: Amount,
    adaptor_points: &[Point],
    counterparty_pubkey: Point,
    signatures: &[AdaptorSignature],
) -> Result<(), Error> {
    if signatures.len() != cets.len() || adaptor_points.len() != cets.len() {
        return Err(Error::validation(
            "cet adaptor signatures",
            format!("{} signatures for {} CETs", signatures.len(), cets.len()),
        ));
    }
    for (cet_index, ((cet, &point), signature)) in
        cets.iter().zip(adaptor_points).zip(signatures).enumerate()
    {
        let sighash = funding_spend_sighash(cet, funding_script, fund_value)?;
        if !signer.verify_adaptor_signature(sighash, counterparty_pubkey, point, signature) {
            log::warn!(
                "contract {}: CET {} adaptor signature failed verification",
                contract_id,
                cet_index
            );
            return Err(Error::SignatureVerification {
                contract_id,
                kind: SignatureKind::CetAdaptor { cet_index },
            });
        }
    }
    Ok(())
}

/// Sign the refund transaction's funding input.
pub fn sign_refund<S: AdaptorSigner>(
    signer: &S,
    refund: &Transaction,
    funding_script: &ScriptBuf,
    fund_value: Amount,
    seckey: Scalar,
) -> Result<CompactEcdsaSignature, Error> {
    let sighash = funding_spend_sighash(refund, funding_script, fund_value)?;
    signer.sign_ecdsa(sighash, seckey)
}

/// Verify a counterparty's refund signature.
pub fn verify_refund_signature<S: AdaptorSigner>(
    signer: &S,
    contract_id: ContractId,
    refund: &Transaction,
    funding_script: &ScriptBuf,
    fund_value: Amount,
    counterparty_pubkey: Point,
    signature: &CompactEcdsaSignature,
) -> Result<(), Error> {
    let sighash = funding_spend_sighash(refund, funding_script, fund_value)?;
    if !signer.verify_ecdsa(sighash, counterparty_pubkey, signature) {
        log::warn!("contract {}: refund signature failed verification", contract_id);
        return Err(Error::SignatureVerification {
            contract_id,
            kind: SignatureKind::Refund,
        });
    }
    Ok(())
}

/// Assemble the witness spending the 2-of-2 funding output:
/// `<> <sig> <sig> <witness script>`, with signatures in the script's
/// key order.
pub fn funding_spend_witness(
    funding_script: &ScriptBuf,
    offer_pubkey: Point,
    accept_pubkey: Point,
    offer_signature: &CompactEcdsaSignature,
    accept_signature: &CompactEcdsaSignature,
) -> Result<Witness, Error> {
    let (first, second) = if offer_pubkey <= accept_pubkey {
        (offer_signature, accept_signature)
    } else {
        (accept_signature, offer_signature)
    };

    let mut witness = Witness::new();
    witness.push(Vec::<u8>::new()); // CHECKMULTISIG's off-by-one pop
    witness.push(first.witness_bytes()?);
    witness.push(second.witness_bytes()?);
    witness.push(funding_script.as_bytes());
    Ok(witness)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> ZkpSigner {
        ZkpSigner::new()
    }

    fn seckey(n: u32) -> Scalar {
        Scalar::try_from(n as u128).unwrap()
    }

    #[test]
    fn adaptor_signature_lifecycle() {
        let signer = signer();
        let sighash = crate::sha256(b"some cet sighash");
        let signing_key = seckey(1111);
        let adaptor_secret = seckey(2222);
        let adaptor_point = adaptor_secret.base_point_mul();

        let adaptor_sig = signer
            .create_adaptor_signature(sighash, signing_key, adaptor_point)
            .unwrap();
        assert!(signer.verify_adaptor_signature(
            sighash,
            signing_key.base_point_mul(),
            adaptor_point,
            &adaptor_sig,
        ));

        // Decryption yields a signature valid under the signing key.
        let decrypted = signer
            .decrypt_adaptor_signature(&adaptor_sig, adaptor_secret)
            .unwrap();
        assert!(signer.verify_ecdsa(sighash, signing_key.base_point_mul(), &decrypted));

        // And the secret is recoverable from the pair.
        let recovered = signer
            .recover_adaptor_secret(&adaptor_sig, &decrypted, adaptor_point)
            .unwrap();
        assert_eq!(recovered, adaptor_secret);
    }

    #[test]
    fn mutated_adaptor_signature_fails_verification() {
        let signer = signer();
        let sighash = crate::sha256(b"another sighash");
        let signing_key = seckey(1111);
        let adaptor_point = seckey(2222).base_point_mul();

        let adaptor_sig = signer
            .create_adaptor_signature(sighash, signing_key, adaptor_point)
            .unwrap();

        for byte_index in [0, 33, 65, 97, 161] {
            let mut mutated = adaptor_sig;
            mutated.0[byte_index] ^= 0x01;
            assert!(
                !signer.verify_adaptor_signature(
                    sighash,
                    signing_key.base_point_mul(),
                    adaptor_point,
                    &mutated,
                ),
                "flipping byte {} must invalidate the signature",
                byte_index
            );
        }
    }

    #[test]
    fn wrong_secret_does_not_decrypt_to_valid_signature() {
        let signer = signer();
        let sighash = crate::sha256(b"sighash");
        let signing_key = seckey(1111);
        let adaptor_point = seckey(2222).base_point_mul();

        let adaptor_sig = signer
            .create_adaptor_signature(sighash, signing_key, adaptor_point)
            .unwrap();
        let decrypted = signer
            .decrypt_adaptor_signature(&adaptor_sig, seckey(3333))
            .unwrap();
        assert!(!signer.verify_ecdsa(sighash, signing_key.base_point_mul(), &decrypted));
    }

    #[test]
    fn verification_is_bound_to_the_adaptor_point() {
        let signer = signer();
        let sighash = crate::sha256(b"sighash");
        let signing_key = seckey(1111);

        let adaptor_sig = signer
            .create_adaptor_signature(sighash, signing_key, seckey(2222).base_point_mul())
            .unwrap();
        assert!(!signer.verify_adaptor_signature(
            sighash,
            signing_key.base_point_mul(),
            seckey(4444).base_point_mul(),
            &adaptor_sig,
        ));
    }
}
