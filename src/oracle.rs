//! Oracle announcements, attestations, and the signature-point math which
//! binds CET adaptor signatures to outcomes the oracle has not yet signed.

use secp::{MaybePoint, MaybeScalar, Point, Scalar};
use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use crate::errors::Error;
use crate::messages::wire::{type_ids, Reader, Writer};
use crate::payout::{decompose_value, OutcomeClaim};
use crate::sha256;

/// A BIP340 Schnorr signature: the 32-byte nonce x-coordinate followed by
/// the 32-byte `s` scalar.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SchnorrSignature(pub [u8; 64]);

impl SchnorrSignature {
    /// The `s` half of the signature. For an oracle attestation signature
    /// this scalar is the adaptor decryption secret for its digit.
    pub fn scalar(&self) -> Result<MaybeScalar, Error> {
        MaybeScalar::from_slice(&self.0[32..])
            .map_err(|_| Error::validation("attestation signature", "s overflows the curve order"))
    }

    fn nonce_x(&self) -> [u8; 32] {
        self.0[..32].try_into().expect("half of 64")
    }
}

impl std::fmt::Debug for SchnorrSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "SchnorrSignature({})", hex::encode(self.0))
    }
}

impl Serialize for SchnorrSignature {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        serdect::array::serialize_hex_lower_or_bin(&self.0, ser)
    }
}

impl<'de> Deserialize<'de> for SchnorrSignature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut bytes = [0u8; 64];
        serdect::array::deserialize_hex_or_bin(&mut bytes, deserializer)?;
        Ok(SchnorrSignature(bytes))
    }
}

/// The message an oracle signs when attesting to one outcome string.
pub(crate) fn attestation_message(outcome: &str) -> [u8; 32] {
    tagged_hash(b"DLC/oracle/attestation/v0", outcome.as_bytes())
}

fn tagged_hash(tag: &[u8], input: &[u8]) -> [u8; 32] {
    let tag_digest = sha256(tag);
    sha2::Sha256::new()
        .chain_update(tag_digest)
        .chain_update(tag_digest)
        .chain_update(input)
        .finalize()
        .into()
}

/// The BIP340 challenge scalar `e = H_tag(R_x || P_x || m)`.
fn bip340_challenge(nonce_x: &[u8; 32], pubkey_x: &[u8; 32], message: &[u8; 32]) -> MaybeScalar {
    let tag_digest = sha256(b"BIP0340/challenge");
    let digest: [u8; 32] = sha2::Sha256::new()
        .chain_update(tag_digest)
        .chain_update(tag_digest)
        .chain_update(nonce_x)
        .chain_update(pubkey_x)
        .chain_update(message)
        .finalize()
        .into();
    MaybeScalar::reduce_from(&digest)
}

/// Render one digit in the oracle's numeric base, matching how numeric
/// oracles publish outcome strings (one lowercase alphanumeric per digit).
pub(crate) fn digit_string(digit: u16, base: u16) -> String {
    char::from_digit(digit as u32, base as u32)
        .expect("digit below base")
        .to_string()
}

/// Describes the shape of the event an oracle will attest to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventDescriptor {
    /// A closed set of outcome labels; the oracle signs exactly one.
    Enumerated {
        /// The possible outcome labels.
        outcomes: Vec<String>,
    },

    /// A numeric outcome in `[0, base^nb_digits)`, attested digit by
    /// digit so CETs can cover digit-prefix groups.
    DigitDecomposition {
        /// Radix of the decomposition, 2 through 36.
        base: u16,
        /// Whether a sign digit precedes the value digits. Signed events
        /// are announced by some oracles but are not supported here.
        is_signed: bool,
        /// Human-readable unit of the measured quantity, e.g. "BTC-USD".
        unit: String,
        /// Power-of-ten shift applied by the oracle before decomposing.
        precision: i32,
        /// Number of digits the oracle signs.
        nb_digits: u16,
    },
}

impl EventDescriptor {
    /// Number of nonces the announcement must commit to.
    pub fn nonce_count(&self) -> usize {
        match self {
            EventDescriptor::Enumerated { .. } => 1,
            EventDescriptor::DigitDecomposition { nb_digits, .. } => *nb_digits as usize,
        }
    }

    /// Size of the numeric outcome domain, `base^nb_digits`.
    /// `None` for enumerated events.
    pub fn domain_size(&self) -> Option<u64> {
        match self {
            EventDescriptor::Enumerated { .. } => None,
            EventDescriptor::DigitDecomposition {
                base, nb_digits, ..
            } => (*base as u64).checked_pow(*nb_digits as u32),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        match self {
            EventDescriptor::Enumerated { outcomes } => {
                if outcomes.is_empty() {
                    return Err(Error::validation("event descriptor", "no outcomes"));
                }
                let unique: std::collections::BTreeSet<&String> = outcomes.iter().collect();
                if unique.len() != outcomes.len() {
                    return Err(Error::validation("event descriptor", "duplicate outcomes"));
                }
            }
            EventDescriptor::DigitDecomposition {
                base,
                is_signed,
                nb_digits,
                ..
            } => {
                if !(2..=36).contains(base) {
                    return Err(Error::validation(
                        "event descriptor",
                        format!("base {} out of range", base),
                    ));
                }
                if *is_signed {
                    return Err(Error::validation(
                        "event descriptor",
                        "signed decomposition is not supported",
                    ));
                }
                if *nb_digits == 0 || self.domain_size().is_none() {
                    return Err(Error::validation(
                        "event descriptor",
                        format!("domain {}^{} is empty or overflows", base, nb_digits),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// The event half of an oracle announcement: the committed nonces and
/// what they will be used to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleEvent {
    /// Nonce points the oracle committed to, one per attestation digit.
    pub nonce_points: Vec<Point>,

    /// Unix timestamp at which the oracle intends to attest.
    pub maturity_epoch: u32,

    /// Shape of the outcome being attested.
    pub descriptor: EventDescriptor,

    /// Oracle-scoped identifier for this event.
    pub event_id: String,
}

impl OracleEvent {
    /// The bytes the oracle signs when announcing this event.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        write_oracle_event(&mut w, self);
        w.into_bytes()
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.descriptor.validate()?;
        if self.nonce_points.len() != self.descriptor.nonce_count() {
            return Err(Error::validation(
                "oracle event",
                format!(
                    "{} nonces committed, descriptor needs {}",
                    self.nonce_points.len(),
                    self.descriptor.nonce_count()
                ),
            ));
        }
        Ok(())
    }
}

/// An oracle's signed announcement of a future event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleAnnouncement {
    /// BIP340 signature by `oracle_pubkey` over the serialized event.
    pub announcement_signature: SchnorrSignature,

    /// The signing oracle's public key (x-only semantics).
    pub oracle_pubkey: Point,

    /// The announced event.
    pub event: OracleEvent,
}

impl OracleAnnouncement {
    /// Validate the event shape and verify the announcement signature.
    pub fn validate(&self) -> Result<(), Error> {
        self.event.validate()?;
        let digest = sha256(&self.event.signable_bytes());
        if !verify_schnorr(&self.announcement_signature, &digest, self.oracle_pubkey) {
            return Err(Error::validation(
                "oracle announcement",
                "announcement signature does not verify",
            ));
        }
        Ok(())
    }

    /// Computes the oracle's signature point for one attestation digit:
    /// `S = R + eD`, the public image of the scalar the oracle will
    /// reveal by signing `outcome` with its committed nonce.
    pub fn outcome_sig_point(
        &self,
        nonce_index: usize,
        outcome: &str,
    ) -> Result<MaybePoint, Error> {
        let nonce_point = *self.event.nonce_points.get(nonce_index).ok_or_else(|| {
            Error::validation(
                "oracle announcement",
                format!("no nonce at index {}", nonce_index),
            )
        })?;

        let e = bip340_challenge(
            &nonce_point.serialize_xonly(),
            &self.oracle_pubkey.serialize_xonly(),
            &attestation_message(outcome),
        );

        Ok(nonce_point.to_even_y() + e * self.oracle_pubkey.to_even_y())
    }

    /// The aggregate adaptor point locking a CET to this oracle attesting
    /// an outcome covered by `claim`: the sum of the sig points of every
    /// digit the claim fixes.
    pub fn adaptor_point(&self, claim: &OutcomeClaim) -> Result<MaybePoint, Error> {
        match claim {
            OutcomeClaim::Enumerated(label) => self.outcome_sig_point(0, label),
            OutcomeClaim::DigitPrefix(digits) => {
                let base = match &self.event.descriptor {
                    EventDescriptor::DigitDecomposition { base, .. } => *base,
                    EventDescriptor::Enumerated { .. } => {
                        return Err(Error::validation(
                            "outcome claim",
                            "digit prefix claim against an enumerated event",
                        ));
                    }
                };
                let mut sum = MaybePoint::Infinity;
                for (i, &digit) in digits.iter().enumerate() {
                    sum = sum + self.outcome_sig_point(i, &digit_string(digit, base))?;
                }
                Ok(sum)
            }
        }
    }

    /// Sig points for every (nonce index, digit) pair of a numeric
    /// event. Computing these once keeps the per-CET adaptor point a
    /// handful of point additions instead of fresh challenge math.
    fn digit_sig_points(&self, base: u16) -> Result<Vec<Vec<MaybePoint>>, Error> {
        self.event
            .nonce_points
            .iter()
            .enumerate()
            .map(|(nonce_index, _)| {
                (0..base)
                    .map(|digit| self.outcome_sig_point(nonce_index, &digit_string(digit, base)))
                    .collect()
            })
            .collect()
    }

    /// Produce the attestation for the given outcome strings, using the
    /// oracle's secret key and committed secret nonces. Returns `None` if
    /// the secrets do not match the announcement. This is the oracle side
    /// of the protocol; contract parties only ever verify.
    pub fn attestation(
        &self,
        oracle_seckey: impl Into<Scalar>,
        secnonces: &[Scalar],
        outcomes: Vec<String>,
    ) -> Option<OracleAttestation> {
        let oracle_seckey = oracle_seckey.into();
        // Identities are x-only: compare coordinates, and take negation
        // parities from the actual derived points.
        let pubkey_point = oracle_seckey.base_point_mul();
        if pubkey_point.serialize_xonly() != self.oracle_pubkey.serialize_xonly() {
            return None;
        }
        if secnonces.len() != self.event.nonce_points.len() || outcomes.len() != secnonces.len() {
            return None;
        }

        let d = oracle_seckey.negate_if(pubkey_point.parity());
        let pubkey_x = pubkey_point.serialize_xonly();

        let mut signatures = Vec::with_capacity(outcomes.len());
        for ((&secnonce, nonce_point), outcome) in
            secnonces.iter().zip(&self.event.nonce_points).zip(&outcomes)
        {
            let secnonce_point = secnonce.base_point_mul();
            if secnonce_point.serialize_xonly() != nonce_point.serialize_xonly() {
                return None;
            }
            let k = secnonce.negate_if(secnonce_point.parity());
            let nonce_x = secnonce_point.serialize_xonly();
            let e = bip340_challenge(&nonce_x, &pubkey_x, &attestation_message(outcome));

            let s = match k + e * d {
                MaybeScalar::Valid(s) => s,
                MaybeScalar::Zero => return None,
            };

            let mut sig = [0u8; 64];
            sig[..32].copy_from_slice(&nonce_x);
            sig[32..].copy_from_slice(&s.serialize());
            signatures.push(SchnorrSignature(sig));
        }

        Some(OracleAttestation {
            event_id: self.event.event_id.clone(),
            oracle_pubkey: self.oracle_pubkey,
            signatures,
            outcomes,
        })
    }

    /// Attest to a numeric outcome value, decomposing it into the
    /// announced digit base.
    pub fn attestation_for_value(
        &self,
        oracle_seckey: impl Into<Scalar>,
        secnonces: &[Scalar],
        value: u64,
    ) -> Option<OracleAttestation> {
        let (base, nb_digits) = match &self.event.descriptor {
            EventDescriptor::DigitDecomposition {
                base, nb_digits, ..
            } => (*base, *nb_digits),
            EventDescriptor::Enumerated { .. } => return None,
        };
        let outcomes = decompose_value(value, base, nb_digits)?
            .into_iter()
            .map(|digit| digit_string(digit, base))
            .collect();
        self.attestation(oracle_seckey, secnonces, outcomes)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        write_announcement(&mut w, self);
        w.into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(bytes);
        let announcement = read_announcement(&mut r)?;
        r.finish("end of oracle announcement")?;
        Ok(announcement)
    }
}

/// The oracle terms a contract commits to. Multiple oracles are
/// unanimous: adaptor points aggregate every oracle's sig point, and
/// settlement requires an attestation from each of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OracleInfo {
    /// A single attesting oracle.
    Single(OracleAnnouncement),

    /// Several oracles which must all attest to the same outcome.
    Multi {
        /// The participating oracles' announcements.
        announcements: Vec<OracleAnnouncement>,
    },
}

impl OracleInfo {
    /// All announcements, in aggregation order.
    pub fn announcements(&self) -> &[OracleAnnouncement] {
        match self {
            OracleInfo::Single(announcement) => std::slice::from_ref(announcement),
            OracleInfo::Multi { announcements } => announcements,
        }
    }

    /// The announcement whose event descriptor defines the outcome
    /// domain. All others must announce an identically shaped event.
    pub fn primary(&self) -> &OracleAnnouncement {
        &self.announcements()[0]
    }

    pub fn validate(&self) -> Result<(), Error> {
        let announcements = self.announcements();
        if announcements.is_empty() {
            return Err(Error::validation("oracle info", "no announcements"));
        }
        for announcement in announcements {
            announcement.validate()?;
        }
        let descriptor = &self.primary().event.descriptor;
        if announcements
            .iter()
            .any(|a| &a.event.descriptor != descriptor)
        {
            return Err(Error::validation(
                "oracle info",
                "oracles announce differently shaped events",
            ));
        }
        Ok(())
    }

    /// The adaptor point for one CET: the sum over all oracles of the
    /// claim's aggregate sig point.
    pub fn adaptor_point(&self, claim: &OutcomeClaim) -> Result<Point, Error> {
        let mut sum = MaybePoint::Infinity;
        for announcement in self.announcements() {
            sum = sum + announcement.adaptor_point(claim)?;
        }
        match sum {
            MaybePoint::Valid(point) => Ok(point),
            MaybePoint::Infinity => Err(Error::validation(
                "adaptor point",
                "outcome sig points sum to infinity",
            )),
        }
    }

    /// Adaptor points for a whole CET list at once. Digit sig points are
    /// computed once per oracle and reused across claims, which is what
    /// makes thousands of digit-prefix CETs affordable.
    pub fn adaptor_points(&self, claims: &[OutcomeClaim]) -> Result<Vec<Point>, Error> {
        let base = match &self.primary().event.descriptor {
            EventDescriptor::DigitDecomposition { base, .. } => *base,
            // Enumerated events have few claims; no table needed.
            EventDescriptor::Enumerated { .. } => {
                return claims.iter().map(|claim| self.adaptor_point(claim)).collect();
            }
        };

        let tables = self
            .announcements()
            .iter()
            .map(|announcement| announcement.digit_sig_points(base))
            .collect::<Result<Vec<_>, _>>()?;

        claims
            .iter()
            .map(|claim| {
                let digits = match claim {
                    OutcomeClaim::DigitPrefix(digits) => digits,
                    OutcomeClaim::Enumerated(_) => {
                        return Err(Error::validation(
                            "outcome claim",
                            "enumerated claim against a numeric event",
                        ));
                    }
                };
                let mut sum = MaybePoint::Infinity;
                for table in &tables {
                    for (nonce_index, &digit) in digits.iter().enumerate() {
                        let sig_point = table
                            .get(nonce_index)
                            .and_then(|row| row.get(digit as usize))
                            .ok_or_else(|| {
                                Error::validation(
                                    "outcome claim",
                                    format!("digit {} at {} outside the event", digit, nonce_index),
                                )
                            })?;
                        sum = sum + *sig_point;
                    }
                }
                match sum {
                    MaybePoint::Valid(point) => Ok(point),
                    MaybePoint::Infinity => Err(Error::validation(
                        "adaptor point",
                        "outcome sig points sum to infinity",
                    )),
                }
            })
            .collect()
    }
}

/// An oracle's published attestation: the signatures whose `s` values
/// decrypt the winning CET's adaptor signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleAttestation {
    /// Identifier of the attested event.
    pub event_id: String,

    /// The attesting oracle's public key.
    pub oracle_pubkey: Point,

    /// One BIP340 signature per revealed outcome string.
    pub signatures: Vec<SchnorrSignature>,

    /// The revealed outcome: a single label for enumerated events, or
    /// one digit string per signed digit for numeric events.
    pub outcomes: Vec<String>,
}

impl OracleAttestation {
    /// Check this attestation against the announcement it claims to
    /// fulfil: identity, outcome domain, nonce commitments, and every
    /// Schnorr signature.
    pub fn verify_against(&self, announcement: &OracleAnnouncement) -> Result<(), Error> {
        if self.event_id != announcement.event.event_id {
            return Err(Error::validation(
                "attestation",
                format!("event id \"{}\" does not match announcement", self.event_id),
            ));
        }
        if self.oracle_pubkey.serialize_xonly() != announcement.oracle_pubkey.serialize_xonly() {
            return Err(Error::validation(
                "attestation",
                "oracle pubkey does not match announcement",
            ));
        }
        if self.outcomes.len() != self.signatures.len() {
            return Err(Error::validation(
                "attestation",
                "outcome and signature counts differ",
            ));
        }

        match &announcement.event.descriptor {
            EventDescriptor::Enumerated { outcomes } => {
                if self.outcomes.len() != 1 {
                    return Err(Error::validation(
                        "attestation",
                        "enumerated events attest exactly one outcome",
                    ));
                }
                if !outcomes.contains(&self.outcomes[0]) {
                    return Err(Error::validation(
                        "attestation",
                        format!("\"{}\" is not an announced outcome", self.outcomes[0]),
                    ));
                }
            }
            EventDescriptor::DigitDecomposition {
                base, nb_digits, ..
            } => {
                if self.outcomes.len() != *nb_digits as usize {
                    return Err(Error::validation(
                        "attestation",
                        format!(
                            "{} digits attested, event has {}",
                            self.outcomes.len(),
                            nb_digits
                        ),
                    ));
                }
                self.digits(*base)?;
            }
        }

        for (i, (signature, outcome)) in self.signatures.iter().zip(&self.outcomes).enumerate() {
            let nonce_point = announcement.event.nonce_points[i];
            if signature.nonce_x() != nonce_point.serialize_xonly() {
                return Err(Error::validation(
                    "attestation",
                    format!("signature {} does not use the committed nonce", i),
                ));
            }
            let digest = attestation_message(outcome);
            if !verify_schnorr(signature, &digest, self.oracle_pubkey) {
                return Err(Error::validation(
                    "attestation",
                    format!("signature {} does not verify", i),
                ));
            }
        }
        Ok(())
    }

    /// The revealed digits of a numeric attestation.
    pub fn digits(&self, base: u16) -> Result<Vec<u16>, Error> {
        if !(2..=36).contains(&base) {
            return Err(Error::validation(
                "attestation",
                format!("base {} out of range", base),
            ));
        }
        self.outcomes
            .iter()
            .map(|s| {
                if s.len() == 1 {
                    if let Some(digit) = u16::from_str_radix(s, base as u32).ok() {
                        if digit < base {
                            return Ok(digit);
                        }
                    }
                }
                Err(Error::validation(
                    "attestation",
                    format!("\"{}\" is not a base-{} digit", s, base),
                ))
            })
            .collect()
    }

    /// The numeric outcome value the attestation reveals.
    pub fn outcome_value(&self, base: u16) -> Result<u64, Error> {
        let digits = self.digits(base)?;
        Ok(digits
            .iter()
            .fold(0u64, |acc, &d| acc * base as u64 + d as u64))
    }

    /// Whether this attestation's revealed outcome falls under `claim`.
    pub fn matches_claim(&self, claim: &OutcomeClaim, base: u16) -> bool {
        match claim {
            OutcomeClaim::Enumerated(label) => {
                self.outcomes.len() == 1 && &self.outcomes[0] == label
            }
            OutcomeClaim::DigitPrefix(prefix) => match self.digits(base) {
                Ok(digits) => {
                    prefix.len() <= digits.len() && digits[..prefix.len()] == prefix[..]
                }
                Err(_) => false,
            },
        }
    }

    /// The adaptor decryption secret this attestation reveals for a CET
    /// claiming `claim`: the sum of the `s` scalars of the signatures
    /// over the digits the claim fixes.
    pub fn adaptor_secret(&self, claim: &OutcomeClaim) -> Result<MaybeScalar, Error> {
        let fixed = match claim {
            OutcomeClaim::Enumerated(_) => 1,
            OutcomeClaim::DigitPrefix(prefix) => prefix.len(),
        };
        if fixed > self.signatures.len() {
            return Err(Error::validation(
                "attestation",
                "claim fixes more digits than were attested",
            ));
        }
        let mut sum = MaybeScalar::Zero;
        for signature in &self.signatures[..fixed] {
            sum = sum + signature.scalar()?;
        }
        Ok(sum)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        write_attestation(&mut w, self);
        w.into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(bytes);
        let attestation = read_attestation(&mut r)?;
        r.finish("end of oracle attestation")?;
        Ok(attestation)
    }
}

fn verify_schnorr(signature: &SchnorrSignature, digest: &[u8; 32], pubkey: Point) -> bool {
    let Ok(sig) = secp256k1::schnorr::Signature::from_slice(&signature.0) else {
        return false;
    };
    let Ok(xonly) = secp256k1::XOnlyPublicKey::from_slice(&pubkey.serialize_xonly()) else {
        return false;
    };
    let message = secp256k1::Message::from_digest(*digest);
    secp256k1::SECP256K1
        .verify_schnorr(&sig, &message, &xonly)
        .is_ok()
}

// Wire encoding. Field order matches declaration order throughout.

fn write_event_descriptor(w: &mut Writer, descriptor: &EventDescriptor) {
    match descriptor {
        EventDescriptor::Enumerated { outcomes } => {
            w.write_u16(type_ids::ENUM_EVENT_DESCRIPTOR);
            w.write_bigsize(outcomes.len() as u64);
            for outcome in outcomes {
                w.write_string(outcome);
            }
        }
        EventDescriptor::DigitDecomposition {
            base,
            is_signed,
            unit,
            precision,
            nb_digits,
        } => {
            w.write_u16(type_ids::DIGIT_EVENT_DESCRIPTOR);
            w.write_u16(*base);
            w.write_u8(*is_signed as u8);
            w.write_string(unit);
            w.write_u32(*precision as u32);
            w.write_u16(*nb_digits);
        }
    }
}

fn read_event_descriptor(r: &mut Reader) -> Result<EventDescriptor, Error> {
    match r.peek_type("event descriptor type")? {
        type_ids::ENUM_EVENT_DESCRIPTOR => {
            r.expect_type(type_ids::ENUM_EVENT_DESCRIPTOR, "event descriptor type")?;
            let count = r.read_count("outcome count")?;
            let outcomes = (0..count)
                .map(|_| r.read_string("outcome label"))
                .collect::<Result<_, _>>()?;
            Ok(EventDescriptor::Enumerated { outcomes })
        }
        type_ids::DIGIT_EVENT_DESCRIPTOR => {
            r.expect_type(type_ids::DIGIT_EVENT_DESCRIPTOR, "event descriptor type")?;
            Ok(EventDescriptor::DigitDecomposition {
                base: r.read_u16("digit base")?,
                is_signed: r.read_u8("is_signed flag")? != 0,
                unit: r.read_string("unit")?,
                precision: r.read_u32("precision")? as i32,
                nb_digits: r.read_u16("digit count")?,
            })
        }
        _ => Err(Error::Serialization {
            offset: 0,
            context: "event descriptor type",
        }),
    }
}

fn write_oracle_event(w: &mut Writer, event: &OracleEvent) {
    w.write_u16(type_ids::ORACLE_EVENT);
    w.write_bigsize(event.nonce_points.len() as u64);
    for nonce in &event.nonce_points {
        w.write_xonly(*nonce);
    }
    w.write_u32(event.maturity_epoch);
    write_event_descriptor(w, &event.descriptor);
    w.write_string(&event.event_id);
}

fn read_oracle_event(r: &mut Reader) -> Result<OracleEvent, Error> {
    r.expect_type(type_ids::ORACLE_EVENT, "oracle event type")?;
    let nonce_count = r.read_count("nonce count")?;
    let nonce_points = (0..nonce_count)
        .map(|_| r.read_xonly("nonce point"))
        .collect::<Result<_, _>>()?;
    Ok(OracleEvent {
        nonce_points,
        maturity_epoch: r.read_u32("maturity epoch")?,
        descriptor: read_event_descriptor(r)?,
        event_id: r.read_string("event id")?,
    })
}

pub(crate) fn write_announcement(w: &mut Writer, announcement: &OracleAnnouncement) {
    w.write_u16(type_ids::ORACLE_ANNOUNCEMENT);
    w.write_bytes(&announcement.announcement_signature.0);
    w.write_xonly(announcement.oracle_pubkey);
    write_oracle_event(w, &announcement.event);
}

pub(crate) fn read_announcement(r: &mut Reader) -> Result<OracleAnnouncement, Error> {
    r.expect_type(type_ids::ORACLE_ANNOUNCEMENT, "oracle announcement type")?;
    Ok(OracleAnnouncement {
        announcement_signature: SchnorrSignature(r.read_array("announcement signature")?),
        oracle_pubkey: r.read_xonly("oracle pubkey")?,
        event: read_oracle_event(r)?,
    })
}

pub(crate) fn write_oracle_info(w: &mut Writer, info: &OracleInfo) {
    match info {
        OracleInfo::Single(announcement) => {
            w.write_u16(type_ids::ORACLE_INFO_SINGLE);
            write_announcement(w, announcement);
        }
        OracleInfo::Multi { announcements } => {
            w.write_u16(type_ids::ORACLE_INFO_MULTI);
            w.write_bigsize(announcements.len() as u64);
            for announcement in announcements {
                write_announcement(w, announcement);
            }
        }
    }
}

pub(crate) fn read_oracle_info(r: &mut Reader) -> Result<OracleInfo, Error> {
    match r.peek_type("oracle info type")? {
        type_ids::ORACLE_INFO_SINGLE => {
            r.expect_type(type_ids::ORACLE_INFO_SINGLE, "oracle info type")?;
            Ok(OracleInfo::Single(read_announcement(r)?))
        }
        type_ids::ORACLE_INFO_MULTI => {
            r.expect_type(type_ids::ORACLE_INFO_MULTI, "oracle info type")?;
            let count = r.read_count("announcement count")?;
            let announcements = (0..count)
                .map(|_| read_announcement(r))
                .collect::<Result<_, _>>()?;
            Ok(OracleInfo::Multi { announcements })
        }
        _ => Err(Error::Serialization {
            offset: 0,
            context: "oracle info type",
        }),
    }
}

pub(crate) fn write_attestation(w: &mut Writer, attestation: &OracleAttestation) {
    w.write_u16(type_ids::ORACLE_ATTESTATION);
    w.write_string(&attestation.event_id);
    w.write_xonly(attestation.oracle_pubkey);
    w.write_bigsize(attestation.signatures.len() as u64);
    for signature in &attestation.signatures {
        w.write_bytes(&signature.0);
    }
    w.write_bigsize(attestation.outcomes.len() as u64);
    for outcome in &attestation.outcomes {
        w.write_string(outcome);
    }
}

pub(crate) fn read_attestation(r: &mut Reader) -> Result<OracleAttestation, Error> {
    r.expect_type(type_ids::ORACLE_ATTESTATION, "oracle attestation type")?;
    let event_id = r.read_string("event id")?;
    let oracle_pubkey = r.read_xonly("oracle pubkey")?;
    let sig_count = r.read_count("signature count")?;
    let signatures = (0..sig_count)
        .map(|_| Ok(SchnorrSignature(r.read_array("attestation signature")?)))
        .collect::<Result<_, Error>>()?;
    let outcome_count = r.read_count("outcome count")?;
    let outcomes = (0..outcome_count)
        .map(|_| r.read_string("outcome string"))
        .collect::<Result<_, _>>()?;
    Ok(OracleAttestation {
        event_id,
        oracle_pubkey,
        signatures,
        outcomes,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A deterministic oracle announcing a small numeric event. Keys are
    /// normalized so every announced point is even-y, as BIP340 wire
    /// encoding assumes.
    pub(crate) struct TestOracle {
        pub seckey: Scalar,
        pub secnonces: Vec<Scalar>,
    }

    pub(crate) fn even_y_key(n: u32) -> Scalar {
        let raw = Scalar::try_from(n as u128).unwrap();
        raw.negate_if(raw.base_point_mul().parity())
    }

    impl TestOracle {
        pub(crate) fn new(nb_digits: u16) -> Self {
            TestOracle {
                seckey: even_y_key(938),
                secnonces: (0..nb_digits)
                    .map(|i| even_y_key(284 + i as u32 * 31))
                    .collect(),
            }
        }

        pub(crate) fn announce(&self, base: u16, nb_digits: u16) -> OracleAnnouncement {
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

            let digest = sha256(&event.signable_bytes());
            let keypair = secp256k1::Keypair::from_seckey_slice(
                secp256k1::SECP256K1,
                &self.seckey.serialize(),
            )
            .unwrap();
            let sig = secp256k1::SECP256K1
                .sign_schnorr_no_aux_rand(&secp256k1::Message::from_digest(digest), &keypair);
            let mut sig_bytes = [0u8; 64];
            sig_bytes.copy_from_slice(sig.as_ref());

            OracleAnnouncement {
                announcement_signature: SchnorrSignature(sig_bytes),
                oracle_pubkey: self.seckey.base_point_mul(),
                event,
            }
        }
    }

    #[test]
    fn announcement_validates() {
        let oracle = TestOracle::new(5);
        let announcement = oracle.announce(2, 5);
        announcement.validate().expect("announcement should verify");

        let mut tampered = announcement.clone();
        tampered.event.event_id = "btc/eur".to_string();
        assert!(tampered.validate().is_err());
    }

    #[test]
    fn attestation_verifies_and_reveals_value() {
        let oracle = TestOracle::new(5);
        let announcement = oracle.announce(2, 5);

        let attestation = announcement
            .attestation_for_value(oracle.seckey, &oracle.secnonces, 0b01101)
            .expect("oracle secrets match announcement");
        attestation
            .verify_against(&announcement)
            .expect("attestation should verify");

        assert_eq!(attestation.outcomes, vec!["0", "1", "1", "0", "1"]);
        assert_eq!(attestation.outcome_value(2).unwrap(), 0b01101);

        // A flipped digit signature must fail verification.
        let mut tampered = attestation.clone();
        tampered.outcomes[0] = "1".to_string();
        assert!(tampered.verify_against(&announcement).is_err());
    }

    #[test]
    fn adaptor_secret_matches_adaptor_point() {
        let oracle = TestOracle::new(4);
        let announcement = oracle.announce(2, 4);
        let info = OracleInfo::Single(announcement.clone());

        let claim = OutcomeClaim::DigitPrefix(vec![1, 0]);
        let point = info.adaptor_point(&claim).unwrap();

        let attestation = announcement
            .attestation_for_value(oracle.seckey, &oracle.secnonces, 0b1011)
            .unwrap();
        assert!(attestation.matches_claim(&claim, 2));

        let secret = attestation.adaptor_secret(&claim).unwrap();
        assert_eq!(secret * secp::G, MaybePoint::Valid(point));
    }

    #[test]
    fn attestation_rejects_wrong_oracle() {
        let oracle = TestOracle::new(3);
        let announcement = oracle.announce(2, 3);
        let attestation = announcement
            .attestation_for_value(oracle.seckey, &oracle.secnonces, 5)
            .unwrap();

        let other = TestOracle {
            seckey: even_y_key(1234),
            secnonces: oracle.secnonces.clone(),
        };
        let other_announcement = other.announce(2, 3);
        assert!(attestation.verify_against(&other_announcement).is_err());
    }

    #[test]
    fn announcement_wire_round_trip() {
        let oracle = TestOracle::new(3);
        let announcement = oracle.announce(10, 3);
        let decoded = OracleAnnouncement::deserialize(&announcement.serialize()).unwrap();
        assert_eq!(decoded, announcement);

        let attestation = announcement
            .attestation_for_value(oracle.seckey, &oracle.secnonces, 123)
            .unwrap();
        let decoded = OracleAttestation::deserialize(&attestation.serialize()).unwrap();
        assert_eq!(decoded, attestation);
    }
}
