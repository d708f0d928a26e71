//! Claim authorization codec
//!
//! A reward claim is authorized off-chain by signing the Keccak-256 digest of
//! its canonical message. The on-chain verifier rebuilds the same bytes, so
//! the layout below is a wire format and must not change:
//!
//! ```text
//! ad_id || subject_id (u32 LE) || actor_id || label_0 || score_0 || label_1 || score_1 ...
//! ```
//!
//! Labels are raw UTF-8 with no length prefix and no separator. Scores are
//! one signed byte each. Order of the scores is part of the signed content.

use crate::ledger::Hash32;
use crate::signer::{Signature, Signer};
use crate::{Error, Result};
use tracing::debug;

/// Signature authorizing a claim
pub type ClaimSignature = Signature;

/// One (label, score) pair of a claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Score {
    /// Tag label, encoded as raw UTF-8
    pub label: String,

    /// Score for the label
    pub score: i8,
}

impl Score {
    pub fn new(label: impl Into<String>, score: i8) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// Structured claim with fixed-width identifiers
///
/// `AD` and `ACTOR` are the byte widths of the advertisement id and the
/// actor id. Both default to 20.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimPayload<const AD: usize = 20, const ACTOR: usize = 20> {
    ad_id: [u8; AD],
    subject_id: u32,
    actor_id: [u8; ACTOR],
    scores: Vec<Score>,
}

impl<const AD: usize, const ACTOR: usize> ClaimPayload<AD, ACTOR> {
    /// Build a payload, rejecting a subject id that does not fit in 32 bits
    pub fn new(
        ad_id: [u8; AD],
        subject_id: u64,
        actor_id: [u8; ACTOR],
        scores: Vec<Score>,
    ) -> Result<Self> {
        let subject_id =
            u32::try_from(subject_id).map_err(|_| Error::SubjectIdOutOfRange(subject_id))?;
        Ok(Self {
            ad_id,
            subject_id,
            actor_id,
            scores,
        })
    }

    /// Build a payload from `0x`-prefixed (or bare) hex identifiers
    pub fn from_hex(
        ad_id: &str,
        subject_id: u64,
        actor_id: &str,
        scores: Vec<Score>,
    ) -> Result<Self> {
        let ad_id = decode_fixed::<AD>("ad_id", ad_id)?;
        let actor_id = decode_fixed::<ACTOR>("actor_id", actor_id)?;
        Self::new(ad_id, subject_id, actor_id, scores)
    }

    pub fn ad_id(&self) -> &[u8; AD] {
        &self.ad_id
    }

    pub fn subject_id(&self) -> u32 {
        self.subject_id
    }

    pub fn actor_id(&self) -> &[u8; ACTOR] {
        &self.actor_id
    }

    /// Scores in the order they were supplied
    pub fn scores(&self) -> &[Score] {
        &self.scores
    }
}

fn decode_fixed<const N: usize>(field: &str, value: &str) -> Result<[u8; N]> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(digits)
        .map_err(|e| Error::InvalidPayload(format!("{field} is not valid hex: {e}")))?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| {
        Error::InvalidPayload(format!(
            "{field} must be {N} bytes, got {}",
            bytes.len()
        ))
    })
}

/// Canonical byte form of a claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalMessage(Vec<u8>);

impl CanonicalMessage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }
}

impl AsRef<[u8]> for CanonicalMessage {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Encode a claim into its canonical message
pub fn encode<const AD: usize, const ACTOR: usize>(
    payload: &ClaimPayload<AD, ACTOR>,
) -> CanonicalMessage {
    let scores_len: usize = payload.scores.iter().map(|s| s.label.len() + 1).sum();
    let mut out = Vec::with_capacity(AD + 4 + ACTOR + scores_len);

    out.extend_from_slice(&payload.ad_id);
    out.extend_from_slice(&payload.subject_id.to_le_bytes());
    out.extend_from_slice(&payload.actor_id);
    for score in &payload.scores {
        out.extend_from_slice(score.label.as_bytes());
        out.extend_from_slice(&score.score.to_le_bytes());
    }

    CanonicalMessage(out)
}

/// Keccak-256 digest of a canonical message
pub fn hash(message: &CanonicalMessage) -> Hash32 {
    Hash32::keccak256(message.as_bytes())
}

/// Sign a claim digest; the signer signs the 32 digest bytes, not the message
pub fn sign(digest: &Hash32, signer: &dyn Signer) -> Result<ClaimSignature> {
    let signature = signer.sign(digest.as_bytes())?;
    if signature.scheme != signer.scheme() {
        return Err(Error::Signing(format!(
            "signer reported {} but produced a {} signature",
            signer.scheme(),
            signature.scheme
        )));
    }
    Ok(signature)
}

/// Everything a claim call needs to carry its authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimAuthorization {
    /// Canonical message that was hashed
    pub message: CanonicalMessage,

    /// Keccak-256 of the message
    pub digest: Hash32,

    /// Scheme-tagged signature over the digest
    pub signature: ClaimSignature,

    /// Public key of the authorizing signer
    pub signer: Vec<u8>,
}

/// Run the full pipeline: `sign(hash(encode(payload)), signer)`
pub fn authorize<const AD: usize, const ACTOR: usize>(
    payload: &ClaimPayload<AD, ACTOR>,
    signer: &dyn Signer,
) -> Result<ClaimAuthorization> {
    let message = encode(payload);
    let digest = hash(&message);
    debug!(
        "Claim message {} hashed to {}",
        message.to_hex(),
        digest
    );

    let signature = sign(&digest, signer)?;

    Ok(ClaimAuthorization {
        message,
        digest,
        signature,
        signer: signer.public_key(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{Ed25519Signer, SignatureScheme};
    use ed25519_dalek::Verifier;
    use proptest::prelude::*;

    fn ad_id() -> [u8; 16] {
        let mut id = [0u8; 16];
        id[15] = 1;
        id
    }

    fn actor_id() -> [u8; 20] {
        let mut id = [0u8; 20];
        id[19] = 2;
        id
    }

    #[test]
    fn test_canonical_layout_is_literal_concatenation() {
        let payload =
            ClaimPayload::new(ad_id(), 7, actor_id(), vec![Score::new("Polkadot", 5)]).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&ad_id());
        expected.extend_from_slice(&[7, 0, 0, 0]);
        expected.extend_from_slice(&actor_id());
        expected.extend_from_slice(b"Polkadot");
        expected.push(5);

        let message = encode(&payload);
        assert_eq!(message.as_bytes(), expected.as_slice());
        assert_eq!(message.len(), 16 + 4 + 20 + 8 + 1);
        assert_eq!(hash(&message), Hash32::keccak256(&expected));
    }

    #[test]
    fn test_empty_scores_have_no_trailing_bytes() {
        let payload = ClaimPayload::new(ad_id(), 7, actor_id(), vec![]).unwrap();
        assert_eq!(encode(&payload).len(), 16 + 4 + 20);
    }

    #[test]
    fn test_subject_id_out_of_range_is_rejected() {
        let result = ClaimPayload::new(ad_id(), u64::from(u32::MAX) + 1, actor_id(), vec![]);
        assert!(matches!(
            result,
            Err(Error::SubjectIdOutOfRange(id)) if id == u64::from(u32::MAX) + 1
        ));

        let max = ClaimPayload::new(ad_id(), u64::from(u32::MAX), actor_id(), vec![]).unwrap();
        assert_eq!(max.subject_id(), u32::MAX);
    }

    #[test]
    fn test_score_order_changes_message() {
        let forward = ClaimPayload::new(
            ad_id(),
            7,
            actor_id(),
            vec![Score::new("A", 1), Score::new("B", 2)],
        )
        .unwrap();
        let reversed = ClaimPayload::new(
            ad_id(),
            7,
            actor_id(),
            vec![Score::new("B", 2), Score::new("A", 1)],
        )
        .unwrap();

        assert_ne!(encode(&forward), encode(&reversed));
        assert_ne!(hash(&encode(&forward)), hash(&encode(&reversed)));
    }

    #[test]
    fn test_negative_scores_and_multibyte_labels() {
        let payload = ClaimPayload::new(
            ad_id(),
            1,
            actor_id(),
            vec![Score::new("é", -1), Score::new("x", i8::MIN)],
        )
        .unwrap();

        let message = encode(&payload);
        let tail = &message.as_bytes()[40..];
        assert_eq!(tail, &[0xc3, 0xa9, 0xff, b'x', 0x80]);
    }

    #[test]
    fn test_from_hex_identifiers() {
        let payload = ClaimPayload::<16, 20>::from_hex(
            "0x00000000000000000000000000000001",
            7,
            "0000000000000000000000000000000000000002",
            vec![],
        )
        .unwrap();
        assert_eq!(payload.ad_id(), &ad_id());
        assert_eq!(payload.actor_id(), &actor_id());

        let short = ClaimPayload::<16, 20>::from_hex("0x01", 7, "0x02", vec![]);
        assert!(matches!(short, Err(Error::InvalidPayload(_))));

        let bad = ClaimPayload::<16, 20>::from_hex("zz", 7, "0x02", vec![]);
        assert!(matches!(bad, Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn test_signature_is_over_digest() {
        let signer = Ed25519Signer::from_bytes(&[7u8; 32]);
        let payload =
            ClaimPayload::new(ad_id(), 7, actor_id(), vec![Score::new("Polkadot", 5)]).unwrap();

        let auth = authorize(&payload, &signer).unwrap();
        assert_eq!(auth.message, encode(&payload));
        assert_eq!(auth.digest, hash(&auth.message));
        assert_eq!(auth.signature.scheme, SignatureScheme::Ed25519);
        assert_eq!(auth.signer, signer.public_key());

        // A verifier holding only the payload and the public key can check it
        let raw: [u8; 64] = auth.signature.bytes.as_slice().try_into().unwrap();
        let sig = ed25519_dalek::Signature::from_bytes(&raw);
        let rebuilt = hash(&encode(&payload));
        assert!(signer.verifying_key().verify(rebuilt.as_bytes(), &sig).is_ok());
        assert!(signer
            .verifying_key()
            .verify(auth.message.as_bytes(), &sig)
            .is_err());
    }

    struct MislabeledSigner(Ed25519Signer);

    impl Signer for MislabeledSigner {
        fn scheme(&self) -> SignatureScheme {
            SignatureScheme::Sr25519
        }

        fn public_key(&self) -> Vec<u8> {
            self.0.public_key()
        }

        fn sign(&self, message: &[u8]) -> Result<Signature> {
            self.0.sign(message)
        }
    }

    #[test]
    fn test_scheme_mismatch_is_rejected() {
        let signer = MislabeledSigner(Ed25519Signer::from_bytes(&[7u8; 32]));
        let result = sign(&Hash32::default(), &signer);
        assert!(matches!(result, Err(Error::Signing(_))));
    }

    fn arb_payload() -> impl Strategy<Value = ClaimPayload<16, 20>> {
        (
            any::<[u8; 16]>(),
            any::<u32>(),
            any::<[u8; 20]>(),
            prop::collection::vec(("[a-zA-Z0-9 ]{0,12}", any::<i8>()), 0..6),
        )
            .prop_map(|(ad, subject, actor, scores)| {
                let scores = scores
                    .into_iter()
                    .map(|(label, score)| Score::new(label, score))
                    .collect();
                ClaimPayload::new(ad, u64::from(subject), actor, scores).unwrap()
            })
    }

    proptest! {
        #[test]
        fn prop_encoding_is_deterministic(payload in arb_payload()) {
            let first = encode(&payload);
            let second = encode(&payload.clone());
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(hash(&first), hash(&second));
        }

        #[test]
        fn prop_encoded_length_matches_layout(payload in arb_payload()) {
            let expected: usize = 16 + 4 + 20
                + payload.scores().iter().map(|s| s.label.len() + 1).sum::<usize>();
            prop_assert_eq!(encode(&payload).len(), expected);
        }
    }
}
