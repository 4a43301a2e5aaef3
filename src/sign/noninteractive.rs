use elliptic_curve::Group;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use super::{encrypted_half, finish_signature, nonce_x, FullSignature};
use crate::{
    compat::CSCurve,
    config::{bad_parameters, CohortConfig},
    paillier::Ciphertext,
    participants::ParticipantList,
    presign::PreSignature,
    protocol::{IdentityKey, InitializationError, ProtocolError},
    shard::{Shard, ThresholdShard},
};

/// The single message the initiator sends to the aggregator.
///
/// This is an encryption, under the aggregator's Paillier key, of a blinded
/// value which becomes the `s` of the signature once decrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignature {
    pub(crate) c3: Ciphertext,
}

/// One party signing with a shard and a presignature.
///
/// Either party in a signing pair can act as the initiator, producing a
/// [PartialSignature], while the other, which must be allowed to aggregate
/// signatures, turns it into a [FullSignature]. Both methods consume the cosigner,
/// along with its presignature.
pub struct NonInteractiveCosigner<'a, C: CSCurve> {
    cohort: &'a CohortConfig,
    shard: &'a Shard<C>,
    presignature: PreSignature<C>,
}

impl<'a, C: CSCurve> NonInteractiveCosigner<'a, C> {
    pub fn new(
        cohort: &'a CohortConfig,
        shard: &'a Shard<C>,
        presignature: PreSignature<C>,
    ) -> Result<Self, InitializationError> {
        if cohort.threshold() != 2 {
            return Err(bad_parameters(format!(
                "signing needs a threshold of 2, not {}",
                cohort.threshold()
            )));
        }
        shard.validate(cohort)?;
        if presignature.big_r(shard.identity()).is_none() {
            return Err(bad_parameters(format!(
                "{} did not take part in this presignature",
                shard.identity()
            )));
        }
        Ok(Self {
            cohort,
            shard,
            presignature,
        })
    }

    fn me(&self) -> IdentityKey {
        self.shard.identity()
    }

    /// The two parties signing, with their sharing ids.
    fn pair(&self, other: IdentityKey) -> Result<ParticipantList, ProtocolError> {
        if other == self.me() {
            return Err(ProtocolError::InvalidArgument(
                "cannot cosign with ourselves".to_string(),
            ));
        }
        if self.presignature.big_r(other).is_none() {
            return Err(ProtocolError::InvalidArgument(format!(
                "{other} did not take part in this presignature"
            )));
        }
        self.cohort
            .participants()
            .subset(&[self.me(), other])
            .ok_or_else(|| ProtocolError::InvalidArgument(format!("{other} is not a participant")))
    }

    /// Our nonce combined with the other party's, `R = k_me * k_other * G`.
    fn combined_nonce(&self, other: IdentityKey) -> Result<C::AffinePoint, ProtocolError> {
        let theirs = self.presignature.big_r(other).ok_or_else(|| {
            ProtocolError::InvalidArgument(format!("no nonce from {other}"))
        })?;
        let big_r = C::ProjectivePoint::from(theirs) * self.presignature.k;
        if bool::from(big_r.is_identity()) {
            error!(%other, "combined nonce is the identity");
            return Err(ProtocolError::AssertionFailed(
                "combined nonce is the identity".to_string(),
            ));
        }
        Ok(big_r.into())
    }

    /// Act as the initiator, producing the message for `aggregator`.
    #[instrument(skip_all, fields(me = %self.me(), %aggregator), err(Debug))]
    pub fn produce_partial_signature(
        self,
        rng: &mut impl CryptoRngCore,
        aggregator: IdentityKey,
        msg: &[u8],
    ) -> Result<PartialSignature, ProtocolError> {
        if !self.cohort.is_aggregator(aggregator) {
            error!(%aggregator, "not a designated aggregator");
            return Err(ProtocolError::InvalidArgument(format!(
                "{aggregator} may not aggregate signatures"
            )));
        }
        let pair = self.pair(aggregator)?;
        let big_r = self.combined_nonce(aggregator)?;
        let r = nonce_x::<C>(&big_r)?;
        let msg_hash = C::scalar_hash(msg);

        let c3 = encrypted_half(
            rng,
            self.shard,
            &pair,
            aggregator,
            &self.presignature.k,
            &r,
            &msg_hash,
        )?;
        debug!("partial signature ready");
        Ok(PartialSignature { c3 })
    }

    /// Act as the aggregator, turning the initiator's message into a signature.
    ///
    /// The signature is checked against the shard's public key before being returned.
    #[instrument(skip_all, fields(me = %self.me(), %initiator), err(Debug))]
    pub fn produce_signature(
        self,
        initiator: IdentityKey,
        partial: &PartialSignature,
        msg: &[u8],
    ) -> Result<FullSignature<C>, ProtocolError> {
        if !self.cohort.is_aggregator(self.me()) {
            error!("not a designated aggregator");
            return Err(ProtocolError::InvalidArgument(format!(
                "{} may not aggregate signatures",
                self.me()
            )));
        }
        self.pair(initiator)?;
        let big_r = self.combined_nonce(initiator)?;
        nonce_x::<C>(&big_r)?;
        let msg_hash = C::scalar_hash(msg);

        let sig = finish_signature(
            self.shard,
            big_r,
            &self.presignature.k,
            &partial.c3,
            &msg_hash,
        )?;
        info!("signature produced");
        Ok(sig)
    }
}
