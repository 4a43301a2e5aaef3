//! Producing ECDSA signatures with two shards.
//!
//! Both cosigners rely on the same trick: one party computes its half of the
//! signature equation under the other party's Paillier key, using the
//! encryption of that party's share it holds in its shard. The other party
//! then decrypts, and finishes the signature with its own nonce.
//!
//! [NonInteractiveCosigner] spends a [crate::PreSignature], and needs a single
//! message. [InteractivePrimary] and [InteractiveSecondary] need no
//! precomputation, but take five rounds.
use ecdsa::RecoveryId;
use elliptic_curve::{point::AffineCoordinates, scalar::IsHigh, Field, Group, PrimeField};
use libpaillier::unknown_order::BigNumber;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{
    compat::{self, CSCurve},
    math::{bn_to_scalar, order, scalar_to_bn},
    paillier::Ciphertext,
    participants::ParticipantList,
    protocol::{IdentityKey, ProtocolError},
    shard::{Shard, ThresholdShard},
};

mod interactive;
mod noninteractive;

pub use interactive::{
    sign_primary, sign_secondary, InteractivePrimary, InteractiveSecondary, SignRound1,
    SignRound2, SignRound3, SignRound4,
};
pub use noninteractive::{NonInteractiveCosigner, PartialSignature};

/// Represents a signature with extra information, to support different variants of ECDSA.
///
/// An ECDSA signature is usually two scalars. The first scalar is derived from
/// a point on the curve, and because this process is lossy, some other variants
/// of ECDSA also include some extra information in order to recover this point.
///
/// To support these variants, this gives you a normal signature, along with the entire
/// first point, and the recovery id matching the normalized `s`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct FullSignature<C: CSCurve> {
    /// This is the entire first point.
    #[serde(
        serialize_with = "C::serialize_point",
        deserialize_with = "C::deserialize_point"
    )]
    pub big_r: C::AffinePoint,
    /// This is the second scalar, normalized to be in the lower range.
    #[serde(
        serialize_with = "crate::serde::serialize_scalar::<C, _>",
        deserialize_with = "crate::serde::deserialize_scalar::<C, _>"
    )]
    pub s: C::Scalar,
    /// Lets a verifier recover the public key from the signature.
    #[serde(with = "recovery_id")]
    pub recovery_id: RecoveryId,
}

mod recovery_id {
    use ecdsa::RecoveryId;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &RecoveryId, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(id.to_byte())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RecoveryId, D::Error> {
        let byte = u8::deserialize(deserializer)?;
        RecoveryId::from_byte(byte).ok_or_else(|| de::Error::custom("invalid recovery id"))
    }
}

impl<C: CSCurve> FullSignature<C> {
    /// Assemble a signature from its point and scalar, normalizing `s` to the lower half.
    pub(crate) fn new(big_r: C::AffinePoint, s: C::Scalar) -> Self {
        let r = compat::x_coordinate::<C>(&big_r);
        let is_high = bool::from(s.is_high());
        let s = if is_high { -s } else { s };
        // Negating s amounts to negating the nonce, which flips the parity of y.
        let y_is_odd = bool::from(big_r.y_is_odd()) ^ is_high;
        let x_is_reduced = r.to_repr() != big_r.x();
        Self {
            big_r,
            s,
            recovery_id: RecoveryId::new(y_is_odd, x_is_reduced),
        }
    }

    /// The first scalar of the signature.
    pub fn r(&self) -> C::Scalar {
        compat::x_coordinate::<C>(&self.big_r)
    }

    /// Check this signature against a public key and message.
    ///
    /// The message is hashed the same way signing does, with [CSCurve::scalar_hash].
    #[must_use]
    pub fn verify(&self, public_key: &C::AffinePoint, msg: &[u8]) -> bool {
        self.verify_prehashed(public_key, &C::scalar_hash(msg))
    }

    #[must_use]
    pub(crate) fn verify_prehashed(&self, public_key: &C::AffinePoint, msg_hash: &C::Scalar) -> bool {
        let r = self.r();
        if r.is_zero().into() || self.s.is_zero().into() {
            return false;
        }
        let s_inv = match Option::<C::Scalar>::from(self.s.invert()) {
            Some(s_inv) => s_inv,
            None => return false,
        };
        let reproduced = (C::ProjectivePoint::generator() * (*msg_hash * s_inv))
            + (C::ProjectivePoint::from(*public_key) * (r * s_inv));
        compat::x_coordinate::<C>(&reproduced.into()) == r
    }
}

/// The inverse of a nonce, which is never zero.
fn invert_nonce<C: CSCurve>(k: &C::Scalar) -> Result<C::Scalar, ProtocolError> {
    Option::from(k.invert()).ok_or_else(|| {
        error!("nonce is not invertible");
        ProtocolError::AssertionFailed("nonce is zero".to_string())
    })
}

/// The x coordinate of the combined nonce point.
fn nonce_x<C: CSCurve>(big_r: &C::AffinePoint) -> Result<C::Scalar, ProtocolError> {
    let r = compat::x_coordinate::<C>(big_r);
    if bool::from(r.is_zero()) || bool::from(C::ProjectivePoint::from(*big_r).is_identity()) {
        error!("combined nonce is degenerate");
        return Err(ProtocolError::AssertionFailed(
            "combined nonce has no usable x coordinate".to_string(),
        ));
    }
    Ok(r)
}

/// Compute our half of the signature equation, under the other party's key.
///
/// With `k` our nonce, `x_me` our share and `x_other` theirs, this encrypts
/// `rho * q + k^-1 * (m + r * (lambda_other * x_other + lambda_me * x_me))`,
/// where the term involving `x_other` is only ever handled encrypted.
fn encrypted_half<C: CSCurve>(
    rng: &mut impl CryptoRngCore,
    shard: &Shard<C>,
    pair: &ParticipantList,
    other: IdentityKey,
    k: &C::Scalar,
    r: &C::Scalar,
    msg_hash: &C::Scalar,
) -> Result<Ciphertext, ProtocolError> {
    let me = shard.identity();
    let material = shard.payload();
    let pk = material.public_key(other).ok_or_else(|| {
        ProtocolError::InvalidArgument(format!("shard has no paillier key for {other}"))
    })?;
    let c_key = material.encrypted_share(other).ok_or_else(|| {
        ProtocolError::InvalidArgument(format!("shard has no encrypted share for {other}"))
    })?;

    let k_inv = invert_nonce::<C>(k)?;
    let a = k_inv * r * pair.lagrange::<C>(other);
    let b = k_inv * (*msg_hash + *r * shard.signing_key_share().share * pair.lagrange::<C>(me));

    let q = order::<C>();
    let rho = BigNumber::from_rng(&(&q * &q), &mut *rng);
    let blinded = rho * &q + scalar_to_bn::<C>(&b);

    let scaled = pk.mul_plain(c_key, &scalar_to_bn::<C>(&a))?;
    let masked = pk.encrypt(rng, &blinded)?;
    Ok(pk.add(&scaled, &masked)?)
}

/// Decrypt the other party's half, and finish the signature with our nonce.
fn finish_signature<C: CSCurve>(
    shard: &Shard<C>,
    big_r: C::AffinePoint,
    k: &C::Scalar,
    c3: &Ciphertext,
    msg_hash: &C::Scalar,
) -> Result<FullSignature<C>, ProtocolError> {
    let s_prime = shard.payload().secret_key.decrypt(c3)?;
    let s = invert_nonce::<C>(k)? * bn_to_scalar::<C>(&s_prime);
    let sig = FullSignature::<C>::new(big_r, s);
    if !sig.verify_prehashed(&shard.public_key(), msg_hash) {
        error!("assembled signature does not verify");
        return Err(ProtocolError::AssertionFailed(
            "signature failed to verify".to_string(),
        ));
    }
    Ok(sig)
}

#[cfg(test)]
mod test {
    use k256::{ProjectivePoint, Scalar, Secp256k1};
    use rand_core::OsRng;

    use super::*;

    fn sign_plain(x: &Scalar, k: &Scalar, msg: &[u8]) -> FullSignature<Secp256k1> {
        let big_r: k256::AffinePoint = (ProjectivePoint::GENERATOR * k).into();
        let r = compat::x_coordinate::<Secp256k1>(&big_r);
        let m = Secp256k1::scalar_hash(msg);
        let s = k.invert().unwrap() * (m + r * x);
        FullSignature::new(big_r, s)
    }

    #[test]
    fn test_signatures_are_normalized() {
        let x = Scalar::random(&mut OsRng);
        let public_key: k256::AffinePoint = (ProjectivePoint::GENERATOR * x).into();
        for _ in 0..32 {
            let k = Scalar::random(&mut OsRng);
            let sig = sign_plain(&x, &k, b"hello");
            assert!(!bool::from(sig.s.is_high()));
            assert!(sig.verify(&public_key, b"hello"));
            assert!(!sig.verify(&public_key, b"goodbye"));

            let ecdsa_sig = k256::ecdsa::Signature::from_scalars(sig.r(), sig.s).unwrap();
            let recovered = k256::ecdsa::VerifyingKey::recover_from_msg(
                b"hello",
                &ecdsa_sig,
                sig.recovery_id,
            )
            .unwrap();
            assert_eq!(recovered.as_affine(), &public_key);
        }
    }

    #[test]
    fn test_degenerate_signatures_are_rejected() {
        let x = Scalar::random(&mut OsRng);
        let public_key: k256::AffinePoint = (ProjectivePoint::GENERATOR * x).into();
        let mut sig = sign_plain(&x, &Scalar::random(&mut OsRng), b"hello");
        sig.s = Scalar::ZERO;
        assert!(!sig.verify(&public_key, b"hello"));
    }
}
