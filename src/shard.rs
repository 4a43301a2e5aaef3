//! The long lived material a party holds for one signing key.
use std::{collections::HashMap, fmt};

use elliptic_curve::{Field, Group};
use serde::{Deserialize, Serialize};

use crate::{
    compat::CSCurve,
    config::{bad_parameters, CohortConfig},
    paillier::{Ciphertext, PaillierPublicKey, PaillierSecretKey},
    protocol::{IdentityKey, InitializationError},
    serde::{deserialize_scalar, serialize_scalar},
};

/// One party's Shamir share of a signing key, along with the public key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct SigningKeyShare<C: CSCurve> {
    #[serde(
        serialize_with = "serialize_scalar::<C, _>",
        deserialize_with = "deserialize_scalar::<C, _>"
    )]
    pub share: C::Scalar,
    #[serde(
        serialize_with = "C::serialize_point",
        deserialize_with = "C::deserialize_point"
    )]
    pub public_key: C::AffinePoint,
}

impl<C: CSCurve> SigningKeyShare<C> {
    /// Check that the share is nonzero, and the public key isn't the identity.
    pub fn validate(&self) -> Result<(), InitializationError> {
        if bool::from(self.share.is_zero()) {
            return Err(bad_parameters("signing key share is zero".to_string()));
        }
        if bool::from(C::ProjectivePoint::from(self.public_key).is_identity()) {
            return Err(bad_parameters("public key is the identity".to_string()));
        }
        Ok(())
    }
}

impl<C: CSCurve> fmt::Debug for SigningKeyShare<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyShare")
            .field("share", &"[redacted]")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Something a party holds in order to take part in threshold signing.
///
/// Every kind of shard is made of a signing key share, used the same way,
/// plus some material specific to the signing scheme.
pub trait ThresholdShard<C: CSCurve> {
    type Payload;

    /// The identity of the party holding this shard.
    fn identity(&self) -> IdentityKey;

    fn signing_key_share(&self) -> &SigningKeyShare<C>;

    fn payload(&self) -> &Self::Payload;

    /// Check that this shard can be used with a given cohort.
    fn validate(&self, cohort: &CohortConfig) -> Result<(), InitializationError>;

    /// The sharing id of the holder, or None if they aren't part of the cohort.
    fn sharing_id(&self, cohort: &CohortConfig) -> Option<u32> {
        let me = self.identity();
        let participants = cohort.participants();
        participants
            .contains(me)
            .then(|| participants.sharing_id(me))
    }
}

/// The Paillier material backing a [Shard].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaillierMaterial {
    /// Our own secret key.
    pub(crate) secret_key: PaillierSecretKey,
    /// Every party's public key, including ours.
    pub(crate) public_keys: HashMap<IdentityKey, PaillierPublicKey>,
    /// For every party, an encryption of their share under their own key.
    pub(crate) encrypted_shares: HashMap<IdentityKey, Ciphertext>,
}

impl PaillierMaterial {
    pub fn public_key(&self, p: IdentityKey) -> Option<&PaillierPublicKey> {
        self.public_keys.get(&p)
    }

    pub fn encrypted_share(&self, p: IdentityKey) -> Option<&Ciphertext> {
        self.encrypted_shares.get(&p)
    }
}

/// A party's durable material for one signing key.
///
/// This is created once, either by the backup protocol in [crate::dkg],
/// or by a trusted dealer, and then reused for many signatures.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct Shard<C: CSCurve> {
    pub(crate) me: IdentityKey,
    pub(crate) signing_key_share: SigningKeyShare<C>,
    pub(crate) paillier: PaillierMaterial,
}

impl<C: CSCurve> Shard<C> {
    pub fn public_key(&self) -> C::AffinePoint {
        self.signing_key_share.public_key
    }
}

impl<C: CSCurve> ThresholdShard<C> for Shard<C> {
    type Payload = PaillierMaterial;

    fn identity(&self) -> IdentityKey {
        self.me
    }

    fn signing_key_share(&self) -> &SigningKeyShare<C> {
        &self.signing_key_share
    }

    fn payload(&self) -> &PaillierMaterial {
        &self.paillier
    }

    fn validate(&self, cohort: &CohortConfig) -> Result<(), InitializationError> {
        cohort.check_member(self.me)?;
        self.signing_key_share.validate()?;

        let participants = cohort.participants();
        let material = &self.paillier;
        if material.public_keys.len() != participants.len()
            || material.encrypted_shares.len() != participants.len()
        {
            return Err(bad_parameters(
                "shard does not cover exactly the cohort".to_string(),
            ));
        }
        for &p in participants.participants() {
            let pk = material
                .public_key(p)
                .ok_or_else(|| bad_parameters(format!("no paillier key for {p}")))?;
            pk.validate_for::<C>()
                .map_err(|e| bad_parameters(format!("paillier key of {p}: {e}")))?;
            if material.encrypted_share(p).is_none() {
                return Err(bad_parameters(format!("no encrypted share for {p}")));
            }
        }
        if material.public_key(self.me) != Some(&material.secret_key.public_key()) {
            return Err(bad_parameters(
                "paillier secret key does not match our public key".to_string(),
            ));
        }
        Ok(())
    }
}
