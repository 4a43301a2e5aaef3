//! A trusted dealer, producing shards without any interaction.
//!
//! The dealer learns the whole key, so this is only meant for tests and
//! for bootstrapping setups where a single trusted machine is acceptable.
use std::collections::HashMap;

use elliptic_curve::{Field, Group};
use rand_core::CryptoRngCore;
use tracing::{info, instrument};

use crate::{
    compat::CSCurve,
    config::CohortConfig,
    math::{scalar_to_bn, Polynomial},
    paillier,
    protocol::{IdentityKey, ProtocolError},
    shard::{PaillierMaterial, Shard, SigningKeyShare},
};

/// The output of dealing a fresh key.
#[derive(Debug, Clone)]
pub struct DealtKey<C: CSCurve> {
    pub public_key: C::AffinePoint,
    pub shares: HashMap<IdentityKey, SigningKeyShare<C>>,
    /// The public counterpart `x_j * G` of every share.
    pub public_shares: HashMap<IdentityKey, C::AffinePoint>,
}

/// Shamir-share a fresh random key among a cohort.
pub fn deal_key_shares<C: CSCurve>(
    rng: &mut impl CryptoRngCore,
    cohort: &CohortConfig,
) -> DealtKey<C> {
    let participants = cohort.participants();
    loop {
        let x = C::Scalar::random(&mut *rng);
        if bool::from(x.is_zero()) {
            continue;
        }
        let f = Polynomial::<C>::extend_random(rng, cohort.threshold(), &x);
        let public_key: C::AffinePoint = (C::ProjectivePoint::generator() * x).into();

        let shares: HashMap<IdentityKey, SigningKeyShare<C>> = participants
            .participants()
            .iter()
            .map(|&p| {
                let share = f.evaluate(&participants.scalar::<C>(p));
                (p, SigningKeyShare { share, public_key })
            })
            .collect();
        if shares.values().any(|s| bool::from(s.share.is_zero())) {
            continue;
        }

        let public_shares = shares
            .iter()
            .map(|(&p, s)| (p, (C::ProjectivePoint::generator() * s.share).into()))
            .collect();
        return DealtKey {
            public_key,
            shares,
            public_shares,
        };
    }
}

/// Deal a fresh key, and complete shards around it.
///
/// Each party gets a Paillier key with a modulus of `paillier_bits` bits,
/// and every shard holds each party's share encrypted under that party's key.
#[instrument(skip_all, err(Debug))]
pub fn deal<C: CSCurve>(
    rng: &mut impl CryptoRngCore,
    cohort: &CohortConfig,
    paillier_bits: usize,
) -> Result<HashMap<IdentityKey, Shard<C>>, ProtocolError> {
    let dealt = deal_key_shares::<C>(rng, cohort);

    let mut secret_keys = HashMap::with_capacity(dealt.shares.len());
    let mut public_keys = HashMap::with_capacity(dealt.shares.len());
    let mut encrypted_shares = HashMap::with_capacity(dealt.shares.len());
    for (&p, share) in &dealt.shares {
        let (pk, sk) = paillier::generate::<C>(rng, paillier_bits)?;
        encrypted_shares.insert(p, pk.encrypt(rng, &scalar_to_bn::<C>(&share.share))?);
        public_keys.insert(p, pk);
        secret_keys.insert(p, sk);
    }

    info!(parties = dealt.shares.len(), "dealt shards");
    Ok(dealt
        .shares
        .into_iter()
        .filter_map(|(p, signing_key_share)| {
            let secret_key = secret_keys.remove(&p)?;
            let shard = Shard {
                me: p,
                signing_key_share,
                paillier: PaillierMaterial {
                    secret_key,
                    public_keys: public_keys.clone(),
                    encrypted_shares: encrypted_shares.clone(),
                },
            };
            Some((p, shard))
        })
        .collect())
}

#[cfg(test)]
mod test {
    use k256::{ProjectivePoint, Secp256k1};
    use rand_core::OsRng;

    use super::*;
    use crate::{math::bn_to_scalar, shard::ThresholdShard};

    fn cohort(n: u8, t: usize) -> CohortConfig {
        let ps: Vec<_> = (0..n).map(|i| IdentityKey::from_public_key(&[i])).collect();
        CohortConfig::new(t, &ps, None).unwrap()
    }

    #[test]
    fn test_dealt_shares_reconstruct_key() {
        let cohort = cohort(4, 3);
        let dealt = deal_key_shares::<Secp256k1>(&mut OsRng, &cohort);
        let quorum = cohort
            .quorum(&cohort.participants().participants()[1..])
            .unwrap();
        let x: k256::Scalar = quorum
            .participants()
            .iter()
            .map(|p| quorum.lagrange::<Secp256k1>(*p) * dealt.shares[p].share)
            .sum();
        assert_eq!(
            k256::AffinePoint::from(ProjectivePoint::GENERATOR * x),
            dealt.public_key
        );
        for (p, s) in &dealt.shares {
            let expected: k256::AffinePoint = (ProjectivePoint::GENERATOR * s.share).into();
            assert_eq!(dealt.public_shares[p], expected);
        }
    }

    #[test]
    fn test_dealt_shards_validate() -> Result<(), Box<dyn std::error::Error>> {
        let cohort = cohort(3, 2);
        let shards = deal::<Secp256k1>(&mut OsRng, &cohort, 1024)?;
        assert_eq!(shards.len(), 3);
        for (p, shard) in &shards {
            shard.validate(&cohort)?;
            assert_eq!(shard.identity(), *p);
            assert!(shard.sharing_id(&cohort).is_some());

            let c = shard.payload().encrypted_share(*p).unwrap();
            let x = shard.payload().secret_key.decrypt(c)?;
            assert_eq!(bn_to_scalar::<Secp256k1>(&x), shard.signing_key_share().share);
        }
        Ok(())
    }

    #[test]
    fn test_shard_validation_catches_mismatches() -> Result<(), Box<dyn std::error::Error>> {
        let cohort3 = cohort(3, 2);
        let shards = deal::<Secp256k1>(&mut OsRng, &cohort3, 1024)?;
        let ps = cohort3.participants().participants().to_vec();

        let mut shard = shards[&ps[0]].clone();
        shard.paillier.secret_key = shards[&ps[1]].paillier.secret_key.clone();
        assert!(shard.validate(&cohort3).is_err());

        let mut shard = shards[&ps[0]].clone();
        shard.paillier.encrypted_shares.remove(&ps[2]);
        assert!(shard.validate(&cohort3).is_err());

        let mut shard = shards[&ps[0]].clone();
        shard.signing_key_share.share = k256::Scalar::ZERO;
        assert!(shard.validate(&cohort3).is_err());

        let (small, _) = crate::paillier::generate_unchecked(&mut OsRng, 512)?;
        let mut shard = shards[&ps[0]].clone();
        shard.paillier.public_keys.insert(ps[1], small);
        assert!(shard.validate(&cohort3).is_err());

        assert!(shards[&ps[0]].validate(&cohort(4, 2)).is_err());
        Ok(())
    }
}
