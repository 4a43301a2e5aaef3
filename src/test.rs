use std::collections::{HashMap, HashSet};

use elliptic_curve::{Field, Group};
use k256::Secp256k1;
use p256::NistP256;
use rand::{
    rngs::{OsRng, StdRng},
    Rng, SeedableRng,
};
use tracing_subscriber::{
    filter::Targets, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::{
    compat::{CSCurve, SerializablePoint},
    config::CohortConfig,
    dkg::backup,
    keyshare::{keygen, KeygenOutput},
    presign::{presign, PreSignature, PreSignatureBatch},
    protocol::{run_protocol, run_two_party_protocol, IdentityKey, Protocol, ProtocolError},
    serde::encode,
    shard::{Shard, ThresholdShard},
    sign::{sign_primary, sign_secondary, FullSignature, NonInteractiveCosigner},
};

const BITS: usize = 1024;

/// Create a seeded rng, printing the seed so that a failing run can be reproduced.
fn init_testing() -> StdRng {
    let seed: [u8; 32] = OsRng.gen();
    eprintln!("To re-run this test with the same randomness, use the following seed:");
    eprintln!("\t{seed:?}");
    StdRng::from_seed(seed)
}

/// A seeded version of [init_testing], which also turns on logging.
///
/// Only meant for debugging a failing run, since many tests log errors on purpose.
#[allow(unused)]
fn init_testing_with_seed(seed: [u8; 32]) -> StdRng {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let targets = Targets::new().with_target("lindell_sith", tracing::Level::TRACE);
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(targets)
        .with_filter(filter);
    // Fails if a subscriber is already set for this thread, which is fine.
    let _ = tracing_subscriber::registry().with(stdout_layer).try_init();
    StdRng::from_seed(seed)
}

fn cohort(n: u8, threshold: usize) -> (CohortConfig, Vec<IdentityKey>) {
    let ps: Vec<_> = (0..n)
        .map(|i| IdentityKey::from_public_key(format!("party {i}").as_bytes()))
        .collect();
    let cohort = CohortConfig::new(threshold, &ps, None).unwrap();
    (cohort, ps)
}

fn run_keygen<C: CSCurve>(
    rng: &mut StdRng,
    cohort: &CohortConfig,
) -> HashMap<IdentityKey, KeygenOutput<C>> {
    #[allow(clippy::type_complexity)]
    let mut protocols: Vec<(IdentityKey, Box<dyn Protocol<Output = KeygenOutput<C>>>)> =
        Vec::new();
    for &p in cohort.participants().participants() {
        let protocol = keygen::<C>(StdRng::from_seed(rng.gen()), cohort, p, b"keygen");
        assert!(protocol.is_ok());
        protocols.push((p, Box::new(protocol.unwrap())));
    }
    run_protocol(protocols).unwrap().into_iter().collect()
}

fn run_backup<C: CSCurve>(
    rng: &mut StdRng,
    cohort: &CohortConfig,
    keys: &HashMap<IdentityKey, KeygenOutput<C>>,
) -> HashMap<IdentityKey, Shard<C>> {
    #[allow(clippy::type_complexity)]
    let mut protocols: Vec<(IdentityKey, Box<dyn Protocol<Output = Shard<C>>>)> = Vec::new();
    for (&p, key) in keys {
        let protocol = backup::<C>(
            StdRng::from_seed(rng.gen()),
            cohort,
            p,
            b"backup",
            key.private_share.clone(),
            key.public_shares.clone(),
            BITS,
        );
        assert!(protocol.is_ok());
        protocols.push((p, Box::new(protocol.unwrap())));
    }
    run_protocol(protocols).unwrap().into_iter().collect()
}

fn run_presign<C: CSCurve>(
    rng: &mut StdRng,
    cohort: &CohortConfig,
    quorum: &[IdentityKey],
    tau: usize,
) -> HashMap<IdentityKey, PreSignatureBatch<C>> {
    #[allow(clippy::type_complexity)]
    let mut protocols: Vec<(IdentityKey, Box<dyn Protocol<Output = PreSignatureBatch<C>>>)> =
        Vec::new();
    for &p in quorum {
        let protocol = presign::<C>(
            StdRng::from_seed(rng.gen()),
            cohort,
            p,
            quorum,
            tau,
            b"presign",
        );
        assert!(protocol.is_ok());
        protocols.push((p, Box::new(protocol.unwrap())));
    }
    run_protocol(protocols).unwrap().into_iter().collect()
}

/// Run keygen followed by the backup, returning every party's shard.
fn setup<C: CSCurve>(rng: &mut StdRng, cohort: &CohortConfig) -> HashMap<IdentityKey, Shard<C>> {
    let keys = run_keygen::<C>(rng, cohort);
    let shards = run_backup::<C>(rng, cohort, &keys);
    let public_key = keys.values().next().unwrap().public_key;
    for (p, shard) in &shards {
        assert_eq!(shard.identity(), *p);
        assert_eq!(shard.public_key(), public_key);
        shard.validate(cohort).unwrap();
    }
    shards
}

#[allow(clippy::too_many_arguments)]
fn sign_noninteractive<C: CSCurve>(
    rng: &mut StdRng,
    cohort: &CohortConfig,
    shards: &HashMap<IdentityKey, Shard<C>>,
    batches: &mut HashMap<IdentityKey, PreSignatureBatch<C>>,
    index: usize,
    initiator: IdentityKey,
    aggregator: IdentityKey,
    msg: &[u8],
) -> Result<FullSignature<C>, ProtocolError> {
    let initiator_presig = batches.get_mut(&initiator).unwrap().take(index)?;
    let aggregator_presig = batches.get_mut(&aggregator).unwrap().take(index)?;
    let partial = NonInteractiveCosigner::new(cohort, &shards[&initiator], initiator_presig)?
        .produce_partial_signature(rng, aggregator, msg)?;
    NonInteractiveCosigner::new(cohort, &shards[&aggregator], aggregator_presig)?
        .produce_signature(initiator, &partial, msg)
}

fn test_e2e<C: CSCurve>(verify: impl Fn(&C::AffinePoint, &[u8], &FullSignature<C>) -> bool) {
    let mut rng = init_testing();
    let (cohort, ps) = cohort(3, 2);
    let shards = setup::<C>(&mut rng, &cohort);
    let public_key = shards[&ps[0]].public_key();

    for (a, b) in [(0, 1), (1, 2), (2, 0)] {
        let quorum = [ps[a], ps[b]];
        let mut batches = run_presign::<C>(&mut rng, &cohort, &quorum, 2);
        for index in 0..2 {
            let (initiator, aggregator) = if index == 0 { (ps[a], ps[b]) } else { (ps[b], ps[a]) };
            let msg = format!("message {a} {b} {index}");
            let sig = sign_noninteractive(
                &mut rng,
                &cohort,
                &shards,
                &mut batches,
                index,
                initiator,
                aggregator,
                msg.as_bytes(),
            )
            .unwrap();
            assert!(sig.verify(&public_key, msg.as_bytes()));
            assert!(verify(&public_key, msg.as_bytes(), &sig));
        }
    }

    let mut primary = sign_primary(
        StdRng::from_seed(rng.gen()),
        &cohort,
        &shards[&ps[2]],
        ps[1],
        b"interactive",
        b"interactive message",
    )
    .unwrap();
    let mut secondary = sign_secondary(
        StdRng::from_seed(rng.gen()),
        &cohort,
        &shards[&ps[1]],
        ps[2],
        b"interactive",
        b"interactive message",
    )
    .unwrap();
    let (sig, ()) = run_two_party_protocol(ps[2], ps[1], &mut primary, &mut secondary).unwrap();
    assert!(verify(&public_key, b"interactive message", &sig));
}

#[test]
fn test_e2e_secp256k1() {
    use k256::ecdsa::{signature::Verifier, Signature, VerifyingKey};

    test_e2e::<Secp256k1>(|public_key, msg, sig| {
        let key = VerifyingKey::from_affine(*public_key).unwrap();
        let signature = Signature::from_scalars(sig.r(), sig.s).unwrap();
        let recovered = VerifyingKey::recover_from_msg(msg, &signature, sig.recovery_id).unwrap();
        recovered == key && key.verify(msg, &signature).is_ok()
    });
}

#[test]
fn test_e2e_p256() {
    use p256::ecdsa::{signature::Verifier, Signature, VerifyingKey};

    test_e2e::<NistP256>(|public_key, msg, sig| {
        let key = VerifyingKey::from_affine(*public_key).unwrap();
        let signature = Signature::from_scalars(sig.r(), sig.s).unwrap();
        key.verify(msg, &signature).is_ok()
    });
}

#[test]
fn test_hello_world_batch() {
    const TAU: usize = 16;
    let mut rng = init_testing();
    let (cohort, ps) = cohort(3, 2);
    let shards = setup::<Secp256k1>(&mut rng, &cohort);
    let public_key = shards[&ps[0]].public_key();

    let quorum = [ps[0], ps[1]];
    let mut batches = run_presign::<Secp256k1>(&mut rng, &cohort, &quorum, TAU);

    // Every nonce a party generated arrived intact at its peer.
    for index in 0..TAU {
        for &p in &quorum {
            let mine = batches[&p].get(index).unwrap().big_r(p).unwrap();
            for &q in &quorum {
                let seen = batches[&q].get(index).unwrap().big_r(p).unwrap();
                assert_eq!(
                    encode(&SerializablePoint::<Secp256k1>::from_affine(mine)),
                    encode(&SerializablePoint::<Secp256k1>::from_affine(seen))
                );
            }
        }
    }

    let mut seen_r = HashSet::new();
    for index in 0..TAU {
        let sig = sign_noninteractive(
            &mut rng,
            &cohort,
            &shards,
            &mut batches,
            index,
            ps[0],
            ps[1],
            b"Hello World!",
        )
        .unwrap();
        assert!(sig.verify(&public_key, b"Hello World!"));
        assert!(seen_r.insert(encode(&SerializablePoint::<Secp256k1>::from_affine(sig.big_r))));
    }
    assert_eq!(seen_r.len(), TAU);
    assert_eq!(batches[&ps[0]].remaining(), 0);
    assert_eq!(batches[&ps[1]].remaining(), 0);
}

#[test]
fn test_presignature_cannot_be_taken_twice() {
    let mut rng = init_testing();
    let (cohort, ps) = cohort(2, 2);
    let shards = setup::<Secp256k1>(&mut rng, &cohort);
    let mut batches = run_presign::<Secp256k1>(&mut rng, &cohort, &ps, 1);

    sign_noninteractive(&mut rng, &cohort, &shards, &mut batches, 0, ps[0], ps[1], b"first")
        .unwrap();
    let result =
        sign_noninteractive(&mut rng, &cohort, &shards, &mut batches, 0, ps[0], ps[1], b"second");
    assert!(matches!(result, Err(ProtocolError::InvalidArgument(_))));
}

/// Signing two messages with the same presignature reveals the signing key.
///
/// Presignatures aren't `Clone`, so this has to copy one by hand.
#[test]
fn test_presignature_reuse_leaks_key() {
    let mut rng = init_testing();
    let (cohort, ps) = cohort(2, 2);
    let shards = setup::<Secp256k1>(&mut rng, &cohort);
    let public_key = k256::ProjectivePoint::from(shards[&ps[0]].public_key());
    let mut batches = run_presign::<Secp256k1>(&mut rng, &cohort, &ps, 1);

    let copy = |presig: &PreSignature<Secp256k1>| PreSignature::<Secp256k1> {
        k: presig.k,
        big_r: presig.big_r.clone(),
    };
    let initiator = batches.get_mut(&ps[0]).unwrap().take(0).unwrap();
    let aggregator = batches.get_mut(&ps[1]).unwrap().take(0).unwrap();
    let (initiator_copy, aggregator_copy) = (copy(&initiator), copy(&aggregator));

    let mut sign = |initiator, aggregator, msg: &[u8]| {
        let partial = NonInteractiveCosigner::new(&cohort, &shards[&ps[0]], initiator)
            .unwrap()
            .produce_partial_signature(&mut rng, ps[1], msg)
            .unwrap();
        NonInteractiveCosigner::new(&cohort, &shards[&ps[1]], aggregator)
            .unwrap()
            .produce_signature(ps[0], &partial, msg)
            .unwrap()
    };
    let sig1 = sign(initiator, aggregator, b"first");
    let sig2 = sign(initiator_copy, aggregator_copy, b"second");
    assert_eq!(sig1.big_r, sig2.big_r);

    let r = sig1.r();
    let m1 = Secp256k1::scalar_hash(b"first");
    let m2 = Secp256k1::scalar_hash(b"second");
    // The signatures were normalized, so each s might have been negated.
    let mut extracted = false;
    for s1 in [sig1.s, -sig1.s] {
        for s2 in [sig2.s, -sig2.s] {
            let diff = s1 - s2;
            if bool::from(diff.is_zero()) {
                continue;
            }
            let k = (m1 - m2) * diff.invert().unwrap();
            let x = (s1 * k - m1) * r.invert().unwrap();
            if k256::ProjectivePoint::generator() * x == public_key {
                extracted = true;
            }
        }
    }
    assert!(extracted);
}

#[test]
fn test_designated_aggregator() {
    let mut rng = init_testing();
    let ps: Vec<_> = (0..3u8)
        .map(|i| IdentityKey::from_public_key(&[i]))
        .collect();
    let cohort = CohortConfig::new(2, &ps, Some(vec![ps[2]])).unwrap();
    let shards = setup::<Secp256k1>(&mut rng, &cohort);

    let quorum = [ps[0], ps[2]];
    let mut batches = run_presign::<Secp256k1>(&mut rng, &cohort, &quorum, 2);
    let result =
        sign_noninteractive(&mut rng, &cohort, &shards, &mut batches, 0, ps[2], ps[0], b"msg");
    assert!(matches!(result, Err(ProtocolError::InvalidArgument(_))));
    let sig =
        sign_noninteractive(&mut rng, &cohort, &shards, &mut batches, 1, ps[0], ps[2], b"msg")
            .unwrap();
    assert!(sig.verify(&shards[&ps[0]].public_key(), b"msg"));

    assert!(sign_primary(OsRng, &cohort, &shards[&ps[0]], ps[2], b"s", b"msg").is_err());
    assert!(sign_primary(OsRng, &cohort, &shards[&ps[2]], ps[0], b"s", b"msg").is_ok());
}

#[test]
fn test_shards_survive_serialization() {
    let mut rng = init_testing();
    let (cohort, ps) = cohort(2, 2);
    let shards = setup::<NistP256>(&mut rng, &cohort);
    let restored: HashMap<IdentityKey, Shard<NistP256>> = shards
        .iter()
        .map(|(p, shard)| (*p, crate::serde::decode(&encode(shard)).unwrap()))
        .collect();

    let mut batches = run_presign::<NistP256>(&mut rng, &cohort, &ps, 1);
    let sig =
        sign_noninteractive(&mut rng, &cohort, &restored, &mut batches, 0, ps[1], ps[0], b"msg")
            .unwrap();
    assert!(sig.verify(&shards[&ps[0]].public_key(), b"msg"));
}
