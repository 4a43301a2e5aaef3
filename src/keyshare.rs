//! Distributed generation of a Shamir shared signing key.
//!
//! This produces the signing key shares that the backup protocol in
//! [crate::dkg] later turns into shards.
use std::collections::{BTreeMap, HashMap};

use elliptic_curve::{Field, Group, ScalarPrimitive};
use magikitten::Transcript;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    compat::CSCurve,
    config::{bad_parameters, CohortConfig},
    crypto::{commit, hash, Commitment, Digest, Randomizer},
    math::{GroupPolynomial, Polynomial},
    proofs::dlog,
    protocol::{
        internal::{Communication, Executor},
        IdentityKey, InitializationError, Protocol, ProtocolError,
    },
    serde::encode,
    shard::SigningKeyShare,
};

const LABEL: &[u8] = b"lindell-sith v0.1.0 keygen";

/// Represents the output of the key generation protocol.
///
/// This contains our share of the private key, along with the public key,
/// and the public counterpart of every party's share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeygenOutput<C: CSCurve> {
    pub private_share: SigningKeyShare<C>,
    pub public_key: C::AffinePoint,
    pub public_shares: HashMap<IdentityKey, C::AffinePoint>,
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
struct Reveal<C: CSCurve> {
    big_f: GroupPolynomial<C>,
    randomizer: Randomizer,
    proof: dlog::Proof<C>,
}

async fn do_keygen<C: CSCurve>(
    mut rng: impl CryptoRngCore,
    chan: Communication,
    cohort: CohortConfig,
    me: IdentityKey,
    session_id: Vec<u8>,
) -> Result<KeygenOutput<C>, ProtocolError> {
    let participants = cohort.participants();
    let threshold = cohort.threshold();

    let mut transcript = Transcript::new(LABEL);
    transcript.message(b"session id", &session_id);
    transcript.message(b"group", C::NAME);
    transcript.message(b"participants", &encode(participants));
    // To allow interop between platforms where usize is different!
    transcript.message(b"threshold", &(threshold as u64).to_be_bytes());

    let s_i = C::Scalar::random(&mut rng);
    let f: Polynomial<C> = Polynomial::extend_random(&mut rng, threshold, &s_i);
    let mut big_f = f.commit();
    let (my_commitment, my_randomizer) = commit(&mut rng, &session_id, &big_f);

    chan.send_many(0, &my_commitment).await;

    let mut all_commitments: BTreeMap<IdentityKey, Commitment> = chan
        .recv_from_others(0, participants, me)
        .await?
        .into_iter()
        .collect();
    all_commitments.insert(me, my_commitment);

    // Everybody needs to have seen the same commitments.
    let my_confirmation = hash(&all_commitments);
    transcript.message(b"confirmation", my_confirmation.as_ref());
    chan.send_many(1, &my_confirmation).await;

    let my_proof = dlog::prove(
        &mut rng,
        &mut transcript.forked(b"dlog0", &me.bytes()),
        dlog::Statement::<C> {
            public: &big_f.evaluate_zero(),
        },
        dlog::Witness::<C> {
            x: &f.evaluate_zero(),
        },
    );
    chan.send_many(
        2,
        &Reveal {
            big_f: big_f.clone(),
            randomizer: my_randomizer,
            proof: my_proof,
        },
    )
    .await;

    for p in participants.others(me) {
        let x_i_j: ScalarPrimitive<C> = f.evaluate(&participants.scalar::<C>(p)).into();
        chan.send_private(3, p, &x_i_j).await;
    }
    let mut x_i = f.evaluate(&participants.scalar::<C>(me));

    let confirmations: HashMap<IdentityKey, Digest> =
        chan.recv_from_others(1, participants, me).await?;
    for (from, confirmation) in confirmations {
        if confirmation != my_confirmation {
            return Err(ProtocolError::verification_failed(
                from,
                "confirmation did not match expectation",
            ));
        }
    }

    let reveals: HashMap<IdentityKey, Reveal<C>> =
        chan.recv_from_others(2, participants, me).await?;
    for (from, reveal) in reveals {
        if reveal.big_f.len() != threshold {
            return Err(ProtocolError::verification_failed(
                from,
                "polynomial has the wrong length",
            ));
        }
        if !all_commitments[&from].check(&session_id, &reveal.big_f, &reveal.randomizer) {
            return Err(ProtocolError::verification_failed(
                from,
                "commitment did not match revealed polynomial",
            ));
        }
        let statement = dlog::Statement::<C> {
            public: &reveal.big_f.evaluate_zero(),
        };
        if !dlog::verify(
            &mut transcript.forked(b"dlog0", &from.bytes()),
            statement,
            &reveal.proof,
        ) {
            return Err(ProtocolError::verification_failed(
                from,
                "dlog proof failed to verify",
            ));
        }
        big_f += &reveal.big_f;
    }

    let shares: HashMap<IdentityKey, ScalarPrimitive<C>> =
        chan.recv_from_others(3, participants, me).await?;
    for (_, x_j_i) in shares {
        x_i += C::Scalar::from(x_j_i);
    }

    if big_f.evaluate(&participants.scalar::<C>(me)) != C::ProjectivePoint::generator() * x_i {
        return Err(ProtocolError::AssertionFailed(
            "received bad private share".to_string(),
        ));
    }

    let public_key: C::AffinePoint = big_f.evaluate_zero().into();
    let public_shares: HashMap<IdentityKey, C::AffinePoint> = participants
        .participants()
        .iter()
        .map(|&p| (p, big_f.evaluate(&participants.scalar::<C>(p)).into()))
        .collect();
    let private_share = SigningKeyShare {
        share: x_i,
        public_key,
    };
    private_share
        .validate()
        .map_err(|e| ProtocolError::AssertionFailed(e.to_string()))?;

    debug!(%me, "finished key generation");
    Ok(KeygenOutput {
        private_share,
        public_key,
        public_shares,
    })
}

/// The key generation protocol, for a given cohort.
///
/// This produces a new key pair, such that any set of participants
/// of size `>= threshold` can reconstruct the private key,
/// but no smaller set can do the same.
#[instrument(skip_all, err(Debug))]
pub fn keygen<C: CSCurve>(
    rng: impl CryptoRngCore,
    cohort: &CohortConfig,
    me: IdentityKey,
    session_id: &[u8],
) -> Result<impl Protocol<Output = KeygenOutput<C>>, InitializationError> {
    cohort.check_member(me)?;
    if session_id.is_empty() {
        return Err(bad_parameters("session id cannot be empty".to_string()));
    }

    let comms = Communication::new(4, cohort.participants().len());
    let fut = do_keygen(
        rng,
        comms.clone(),
        cohort.clone(),
        me,
        session_id.to_vec(),
    );
    Ok(Executor::new(comms, fut))
}
