use std::mem;

use elliptic_curve::{Field, Group};
use magikitten::Transcript;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use super::{encrypted_half, finish_signature, nonce_x, FullSignature};
use crate::{
    compat::{CSCurve, SerializablePoint},
    config::{bad_parameters, CohortConfig},
    crypto::{commit, Commitment, Randomizer},
    paillier::Ciphertext,
    participants::ParticipantList,
    proofs::dlog,
    protocol::{
        internal::{Communication, Executor},
        IdentityKey, InitializationError, Protocol, ProtocolError,
    },
    shard::{Shard, ThresholdShard},
};

const LABEL: &[u8] = b"lindell-sith v0.1.0 interactive sign";

/// Round 1, primary to secondary: a commitment to the primary's nonce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRound1 {
    pub(crate) commitment: Commitment,
}

/// Round 2, secondary to primary: the secondary's nonce, with a proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct SignRound2<C: CSCurve> {
    pub(crate) big_r2: SerializablePoint<C>,
    pub(crate) proof: dlog::Proof<C>,
}

/// Round 3, primary to secondary: the opening of the primary's nonce, with a proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct SignRound3<C: CSCurve> {
    pub(crate) big_r1: SerializablePoint<C>,
    pub(crate) randomizer: Randomizer,
    pub(crate) proof: dlog::Proof<C>,
}

/// Round 4, secondary to primary: the secondary's encrypted half of the signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRound4 {
    pub(crate) c3: Ciphertext,
}

/// What both roles agree on before starting.
struct Session<'a, C: CSCurve> {
    shard: &'a Shard<C>,
    pair: ParticipantList,
    session_id: Vec<u8>,
    msg_hash: C::Scalar,
    transcript: Transcript,
}

impl<'a, C: CSCurve> Session<'a, C> {
    fn new(
        cohort: &CohortConfig,
        shard: &'a Shard<C>,
        primary: IdentityKey,
        secondary: IdentityKey,
        session_id: &[u8],
        msg: &[u8],
    ) -> Result<Self, InitializationError> {
        if cohort.threshold() != 2 {
            return Err(bad_parameters(format!(
                "signing needs a threshold of 2, not {}",
                cohort.threshold()
            )));
        }
        if session_id.is_empty() {
            return Err(bad_parameters("session id cannot be empty".to_string()));
        }
        if primary == secondary {
            return Err(bad_parameters("cannot cosign with ourselves".to_string()));
        }
        if !cohort.is_aggregator(primary) {
            return Err(bad_parameters(format!(
                "{primary} may not aggregate signatures"
            )));
        }
        shard.validate(cohort)?;
        let pair = cohort.quorum(&[primary, secondary])?;

        let msg_hash = C::scalar_hash(msg);
        let mut transcript = Transcript::new(LABEL);
        transcript.message(b"session id", session_id);
        transcript.message(b"group", C::NAME);
        transcript.message(b"primary", &primary.bytes());
        transcript.message(b"secondary", &secondary.bytes());
        transcript.message(b"message", msg);

        Ok(Self {
            shard,
            pair,
            session_id: session_id.to_vec(),
            msg_hash,
            transcript,
        })
    }

    fn proof_transcript(&self, who: IdentityKey) -> Transcript {
        self.transcript.forked(b"nonce proof", &who.bytes())
    }

    fn sample_nonce(rng: &mut impl CryptoRngCore) -> (C::Scalar, C::ProjectivePoint) {
        loop {
            let k = C::Scalar::random(&mut *rng);
            if !bool::from(k.is_zero()) {
                return (k, C::ProjectivePoint::generator() * k);
            }
        }
    }

    fn prove_nonce(
        &self,
        rng: &mut impl CryptoRngCore,
        who: IdentityKey,
        k: &C::Scalar,
        big_r: &C::ProjectivePoint,
    ) -> dlog::Proof<C> {
        dlog::prove(
            rng,
            &mut self.proof_transcript(who),
            dlog::Statement::<C> { public: big_r },
            dlog::Witness::<C> { x: k },
        )
    }

    fn verify_nonce(
        &self,
        who: IdentityKey,
        big_r: &C::ProjectivePoint,
        proof: &dlog::Proof<C>,
    ) -> Result<(), ProtocolError> {
        if !dlog::verify(
            &mut self.proof_transcript(who),
            dlog::Statement::<C> { public: big_r },
            proof,
        ) {
            return Err(ProtocolError::verification_failed(
                who,
                "nonce proof failed to verify",
            ));
        }
        Ok(())
    }
}

enum PrimaryState<C: CSCurve> {
    Round1,
    Round3 {
        k1: C::Scalar,
        big_r1: SerializablePoint<C>,
        randomizer: Randomizer,
    },
    Round5 {
        k1: C::Scalar,
        big_r: C::AffinePoint,
    },
    Finished,
    Aborted,
}

impl<C: CSCurve> PrimaryState<C> {
    fn expected(&self) -> Option<usize> {
        match self {
            PrimaryState::Round1 => Some(1),
            PrimaryState::Round3 { .. } => Some(3),
            PrimaryState::Round5 { .. } => Some(5),
            PrimaryState::Finished | PrimaryState::Aborted => None,
        }
    }
}

/// The party which commits to its nonce first, and ends up with the signature.
///
/// This party must be allowed to aggregate signatures. It runs rounds 1, 3 and 5.
pub struct InteractivePrimary<'a, C: CSCurve> {
    me: IdentityKey,
    secondary: IdentityKey,
    session: Session<'a, C>,
    state: PrimaryState<C>,
}

impl<'a, C: CSCurve> InteractivePrimary<'a, C> {
    pub fn new(
        cohort: &CohortConfig,
        shard: &'a Shard<C>,
        secondary: IdentityKey,
        session_id: &[u8],
        msg: &[u8],
    ) -> Result<Self, InitializationError> {
        let me = shard.identity();
        let session = Session::new(cohort, shard, me, secondary, session_id, msg)?;
        Ok(Self {
            me,
            secondary,
            session,
            state: PrimaryState::Round1,
        })
    }

    /// The round this party is waiting for, if any.
    pub fn round(&self) -> Option<usize> {
        self.state.expected()
    }

    #[instrument(skip_all, fields(me = %self.me), err(Debug))]
    pub fn round1(&mut self, rng: &mut impl CryptoRngCore) -> Result<SignRound1, ProtocolError> {
        match mem::replace(&mut self.state, PrimaryState::Aborted) {
            PrimaryState::Round1 => {}
            other => return Err(ProtocolError::invalid_round(other.expected(), 1)),
        }
        let (k1, big_r1) = Session::<C>::sample_nonce(rng);
        let big_r1 = SerializablePoint::<C>::from_projective(&big_r1);
        let (commitment, randomizer) = commit(rng, &self.session.session_id, &(big_r1, self.me));
        self.state = PrimaryState::Round3 {
            k1,
            big_r1,
            randomizer,
        };
        Ok(SignRound1 { commitment })
    }

    #[instrument(skip_all, fields(me = %self.me), err(Debug))]
    pub fn round3(
        &mut self,
        rng: &mut impl CryptoRngCore,
        input: &SignRound2<C>,
    ) -> Result<SignRound3<C>, ProtocolError> {
        let (k1, big_r1, randomizer) = match mem::replace(&mut self.state, PrimaryState::Aborted)
        {
            PrimaryState::Round3 {
                k1,
                big_r1,
                randomizer,
            } => (k1, big_r1, randomizer),
            other => return Err(ProtocolError::invalid_round(other.expected(), 3)),
        };

        let big_r2 = input.big_r2.to_projective();
        self.session
            .verify_nonce(self.secondary, &big_r2, &input.proof)?;
        let big_r: C::AffinePoint = (big_r2 * k1).into();
        nonce_x::<C>(&big_r)?;

        let proof = self
            .session
            .prove_nonce(rng, self.me, &k1, &big_r1.to_projective());
        self.state = PrimaryState::Round5 { k1, big_r };
        debug!("opened nonce");
        Ok(SignRound3 {
            big_r1,
            randomizer,
            proof,
        })
    }

    /// Decrypt the secondary's half, and finish the signature.
    #[instrument(skip_all, fields(me = %self.me), err(Debug))]
    pub fn round5(&mut self, input: &SignRound4) -> Result<FullSignature<C>, ProtocolError> {
        let (k1, big_r) = match mem::replace(&mut self.state, PrimaryState::Aborted) {
            PrimaryState::Round5 { k1, big_r } => (k1, big_r),
            other => return Err(ProtocolError::invalid_round(other.expected(), 5)),
        };
        let sig = finish_signature(
            self.session.shard,
            big_r,
            &k1,
            &input.c3,
            &self.session.msg_hash,
        )?;
        self.state = PrimaryState::Finished;
        info!("signature produced");
        Ok(sig)
    }
}

enum SecondaryState<C: CSCurve> {
    Round2,
    Round4 {
        k2: C::Scalar,
        commitment: Commitment,
    },
    Finished,
    Aborted,
}

impl<C: CSCurve> SecondaryState<C> {
    fn expected(&self) -> Option<usize> {
        match self {
            SecondaryState::Round2 => Some(2),
            SecondaryState::Round4 { .. } => Some(4),
            SecondaryState::Finished | SecondaryState::Aborted => None,
        }
    }
}

/// The party which helps the primary sign. It runs rounds 2 and 4.
pub struct InteractiveSecondary<'a, C: CSCurve> {
    me: IdentityKey,
    primary: IdentityKey,
    session: Session<'a, C>,
    state: SecondaryState<C>,
}

impl<'a, C: CSCurve> InteractiveSecondary<'a, C> {
    pub fn new(
        cohort: &CohortConfig,
        shard: &'a Shard<C>,
        primary: IdentityKey,
        session_id: &[u8],
        msg: &[u8],
    ) -> Result<Self, InitializationError> {
        let me = shard.identity();
        let session = Session::new(cohort, shard, primary, me, session_id, msg)?;
        Ok(Self {
            me,
            primary,
            session,
            state: SecondaryState::Round2,
        })
    }

    pub fn round(&self) -> Option<usize> {
        self.state.expected()
    }

    #[instrument(skip_all, fields(me = %self.me), err(Debug))]
    pub fn round2(
        &mut self,
        rng: &mut impl CryptoRngCore,
        input: &SignRound1,
    ) -> Result<SignRound2<C>, ProtocolError> {
        match mem::replace(&mut self.state, SecondaryState::Aborted) {
            SecondaryState::Round2 => {}
            other => return Err(ProtocolError::invalid_round(other.expected(), 2)),
        }
        let (k2, big_r2) = Session::<C>::sample_nonce(rng);
        let proof = self.session.prove_nonce(rng, self.me, &k2, &big_r2);
        self.state = SecondaryState::Round4 {
            k2,
            commitment: input.commitment,
        };
        Ok(SignRound2 {
            big_r2: SerializablePoint::<C>::from_projective(&big_r2),
            proof,
        })
    }

    /// Check the primary's nonce, and encrypt our half of the signature under its key.
    #[instrument(skip_all, fields(me = %self.me), err(Debug))]
    pub fn round4(
        &mut self,
        rng: &mut impl CryptoRngCore,
        input: &SignRound3<C>,
    ) -> Result<SignRound4, ProtocolError> {
        let (k2, commitment) = match mem::replace(&mut self.state, SecondaryState::Aborted) {
            SecondaryState::Round4 { k2, commitment } => (k2, commitment),
            other => return Err(ProtocolError::invalid_round(other.expected(), 4)),
        };

        if !commitment.check(
            &self.session.session_id,
            &(input.big_r1, self.primary),
            &input.randomizer,
        ) {
            return Err(ProtocolError::verification_failed(
                self.primary,
                "nonce commitment did not match opening",
            ));
        }
        let big_r1 = input.big_r1.to_projective();
        self.session
            .verify_nonce(self.primary, &big_r1, &input.proof)?;

        let big_r: C::AffinePoint = (big_r1 * k2).into();
        let r = nonce_x::<C>(&big_r)?;
        let c3 = encrypted_half(
            rng,
            self.session.shard,
            &self.session.pair,
            self.primary,
            &k2,
            &r,
            &self.session.msg_hash,
        )?;
        self.state = SecondaryState::Finished;
        info!("encrypted half of the signature");
        Ok(SignRound4 { c3 })
    }
}

/// Receive the single message the other party of a pair sends for a round.
async fn recv_from_peer<T: serde::de::DeserializeOwned>(
    chan: &Communication,
    round: u8,
    pair: &ParticipantList,
    me: IdentityKey,
    peer: IdentityKey,
) -> Result<T, ProtocolError> {
    let mut messages = chan.recv_from_others(round, pair, me).await?;
    messages.remove(&peer).ok_or_else(|| {
        error!(%peer, round, "missing input");
        ProtocolError::MissingInput {
            party: peer,
            round: usize::from(round) + 1,
        }
    })
}

async fn do_sign_primary<C: CSCurve>(
    mut rng: impl CryptoRngCore,
    chan: Communication,
    mut primary: InteractivePrimary<'_, C>,
) -> Result<FullSignature<C>, ProtocolError> {
    let (me, secondary) = (primary.me, primary.secondary);
    let pair = primary.session.pair.clone();

    let out1 = primary.round1(&mut rng)?;
    chan.send_private(0, secondary, &out1).await;
    let in2: SignRound2<C> = recv_from_peer(&chan, 1, &pair, me, secondary).await?;

    let out3 = primary.round3(&mut rng, &in2)?;
    chan.send_private(2, secondary, &out3).await;
    let in4: SignRound4 = recv_from_peer(&chan, 3, &pair, me, secondary).await?;

    primary.round5(&in4)
}

async fn do_sign_secondary<C: CSCurve>(
    mut rng: impl CryptoRngCore,
    chan: Communication,
    mut secondary: InteractiveSecondary<'_, C>,
) -> Result<(), ProtocolError> {
    let (me, primary) = (secondary.me, secondary.primary);
    let pair = secondary.session.pair.clone();

    let in1: SignRound1 = recv_from_peer(&chan, 0, &pair, me, primary).await?;
    let out2 = secondary.round2(&mut rng, &in1)?;
    chan.send_private(1, primary, &out2).await;

    let in3: SignRound3<C> = recv_from_peer(&chan, 2, &pair, me, primary).await?;
    let out4 = secondary.round4(&mut rng, &in3)?;
    chan.send_private(3, primary, &out4).await;

    Ok(())
}

/// The primary's side of interactive signing, driven through the [Protocol] interface.
///
/// This returns the signature, once it has been checked against the shard's public key.
pub fn sign_primary<'a, C: CSCurve>(
    rng: impl CryptoRngCore + 'a,
    cohort: &CohortConfig,
    shard: &'a Shard<C>,
    secondary: IdentityKey,
    session_id: &[u8],
    msg: &[u8],
) -> Result<impl Protocol<Output = FullSignature<C>> + 'a, InitializationError> {
    let primary = InteractivePrimary::new(cohort, shard, secondary, session_id, msg)?;
    let comms = Communication::new(4, 2);
    let fut = do_sign_primary(rng, comms.clone(), primary);
    Ok(Executor::new(comms, fut))
}

/// The secondary's side of interactive signing, driven through the [Protocol] interface.
pub fn sign_secondary<'a, C: CSCurve>(
    rng: impl CryptoRngCore + 'a,
    cohort: &CohortConfig,
    shard: &'a Shard<C>,
    primary: IdentityKey,
    session_id: &[u8],
    msg: &[u8],
) -> Result<impl Protocol<Output = ()> + 'a, InitializationError> {
    let secondary = InteractiveSecondary::new(cohort, shard, primary, session_id, msg)?;
    let comms = Communication::new(4, 2);
    let fut = do_sign_secondary(rng, comms.clone(), secondary);
    Ok(Executor::new(comms, fut))
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use k256::{ProjectivePoint, Secp256k1};
    use rand_core::OsRng;

    use super::*;
    use crate::{dealer::deal, protocol::run_two_party_protocol};

    const BITS: usize = 1024;

    fn setup(
        aggregators: Option<&[usize]>,
    ) -> (CohortConfig, Vec<IdentityKey>, HashMap<IdentityKey, Shard<Secp256k1>>) {
        let ps: Vec<_> = (0..3u8)
            .map(|i| IdentityKey::from_public_key(&[i]))
            .collect();
        let aggregators = aggregators.map(|a| a.iter().map(|i| ps[*i]).collect());
        let cohort = CohortConfig::new(2, &ps, aggregators).unwrap();
        let shards = deal::<Secp256k1>(&mut OsRng, &cohort, BITS).unwrap();
        (cohort, ps, shards)
    }

    fn parties<'a>(
        cohort: &CohortConfig,
        shards: &'a HashMap<IdentityKey, Shard<Secp256k1>>,
        primary: IdentityKey,
        secondary: IdentityKey,
        msg: &[u8],
    ) -> (
        InteractivePrimary<'a, Secp256k1>,
        InteractiveSecondary<'a, Secp256k1>,
    ) {
        (
            InteractivePrimary::new(cohort, &shards[&primary], secondary, b"sign test", msg)
                .unwrap(),
            InteractiveSecondary::new(cohort, &shards[&secondary], primary, b"sign test", msg)
                .unwrap(),
        )
    }

    #[test]
    fn test_interactive_rounds() -> Result<(), Box<dyn std::error::Error>> {
        let (cohort, ps, shards) = setup(None);
        let (mut primary, mut secondary) = parties(&cohort, &shards, ps[2], ps[0], b"hello");

        let out1 = primary.round1(&mut OsRng)?;
        let out2 = secondary.round2(&mut OsRng, &out1)?;
        let out3 = primary.round3(&mut OsRng, &out2)?;
        let out4 = secondary.round4(&mut OsRng, &out3)?;
        let sig = primary.round5(&out4)?;

        assert!(sig.verify(&shards[&ps[2]].public_key(), b"hello"));
        assert_eq!(primary.round(), None);
        assert_eq!(secondary.round(), None);
        Ok(())
    }

    #[test]
    fn test_round_order_is_enforced() -> Result<(), Box<dyn std::error::Error>> {
        let (cohort, ps, shards) = setup(None);
        let (mut primary, mut secondary) = parties(&cohort, &shards, ps[0], ps[1], b"hello");
        let out1 = primary.round1(&mut OsRng)?;
        let out2 = secondary.round2(&mut OsRng, &out1)?;
        assert!(matches!(
            primary.round5(&SignRound4 {
                c3: shards[&ps[0]].payload().encrypted_share(ps[0]).unwrap().clone()
            }),
            Err(ProtocolError::InvalidRound {
                expected: Some(3),
                requested: 5
            })
        ));
        assert!(primary.round3(&mut OsRng, &out2).is_err());

        let (mut primary, mut secondary) = parties(&cohort, &shards, ps[0], ps[1], b"hello");
        let out1 = primary.round1(&mut OsRng)?;
        assert!(primary.round1(&mut OsRng).is_err());
        secondary.round2(&mut OsRng, &out1)?;
        assert!(matches!(
            secondary.round2(&mut OsRng, &out1),
            Err(ProtocolError::InvalidRound {
                expected: Some(4),
                requested: 2
            })
        ));
        Ok(())
    }

    #[test]
    fn test_tampering_is_blamed() -> Result<(), Box<dyn std::error::Error>> {
        let (cohort, ps, shards) = setup(None);

        // A bad proof from the secondary.
        let (mut primary, mut secondary) = parties(&cohort, &shards, ps[0], ps[1], b"hello");
        let out1 = primary.round1(&mut OsRng)?;
        let mut out2 = secondary.round2(&mut OsRng, &out1)?;
        out2.proof.s += k256::Scalar::ONE;
        assert!(matches!(
            primary.round3(&mut OsRng, &out2),
            Err(ProtocolError::VerificationFailed { culprit, .. }) if culprit == ps[1]
        ));

        // A bad opening, or a bad proof, from the primary.
        for tamper in 0..3 {
            let (mut primary, mut secondary) = parties(&cohort, &shards, ps[0], ps[1], b"hello");
            let out1 = primary.round1(&mut OsRng)?;
            let out2 = secondary.round2(&mut OsRng, &out1)?;
            let mut out3 = primary.round3(&mut OsRng, &out2)?;
            match tamper {
                0 => out3.randomizer.0[31] ^= 1,
                1 => {
                    let p = out3.big_r1.to_projective() + ProjectivePoint::GENERATOR;
                    out3.big_r1 = SerializablePoint::<Secp256k1>::from_projective(&p);
                }
                _ => out3.proof.e += k256::Scalar::ONE,
            }
            assert!(matches!(
                secondary.round4(&mut OsRng, &out3),
                Err(ProtocolError::VerificationFailed { culprit, .. }) if culprit == ps[0]
            ));
        }
        Ok(())
    }

    #[test]
    fn test_primary_must_be_aggregator() {
        let (cohort, ps, shards) = setup(Some(&[0]));
        assert!(
            InteractivePrimary::new(&cohort, &shards[&ps[1]], ps[0], b"sign test", b"m").is_err()
        );
        assert!(
            InteractiveSecondary::new(&cohort, &shards[&ps[0]], ps[1], b"sign test", b"m").is_err()
        );
        assert!(
            InteractivePrimary::new(&cohort, &shards[&ps[0]], ps[1], b"sign test", b"m").is_ok()
        );
        assert!(
            InteractivePrimary::new(&cohort, &shards[&ps[0]], ps[0], b"sign test", b"m").is_err()
        );
        assert!(InteractivePrimary::new(&cohort, &shards[&ps[0]], ps[1], b"", b"m").is_err());
    }

    #[test]
    fn test_sign_protocol() -> Result<(), Box<dyn std::error::Error>> {
        let (cohort, ps, shards) = setup(None);
        let mut primary = sign_primary(OsRng, &cohort, &shards[&ps[1]], ps[2], b"session", b"msg")?;
        let mut secondary =
            sign_secondary(OsRng, &cohort, &shards[&ps[2]], ps[1], b"session", b"msg")?;
        let (sig, ()) = run_two_party_protocol(ps[1], ps[2], &mut primary, &mut secondary)?;
        assert!(sig.verify(&shards[&ps[1]].public_key(), b"msg"));
        Ok(())
    }

    #[test]
    fn test_mismatched_messages_fail() -> Result<(), Box<dyn std::error::Error>> {
        let (cohort, ps, shards) = setup(None);
        let mut primary = sign_primary(OsRng, &cohort, &shards[&ps[0]], ps[1], b"session", b"a")?;
        let mut secondary =
            sign_secondary(OsRng, &cohort, &shards[&ps[1]], ps[0], b"session", b"b")?;
        // The transcripts differ, so the first proof already fails.
        assert!(run_two_party_protocol(ps[0], ps[1], &mut primary, &mut secondary).is_err());
        Ok(())
    }
}
