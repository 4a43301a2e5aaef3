//! Generating presignatures ahead of time.
//!
//! A quorum of parties runs this protocol once, producing a batch of `tau`
//! independent nonces. Each nonce can later be spent on exactly one signature,
//! using a single message from the initiator to the aggregator.
use std::{collections::HashMap, fmt, mem};

use elliptic_curve::{Field, Group};
use magikitten::Transcript;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::{
    compat::{CSCurve, SerializablePoint},
    config::{bad_parameters, CohortConfig},
    crypto::{commit, Commitment, Randomizer},
    participants::ParticipantList,
    proofs::dlog,
    protocol::{
        inputs_from_others,
        internal::{Communication, Executor},
        IdentityKey, InitializationError, Protocol, ProtocolError,
    },
    serde::encode,
};

const LABEL: &[u8] = b"lindell-sith v0.1.0 presign";

/// One nonce, ready to be spent on a single signature.
///
/// This deliberately isn't `Clone`: signing two messages with the same
/// presignature reveals the signing key.
pub struct PreSignature<C: CSCurve> {
    pub(crate) k: C::Scalar,
    pub(crate) big_r: HashMap<IdentityKey, C::AffinePoint>,
}

impl<C: CSCurve> PreSignature<C> {
    /// The nonce commitment of a given presigner.
    pub fn big_r(&self, party: IdentityKey) -> Option<C::AffinePoint> {
        self.big_r.get(&party).copied()
    }

    /// The parties that took part in generating this presignature.
    pub fn presigners(&self) -> impl Iterator<Item = IdentityKey> + '_ {
        self.big_r.keys().copied()
    }
}

impl<C: CSCurve> fmt::Debug for PreSignature<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreSignature")
            .field("k", &"[redacted]")
            .field("big_r", &self.big_r)
            .finish()
    }
}

/// The output of the generator: `tau` presignatures, handed out one at a time.
#[derive(Debug)]
pub struct PreSignatureBatch<C: CSCurve> {
    presignatures: Vec<Option<PreSignature<C>>>,
}

impl<C: CSCurve> PreSignatureBatch<C> {
    /// How many presignatures this batch was created with.
    pub fn len(&self) -> usize {
        self.presignatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presignatures.is_empty()
    }

    /// How many presignatures haven't been taken yet.
    pub fn remaining(&self) -> usize {
        self.presignatures.iter().filter(|p| p.is_some()).count()
    }

    /// Look at a presignature which hasn't been taken yet.
    pub fn get(&self, index: usize) -> Option<&PreSignature<C>> {
        self.presignatures.get(index).and_then(Option::as_ref)
    }

    /// Take a presignature out of this batch, in order to sign with it.
    ///
    /// Each index can only be taken once.
    pub fn take(&mut self, index: usize) -> Result<PreSignature<C>, ProtocolError> {
        let slot = self.presignatures.get_mut(index).ok_or_else(|| {
            ProtocolError::InvalidArgument(format!("no presignature at index {index}"))
        })?;
        slot.take().ok_or_else(|| {
            error!(index, "presignature was already used");
            ProtocolError::InvalidArgument(format!("presignature {index} was already used"))
        })
    }
}

/// The first message: a commitment to each of our nonces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignRound1 {
    pub(crate) commitments: Vec<Commitment>,
}

/// The second message: our nonce commitments, opened, with proofs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct PresignRound2<C: CSCurve> {
    pub(crate) big_r: Vec<SerializablePoint<C>>,
    pub(crate) randomizers: Vec<Randomizer>,
    pub(crate) proofs: Vec<dlog::Proof<C>>,
}

enum State<C: CSCurve> {
    Round1,
    Round2 {
        k: Vec<C::Scalar>,
        big_r: Vec<SerializablePoint<C>>,
        randomizers: Vec<Randomizer>,
    },
    Round3 {
        k: Vec<C::Scalar>,
        big_r: Vec<SerializablePoint<C>>,
        commitments: HashMap<IdentityKey, Vec<Commitment>>,
    },
    Finished,
    Aborted,
}

impl<C: CSCurve> State<C> {
    fn expected(&self) -> Option<usize> {
        match self {
            State::Round1 => Some(1),
            State::Round2 { .. } => Some(2),
            State::Round3 { .. } => Some(3),
            State::Finished | State::Aborted => None,
        }
    }
}

/// One presigner in a quorum.
///
/// The rounds must be called in order, each exactly once, and each round
/// needs the previous round's message from every other member of the quorum.
pub struct PreSignatureGenerator<C: CSCurve> {
    quorum: ParticipantList,
    me: IdentityKey,
    tau: usize,
    session_id: Vec<u8>,
    transcript: Transcript,
    state: State<C>,
}

impl<C: CSCurve> PreSignatureGenerator<C> {
    /// Prepare to generate `tau` presignatures with a quorum of the cohort.
    pub fn new(
        cohort: &CohortConfig,
        me: IdentityKey,
        quorum: &[IdentityKey],
        tau: usize,
        session_id: &[u8],
    ) -> Result<Self, InitializationError> {
        if session_id.is_empty() {
            return Err(bad_parameters("session id cannot be empty".to_string()));
        }
        if tau == 0 {
            return Err(bad_parameters(
                "need to generate at least one presignature".to_string(),
            ));
        }
        let quorum = cohort.quorum(quorum)?;
        if !quorum.contains(me) {
            return Err(bad_parameters(format!("{me} is not part of the quorum")));
        }

        let mut transcript = Transcript::new(LABEL);
        transcript.message(b"session id", session_id);
        transcript.message(b"group", C::NAME);
        let presigners: Vec<u8> = quorum
            .participants()
            .iter()
            .flat_map(|p| p.bytes())
            .collect();
        transcript.message(b"presigners", &presigners);
        transcript.message(b"tau", &(tau as u64).to_be_bytes());

        Ok(Self {
            quorum,
            me,
            tau,
            session_id: session_id.to_vec(),
            transcript,
            state: State::Round1,
        })
    }

    /// The round this generator is waiting for, if any.
    pub fn round(&self) -> Option<usize> {
        self.state.expected()
    }

    fn proof_transcript(&self, who: IdentityKey, index: usize) -> Transcript {
        self.transcript
            .forked(b"nonce proof", &encode(&(who, index as u64)))
    }

    fn committed_value(
        who: IdentityKey,
        index: usize,
        big_r: &SerializablePoint<C>,
    ) -> (&SerializablePoint<C>, IdentityKey, u64) {
        (big_r, who, index as u64)
    }

    /// Sample our nonces, and commit to them.
    #[instrument(skip_all, fields(me = %self.me), err(Debug))]
    pub fn round1(&mut self, rng: &mut impl CryptoRngCore) -> Result<PresignRound1, ProtocolError> {
        match mem::replace(&mut self.state, State::Aborted) {
            State::Round1 => {}
            other => return Err(ProtocolError::invalid_round(other.expected(), 1)),
        }

        let mut k = Vec::with_capacity(self.tau);
        let mut big_r = Vec::with_capacity(self.tau);
        let mut randomizers = Vec::with_capacity(self.tau);
        let mut commitments = Vec::with_capacity(self.tau);
        for i in 0..self.tau {
            let k_i = loop {
                let k_i = C::Scalar::random(&mut *rng);
                if !bool::from(k_i.is_zero()) {
                    break k_i;
                }
            };
            let big_r_i = SerializablePoint::<C>::from_projective(
                &(C::ProjectivePoint::generator() * k_i),
            );
            let (c, r) = commit(
                rng,
                &self.session_id,
                &Self::committed_value(self.me, i, &big_r_i),
            );
            k.push(k_i);
            big_r.push(big_r_i);
            randomizers.push(r);
            commitments.push(c);
        }

        self.state = State::Round2 {
            k,
            big_r,
            randomizers,
        };
        debug!(tau = self.tau, "committed to nonces");
        Ok(PresignRound1 { commitments })
    }

    /// Record everybody's commitments, and open ours with proofs.
    #[instrument(skip_all, fields(me = %self.me), err(Debug))]
    pub fn round2(
        &mut self,
        rng: &mut impl CryptoRngCore,
        inputs: &HashMap<IdentityKey, PresignRound1>,
    ) -> Result<PresignRound2<C>, ProtocolError> {
        let (k, big_r, randomizers) = match mem::replace(&mut self.state, State::Aborted) {
            State::Round2 {
                k,
                big_r,
                randomizers,
            } => (k, big_r, randomizers),
            other => return Err(ProtocolError::invalid_round(other.expected(), 2)),
        };

        let mut commitments = HashMap::with_capacity(self.quorum.len());
        for (from, input) in inputs_from_others(&self.quorum, self.me, 2, inputs)? {
            if input.commitments.len() != self.tau {
                return Err(ProtocolError::verification_failed(
                    from,
                    format!(
                        "sent {} commitments instead of {}",
                        input.commitments.len(),
                        self.tau
                    ),
                ));
            }
            commitments.insert(from, input.commitments.clone());
        }

        let proofs = k
            .iter()
            .zip(big_r.iter())
            .enumerate()
            .map(|(i, (k_i, big_r_i))| {
                dlog::prove(
                    &mut *rng,
                    &mut self.proof_transcript(self.me, i),
                    dlog::Statement::<C> {
                        public: &big_r_i.to_projective(),
                    },
                    dlog::Witness::<C> { x: k_i },
                )
            })
            .collect();

        let out = PresignRound2 {
            big_r: big_r.clone(),
            randomizers,
            proofs,
        };
        self.state = State::Round3 {
            k,
            big_r,
            commitments,
        };
        Ok(out)
    }

    /// Open everybody's commitments, check their proofs, and produce the batch.
    #[instrument(skip_all, fields(me = %self.me), err(Debug))]
    pub fn round3(
        &mut self,
        inputs: &HashMap<IdentityKey, PresignRound2<C>>,
    ) -> Result<PreSignatureBatch<C>, ProtocolError> {
        let (k, big_r, commitments) = match mem::replace(&mut self.state, State::Aborted) {
            State::Round3 {
                k,
                big_r,
                commitments,
            } => (k, big_r, commitments),
            other => return Err(ProtocolError::invalid_round(other.expected(), 3)),
        };

        let mut theirs = Vec::with_capacity(self.quorum.len());
        for (from, input) in inputs_from_others(&self.quorum, self.me, 3, inputs)? {
            self.verify_opening(from, &commitments[&from], input)?;
            theirs.push((from, input));
        }

        let presignatures = k
            .into_iter()
            .zip(big_r)
            .enumerate()
            .map(|(i, (k_i, big_r_i))| {
                let mut all_big_r = HashMap::with_capacity(self.quorum.len());
                all_big_r.insert(self.me, big_r_i.to_affine());
                for (from, input) in &theirs {
                    all_big_r.insert(*from, input.big_r[i].to_affine());
                }
                Some(PreSignature {
                    k: k_i,
                    big_r: all_big_r,
                })
            })
            .collect();

        self.state = State::Finished;
        info!(tau = self.tau, "presignatures ready");
        Ok(PreSignatureBatch { presignatures })
    }

    fn verify_opening(
        &self,
        from: IdentityKey,
        commitments: &[Commitment],
        input: &PresignRound2<C>,
    ) -> Result<(), ProtocolError> {
        if input.big_r.len() != self.tau
            || input.randomizers.len() != self.tau
            || input.proofs.len() != self.tau
        {
            return Err(ProtocolError::verification_failed(
                from,
                "opening has the wrong length",
            ));
        }
        for i in 0..self.tau {
            let big_r_i = &input.big_r[i];
            let value = Self::committed_value(from, i, big_r_i);
            if !commitments[i].check(&self.session_id, &value, &input.randomizers[i]) {
                return Err(ProtocolError::verification_failed(
                    from,
                    format!("commitment {i} did not match opening"),
                ));
            }
            let public = big_r_i.to_projective();
            if bool::from(public.is_identity()) {
                return Err(ProtocolError::verification_failed(
                    from,
                    format!("nonce {i} is the identity"),
                ));
            }
            if !dlog::verify(
                &mut self.proof_transcript(from, i),
                dlog::Statement::<C> { public: &public },
                &input.proofs[i],
            ) {
                return Err(ProtocolError::verification_failed(
                    from,
                    format!("proof for nonce {i} failed to verify"),
                ));
            }
        }
        Ok(())
    }
}

async fn do_presign<C: CSCurve>(
    mut rng: impl CryptoRngCore,
    chan: Communication,
    me: IdentityKey,
    mut generator: PreSignatureGenerator<C>,
) -> Result<PreSignatureBatch<C>, ProtocolError> {
    let quorum = generator.quorum.clone();

    let out1 = generator.round1(&mut rng)?;
    chan.send_many(0, &out1).await;
    let in1: HashMap<IdentityKey, PresignRound1> = chan.recv_from_others(0, &quorum, me).await?;

    let out2 = generator.round2(&mut rng, &in1)?;
    chan.send_many(1, &out2).await;
    let in2: HashMap<IdentityKey, PresignRound2<C>> =
        chan.recv_from_others(1, &quorum, me).await?;

    generator.round3(&in2)
}

/// The presigning protocol, driven through the [Protocol] interface.
///
/// Only the members of `quorum` take part.
pub fn presign<C: CSCurve>(
    rng: impl CryptoRngCore,
    cohort: &CohortConfig,
    me: IdentityKey,
    quorum: &[IdentityKey],
    tau: usize,
    session_id: &[u8],
) -> Result<impl Protocol<Output = PreSignatureBatch<C>>, InitializationError> {
    let generator = PreSignatureGenerator::new(cohort, me, quorum, tau, session_id)?;
    let comms = Communication::new(2, quorum.len());
    let fut = do_presign(rng, comms.clone(), me, generator);
    Ok(Executor::new(comms, fut))
}
