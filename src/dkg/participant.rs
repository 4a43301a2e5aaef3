use std::{collections::HashMap, mem};

use elliptic_curve::Group;
use libpaillier::unknown_order::BigNumber;
use magikitten::Transcript;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::{
    compat::{CSCurve, SerializablePoint},
    config::{bad_parameters, CohortConfig},
    crypto::{commit, Commitment, Randomizer},
    math::scalar_to_bn,
    paillier::{self, minimum_modulus, Ciphertext, PaillierPublicKey, PaillierSecretKey},
    proofs::dlog,
    protocol::{inputs_from_others, IdentityKey, InitializationError, ProtocolError},
    serde::encode,
    shard::{PaillierMaterial, Shard, SigningKeyShare, ThresholdShard},
};

use super::split::split_random;

const LABEL: &[u8] = b"lindell-sith v0.1.0 backup";

/// The first message: a commitment to our split and its proofs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRound1 {
    commitment: Commitment,
}

/// The second message: the opening of the first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct BackupRound2<C: CSCurve> {
    pub(crate) big_x_prime: SerializablePoint<C>,
    pub(crate) big_x_double_prime: SerializablePoint<C>,
    pub(crate) proof_prime: dlog::Proof<C>,
    pub(crate) proof_double_prime: dlog::Proof<C>,
    pub(crate) randomizer: Randomizer,
}

/// The third message: our Paillier key, and our share encrypted under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRound3 {
    pub(crate) paillier_public_key: PaillierPublicKey,
    pub(crate) encrypted_share: Ciphertext,
}

enum State<C: CSCurve> {
    Round1,
    Round2 {
        x_prime: C::Scalar,
        x_double_prime: C::Scalar,
        opening: BackupRound2<C>,
    },
    Round3 {
        x_prime: C::Scalar,
        x_double_prime: C::Scalar,
        commitments: HashMap<IdentityKey, Commitment>,
    },
    Round4 {
        secret_key: PaillierSecretKey,
        mine: BackupRound3,
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
            State::Round4 { .. } => Some(4),
            State::Finished | State::Aborted => None,
        }
    }
}

/// One party in the protocol backing up an existing signing key share.
///
/// The share `x` gets split into `x = 3x' + x''`, with proofs binding `x'` and
/// `x''` to the public share of `x`. Every party then publishes a fresh Paillier
/// key along with an encryption of `x` under it, which is what lets a peer
/// later compute on `x` without learning it.
///
/// The rounds must be called in order, each exactly once. Any failure leaves
/// the participant aborted.
pub struct BackupParticipant<C: CSCurve> {
    cohort: CohortConfig,
    me: IdentityKey,
    session_id: Vec<u8>,
    signing_key_share: SigningKeyShare<C>,
    public_shares: HashMap<IdentityKey, C::AffinePoint>,
    paillier_bits: usize,
    transcript: Transcript,
    state: State<C>,
}

impl<C: CSCurve> BackupParticipant<C> {
    /// Prepare to back up a share.
    ///
    /// `public_shares` holds `x_j * G` for every party `j` of the cohort,
    /// and is used to check what the others commit to.
    pub fn new(
        cohort: &CohortConfig,
        me: IdentityKey,
        session_id: &[u8],
        signing_key_share: SigningKeyShare<C>,
        public_shares: HashMap<IdentityKey, C::AffinePoint>,
        paillier_bits: usize,
    ) -> Result<Self, InitializationError> {
        cohort.check_member(me)?;
        if session_id.is_empty() {
            return Err(bad_parameters("session id cannot be empty".to_string()));
        }
        signing_key_share.validate()?;
        let participants = cohort.participants();
        if let Some(p) = participants
            .participants()
            .iter()
            .find(|p| !public_shares.contains_key(p))
        {
            return Err(bad_parameters(format!("no public share for {p}")));
        }
        let my_public_share = C::ProjectivePoint::generator() * signing_key_share.share;
        if public_shares.get(&me).copied().map(C::ProjectivePoint::from) != Some(my_public_share)
        {
            return Err(bad_parameters(
                "our public share does not match our share".to_string(),
            ));
        }
        // Two primes of half the size have a product of at least 2^(bits - 2).
        if paillier_bits < 2 || BigNumber::one() << (paillier_bits - 2) <= minimum_modulus::<C>()
        {
            return Err(bad_parameters(format!(
                "{paillier_bits} bit paillier keys are too small for this curve"
            )));
        }

        let mut transcript = Transcript::new(LABEL);
        transcript.message(b"session id", session_id);
        transcript.message(b"group", C::NAME);
        transcript.message(b"participants", &encode(participants));

        Ok(Self {
            cohort: cohort.clone(),
            me,
            session_id: session_id.to_vec(),
            signing_key_share,
            public_shares,
            paillier_bits,
            transcript,
            state: State::Round1,
        })
    }

    /// The round this participant is waiting for, if any.
    pub fn round(&self) -> Option<usize> {
        self.state.expected()
    }

    fn proof_transcript(&self, label: &'static [u8], who: IdentityKey) -> Transcript {
        self.transcript.forked(label, &who.bytes())
    }

    /// Split our share, prove knowledge of both halves, and commit to all that.
    #[instrument(skip_all, fields(me = %self.me), err(Debug))]
    pub fn round1(&mut self, rng: &mut impl CryptoRngCore) -> Result<BackupRound1, ProtocolError> {
        match mem::replace(&mut self.state, State::Aborted) {
            State::Round1 => {}
            other => return Err(ProtocolError::invalid_round(other.expected(), 1)),
        }

        let (x_prime, x_double_prime) = split_random::<C>(rng, &self.signing_key_share.share)?;
        let big_x_prime = C::ProjectivePoint::generator() * x_prime;
        let big_x_double_prime = C::ProjectivePoint::generator() * x_double_prime;

        let proof_prime = dlog::prove(
            rng,
            &mut self.proof_transcript(b"dlog x'", self.me),
            dlog::Statement::<C> {
                public: &big_x_prime,
            },
            dlog::Witness::<C> { x: &x_prime },
        );
        let proof_double_prime = dlog::prove(
            rng,
            &mut self.proof_transcript(b"dlog x''", self.me),
            dlog::Statement::<C> {
                public: &big_x_double_prime,
            },
            dlog::Witness::<C> {
                x: &x_double_prime,
            },
        );

        let big_x_prime = SerializablePoint::<C>::from_projective(&big_x_prime);
        let big_x_double_prime = SerializablePoint::<C>::from_projective(&big_x_double_prime);
        let (commitment, randomizer) = commit(
            rng,
            &self.session_id,
            &(
                self.me,
                big_x_prime,
                big_x_double_prime,
                &proof_prime,
                &proof_double_prime,
            ),
        );

        self.state = State::Round2 {
            x_prime,
            x_double_prime,
            opening: BackupRound2 {
                big_x_prime,
                big_x_double_prime,
                proof_prime,
                proof_double_prime,
                randomizer,
            },
        };
        debug!("committed to share split");
        Ok(BackupRound1 { commitment })
    }

    /// Record everybody's commitment, and open ours.
    #[instrument(skip_all, fields(me = %self.me), err(Debug))]
    pub fn round2(
        &mut self,
        inputs: &HashMap<IdentityKey, BackupRound1>,
    ) -> Result<BackupRound2<C>, ProtocolError> {
        let (x_prime, x_double_prime, opening) =
            match mem::replace(&mut self.state, State::Aborted) {
                State::Round2 {
                    x_prime,
                    x_double_prime,
                    opening,
                } => (x_prime, x_double_prime, opening),
                other => return Err(ProtocolError::invalid_round(other.expected(), 2)),
            };

        let commitments = inputs_from_others(self.cohort.participants(), self.me, 2, inputs)?
            .into_iter()
            .map(|(p, input)| (p, input.commitment))
            .collect();

        self.state = State::Round3 {
            x_prime,
            x_double_prime,
            commitments,
        };
        Ok(opening)
    }

    /// Check everybody's opening, and publish our encrypted share.
    #[instrument(skip_all, fields(me = %self.me), err(Debug))]
    pub fn round3(
        &mut self,
        rng: &mut impl CryptoRngCore,
        inputs: &HashMap<IdentityKey, BackupRound2<C>>,
    ) -> Result<BackupRound3, ProtocolError> {
        let (x_prime, x_double_prime, commitments) =
            match mem::replace(&mut self.state, State::Aborted) {
                State::Round3 {
                    x_prime,
                    x_double_prime,
                    commitments,
                } => (x_prime, x_double_prime, commitments),
                other => return Err(ProtocolError::invalid_round(other.expected(), 3)),
            };

        for (from, opening) in inputs_from_others(self.cohort.participants(), self.me, 3, inputs)? {
            self.verify_opening(from, &commitments[&from], opening)?;
        }

        let (pk, sk) = paillier::generate::<C>(rng, self.paillier_bits)?;
        let c_prime = pk.encrypt(rng, &scalar_to_bn::<C>(&x_prime))?;
        let c_double_prime = pk.encrypt(rng, &scalar_to_bn::<C>(&x_double_prime))?;
        let encrypted_share = pk.add(
            &pk.mul_plain(&c_prime, &BigNumber::from(3u64))?,
            &c_double_prime,
        )?;

        let mine = BackupRound3 {
            paillier_public_key: pk,
            encrypted_share,
        };
        self.state = State::Round4 {
            secret_key: sk,
            mine: mine.clone(),
        };
        debug!("published encrypted share");
        Ok(mine)
    }

    fn verify_opening(
        &self,
        from: IdentityKey,
        commitment: &Commitment,
        opening: &BackupRound2<C>,
    ) -> Result<(), ProtocolError> {
        let committed = (
            from,
            opening.big_x_prime,
            opening.big_x_double_prime,
            &opening.proof_prime,
            &opening.proof_double_prime,
        );
        if !commitment.check(&self.session_id, &committed, &opening.randomizer) {
            return Err(ProtocolError::verification_failed(
                from,
                "commitment did not match opening",
            ));
        }

        let big_x_prime = opening.big_x_prime.to_projective();
        let big_x_double_prime = opening.big_x_double_prime.to_projective();
        if !dlog::verify(
            &mut self.proof_transcript(b"dlog x'", from),
            dlog::Statement::<C> {
                public: &big_x_prime,
            },
            &opening.proof_prime,
        ) {
            return Err(ProtocolError::verification_failed(
                from,
                "proof for x' failed to verify",
            ));
        }
        if !dlog::verify(
            &mut self.proof_transcript(b"dlog x''", from),
            dlog::Statement::<C> {
                public: &big_x_double_prime,
            },
            &opening.proof_double_prime,
        ) {
            return Err(ProtocolError::verification_failed(
                from,
                "proof for x'' failed to verify",
            ));
        }

        let recombined = big_x_prime + big_x_prime + big_x_prime + big_x_double_prime;
        if Some(recombined) != self.public_shares.get(&from).copied().map(C::ProjectivePoint::from) {
            return Err(ProtocolError::verification_failed(
                from,
                "split does not match public share",
            ));
        }
        Ok(())
    }

    /// Collect everybody's Paillier key and encrypted share into our shard.
    #[instrument(skip_all, fields(me = %self.me), err(Debug))]
    pub fn round4(
        &mut self,
        inputs: &HashMap<IdentityKey, BackupRound3>,
    ) -> Result<Shard<C>, ProtocolError> {
        let (secret_key, mine) = match mem::replace(&mut self.state, State::Aborted) {
            State::Round4 { secret_key, mine } => (secret_key, mine),
            other => return Err(ProtocolError::invalid_round(other.expected(), 4)),
        };

        let mut public_keys = HashMap::with_capacity(self.cohort.participants().len());
        let mut encrypted_shares = HashMap::with_capacity(self.cohort.participants().len());
        for (from, input) in inputs_from_others(self.cohort.participants(), self.me, 4, inputs)? {
            if let Err(e) = input.paillier_public_key.validate_for::<C>() {
                return Err(ProtocolError::verification_failed(from, e.to_string()));
            }
            if input.paillier_public_key == mine.paillier_public_key
                || public_keys
                    .values()
                    .any(|pk: &PaillierPublicKey| pk == &input.paillier_public_key)
            {
                return Err(ProtocolError::verification_failed(
                    from,
                    "reused a paillier key",
                ));
            }
            public_keys.insert(from, input.paillier_public_key.clone());
            encrypted_shares.insert(from, input.encrypted_share.clone());
        }
        public_keys.insert(self.me, mine.paillier_public_key);
        encrypted_shares.insert(self.me, mine.encrypted_share);

        let shard = Shard {
            me: self.me,
            signing_key_share: self.signing_key_share.clone(),
            paillier: PaillierMaterial {
                secret_key,
                public_keys,
                encrypted_shares,
            },
        };
        if let Err(e) = shard.validate(&self.cohort) {
            error!(%e, "assembled an invalid shard");
            return Err(ProtocolError::AssertionFailed(e.to_string()));
        }

        self.state = State::Finished;
        info!("shard ready");
        Ok(shard)
    }
}
