//! Backing up signing key shares into [Shard]s.
//!
//! Each party starts from its Shamir share `x` of the signing key, for instance
//! the output of [crate::keygen], and ends with a shard holding, for every
//! party, a Paillier encryption of that party's share under its own key.
use std::collections::HashMap;

use rand_core::CryptoRngCore;

use crate::{
    compat::CSCurve,
    config::CohortConfig,
    protocol::{
        internal::{Communication, Executor},
        IdentityKey, InitializationError, Protocol, ProtocolError,
    },
    shard::{Shard, SigningKeyShare},
};

mod participant;
mod split;

pub use participant::{BackupParticipant, BackupRound1, BackupRound2, BackupRound3};
pub use split::{in_middle_third, split_deterministic, split_random, MAX_SPLIT_ATTEMPTS};

async fn do_backup<C: CSCurve>(
    mut rng: impl CryptoRngCore,
    chan: Communication,
    cohort: CohortConfig,
    me: IdentityKey,
    mut participant: BackupParticipant<C>,
) -> Result<Shard<C>, ProtocolError> {
    let participants = cohort.participants();

    let out1 = participant.round1(&mut rng)?;
    chan.send_many(0, &out1).await;
    let in1: HashMap<IdentityKey, BackupRound1> =
        chan.recv_from_others(0, participants, me).await?;

    let out2 = participant.round2(&in1)?;
    chan.send_many(1, &out2).await;
    let in2: HashMap<IdentityKey, BackupRound2<C>> =
        chan.recv_from_others(1, participants, me).await?;

    let out3 = participant.round3(&mut rng, &in2)?;
    chan.send_many(2, &out3).await;
    let in3: HashMap<IdentityKey, BackupRound3> =
        chan.recv_from_others(2, participants, me).await?;

    participant.round4(&in3)
}

/// The backup protocol, driven through the [Protocol] interface.
///
/// This takes the same arguments as [BackupParticipant::new], and runs its
/// rounds, exchanging messages as needed.
pub fn backup<C: CSCurve>(
    rng: impl CryptoRngCore,
    cohort: &CohortConfig,
    me: IdentityKey,
    session_id: &[u8],
    signing_key_share: SigningKeyShare<C>,
    public_shares: HashMap<IdentityKey, C::AffinePoint>,
    paillier_bits: usize,
) -> Result<impl Protocol<Output = Shard<C>>, InitializationError> {
    let participant = BackupParticipant::new(
        cohort,
        me,
        session_id,
        signing_key_share,
        public_shares,
        paillier_bits,
    )?;

    let comms = Communication::new(3, cohort.participants().len());
    let fut = do_backup(rng, comms.clone(), cohort.clone(), me, participant);
    Ok(Executor::new(comms, fut))
}
