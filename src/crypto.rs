use std::io::Write;

use ck_meow::Meow;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use subtle::{Choice, ConstantTimeEq};

use crate::serde::encode_writer;

const COMMIT_LABEL: &[u8] = b"lindell-sith v0.1.0 commitment";
const COMMIT_LEN: usize = 32;
const RANDOMIZER_LEN: usize = 32;
const HASH_LABEL: &[u8] = b"lindell-sith v0.1.0 generic hash";
const HASH_LEN: usize = 32;

struct MeowWriter<'a>(&'a mut Meow);

impl<'a> MeowWriter<'a> {
    fn init(meow: &'a mut Meow) -> Self {
        meow.ad(&[], false);
        Self(meow)
    }
}

impl<'a> Write for MeowWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.ad(buf, true);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// The randomness needed to open a commitment.
///
/// This is kept secret until the committed value is revealed, at which point
/// it gets sent along with that value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Randomizer(pub(crate) [u8; RANDOMIZER_LEN]);

impl Randomizer {
    fn random(rng: &mut impl CryptoRngCore) -> Self {
        let mut out = [0u8; RANDOMIZER_LEN];
        rng.fill_bytes(&mut out);
        Self(out)
    }
}

/// Represents a commitment to some value.
///
/// Commitments are bound to the session they were created in: opening one
/// with a different session id fails, even with the right value and randomizer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Commitment([u8; COMMIT_LEN]);

impl Commitment {
    fn compute<T: Serialize>(session_id: &[u8], val: &T, r: &Randomizer) -> Self {
        let mut meow = Meow::new(COMMIT_LABEL);

        encode_writer(&mut MeowWriter::init(&mut meow), &(session_id, r, val));

        let mut out = [0u8; COMMIT_LEN];
        meow.prf(&mut out, false);

        Commitment(out)
    }

    /// Check that a value and a randomizer match this commitment.
    #[must_use]
    pub fn check<T: Serialize>(&self, session_id: &[u8], val: &T, r: &Randomizer) -> bool {
        let actual = Self::compute(session_id, val, r);
        bool::from(self.ct_eq(&actual))
    }
}

impl ConstantTimeEq for Commitment {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0[..].ct_eq(&other.0[..])
    }
}

impl PartialEq for Commitment {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}

impl Eq for Commitment {}

/// Commit to an arbitrary serializable value, inside of a given session.
///
/// This returns both the commitment, and the randomizer needed to open it later.
pub fn commit<T: Serialize>(
    rng: &mut impl CryptoRngCore,
    session_id: &[u8],
    val: &T,
) -> (Commitment, Randomizer) {
    let r = Randomizer::random(rng);
    let c = Commitment::compute(session_id, val, &r);
    (c, r)
}

/// The output of a generic hash function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest([u8; HASH_LEN]);

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Digest {
    pub fn into_bytes(self) -> [u8; HASH_LEN] {
        self.0
    }
}

/// Hash some value to produce a short digest.
pub fn hash<T: Serialize>(val: &T) -> Digest {
    let mut meow = Meow::new(HASH_LABEL);
    encode_writer(&mut MeowWriter::init(&mut meow), val);

    let mut out = [0u8; HASH_LEN];
    meow.prf(&mut out, false);

    Digest(out)
}
