//! Lindell-Sith is a threshold ECDSA library, where two parties out of a
//! cohort can produce a standard ECDSA signature, without either of them ever
//! learning the signing key.
//!
//! # Warning
//!
//! This is experimental cryptographic software, and should be used with caution.
//!
//! - The protocol does not have a formal proof of security.
//! - This library has not undergone any form of audit.
//!
//! # Design
//!
//! The cohort first agrees on a Shamir sharing of a signing key, either with
//! the distributed [keygen], or through a trusted [deal]er.
//!
//! Each party then runs the [dkg::backup] protocol once. This splits its share
//! `x` as `x = 3x' + x''`, proves that the halves are consistent with its public
//! share, and publishes a Paillier encryption of `x` under a fresh key of its own.
//! The result is a [Shard]: the party's share, its Paillier secret key, and the
//! encrypted share of everybody else. A shard is long lived, and reused for
//! every signature.
//!
//! To sign, two parties can then either:
//!
//! - Generate a batch of presignatures in advance, with [presign], and later
//!   spend one of them per signature, with a single message, using a
//!   [sign::NonInteractiveCosigner].
//! - Run a five round protocol, with [sign::InteractivePrimary] and
//!   [sign::InteractiveSecondary], needing no precomputation.
//!
//! In both cases, one party computes its half of the signature under the other
//! party's Paillier key, using the encrypted share it holds for that party.
//! The other party decrypts, and finishes the signature, checking it against
//! the public key before returning it.
//!
//! Presignatures must **never** be reused: signing two messages with the same
//! one reveals the signing key. A [PreSignatureBatch] hands each one out once.
//!
//! ## API Design
//!
//! Every protocol is an explicit state machine, with one method per round,
//! consuming the messages of the previous round as plain data, and producing
//! the message for the next one. Calling a round out of order is an error,
//! which also aborts the participant.
//!
//! When a message doesn't check out, the error names the party who sent it,
//! so that the caller can exclude them, and try again.
//!
//! On top of that, each protocol can also be driven through a simpler interface,
//! which handles serialization and rounds internally:
//! ```ignore
//! pub trait Protocol {
//!    type Output;
//!
//!    fn poke(&mut self) -> Result<Action<Self::Output>, ProtocolError>;
//!    fn message(&mut self, from: IdentityKey, data: MessageData);
//! }
//! ```
//! Given an instance of this trait, which represents a single party
//! participating in a protocol, you can do two things:
//! - You can provide a new message received from some other party.
//! - You can "poke" the protocol to see if it has some kind of action it wants you to perform, or if an error happened.
//!
//! # Generic Curves
//!
//! The support for generic curves is done through a custom `CSCurve` trait,
//! which can be easily implemented for any curve from the
//! RustCrypto [elliptic-curves](https://github.com/RustCrypto/elliptic-curves)
//! suite of libraries. The trait also fixes how messages get hashed.
//!
//! This crate provides implementations of some existing curves behind features,
//! as per the following table:
//!
//! | Curve | Feature |
//! |-------|---------|
//! |Secp256k1|`k256`|
//! |P-256|`p256`|
mod compat;
mod config;
mod crypto;
mod dealer;
pub mod dkg;
mod keyshare;
mod math;
pub mod paillier;
mod participants;
mod presign;
mod proofs;
pub mod protocol;
mod serde;
mod shard;
pub mod sign;
#[cfg(test)]
mod test;

pub use compat::CSCurve;
pub use config::CohortConfig;
pub use crypto::{Commitment, Randomizer};
pub use dealer::{deal, deal_key_shares, DealtKey};
pub use keyshare::{keygen, KeygenOutput};
pub use participants::ParticipantList;
pub use presign::{
    presign, PreSignature, PreSignatureBatch, PreSignatureGenerator, PresignRound1, PresignRound2,
};
pub use shard::{PaillierMaterial, Shard, SigningKeyShare, ThresholdShard};
pub use sign::FullSignature;
