//! This module provides abstractions for working with protocols.
//!
//! Every protocol in this crate is first written as an explicit state machine,
//! with one method per round, taking the messages of the previous round as
//! plain data. This is the most flexible interface, and lets callers deliver
//! messages however they like.
//!
//! On top of that, this module provides a more opaque interface: a [Protocol]
//! is something you feed messages into, and poke until it tells you to send
//! something, or returns a value. Messages are serialized internally, so you
//! only need to move bytes around.
use core::fmt;
use std::{collections::HashMap, error};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::{crypto::hash, participants::ParticipantList};

/// Represents an error which can happen when running a protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A round method received an argument which doesn't make sense.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A round was called out of order, or more than once.
    #[error("round {requested} called, but the participant expected {expected:?}")]
    InvalidRound {
        /// The round the participant was waiting for, if any.
        expected: Option<usize>,
        requested: usize,
    },
    /// A party sent us something which doesn't check out.
    ///
    /// This is an identifiable abort: the culprit is named.
    #[error("verification of {culprit}'s message failed: {reason}")]
    VerificationFailed { culprit: IdentityKey, reason: String },
    /// A party didn't send us anything for a given round.
    #[error("missing input from {party} for round {round}")]
    MissingInput { party: IdentityKey, round: usize },
    /// Some assertion in the protocol failed.
    ///
    /// This indicates a bug, rather than misbehavior by some other party.
    #[error("assertion failed: {0}")]
    AssertionFailed(String),
    /// The Paillier engine refused an operation.
    #[error("paillier: {0}")]
    Paillier(#[from] crate::paillier::PaillierError),
    /// Some generic error happened.
    #[error(transparent)]
    Other(#[from] Box<dyn error::Error + Send + Sync>),
}

impl ProtocolError {
    /// Create an identifiable abort blaming a given party.
    pub(crate) fn verification_failed(culprit: IdentityKey, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        error!(%culprit, reason, "aborting protocol");
        Self::VerificationFailed { culprit, reason }
    }

    pub(crate) fn invalid_round(expected: Option<usize>, requested: usize) -> Self {
        error!(?expected, requested, "round called out of order");
        Self::InvalidRound {
            expected,
            requested,
        }
    }
}

/// Pick out the message of every other participant for a round.
///
/// Messages from outside the list are ignored, and a missing message is
/// reported against the party who should have sent it.
pub(crate) fn inputs_from_others<'a, T>(
    participants: &ParticipantList,
    me: IdentityKey,
    round: usize,
    inputs: &'a HashMap<IdentityKey, T>,
) -> Result<Vec<(IdentityKey, &'a T)>, ProtocolError> {
    participants
        .others(me)
        .map(|party| match inputs.get(&party) {
            Some(input) => Ok((party, input)),
            None => {
                error!(%party, round, "missing input");
                Err(ProtocolError::MissingInput { party, round })
            }
        })
        .collect()
}

/// Represents an error which can happen when *initializing* a protocol.
///
/// These are related to bad parameters for the protocol, and things like that.
///
/// These are usually more recoverable than other protocol errors.
#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("bad parameters: {0}")]
    BadParameters(String),
}

impl From<InitializationError> for ProtocolError {
    fn from(e: InitializationError) -> Self {
        match e {
            InitializationError::BadParameters(s) => ProtocolError::InvalidArgument(s),
        }
    }
}

/// Represents the identity of a participant in the protocol.
///
/// This is a fixed size digest of the participant's long term public key,
/// so two identities are equal exactly when those keys are.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityKey([u8; 32]);

impl IdentityKey {
    /// Derive an identity from the serialized form of a public key.
    pub fn from_public_key(public_key: &[u8]) -> Self {
        Self(hash(&(b"identity key", public_key)).into_bytes())
    }

    /// Create an identity directly from its bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the bytes making up this identity.
    pub fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKey({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Represents the data making up a message.
///
/// We choose to just represent messages as opaque vectors of bytes, with all
/// the serialization logic handled internally.
pub type MessageData = Vec<u8>;

/// Represents an action by a participant in the protocol.
///
/// The basic flow is that each participant receives messages from other participants,
/// and then reacts with some kind of action.
///
/// This action can consist of sending a message, doing nothing, etc.
///
/// Eventually, the participant returns a value, ending the protocol.
#[derive(Debug, Clone)]
pub enum Action<T> {
    /// Don't do anything.
    Wait,
    /// Send a message to all other participants.
    ///
    /// Participants *never* sends messages to themselves.
    SendMany(MessageData),
    /// Send a private message to another participant.
    ///
    /// It's imperactive that only this participant can read this message,
    /// so you might want to use some form of encryption.
    SendPrivate(IdentityKey, MessageData),
    /// End the protocol by returning a value.
    Return(T),
}

/// A trait for protocols.
///
/// Basically, this represents a struct for the behavior of a single participant
/// in a protocol. The idea is that the computation of that participant is driven
/// mainly by receiving messages from other participants.
pub trait Protocol {
    type Output;

    /// Poke the protocol, receiving a new action.
    ///
    /// The idea is that the protocol should be poked until it returns an error,
    /// or it returns an action with a return value, or it returns a wait action.
    ///
    /// Upon returning a wait action, that protocol will not advance any further
    /// until a new message arrives.
    fn poke(&mut self) -> Result<Action<Self::Output>, ProtocolError>;

    /// Inform the protocol of a new message.
    fn message(&mut self, from: IdentityKey, data: MessageData);
}

/// Run a protocol to completion, synchronously.
///
/// This works by executing each participant in order.
///
/// The reason this function exists is as a convenient testing utility.
/// In practice each protocol participant is likely running on a different machine,
/// and so orchestrating the protocol would happen differently.
pub fn run_protocol<T>(
    mut ps: Vec<(IdentityKey, Box<dyn Protocol<Output = T> + '_>)>,
) -> Result<Vec<(IdentityKey, T)>, ProtocolError> {
    let indices: HashMap<IdentityKey, usize> =
        ps.iter().enumerate().map(|(i, (p, _))| (*p, i)).collect();

    let size = ps.len();
    let mut out = Vec::with_capacity(size);
    while out.len() < size {
        for i in 0..size {
            while {
                let action = ps[i].1.poke()?;
                match action {
                    Action::Wait => false,
                    Action::SendMany(m) => {
                        for j in 0..size {
                            if i == j {
                                continue;
                            }
                            let from = ps[i].0;
                            ps[j].1.message(from, m.clone());
                        }
                        true
                    }
                    Action::SendPrivate(to, m) => {
                        let from = ps[i].0;
                        if let Some(&j) = indices.get(&to) {
                            ps[j].1.message(from, m);
                        }
                        true
                    }
                    Action::Return(r) => {
                        out.push((ps[i].0, r));
                        false
                    }
                }
            } {}
        }
    }

    Ok(out)
}

/// Like [run_protocol()], except for just two parties.
///
/// This is more useful for testing two party protocols with assymetric results,
/// since the return types for the two protocols can be different.
pub fn run_two_party_protocol<T0, T1>(
    p0: IdentityKey,
    p1: IdentityKey,
    prot0: &mut dyn Protocol<Output = T0>,
    prot1: &mut dyn Protocol<Output = T1>,
) -> Result<(T0, T1), ProtocolError> {
    let mut active0 = true;

    let mut out0 = None;
    let mut out1 = None;

    loop {
        if let (Some(_), Some(_)) = (&out0, &out1) {
            break;
        }
        if active0 {
            let action = prot0.poke()?;
            match action {
                Action::Wait => active0 = false,
                Action::SendMany(m) => prot1.message(p0, m),
                Action::SendPrivate(to, m) if to == p1 => {
                    prot1.message(p0, m);
                }
                Action::Return(out) => {
                    out0 = Some(out);
                    active0 = false;
                }
                // Ignore other actions, which means sending private messages to other people.
                _ => {}
            }
        } else {
            let action = prot1.poke()?;
            match action {
                Action::Wait => active0 = true,
                Action::SendMany(m) => prot0.message(p1, m),
                Action::SendPrivate(to, m) if to == p0 => {
                    prot0.message(p1, m);
                }
                Action::Return(out) => {
                    out1 = Some(out);
                    active0 = true;
                }
                // Ignore other actions, which means sending private messages to other people.
                _ => {}
            }
        }
    }

    match (out0, out1) {
        (Some(out0), Some(out1)) => Ok((out0, out1)),
        _ => Err(ProtocolError::AssertionFailed(
            "two party protocol stopped without output".to_string(),
        )),
    }
}

pub(crate) mod internal;
