//! This module holds some utilities for working with participants.
//!
//! Every party is known by its [IdentityKey], but Shamir sharing needs a small
//! nonzero field element per party. We derive that from the position of the
//! party in the sorted list of the whole cohort, and keep it fixed when
//! taking subsets, so that a quorum agrees with the cohort on every sharing id.

use std::collections::HashMap;

use elliptic_curve::Field;
use serde::Serialize;

use crate::{compat::CSCurve, protocol::IdentityKey};

/// Represents a sorted list of participants.
///
/// The advantage of this data structure is that it can be hashed in the protocol transcript,
/// since everybody will agree on its order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantList {
    participants: Vec<IdentityKey>,
    /// The sharing id of each participant above, in the same order.
    ids: Vec<u32>,
    /// This maps each participant to their index in the vectors above.
    #[serde(skip_serializing)]
    indices: HashMap<IdentityKey, usize>,
}

impl ParticipantList {
    /// Create a participant list from a slice of participants.
    ///
    /// This will return None if the participants have duplicates.
    pub fn new(participants: &[IdentityKey]) -> Option<Self> {
        let mut out = participants.to_owned();
        out.sort();

        let ids = (1..=out.len())
            .map(|i| u32::try_from(i).ok())
            .collect::<Option<Vec<_>>>()?;

        Self::from_sorted(out, ids)
    }

    fn from_sorted(participants: Vec<IdentityKey>, ids: Vec<u32>) -> Option<Self> {
        let indices: HashMap<_, _> = participants
            .iter()
            .enumerate()
            .map(|(p, x)| (*x, p))
            .collect();

        if indices.len() < participants.len() {
            return None;
        }

        Some(Self {
            participants,
            ids,
            indices,
        })
    }

    /// Select some members of this list, keeping their sharing ids.
    ///
    /// This returns None if some party isn't in this list, or appears twice.
    pub fn subset(&self, members: &[IdentityKey]) -> Option<Self> {
        let mut out = members.to_owned();
        out.sort();
        let ids = out
            .iter()
            .map(|p| self.indices.get(p).map(|&i| self.ids[i]))
            .collect::<Option<Vec<_>>>()?;
        Self::from_sorted(out, ids)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Check if this list has a given participant.
    pub fn contains(&self, participant: IdentityKey) -> bool {
        self.indices.contains_key(&participant)
    }

    /// The members of this list, in sorted order.
    pub fn participants(&self) -> &[IdentityKey] {
        &self.participants
    }

    /// Iterate over the other participants
    pub fn others(&self, me: IdentityKey) -> impl Iterator<Item = IdentityKey> + '_ {
        self.participants.iter().filter(move |x| **x != me).copied()
    }

    /// Return the sharing id of a given participant.
    ///
    /// The participant must be a member of this list.
    pub fn sharing_id(&self, participant: IdentityKey) -> u32 {
        self.ids[self.indices[&participant]]
    }

    /// The sharing id of a participant, as a field element.
    pub fn scalar<C: CSCurve>(&self, participant: IdentityKey) -> C::Scalar {
        C::Scalar::from(u64::from(self.sharing_id(participant)))
    }

    /// Get the lagrange coefficient for a participant, relative to this list.
    ///
    /// Multiplying each member's share by its coefficient turns a threshold
    /// sharing into an additive one among exactly the members of this list.
    pub fn lagrange<C: CSCurve>(&self, p: IdentityKey) -> C::Scalar {
        let p_scalar = self.scalar::<C>(p);

        let mut top = C::Scalar::ONE;
        let mut bot = C::Scalar::ONE;
        for q in self.others(p) {
            let q_scalar = self.scalar::<C>(q);
            top *= q_scalar;
            bot *= q_scalar - p_scalar;
        }

        // Sharing ids are distinct, so the denominator is never zero.
        top * Option::<C::Scalar>::from(bot.invert()).unwrap_or(C::Scalar::ZERO)
    }
}

#[cfg(test)]
mod test {
    use k256::{Scalar, Secp256k1};
    use rand_core::OsRng;

    use super::*;
    use crate::math::Polynomial;

    fn keys(n: u8) -> Vec<IdentityKey> {
        (0..n).map(|i| IdentityKey::from_public_key(&[i])).collect()
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let mut ps = keys(3);
        ps.push(ps[0]);
        assert!(ParticipantList::new(&ps).is_none());
    }

    #[test]
    fn test_subset_keeps_sharing_ids() {
        let ps = keys(4);
        let list = ParticipantList::new(&ps).unwrap();
        let sub = list.subset(&[ps[3], ps[1]]).unwrap();
        assert_eq!(sub.len(), 2);
        for p in sub.participants() {
            assert_eq!(sub.sharing_id(*p), list.sharing_id(*p));
        }
        assert!(list
            .subset(&[IdentityKey::from_public_key(b"stranger")])
            .is_none());
        assert!(list.subset(&[ps[0], ps[0]]).is_none());
    }

    #[test]
    fn test_lagrange_reconstructs_secret() {
        let ps = keys(5);
        let list = ParticipantList::new(&ps).unwrap();
        let f = Polynomial::<Secp256k1>::random(&mut OsRng, 3);
        for quorum in [&ps[..3], &ps[1..4], &ps[2..]] {
            let sub = list.subset(quorum).unwrap();
            let secret: Scalar = sub
                .participants()
                .iter()
                .map(|p| sub.lagrange::<Secp256k1>(*p) * f.evaluate(&sub.scalar::<Secp256k1>(*p)))
                .sum();
            assert_eq!(secret, f.evaluate_zero());
        }
    }
}
