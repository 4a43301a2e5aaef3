//! The static description of a signing cohort.
use tracing::error;

use crate::{
    participants::ParticipantList,
    protocol::{IdentityKey, InitializationError},
};

/// The parties sharing one key, and the rules for using it.
///
/// This is validated once when created, and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortConfig {
    threshold: usize,
    participants: ParticipantList,
    signature_aggregators: Option<Vec<IdentityKey>>,
}

impl CohortConfig {
    /// Describe a cohort where any `threshold` of the `participants` can sign.
    ///
    /// If `signature_aggregators` is set, only those parties may decrypt and
    /// finalize signatures.
    pub fn new(
        threshold: usize,
        participants: &[IdentityKey],
        signature_aggregators: Option<Vec<IdentityKey>>,
    ) -> Result<Self, InitializationError> {
        if participants.len() < 2 {
            return Err(bad_parameters(format!(
                "a cohort needs at least 2 participants, found {}",
                participants.len()
            )));
        }
        let participants = ParticipantList::new(participants).ok_or_else(|| {
            bad_parameters("participant list cannot contain duplicates".to_string())
        })?;
        if threshold < 2 || threshold > participants.len() {
            return Err(bad_parameters(format!(
                "threshold {threshold} must lie in [2, {}]",
                participants.len()
            )));
        }
        if let Some(aggregators) = &signature_aggregators {
            if aggregators.is_empty() {
                return Err(bad_parameters(
                    "designated aggregators cannot be empty".to_string(),
                ));
            }
            if let Some(p) = aggregators.iter().find(|p| !participants.contains(**p)) {
                return Err(bad_parameters(format!(
                    "aggregator {p} is not a participant"
                )));
            }
        }

        Ok(Self {
            threshold,
            participants,
            signature_aggregators,
        })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn participants(&self) -> &ParticipantList {
        &self.participants
    }

    /// Check whether a party may act as the signature aggregator.
    pub fn is_aggregator(&self, p: IdentityKey) -> bool {
        match &self.signature_aggregators {
            Some(aggregators) => aggregators.contains(&p),
            None => self.participants.contains(p),
        }
    }

    /// Check that `me` is part of this cohort.
    pub(crate) fn check_member(&self, me: IdentityKey) -> Result<(), InitializationError> {
        if !self.participants.contains(me) {
            return Err(bad_parameters(format!("{me} is not a participant")));
        }
        Ok(())
    }

    /// Select a quorum of signers out of this cohort.
    ///
    /// The quorum needs at least `threshold` distinct members, all from this cohort.
    pub fn quorum(&self, members: &[IdentityKey]) -> Result<ParticipantList, InitializationError> {
        let quorum = self.participants.subset(members).ok_or_else(|| {
            bad_parameters("quorum must be distinct members of the cohort".to_string())
        })?;
        if quorum.len() < self.threshold {
            return Err(bad_parameters(format!(
                "quorum of {} is smaller than the threshold {}",
                quorum.len(),
                self.threshold
            )));
        }
        Ok(quorum)
    }
}

pub(crate) fn bad_parameters(reason: String) -> InitializationError {
    error!(reason, "rejecting parameters");
    InitializationError::BadParameters(reason)
}

#[cfg(test)]
mod test {
    use super::*;

    fn keys(n: u8) -> Vec<IdentityKey> {
        (0..n).map(|i| IdentityKey::from_public_key(&[i])).collect()
    }

    #[test]
    fn test_cohort_validation() {
        let ps = keys(3);
        assert!(CohortConfig::new(2, &ps, None).is_ok());
        assert!(CohortConfig::new(1, &ps, None).is_err());
        assert!(CohortConfig::new(4, &ps, None).is_err());
        assert!(CohortConfig::new(2, &ps[..1], None).is_err());
        assert!(CohortConfig::new(2, &[ps[0], ps[0], ps[1]], None).is_err());
        assert!(CohortConfig::new(2, &ps, Some(vec![])).is_err());
        assert!(CohortConfig::new(2, &ps, Some(keys(4)[3..].to_vec())).is_err());
    }

    #[test]
    fn test_aggregators_and_quorums() {
        let ps = keys(3);
        let cohort = CohortConfig::new(2, &ps, Some(vec![ps[1]])).unwrap();
        assert!(cohort.is_aggregator(ps[1]));
        assert!(!cohort.is_aggregator(ps[0]));

        let open = CohortConfig::new(2, &ps, None).unwrap();
        assert!(open.is_aggregator(ps[0]));
        assert!(!open.is_aggregator(keys(4)[3]));

        assert!(cohort.quorum(&ps[..2]).is_ok());
        assert!(cohort.quorum(&ps[..1]).is_err());
        assert!(cohort.quorum(&[ps[0], keys(4)[3]]).is_err());
    }
}
