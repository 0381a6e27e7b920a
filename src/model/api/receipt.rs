use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    ballot::{Ballot, BallotKind, VoterId},
    election::{CandidateId, ElectionId, OfficeId},
    hash::BallotHash,
};

/// Public, JSON-friendly view of a cast ballot. Carries every field the
/// integrity hash covers, so it can be re-verified offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotReceipt {
    /// Ballot ID, as hex.
    pub ballot_id: String,
    pub voter_id: VoterId,
    pub election_id: ElectionId,
    pub office_id: OfficeId,
    pub candidate_id: Option<CandidateId>,
    pub is_null: bool,
    pub is_blank: bool,
    pub cast_at: DateTime<Utc>,
    pub hash: BallotHash,
    pub session_id: Option<String>,
    pub terminal_id: Option<String>,
}

impl BallotReceipt {
    /// Recompute the integrity hash from this receipt's own fields.
    pub fn verify(&self) -> bool {
        let expected = BallotHash::compute(
            &self.voter_id,
            self.election_id,
            self.office_id,
            self.candidate_id,
            self.cast_at,
        );
        expected == self.hash
    }

    pub fn kind(&self) -> BallotKind {
        if self.is_null {
            BallotKind::Null
        } else if self.is_blank {
            BallotKind::Blank
        } else {
            BallotKind::Valid
        }
    }
}

impl From<Ballot> for BallotReceipt {
    fn from(ballot: Ballot) -> Self {
        let id = ballot.id.to_string();
        let core = ballot.ballot;
        Self {
            ballot_id: id,
            voter_id: core.voter_id,
            election_id: core.election_id,
            office_id: core.office_id,
            candidate_id: core.candidate_id,
            is_null: core.is_null,
            is_blank: core.is_blank,
            cast_at: core.cast_at,
            hash: core.hash,
            session_id: core.metadata.session_id,
            terminal_id: core.metadata.terminal_id,
        }
    }
}

/// Result of re-checking one stored ballot's integrity hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotVerification {
    pub ballot_id: String,
    pub valid: bool,
}
