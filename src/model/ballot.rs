use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Timelike, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    election::{CandidateId, Election, ElectionId, OfficeId},
    hash::BallotHash,
    mongodb::Id,
};

/// Opaque identifier of the voter the poll worker released the terminal for.
/// Not a verified legal identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterId(String);

impl VoterId {
    /// Accept any identifier that is non-empty after trimming whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for VoterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the voter decided for one office.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BallotChoice {
    /// A vote for this candidate.
    Valid(CandidateId),
    /// The entered number matched no active candidate.
    Null,
    /// Explicitly no candidate.
    Blank,
}

impl BallotChoice {
    pub fn candidate_id(&self) -> Option<CandidateId> {
        match self {
            Self::Valid(id) => Some(*id),
            Self::Null | Self::Blank => None,
        }
    }

    pub fn kind(&self) -> BallotKind {
        match self {
            Self::Valid(_) => BallotKind::Valid,
            Self::Null => BallotKind::Null,
            Self::Blank => BallotKind::Blank,
        }
    }
}

/// Classification of a cast ballot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BallotKind {
    Valid,
    Null,
    Blank,
}

impl Display for BallotKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Valid => "VALID",
            Self::Null => "NULL",
            Self::Blank => "BLANK",
        };
        write!(f, "{label}")
    }
}

/// Where a ballot was cast from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Random identifier of the unlock/lock cycle the ballot was cast in.
    pub session_id: Option<String>,
    /// Label of the terminal.
    pub terminal_id: Option<String>,
}

/// Core ballot data, as stored in the database. Immutable once cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotCore {
    pub voter_id: VoterId,
    /// Foreign Key election ID.
    pub election_id: ElectionId,
    /// Foreign Key office ID.
    pub office_id: OfficeId,
    /// Absent for null and blank ballots.
    pub candidate_id: Option<CandidateId>,
    pub is_null: bool,
    pub is_blank: bool,
    /// Cast time, truncated to the second.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
    /// Integrity digest over the fields above.
    pub hash: BallotHash,
    #[serde(flatten)]
    pub metadata: SessionMetadata,
}

/// A ballot that has not been written to the ledger yet.
pub type NewBallot = BallotCore;

impl BallotCore {
    /// Create a ballot and seal it with its integrity hash.
    pub fn new(
        voter_id: VoterId,
        election_id: ElectionId,
        office_id: OfficeId,
        choice: BallotChoice,
        cast_at: DateTime<Utc>,
        metadata: SessionMetadata,
    ) -> Self {
        let cast_at = cast_at.with_nanosecond(0).unwrap_or(cast_at);
        let candidate_id = choice.candidate_id();
        let hash = BallotHash::compute(&voter_id, election_id, office_id, candidate_id, cast_at);
        Self {
            voter_id,
            election_id,
            office_id,
            candidate_id,
            is_null: choice == BallotChoice::Null,
            is_blank: choice == BallotChoice::Blank,
            cast_at,
            hash,
            metadata,
        }
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

    /// Recompute the hash from the stored fields and compare.
    ///
    /// The digest does not cover `is_null`/`is_blank`, so swapping a
    /// candidate-less ballot between null and blank still verifies. Neither
    /// does it cover the session metadata.
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
}

/// A ballot from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    #[serde(rename = "_id")]
    pub id: Id,
    /// Ballot contents.
    #[serde(flatten)]
    pub ballot: BallotCore,
}

impl Ballot {
    /// Assign a fresh ID to a new ballot.
    pub fn assign_id(ballot: NewBallot) -> Self {
        Self {
            id: Id::new(),
            ballot,
        }
    }
}

impl Deref for Ballot {
    type Target = BallotCore;

    fn deref(&self) -> &Self::Target {
        &self.ballot
    }
}

impl DerefMut for Ballot {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ballot
    }
}

/// Sort ballots by the position of their office in the voting sequence,
/// then by cast time.
pub fn sort_by_office(election: &Election, ballots: &mut [Ballot]) {
    let positions: HashMap<OfficeId, usize> = election.office_positions();
    ballots.sort_by_key(|b| {
        (
            positions.get(&b.office_id).copied().unwrap_or(usize::MAX),
            b.cast_at,
        )
    });
}


#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    #[test]
    fn voter_ids_are_trimmed() {
        assert_eq!(VoterId::parse("  V1 ").unwrap().as_str(), "V1");
        assert!(VoterId::parse("").is_none());
        assert!(VoterId::parse(" \t\n").is_none());
    }

    #[test]
    fn flags_follow_the_choice() {
        let now = Utc::now();
        let voter = VoterId::example();
        let meta = SessionMetadata::default();

        let valid = NewBallot::new(voter.clone(), 1, 1, BallotChoice::Valid(4), now, meta.clone());
        assert_eq!(valid.candidate_id, Some(4));
        assert!(!valid.is_null && !valid.is_blank);
        assert_eq!(valid.kind(), BallotKind::Valid);

        let null = NewBallot::new(voter.clone(), 1, 1, BallotChoice::Null, now, meta.clone());
        assert_eq!(null.candidate_id, None);
        assert!(null.is_null && !null.is_blank);
        assert_eq!(null.kind(), BallotKind::Null);

        let blank = NewBallot::new(voter, 1, 1, BallotChoice::Blank, now, meta);
        assert_eq!(blank.candidate_id, None);
        assert!(!blank.is_null && blank.is_blank);
        assert_eq!(blank.kind(), BallotKind::Blank);
    }

    #[test]
    fn cast_time_is_truncated() {
        let ballot = NewBallot::new(
            VoterId::example(),
            1,
            1,
            BallotChoice::Blank,
            Utc::now(),
            SessionMetadata::default(),
        );
        assert_eq!(ballot.cast_at.nanosecond(), 0);
    }

    #[test]
    fn tampering_is_detected() {
        let ballot = NewBallot::new(
            VoterId::example(),
            1,
            2,
            BallotChoice::Valid(3),
            Utc::now(),
            SessionMetadata::default(),
        );
        assert!(ballot.verify());

        let mut other_candidate = ballot.clone();
        other_candidate.candidate_id = Some(4);
        assert!(!other_candidate.verify());

        let mut other_time = ballot.clone();
        other_time.cast_at = other_time.cast_at + Duration::seconds(1);
        assert!(!other_time.verify());

        let mut other_voter = ballot.clone();
        other_voter.voter_id = VoterId::parse("V2").unwrap();
        assert!(!other_voter.verify());

        // Session metadata is not covered by the digest.
        let mut other_terminal = ballot;
        other_terminal.metadata.terminal_id = Some("elsewhere".to_string());
        assert!(other_terminal.verify());
    }

    #[test]
    fn null_and_blank_hash_alike() {
        let null = NewBallot::new(
            VoterId::example(),
            1,
            2,
            BallotChoice::Null,
            Utc::now(),
            SessionMetadata::default(),
        );
        let mut flipped = null.clone();
        flipped.is_null = false;
        flipped.is_blank = true;
        assert_eq!(flipped.kind(), BallotKind::Blank);
        assert!(flipped.verify());
        assert_eq!(flipped.hash, null.hash);
    }

    #[test]
    fn sorted_by_voting_sequence() {
        let election = Election::demo();
        let now = Utc::now();
        let make = |office, offset| {
            Ballot::assign_id(NewBallot::new(
                VoterId::example(),
                election.id,
                office,
                BallotChoice::Blank,
                now + Duration::seconds(offset),
                SessionMetadata::default(),
            ))
        };
        let mut ballots = vec![make(2, 0), make(1, 5), make(1, 1)];
        sort_by_office(&election, &mut ballots);
        let offices: Vec<_> = ballots.iter().map(|b| b.office_id).collect();
        assert_eq!(offices, [1, 1, 2]);
        assert!(ballots[0].cast_at < ballots[1].cast_at);
    }
}
