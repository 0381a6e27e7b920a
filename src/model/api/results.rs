use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{
    api::election::ElectionSummary,
    ballot::{BallotCore, BallotKind},
    election::{CandidateId, Election, OfficeId},
};

/// Ballot counts partitioned by outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoteStatistics {
    pub total: u64,
    pub valid: u64,
    pub null: u64,
    pub blank: u64,
    pub valid_percent: f64,
    pub null_percent: f64,
    pub blank_percent: f64,
}

impl VoteStatistics {
    fn count(&mut self, kind: BallotKind) {
        self.total += 1;
        match kind {
            BallotKind::Valid => self.valid += 1,
            BallotKind::Null => self.null += 1,
            BallotKind::Blank => self.blank += 1,
        }
    }

    fn finish(&mut self) {
        self.valid_percent = percent(self.valid, self.total);
        self.null_percent = percent(self.null, self.total);
        self.blank_percent = percent(self.blank, self.total);
    }
}

/// Votes received by one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub id: CandidateId,
    pub name: String,
    pub party: String,
    pub number: String,
    pub votes: u64,
    /// Share of all ballots cast for the office.
    pub percent: f64,
}

/// Results for one office.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficeResults {
    pub id: OfficeId,
    pub name: String,
    pub digits: u8,
    pub statistics: VoteStatistics,
    /// Sorted by votes, most first.
    pub candidates: Vec<CandidateResult>,
}

/// Full tally of an election.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionResults {
    pub election: ElectionSummary,
    /// Election-wide counts over every office.
    pub statistics: VoteStatistics,
    /// In voting order.
    pub offices: Vec<OfficeResults>,
}

impl ElectionResults {
    /// Count the given ballots against the election's active offices.
    /// Ballots for other elections or inactive offices are ignored.
    pub fn tally<'a>(
        election: &Election,
        ballots: impl IntoIterator<Item = &'a BallotCore>,
    ) -> Self {
        let mut offices: Vec<OfficeResults> = election
            .ballot_offices()
            .into_iter()
            .map(|office| OfficeResults {
                id: office.id,
                name: office.name.clone(),
                digits: office.digits,
                statistics: VoteStatistics::default(),
                candidates: office
                    .candidates
                    .iter()
                    .filter(|c| c.active)
                    .map(|c| CandidateResult {
                        id: c.id,
                        name: c.name.clone(),
                        party: c.party.clone(),
                        number: c.number.clone(),
                        votes: 0,
                        percent: 0.0,
                    })
                    .collect(),
            })
            .collect();
        let positions: HashMap<OfficeId, usize> = election.office_positions();

        let mut statistics = VoteStatistics::default();
        for ballot in ballots {
            if ballot.election_id != election.id {
                continue;
            }
            let Some(office) = positions.get(&ballot.office_id).map(|&i| &mut offices[i]) else {
                continue;
            };
            let kind = ballot.kind();
            statistics.count(kind);
            office.statistics.count(kind);
            if let Some(candidate_id) = ballot.candidate_id {
                if let Some(row) = office.candidates.iter_mut().find(|c| c.id == candidate_id) {
                    row.votes += 1;
                }
            }
        }

        statistics.finish();
        for office in offices.iter_mut() {
            office.statistics.finish();
            let total = office.statistics.total;
            for candidate in office.candidates.iter_mut() {
                candidate.percent = percent(candidate.votes, total);
            }
            // Stable, so ties keep ballot-number order.
            office.candidates.sort_by(|a, b| b.votes.cmp(&a.votes));
        }

        Self {
            election: ElectionSummary::from(election),
            statistics,
            offices,
        }
    }
}

/// `part` as a percentage of `whole`, or 0 for an empty whole.
fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}
