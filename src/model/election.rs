use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

pub type ElectionId = u32;
pub type OfficeId = u32;
pub type CandidateId = u32;

/// An election, with its offices and their candidates, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    /// Unique ID.
    #[serde(rename = "_id")]
    pub id: ElectionId,
    /// Election title.
    pub title: String,
    /// Optional longer description.
    pub description: Option<String>,
    /// Voting opens at this time.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub opens_at: DateTime<Utc>,
    /// Voting closes at this time.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub closes_at: DateTime<Utc>,
    /// At most one election is active at a time.
    pub active: bool,
    /// Elected positions, in no particular order; see [`Election::into_ballot_order`].
    pub offices: Vec<Office>,
}

impl Election {
    /// Is this election accepting ballots at the given time?
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.opens_at <= now && now <= self.closes_at
    }

    /// Active offices sorted by display order.
    pub fn ballot_offices(&self) -> Vec<&Office> {
        let mut offices: Vec<_> = self.offices.iter().filter(|o| o.active).collect();
        offices.sort_by_key(|o| o.order);
        offices
    }

    /// Restrict the election to what a voter sees: active offices in
    /// display order, each with only its active candidates.
    pub fn into_ballot_order(mut self) -> Self {
        self.offices.retain(|o| o.active);
        self.offices.sort_by_key(|o| o.order);
        for office in self.offices.iter_mut() {
            office.candidates.retain(|c| c.active);
        }
        self
    }

    /// Position of each office in the voting sequence, for sorting ballots.
    pub fn office_positions(&self) -> HashMap<OfficeId, usize> {
        self.ballot_offices()
            .into_iter()
            .enumerate()
            .map(|(position, office)| (office.id, position))
            .collect()
    }

    /// The election a freshly started demo server votes on.
    pub fn demo() -> Self {
        let now = Utc::now();
        Self {
            id: 1,
            title: "General Election".to_string(),
            description: Some("Demonstration election for the voting terminal".to_string()),
            opens_at: now - Duration::hours(1),
            closes_at: now + Duration::days(30),
            active: true,
            offices: vec![
                Office {
                    id: 1,
                    name: "President".to_string(),
                    digits: 2,
                    order: 1,
                    active: true,
                    candidates: vec![
                        Candidate::new(1, "Alice Andrade", "PA", "10"),
                        Candidate::new(2, "Bob Barros", "PB", "20"),
                        Candidate {
                            active: false,
                            ..Candidate::new(3, "Withdrawn Candidate", "PW", "30")
                        },
                    ],
                },
                Office {
                    id: 2,
                    name: "Governor".to_string(),
                    digits: 2,
                    order: 2,
                    active: true,
                    candidates: vec![
                        Candidate::new(4, "Carla Costa", "PA", "40"),
                        Candidate::new(5, "Davi Dias", "PB", "50"),
                    ],
                },
                Office {
                    id: 3,
                    name: "Senator".to_string(),
                    digits: 3,
                    order: 3,
                    active: false,
                    candidates: vec![Candidate::new(6, "Eva Esteves", "PA", "111")],
                },
            ],
        }
    }
}

/// An elected position voted on independently within one election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Office {
    /// Unique ID.
    pub id: OfficeId,
    /// Office name, e.g. "President".
    pub name: String,
    /// Length of the ballot number entered for this office.
    pub digits: u8,
    /// Voting sequence; strictly increasing within an election.
    pub order: u32,
    pub active: bool,
    pub candidates: Vec<Candidate>,
}

impl Office {
    /// Find the active candidate with exactly this ballot number.
    pub fn candidate_by_number(&self, number: &str) -> Option<&Candidate> {
        self.candidates
            .iter()
            .find(|c| c.active && c.number == number)
    }
}

/// A candidate standing for one office.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Unique ID.
    pub id: CandidateId,
    pub name: String,
    /// Party label.
    pub party: String,
    /// Ballot number; as many digits as the office requires.
    pub number: String,
    pub active: bool,
}

impl Candidate {
    /// Create an active candidate.
    pub fn new(id: CandidateId, name: &str, party: &str, number: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            party: party.to_string(),
            number: number.to_string(),
            active: true,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ballot_order_filters_and_sorts() {
        let mut election = Election::demo();
        election.offices.reverse();

        let election = election.into_ballot_order();
        let names: Vec<_> = election.offices.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["President", "Governor"]);
        assert_eq!(election.offices[0].candidates.len(), 2);
        assert!(election.offices[0].candidates.iter().all(|c| c.active));
    }

    #[test]
    fn inactive_candidates_are_not_found() {
        let election = Election::demo();
        let president = &election.offices[0];
        assert_eq!(president.candidate_by_number("10").unwrap().name, "Alice Andrade");
        assert!(president.candidate_by_number("30").is_none());
        assert!(president.candidate_by_number("1").is_none());
    }

    #[test]
    fn open_window() {
        let mut election = Election::demo();
        let now = Utc::now();
        assert!(election.is_open_at(now));
        assert!(!election.is_open_at(election.closes_at + Duration::seconds(1)));
        election.active = false;
        assert!(!election.is_open_at(now));
    }
}
