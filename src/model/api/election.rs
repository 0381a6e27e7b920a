use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::election::{Election, ElectionId, Office};

/// Top-level election metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSummary {
    pub id: ElectionId,
    pub title: String,
    pub description: Option<String>,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub active: bool,
}

impl From<&Election> for ElectionSummary {
    fn from(election: &Election) -> Self {
        Self {
            id: election.id,
            title: election.title.clone(),
            description: election.description.clone(),
            opens_at: election.opens_at,
            closes_at: election.closes_at,
            active: election.active,
        }
    }
}

/// An election with the offices and candidates on its ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionDescription {
    #[serde(flatten)]
    pub summary: ElectionSummary,
    pub offices: Vec<Office>,
}

impl From<Election> for ElectionDescription {
    fn from(election: Election) -> Self {
        let summary = ElectionSummary::from(&election);
        Self {
            summary,
            offices: election.into_ballot_order().offices,
        }
    }
}
