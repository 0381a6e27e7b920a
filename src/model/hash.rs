//! Tamper-evidence digest stored with every ballot.
//!
//! The digest covers the voter, election, office, candidate and cast time,
//! so any of those fields being edited after the fact is detectable by
//! recomputing it. The voter identifier is part of the preimage, so the
//! digest gives no ballot secrecy.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use data_encoding::BASE64;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::{
    ballot::VoterId,
    election::{CandidateId, ElectionId, OfficeId},
};

/// Rendering of the cast time inside the digest; one-second resolution.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A base64-encoded SHA-256 ballot digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BallotHash(String);

impl BallotHash {
    /// Compute the digest of a ballot's identifying fields.
    /// A ballot without a candidate hashes the candidate as the empty string.
    pub fn compute(
        voter_id: &VoterId,
        election_id: ElectionId,
        office_id: OfficeId,
        candidate_id: Option<CandidateId>,
        cast_at: DateTime<Utc>,
    ) -> Self {
        let candidate = candidate_id.map(|id| id.to_string()).unwrap_or_default();
        let preimage = format!(
            "{voter_id}|{election_id}|{office_id}|{candidate}|{}",
            cast_at.format(TIMESTAMP_FORMAT)
        );
        let digest = Sha256::digest(preimage.as_bytes());
        Self(BASE64.encode(&digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BallotHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
