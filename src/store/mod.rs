//! The election catalog, ballot ledger and audit sink the voting terminal
//! depends on, and their backends.

use std::sync::Arc;

use crate::error::Result;
use crate::model::{
    api::results::ElectionResults,
    audit::{AuditQuery, AuditRecord},
    ballot::{Ballot, NewBallot, VoterId},
    election::{Election, ElectionId, OfficeId},
    mongodb::Id,
};

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Read-only view of the elections.
#[rocket::async_trait]
pub trait ElectionCatalog: Send + Sync {
    /// The election flagged active whose voting window contains now,
    /// restricted to its active offices (in voting order) and candidates.
    async fn active_election(&self) -> Result<Option<Election>>;

    /// Any election by ID, as stored.
    async fn election(&self, id: ElectionId) -> Result<Option<Election>>;
}

/// Append-only store of cast ballots.
#[rocket::async_trait]
pub trait BallotLedger: Send + Sync {
    async fn has_voted(
        &self,
        voter_id: &VoterId,
        election_id: ElectionId,
        office_id: OfficeId,
    ) -> Result<bool>;

    /// Atomically check-and-insert a ballot. Fails with
    /// [`Error::DuplicateVote`](crate::error::Error::DuplicateVote), writing
    /// nothing, if the voter already has a ballot for that office.
    async fn cast(&self, ballot: NewBallot) -> Result<Ballot>;

    async fn ballot(&self, id: Id) -> Result<Option<Ballot>>;

    /// Every ballot of an election, by office voting order then cast time.
    async fn ballots(&self, election_id: ElectionId) -> Result<Vec<Ballot>>;

    /// Count an election's ballots. Unknown elections are not found.
    async fn tally(&self, election_id: ElectionId) -> Result<ElectionResults>;
}

/// Where audit records go, and how they are read back.
#[rocket::async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<()>;

    /// Records matching the query, newest first.
    async fn audit_records(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>>;
}

/// The collaborators, behind trait objects so the backend is chosen at
/// ignition. Placed in managed state.
#[derive(Clone)]
pub struct Stores {
    pub catalog: Arc<dyn ElectionCatalog>,
    pub ledger: Arc<dyn BallotLedger>,
    pub audit: Arc<dyn AuditSink>,
}

impl Stores {
    /// Use one backend for everything.
    pub fn new<S>(store: S) -> Self
    where
        S: ElectionCatalog + BallotLedger + AuditSink + 'static,
    {
        let store = Arc::new(store);
        Self {
            catalog: store.clone(),
            ledger: store.clone(),
            audit: store,
        }
    }
}
