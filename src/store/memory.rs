use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use log::debug;

use crate::error::{Error, Result};
use crate::model::{
    api::results::ElectionResults,
    audit::{AuditQuery, AuditRecord},
    ballot::{sort_by_office, Ballot, NewBallot, VoterId},
    election::{Election, ElectionId, OfficeId},
    mongodb::Id,
};

use super::{AuditSink, BallotLedger, ElectionCatalog};

#[derive(Default)]
struct Tables {
    elections: Vec<Election>,
    ballots: Vec<Ballot>,
    audit_log: Vec<AuditRecord>,
}

/// In-process backend for demo mode and tests. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with [`Election::demo`].
    pub fn demo() -> Self {
        Self::with_election(Election::demo())
    }

    pub fn with_election(election: Election) -> Self {
        let store = Self::new();
        store.add_election(election);
        store
    }

    /// Add or replace an election.
    pub fn add_election(&self, election: Election) {
        let mut tables = self.tables();
        tables.elections.retain(|e| e.id != election.id);
        tables.elections.push(election);
    }

    /// All ballots, in insertion order.
    pub fn all_ballots(&self) -> Vec<Ballot> {
        self.tables().ballots.clone()
    }

    /// All audit records, in insertion order.
    pub fn audit_log(&self) -> Vec<AuditRecord> {
        self.tables().audit_log.clone()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[rocket::async_trait]
impl ElectionCatalog for MemoryStore {
    async fn active_election(&self) -> Result<Option<Election>> {
        let now = Utc::now();
        let election = self
            .tables()
            .elections
            .iter()
            .find(|e| e.is_open_at(now))
            .cloned();
        Ok(election.map(Election::into_ballot_order))
    }

    async fn election(&self, id: ElectionId) -> Result<Option<Election>> {
        Ok(self.tables().elections.iter().find(|e| e.id == id).cloned())
    }
}

#[rocket::async_trait]
impl BallotLedger for MemoryStore {
    async fn has_voted(
        &self,
        voter_id: &VoterId,
        election_id: ElectionId,
        office_id: OfficeId,
    ) -> Result<bool> {
        Ok(self.tables().ballots.iter().any(|b| {
            &b.voter_id == voter_id && b.election_id == election_id && b.office_id == office_id
        }))
    }

    async fn cast(&self, ballot: NewBallot) -> Result<Ballot> {
        // Check and insert under one guard.
        let mut tables = self.tables();
        let duplicate = tables.ballots.iter().any(|b| {
            b.voter_id == ballot.voter_id
                && b.election_id == ballot.election_id
                && b.office_id == ballot.office_id
        });
        if duplicate {
            return Err(Error::DuplicateVote {
                voter: ballot.voter_id,
                election: ballot.election_id,
                office: ballot.office_id,
            });
        }
        let ballot = Ballot::assign_id(ballot);
        debug!("Stored ballot {}", ballot.id);
        tables.ballots.push(ballot.clone());
        Ok(ballot)
    }

    async fn ballot(&self, id: Id) -> Result<Option<Ballot>> {
        Ok(self.tables().ballots.iter().find(|b| b.id == id).cloned())
    }

    async fn ballots(&self, election_id: ElectionId) -> Result<Vec<Ballot>> {
        let tables = self.tables();
        let election = tables
            .elections
            .iter()
            .find(|e| e.id == election_id)
            .ok_or_else(|| Error::not_found(format!("Election {election_id}")))?;
        let mut ballots: Vec<_> = tables
            .ballots
            .iter()
            .filter(|b| b.election_id == election_id)
            .cloned()
            .collect();
        sort_by_office(election, &mut ballots);
        Ok(ballots)
    }

    async fn tally(&self, election_id: ElectionId) -> Result<ElectionResults> {
        let tables = self.tables();
        let election = tables
            .elections
            .iter()
            .find(|e| e.id == election_id)
            .ok_or_else(|| Error::not_found(format!("Election {election_id}")))?;
        Ok(ElectionResults::tally(
            election,
            tables.ballots.iter().map(|b| &b.ballot),
        ))
    }
}

#[rocket::async_trait]
impl AuditSink for MemoryStore {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        self.tables().audit_log.push(record);
        Ok(())
    }

    async fn audit_records(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        let mut records: Vec<_> = self
            .tables()
            .audit_log
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(records)
    }
}
