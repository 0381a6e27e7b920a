use chrono::Utc;
use log::{debug, warn};
use mongodb::{
    bson::{doc, DateTime as BsonDateTime},
    options::FindOptions,
    Database,
};
use rocket::futures::TryStreamExt;

use crate::error::{Error, Result};
use crate::model::{
    api::results::ElectionResults,
    audit::{AuditQuery, AuditRecord},
    ballot::{sort_by_office, Ballot, NewBallot, VoterId},
    election::{Election, ElectionId, OfficeId},
    mongodb::{is_duplicate_key_error, u32_id_filter, Coll, Id},
};

use super::{AuditSink, BallotLedger, ElectionCatalog};

/// MongoDB backend. Relies on the unique ballot index created by
/// [`ensure_indexes_exist`](crate::model::mongodb::ensure_indexes_exist).
#[derive(Clone)]
pub struct MongoStore {
    elections: Coll<Election>,
    ballots: Coll<Ballot>,
    audit_log: Coll<AuditRecord>,
}

impl MongoStore {
    pub fn new(db: &Database) -> Self {
        Self {
            elections: Coll::from_db(db),
            ballots: Coll::from_db(db),
            audit_log: Coll::from_db(db),
        }
    }

    async fn existing_election(&self, id: ElectionId) -> Result<Election> {
        self.election(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Election {id}")))
    }
}

#[rocket::async_trait]
impl ElectionCatalog for MongoStore {
    async fn active_election(&self) -> Result<Option<Election>> {
        let now = BsonDateTime::from_chrono(Utc::now());
        let filter = doc! {
            "active": true,
            "opens_at": { "$lte": now },
            "closes_at": { "$gte": now },
        };
        let election = self.elections.find_one(filter, None).await?;
        Ok(election.map(Election::into_ballot_order))
    }

    async fn election(&self, id: ElectionId) -> Result<Option<Election>> {
        Ok(self.elections.find_one(u32_id_filter(id), None).await?)
    }
}

#[rocket::async_trait]
impl BallotLedger for MongoStore {
    async fn has_voted(
        &self,
        voter_id: &VoterId,
        election_id: ElectionId,
        office_id: OfficeId,
    ) -> Result<bool> {
        let filter = doc! {
            "voter_id": voter_id.as_str(),
            "election_id": election_id,
            "office_id": office_id,
        };
        let count = self.ballots.count_documents(filter, None).await?;
        Ok(count > 0)
    }

    async fn cast(&self, ballot: NewBallot) -> Result<Ballot> {
        let ballot = Ballot::assign_id(ballot);
        match self.ballots.insert_one(&ballot, None).await {
            Ok(_) => {
                debug!("Inserted ballot {}", ballot.id);
                Ok(ballot)
            }
            Err(e) if is_duplicate_key_error(&e) => {
                warn!(
                    "Rejected second ballot from {} for office {}",
                    ballot.voter_id, ballot.office_id
                );
                Err(Error::DuplicateVote {
                    voter: ballot.ballot.voter_id,
                    election: ballot.ballot.election_id,
                    office: ballot.ballot.office_id,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ballot(&self, id: Id) -> Result<Option<Ballot>> {
        Ok(self.ballots.find_one(id.as_doc(), None).await?)
    }

    async fn ballots(&self, election_id: ElectionId) -> Result<Vec<Ballot>> {
        let election = self.existing_election(election_id).await?;
        let mut ballots: Vec<Ballot> = self
            .ballots
            .find(doc! { "election_id": election_id }, None)
            .await?
            .try_collect()
            .await?;
        sort_by_office(&election, &mut ballots);
        Ok(ballots)
    }

    async fn tally(&self, election_id: ElectionId) -> Result<ElectionResults> {
        let election = self.existing_election(election_id).await?;
        let ballots: Vec<Ballot> = self
            .ballots
            .find(doc! { "election_id": election_id }, None)
            .await?
            .try_collect()
            .await?;
        Ok(ElectionResults::tally(
            &election,
            ballots.iter().map(|b| &b.ballot),
        ))
    }
}

#[rocket::async_trait]
impl AuditSink for MongoStore {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        self.audit_log.insert_one(&record, None).await?;
        Ok(())
    }

    async fn audit_records(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        let options = FindOptions::builder().sort(AuditQuery::sort_doc()).build();
        let records = self
            .audit_log
            .find(query.as_doc(), options)
            .await?
            .try_collect()
            .await?;
        Ok(records)
    }
}
