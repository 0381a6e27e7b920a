use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::{audit::AuditRecord, ballot::Ballot, election::Election};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MongoCollection for Election {
    const NAME: &'static str = "elections";
}

impl MongoCollection for Ballot {
    const NAME: &'static str = "ballots";
}

impl MongoCollection for AuditRecord {
    const NAME: &'static str = "audit_log";
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    // One ballot per voter per office: this index is what makes casting
    // an atomic check-and-insert.
    let unique = IndexOptions::builder().unique(true).build();
    let ballot_index = IndexModel::builder()
        .keys(doc! {"voter_id": 1, "election_id": 1, "office_id": 1})
        .options(unique)
        .build();
    Coll::<Ballot>::from_db(db)
        .create_index(ballot_index, None)
        .await?;

    // Tallies and dumps read ballots by election.
    let tally_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "cast_at": 1})
        .build();
    Coll::<Ballot>::from_db(db)
        .create_index(tally_index, None)
        .await?;

    // The active-election lookup.
    let active_index = IndexModel::builder().keys(doc! {"active": 1}).build();
    Coll::<Election>::from_db(db)
        .create_index(active_index, None)
        .await?;

    Ok(())
}
