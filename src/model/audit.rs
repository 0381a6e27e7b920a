use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::{
    doc, serde_helpers::chrono_datetime_as_bson_datetime, DateTime as BsonDateTime, Document,
};
use rocket::form::{self, prelude::ErrorKind, FromFormField, ValueField};
use serde::{Deserialize, Serialize};

use crate::model::election::ElectionId;

/// Who audit entries written by the terminal are attributed to.
const TERMINAL_USER: &str = "terminal";

/// One entry in the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// What happened, e.g. `VOTE`.
    pub action: String,
    /// Kind of entity acted on, e.g. `Ballot`.
    pub entity: String,
    pub entity_id: Option<String>,
    /// The election the action belongs to, if any.
    #[serde(default)]
    pub election_id: Option<ElectionId>,
    pub description: String,
    pub user: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Create a record attributed to the terminal, timestamped now.
    pub fn new(
        action: &str,
        entity: &str,
        entity_id: Option<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id,
            election_id: None,
            description: description.into(),
            user: TERMINAL_USER.to_string(),
            recorded_at: Utc::now(),
        }
    }

    /// Tie the record to an election.
    pub fn in_election(mut self, election_id: ElectionId) -> Self {
        self.election_id = Some(election_id);
        self
    }
}

/// An RFC 3339 timestamp in a query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp(DateTime<Utc>);

impl Deref for Timestamp {
    type Target = DateTime<Utc>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(time: DateTime<Utc>) -> Self {
        Self(time)
    }
}

#[rocket::async_trait]
impl<'r> FromFormField<'r> for Timestamp {
    fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
        DateTime::parse_from_rfc3339(field.value)
            .map(|time| Self(time.with_timezone(&Utc)))
            .map_err(|err| {
                let error = ErrorKind::Custom(Box::new(err));
                error.into()
            })
    }
}

/// Which audit records to read back. Every filter is optional; records
/// come newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromForm)]
pub struct AuditQuery {
    /// Recorded at or after this time.
    pub from: Option<Timestamp>,
    /// Recorded at or before this time.
    pub to: Option<Timestamp>,
    pub election_id: Option<ElectionId>,
    pub entity: Option<String>,
    /// Only together with `entity`.
    pub entity_id: Option<String>,
}

impl AuditQuery {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.from.map_or(true, |from| record.recorded_at >= *from)
            && self.to.map_or(true, |to| record.recorded_at <= *to)
            && self
                .election_id
                .map_or(true, |id| record.election_id == Some(id))
            && match &self.entity {
                None => true,
                Some(entity) => {
                    record.entity == *entity
                        && self
                            .entity_id
                            .as_ref()
                            .map_or(true, |id| record.entity_id.as_ref() == Some(id))
                }
            }
    }

    /// The same filter as a MongoDB query document.
    pub fn as_doc(&self) -> Document {
        let mut filter = Document::new();
        let mut recorded_at = Document::new();
        if let Some(from) = self.from {
            recorded_at.insert("$gte", BsonDateTime::from_chrono(*from));
        }
        if let Some(to) = self.to {
            recorded_at.insert("$lte", BsonDateTime::from_chrono(*to));
        }
        if !recorded_at.is_empty() {
            filter.insert("recorded_at", recorded_at);
        }
        if let Some(election_id) = self.election_id {
            filter.insert("election_id", election_id);
        }
        if let Some(entity) = &self.entity {
            filter.insert("entity", entity.as_str());
            if let Some(entity_id) = &self.entity_id {
                filter.insert("entity_id", entity_id.as_str());
            }
        }
        filter
    }

    /// Sort order for MongoDB: newest first.
    pub fn sort_doc() -> Document {
        doc! { "recorded_at": -1 }
    }
}
