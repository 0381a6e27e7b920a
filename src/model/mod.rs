//! Data types, both as stored in the database and as exchanged over the API.
//!
//! The `api` types are serialised in a JSON-friendly way (e.g. RFC 3339
//! datetimes, hex IDs); everything else is stored as-is in MongoDB.

pub mod api;
pub mod audit;
pub mod ballot;
pub mod election;
pub mod hash;
pub mod mongodb;
