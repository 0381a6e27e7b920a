//! Types exchanged over the HTTP API.

pub mod election;
pub mod receipt;
pub mod results;
