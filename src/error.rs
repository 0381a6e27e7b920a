use log::warn;
use mongodb::error::Error as DbError;
use rocket::{http::Status, response::Responder};
use thiserror::Error;

use crate::model::{
    ballot::VoterId,
    election::{ElectionId, OfficeId},
};
use crate::terminal::InputRejected;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("Voter {voter} has already voted for office {office} in election {election}")]
    DuplicateVote {
        voter: VoterId,
        election: ElectionId,
        office: OfficeId,
    },
    #[error("Input rejected: {0}")]
    Rejected(#[from] InputRejected),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        warn!("{self}");
        Err(match self {
            Self::Db(_) => Status::InternalServerError,
            Self::DuplicateVote { .. } => Status::Conflict,
            Self::Rejected(InputRejected::NotADigit) | Self::BadRequest(_) => Status::BadRequest,
            Self::Rejected(_) => Status::Conflict,
            Self::NotFound(_) => Status::NotFound,
        })
    }
}
