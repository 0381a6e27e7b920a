//! The voting session state machine: one voter, every office once, in order.
//!
//! This is pure state. It does no I/O and knows nothing of the gate or the
//! ledger; [`Terminal`](super::Terminal) feeds it events and carries out
//! the ballots it produces.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    ballot::{BallotChoice, VoterId},
    election::{Candidate, Election, ElectionId, Office, OfficeId},
};

/// What an entered number means for the office being voted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Valid(Candidate),
    /// The number matched no active candidate.
    Null,
    Blank,
}

impl Resolution {
    pub fn choice(&self) -> BallotChoice {
        match self {
            Self::Valid(candidate) => BallotChoice::Valid(candidate.id),
            Self::Null => BallotChoice::Null,
            Self::Blank => BallotChoice::Blank,
        }
    }
}

/// Where the session is. Offices are referred to by their index in the
/// election's voting order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum SessionState {
    AwaitingUnlock,
    LoadingElection,
    AwaitingDigits { office: usize },
    CandidateResolved { office: usize, resolution: Resolution },
    Casting { office: usize },
    SessionComplete,
    /// A session-fatal error is being shown; the gate is about to lock.
    Failed { fault: SessionFault },
}

impl SessionState {
    /// Index of the office being voted, if any.
    pub fn office_index(&self) -> Option<usize> {
        match self {
            Self::AwaitingDigits { office }
            | Self::CandidateResolved { office, .. }
            | Self::Casting { office } => Some(*office),
            _ => None,
        }
    }
}

/// Errors that end a session. None are retried; the poll worker has to
/// unlock the terminal again.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SessionFault {
    #[error("There is no active election")]
    NoActiveElection,
    #[error("The active election has no offices to vote for")]
    NoOffices,
    #[error("No voter is authorized on this terminal")]
    NoAuthorizedVoter,
    #[error("Election {election} is no longer open for voting")]
    ElectionClosed { election: ElectionId },
    #[error("Voter {voter} has already voted for office {office} in election {election}")]
    DuplicateVote {
        voter: VoterId,
        election: ElectionId,
        office: OfficeId,
    },
    #[error("The ballot could not be recorded: {0}")]
    Ledger(String),
    #[error("The election could not be loaded: {0}")]
    Catalog(String),
}

/// Voter input the session ignored. The state is unchanged.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum InputRejected {
    #[error("The terminal is not accepting that input now")]
    NotAccepting,
    #[error("Only the keys 0-9 can be entered")]
    NotADigit,
    #[error("All digits for this office have been entered")]
    BufferFull,
    #[error("A blank vote can only be cast before entering any digits")]
    BufferNotEmpty,
    #[error("No candidate has been selected yet")]
    NothingToConfirm,
}

/// A confirmed choice, ready to be cast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBallot {
    pub election_id: ElectionId,
    pub office_id: OfficeId,
    pub office_index: usize,
    pub choice: BallotChoice,
}

/// One voter's pass through the ballot.
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    election: Option<Election>,
    digits: String,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::AwaitingUnlock,
            election: None,
            digits: String::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The election being voted, once loaded.
    pub fn election(&self) -> Option<&Election> {
        self.election.as_ref()
    }

    /// Digits entered so far for the current office.
    pub fn digits(&self) -> &str {
        &self.digits
    }

    pub fn current_office(&self) -> Option<&Office> {
        let index = self.state.office_index()?;
        self.election.as_ref()?.offices.get(index)
    }

    pub fn is_idle(&self) -> bool {
        self.state == SessionState::AwaitingUnlock
    }

    /// Start a session. Returns false, changing nothing, if one is already
    /// in progress.
    pub fn begin(&mut self) -> bool {
        if !self.is_idle() {
            return false;
        }
        self.state = SessionState::LoadingElection;
        true
    }

    /// Supply the active election. On success the first office is up.
    pub fn load(&mut self, election: Option<Election>) -> Result<(), SessionFault> {
        let result = match election.map(Election::into_ballot_order) {
            None => Err(SessionFault::NoActiveElection),
            Some(election) if election.offices.is_empty() => Err(SessionFault::NoOffices),
            Some(election) => Ok(election),
        };
        match result {
            Ok(election) => {
                self.election = Some(election);
                self.digits.clear();
                self.state = SessionState::AwaitingDigits { office: 0 };
                Ok(())
            }
            Err(fault) => {
                self.fail(fault.clone());
                Err(fault)
            }
        }
    }

    /// Enter one digit. Entering the last digit the office takes resolves
    /// the number.
    pub fn press_digit(&mut self, digit: char) -> Result<(), InputRejected> {
        let office = match self.state {
            SessionState::AwaitingDigits { office } => office,
            SessionState::CandidateResolved { .. } => return Err(InputRejected::BufferFull),
            _ => return Err(InputRejected::NotAccepting),
        };
        if !digit.is_ascii_digit() {
            return Err(InputRejected::NotADigit);
        }
        let wanted = self
            .current_office()
            .map(|o| usize::from(o.digits))
            .ok_or(InputRejected::NotAccepting)?;
        if self.digits.len() >= wanted {
            return Err(InputRejected::BufferFull);
        }

        self.digits.push(digit);
        if self.digits.len() == wanted {
            let resolution = match self
                .current_office()
                .and_then(|o| o.candidate_by_number(&self.digits))
            {
                Some(candidate) => Resolution::Valid(candidate.clone()),
                None => Resolution::Null,
            };
            self.state = SessionState::CandidateResolved { office, resolution };
        }
        Ok(())
    }

    /// Choose to vote blank. Only before any digit is entered.
    pub fn press_blank(&mut self) -> Result<(), InputRejected> {
        match self.state {
            SessionState::AwaitingDigits { office } if self.digits.is_empty() => {
                self.state = SessionState::CandidateResolved {
                    office,
                    resolution: Resolution::Blank,
                };
                Ok(())
            }
            SessionState::AwaitingDigits { .. } => Err(InputRejected::BufferNotEmpty),
            _ => Err(InputRejected::NotAccepting),
        }
    }

    /// Discard the entry for the current office and start it over.
    pub fn correct(&mut self) -> Result<(), InputRejected> {
        match self.state {
            SessionState::AwaitingDigits { office }
            | SessionState::CandidateResolved { office, .. } => {
                self.digits.clear();
                self.state = SessionState::AwaitingDigits { office };
                Ok(())
            }
            _ => Err(InputRejected::NotAccepting),
        }
    }

    /// Confirm the resolved choice and move to casting it.
    pub fn confirm(&mut self) -> Result<PendingBallot, InputRejected> {
        let (office_index, choice) = match &self.state {
            SessionState::CandidateResolved { office, resolution } => {
                (*office, resolution.choice())
            }
            SessionState::AwaitingDigits { .. } => return Err(InputRejected::NothingToConfirm),
            _ => return Err(InputRejected::NotAccepting),
        };
        let (election_id, office_id) = self
            .election
            .as_ref()
            .and_then(|e| e.offices.get(office_index).map(|o| (e.id, o.id)))
            .ok_or(InputRejected::NotAccepting)?;

        self.state = SessionState::Casting {
            office: office_index,
        };
        Ok(PendingBallot {
            election_id,
            office_id,
            office_index,
            choice,
        })
    }

    /// The ballot being cast is in the ledger: move to the next office, or
    /// finish. Ignored unless casting.
    pub fn cast_committed(&mut self) -> &SessionState {
        if let SessionState::Casting { office } = self.state {
            let offices = self.election.as_ref().map_or(0, |e| e.offices.len());
            self.digits.clear();
            self.state = if office + 1 < offices {
                SessionState::AwaitingDigits { office: office + 1 }
            } else {
                SessionState::SessionComplete
            };
        }
        &self.state
    }

    /// End the session with an error. Anything in progress is discarded.
    pub fn fail(&mut self, fault: SessionFault) {
        self.digits.clear();
        self.state = SessionState::Failed { fault };
    }

    /// Forget everything and wait for the next voter.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
