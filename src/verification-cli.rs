//! A simple CLI tool for verifying a voting terminal's ballots.
//! This uses the server's own hash implementation, and is by definition
//! compatible with the output of our API endpoints.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::BufReader;

use clap::{Arg, ArgAction, ArgMatches, Command};
use rocket::serde::json::serde_json;

use urna_backend::model::{api::receipt::BallotReceipt, ballot::BallotKind};

const PROGRAM_NAME: &str = "verify-ballots";

const ABOUT_TEXT: &str = "Verify the integrity hashes of an election's ballots.

EXIT CODES:
     0: Verification succeeded.
   255: Ran successfully, but verification failed.
 Other: Error.";

const BALLOTS_PATH: &str = "BALLOTS_PATH";

const BALLOTS_PATH_HELP: &str = "The path to a JSON dump of an election's ballots,\n\
as returned by `GET /elections/<election_id>/ballots`";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME).about(ABOUT_TEXT).arg(
        Arg::new(BALLOTS_PATH)
            .help(BALLOTS_PATH_HELP)
            .action(ArgAction::Set)
            .required(true),
    )
}

/// Errors that this program may produce.
#[derive(Debug, Eq, PartialEq)]
enum Error {
    /// IO error described by the inner message.
    IO(String),
    /// Failed to decode the JSON dump.
    Format(String),
    /// Verification failed due to the contained reason.
    Verification(VerificationError),
}

/// Why a dump failed verification.
#[derive(Debug, Eq, PartialEq)]
enum VerificationError {
    /// The stored hash does not match the ballot's fields.
    Hash { ballot_id: String },
    /// A second ballot from the same voter for the same office.
    Duplicate {
        ballot_id: String,
        voter_id: String,
        office_id: u32,
    },
}

/// Counts over the verified ballots.
#[derive(Debug, Default, Eq, PartialEq)]
struct Summary {
    pub ballots: u64,
    pub valid: u64,
    pub null: u64,
    pub blank: u64,
}

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ballot{} ({} valid, {} null, {} blank)",
            self.ballots,
            if self.ballots != 1 { "s" } else { "" },
            self.valid,
            self.null,
            self.blank
        )
    }
}

/// Run verification.
fn verify(path: &str) -> Result<Summary, Error> {
    // Load the file.
    let file = BufReader::new(File::open(path).map_err(|e| Error::IO(e.to_string()))?);
    let receipts: Vec<BallotReceipt> =
        serde_json::from_reader(file).map_err(|e| Error::Format(e.to_string()))?;

    let mut seen = HashSet::with_capacity(receipts.len());
    let mut summary = Summary::default();
    for receipt in receipts {
        if !receipt.verify() {
            return Err(Error::Verification(VerificationError::Hash {
                ballot_id: receipt.ballot_id,
            }));
        }
        let key = (receipt.voter_id.clone(), receipt.election_id, receipt.office_id);
        if !seen.insert(key) {
            return Err(Error::Verification(VerificationError::Duplicate {
                ballot_id: receipt.ballot_id,
                voter_id: receipt.voter_id.to_string(),
                office_id: receipt.office_id,
            }));
        }

        summary.ballots += 1;
        match receipt.kind() {
            BallotKind::Valid => summary.valid += 1,
            BallotKind::Null => summary.null += 1,
            BallotKind::Blank => summary.blank += 1,
        }
    }

    Ok(summary)
}

/// Run verification, report the result, and return the exit code.
fn run(args: &ArgMatches) -> u8 {
    let path: &String = args.get_one(BALLOTS_PATH).unwrap(); // Required argument is guaranteed to be present.
    match verify(path) {
        Ok(summary) => {
            println!("Verification succeeded: {summary}.");
            0
        }
        Err(Error::IO(msg)) => {
            println!("IO error: {msg}");
            1
        }
        Err(Error::Format(msg)) => {
            println!("Invalid JSON: {msg}");
            1
        }
        Err(Error::Verification(err)) => {
            let msg = match err {
                VerificationError::Hash { ballot_id } => {
                    format!("Ballot {ballot_id} does not match its integrity hash.")
                }
                VerificationError::Duplicate {
                    ballot_id,
                    voter_id,
                    office_id,
                } => format!(
                    "Ballot {ballot_id} is a second ballot from voter {voter_id} for office {office_id}."
                ),
            };
            println!("Verification failed: {msg}");
            255
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}
