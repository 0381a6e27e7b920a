use rocket::{serde::json::Json, Route, State};

use crate::error::{Error, Result};
use crate::model::{
    api::{
        election::ElectionDescription,
        receipt::{BallotReceipt, BallotVerification},
        results::ElectionResults,
    },
    election::ElectionId,
    mongodb::Id,
};
use crate::store::Stores;

pub fn routes() -> Vec<Route> {
    routes![active_election, election_results, election_ballots, verify_ballot]
}

#[get("/elections/active")]
async fn active_election(stores: &State<Stores>) -> Result<Json<ElectionDescription>> {
    let election = stores
        .catalog
        .active_election()
        .await?
        .ok_or_else(|| Error::not_found("Active election"))?;
    Ok(Json(election.into()))
}

#[get("/elections/<election_id>/results")]
async fn election_results(
    election_id: ElectionId,
    stores: &State<Stores>,
) -> Result<Json<ElectionResults>> {
    Ok(Json(stores.ledger.tally(election_id).await?))
}

/// Every ballot of an election, for offline verification.
#[get("/elections/<election_id>/ballots")]
async fn election_ballots(
    election_id: ElectionId,
    stores: &State<Stores>,
) -> Result<Json<Vec<BallotReceipt>>> {
    let ballots = stores.ledger.ballots(election_id).await?;
    Ok(Json(ballots.into_iter().map(BallotReceipt::from).collect()))
}

#[get("/ballots/<ballot_id>/verify")]
async fn verify_ballot(ballot_id: Id, stores: &State<Stores>) -> Result<Json<BallotVerification>> {
    let ballot = stores
        .ledger
        .ballot(ballot_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Ballot with ID '{ballot_id}'")))?;
    Ok(Json(BallotVerification {
        ballot_id: ballot_id.to_string(),
        valid: ballot.verify(),
    }))
}
