//! The poll-worker station and the voting keypad.

use log::warn;
use rocket::{serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::ballot::VoterId;
use crate::terminal::{InputRejected, Terminal, TerminalStatus};

pub fn routes() -> Vec<Route> {
    routes![
        status,
        unlock,
        lock,
        press_digit,
        press_blank,
        correct,
        confirm,
    ]
}

/// Poll-worker request to release the terminal.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UnlockRequest {
    pub voter_id: String,
}

#[get("/terminal")]
fn status(terminal: &State<Terminal>) -> Json<TerminalStatus> {
    Json(terminal.status())
}

#[post("/terminal/unlock", data = "<request>", format = "json")]
fn unlock(request: Json<UnlockRequest>, terminal: &State<Terminal>) -> Result<Json<TerminalStatus>> {
    if VoterId::parse(&request.voter_id).is_none() {
        return Err(Error::BadRequest("`voter_id` must not be blank".to_string()));
    }
    if !terminal.unlock(&request.voter_id) {
        warn!("Terminal is already unlocked, ignoring unlock request");
    }
    Ok(Json(terminal.status()))
}

#[post("/terminal/lock")]
fn lock(terminal: &State<Terminal>) -> Json<TerminalStatus> {
    terminal.lock();
    Json(terminal.status())
}

#[post("/terminal/digit/<key>")]
fn press_digit(key: &str, terminal: &State<Terminal>) -> Result<Json<TerminalStatus>> {
    let mut chars = key.chars();
    let digit = match (chars.next(), chars.next()) {
        (Some(digit), None) => digit,
        _ => return Err(InputRejected::NotADigit.into()),
    };
    Ok(Json(terminal.press_digit(digit)?))
}

#[post("/terminal/blank")]
fn press_blank(terminal: &State<Terminal>) -> Result<Json<TerminalStatus>> {
    Ok(Json(terminal.press_blank()?))
}

#[post("/terminal/correct")]
fn correct(terminal: &State<Terminal>) -> Result<Json<TerminalStatus>> {
    Ok(Json(terminal.correct()?))
}

#[post("/terminal/confirm")]
async fn confirm(terminal: &State<Terminal>) -> Result<Json<TerminalStatus>> {
    Ok(Json(terminal.confirm().await?))
}
