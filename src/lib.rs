#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, StoreFairing};
use crate::logging::LoggerFairing;
use crate::terminal::TerminalFairing;

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod scheduled_task;
pub mod store;
pub mod terminal;

/// Build the server. The fairings run in attachment order at ignition, so
/// the config and stores exist by the time the terminal is built.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(StoreFairing)
        .attach(TerminalFairing)
        .mount("/", api::routes())
}

/// A server over the given store, with a short dwell so tests can watch
/// sessions end.
#[cfg(test)]
pub(crate) fn rocket_for_store(store: store::MemoryStore) -> Rocket<Build> {
    use rocket::figment::providers::Serialized;

    let figment = rocket::Config::figment()
        .merge(Serialized::default("terminal_id", "test-urna"))
        .merge(Serialized::default("dwell_seconds", 1));
    rocket::custom(figment)
        .manage(store::Stores::new(store))
        .attach(ConfigFairing)
        .attach(TerminalFairing)
        .mount("/", api::routes())
}
