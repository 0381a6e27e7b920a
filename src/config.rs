use chrono::Duration;
use log::{error, info, warn};
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::model::mongodb::ensure_indexes_exist;
use crate::store::{MemoryStore, MongoStore, Stores};
use crate::terminal::TerminalConfig;

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Deserialize)]
pub struct Config {
    terminal_id: String,
    #[serde(default = "default_dwell_seconds")]
    dwell_seconds: u32,
}

fn default_dwell_seconds() -> u32 {
    3
}

impl Config {
    /// Label of this terminal, recorded on every ballot.
    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    /// How long the end-of-session screen is shown before relocking.
    pub fn dwell(&self) -> Duration {
        Duration::seconds(self.dwell_seconds.into())
    }

    pub fn terminal(&self) -> TerminalConfig {
        TerminalConfig {
            terminal_id: self.terminal_id.clone(),
            dwell: self.dwell(),
        }
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the storage backend.
#[derive(Deserialize)]
struct DbConfig {
    db_uri: Option<String>,
}

/// A fairing that picks the storage backend and places the [`Stores`] into
/// managed state.
///
/// With a `db_uri` it connects to MongoDB, ensures the indexes exist, and
/// also manages the `Client` and `Database`. Without one it falls back to an
/// in-memory store seeded with a demo election.
pub struct StoreFairing;

#[rocket::async_trait]
impl Fairing for StoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Ballot store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let Some(db_uri) = config.db_uri else {
            warn!("No `db_uri` configured, using an in-memory demo store");
            return Ok(rocket.manage(Stores::new(MemoryStore::demo())));
        };

        info!("Loaded database config, connecting...");
        // Construct the connection.
        let client = match MongoClient::with_uri_str(db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(&get_database_name());

        // Ensure the required indexes exist.
        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to connect to database: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        // Manage the state.
        let stores = Stores::new(MongoStore::new(&db));
        rocket = rocket.manage(client).manage(db).manage(stores);
        Ok(rocket)
    }
}

/// Get the name of the database to use (production version).
#[cfg(not(test))]
pub(crate) fn get_database_name() -> String {
    "urna".to_string()
}

/// Get the name of the database to use (test version).
/// Use a random name to avoid collisions between tests.
#[cfg(test)]
pub(crate) fn get_database_name() -> String {
    let random: u32 = rand::random();
    let db = format!("test{random}");
    info!("Using database {db}");
    db
}
