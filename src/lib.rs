#[macro_use]
extern crate rocket;

use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedHeaders, AllowedOrigins};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::db::Db;
use crate::error::{BackendError, ConfigurationError};
use crate::route::mount_api;

pub mod config;
pub mod data;
pub mod db;
pub mod error;
pub mod middleware;
pub mod resp;
pub mod role;
pub mod route;
pub mod seed;
pub mod util;
pub mod validate;

#[cfg(test)]
pub mod testing;

/// Assembles the Rocket over `config`: store connection, CORS, routes and
/// catchers. Takes no process-level state, so tests can build isolated
/// instances against in-memory stores.
pub async fn build(config: Config) -> Result<Rocket<Build>, BackendError> {
    tracing::info!("Connecting to database: {}", config.database_url);
    let db = Db::connect(&config.database_url).await?;

    let cors = rocket_cors::CorsOptions {
        allowed_origins: AllowedOrigins::All,
        allowed_methods: vec![Method::Get, Method::Put, Method::Post, Method::Delete]
            .into_iter()
            .map(From::from)
            .collect(),
        allowed_headers: AllowedHeaders::All,
        allow_credentials: true,
        ..Default::default()
    }
    .to_cors()
    .expect("Unable to configure CORS.");

    let rocket = rocket::build().manage(config).manage(db).attach(cors);
    Ok(mount_api(rocket))
}

/// Server entry point: logging, `.env`, configuration, then [`build`].
pub async fn create(log_level: Option<Level>) -> Result<Rocket<Build>, BackendError> {
    if let Some(level) = log_level {
        let subscriber = FmtSubscriber::builder().with_max_level(level).finish();

        if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Unable to set global logger: {}", err);
        }
    }

    tracing::info!("Reading .env file...");
    if dotenv::dotenv().is_err() {
        tracing::warn!("Unable to load .env file.");
    }

    tracing::info!("Loading configuration...");
    let config = match Config::load() {
        Ok(config) => {
            tracing::info!("Configuration loaded.");
            config
        }
        Err(ConfigurationError::NotFound(_)) => {
            let config = Config::default();
            if config.save().is_err() {
                tracing::warn!("Unable to save generated configuration.");
            }
            config
        }
        Err(other) => {
            tracing::error!("Configuration error: {}", other);
            return Err(other.into());
        }
    };

    build(config).await
}
