use std::env;
use std::fs::File;
use std::io::BufReader;

use anyhow::Context;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use classhub_backend::config::Config;
use classhub_backend::db::Db;
use classhub_backend::error::ConfigurationError;
use classhub_backend::seed::{self, SeedData};

/// Loads the dataset named on the command line, or the built-in one.
fn load_dataset() -> anyhow::Result<SeedData> {
    match env::args().nth(1) {
        Some(path) => {
            let file =
                File::open(&path).with_context(|| format!("unable to open dataset '{path}'"))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("invalid dataset '{path}'"))
        }
        None => Ok(seed::dataset()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Unable to set global logger: {}", err);
    }

    if dotenv::dotenv().is_err() {
        tracing::warn!("Unable to load .env file.");
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigurationError::NotFound(_)) => Config::default(),
        Err(other) => anyhow::bail!("unable to load configuration: {other}"),
    };

    let data = load_dataset()?;

    let db = Db::connect(&config.database_url)
        .await
        .context("unable to connect to database")?;
    seed::run(&db, &data).await.context("seeding failed")?;

    tracing::info!("Database seeded.");
    Ok(())
}
