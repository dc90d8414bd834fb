use std::str::FromStr;

use sqlx::error::ErrorKind;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::BackendError;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Handle over the SQLite connection pool. Cheap to clone; managed as Rocket
/// state and shared by every request handler.
#[derive(Debug, Clone)]
pub struct Db {
    pool: SqlitePool,
}

fn is_memory_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains(":memory:") || lower.contains("mode=memory")
}

impl Db {
    /// Connects to the database, enables foreign-key enforcement and applies
    /// the embedded migrations.
    ///
    /// The FK actions the schema relies on (restrict/cascade deletes) are
    /// inert in SQLite unless `foreign_keys` is set per connection.
    /// In-memory databases get a single-connection pool, otherwise every
    /// pooled connection would see its own empty database.
    pub async fn connect(url: &str) -> Result<Db, BackendError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let mut pool_options = SqlitePoolOptions::new();
        if is_memory_url(url) {
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;
        MIGRATOR.run(&pool).await?;

        Ok(Db { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// True when the error is a store-level unique-index violation. SQLx exposes
/// the constraint class for SQLite directly; the SQLSTATE fallback covers
/// drivers that only report a code (Postgres 23505, SQLite 2067, MySQL 1062).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.kind() == ErrorKind::UniqueViolation
                || db
                    .code()
                    .map(|c| matches!(c.as_ref(), "23505" | "2067" | "1555" | "1062"))
                    .unwrap_or(false)
        }
        _ => false,
    }
}

/// True when `err` is a unique violation on one specific column, e.g.
/// `users.email`. SQLite names the violated column in its message, which
/// lets callers map races to the same response as their advisory pre-check.
pub fn unique_violation_on(err: &sqlx::Error, column: &str) -> bool {
    is_unique_violation(err)
        && err
            .as_database_error()
            .is_some_and(|db_err| db_err.message().contains(column))
}

/// True when the error is a foreign-key constraint violation, e.g. deleting
/// a row other rows still reference under `ON DELETE RESTRICT`.
pub fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.kind() == ErrorKind::ForeignKeyViolation
                || db
                    .code()
                    .map(|c| matches!(c.as_ref(), "23503" | "787" | "1451" | "1452"))
                    .unwrap_or(false)
        }
        _ => false,
    }
}
