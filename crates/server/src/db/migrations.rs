use anyhow::{Context, Result};
use sqlx::{migrate::Migrator, postgres::PgPool};

/// Embedded migrations for the chat schema. The users and sessions
/// tables belong to the account system and are never migrated here.
pub static MIGRATOR: Migrator = sqlx::migrate!("./src/db/migrations");

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR.run(pool).await.context("failed to apply chat schema migrations")
}
