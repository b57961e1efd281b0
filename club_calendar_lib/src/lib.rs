#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::missing_errors_doc)]

pub mod calendar_sync;
pub mod club_cli_opts;
pub mod config;
pub mod errors;
pub mod models;
pub mod pgpool;
pub mod timezone;

use refinery::embed_migrations;

embed_migrations!("migrations");

use crate::{errors::SyncError, pgpool::PgPool};

/// Apply pending schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), SyncError> {
    let mut conn = pool.get().await?;
    migrations::runner().run_async(&mut **conn).await?;
    Ok(())
}
