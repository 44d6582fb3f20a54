// SPDX-FileCopyrightText: 2026 Charla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Schema migrations, embedded at build time.
//!
//! The SQL files under `migrations/` are compiled in via refinery's
//! `embed_migrations!` and applied on every database open. Refinery keeps
//! its own `refinery_schema_history` table, so reopening an up-to-date
//! database applies nothing.

use charla_core::CharlaError;
use tracing::debug;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Apply all pending migrations, returning how many ran.
pub fn run_migrations(conn: &mut rusqlite::Connection) -> Result<usize, CharlaError> {
    let report = embedded::migrations::runner()
        .run(conn)
        .map_err(|e| CharlaError::Storage {
            source: Box::new(e),
        })?;

    let applied = report.applied_migrations().len();
    if applied > 0 {
        debug!(applied, "schema migrations applied");
    }
    Ok(applied)
}
