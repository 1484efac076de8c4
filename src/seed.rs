//! First-boot schema application and seeding, plus the legacy-shape guard.
//!
//! A brand-new database file has no `config` table; we apply schema.sql,
//! seed.sql, cron_seed.sql and engine_bootstrap.sql in one shot. An existing
//! database that has a `config` table in the *old* two-column shape (no
//! `value_type`) is refused rather than silently migrated -- operators are
//! expected to stop the server, dump, drop, and reboot rather than rely on
//! an in-place migration path.

use crate::store::{Store, StoreError};
use log::info;
use rusqlite::OptionalExtension;
use thiserror::Error;

const SCHEMA_SQL: &str = include_str!("sql/schema.sql");
const SEED_SQL: &str = include_str!("sql/seed.sql");
const CRON_SEED_SQL: &str = include_str!("sql/cron_seed.sql");
const BOOTSTRAP_SQL: &str = include_str!("sql/engine_bootstrap.sql");

#[derive(Error, Debug)]
pub enum SeedError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(
        "found a pre-existing `config` table in the legacy shape (no value_type column); \
         back up and remove the database file before booting this version"
    )]
    LegacyShape,
}

/// Idempotent: safe to call on every boot. Applies schema/seed only the
/// first time a database is opened.
pub fn ensure_schema(store: &Store) -> Result<(), SeedError> {
    if config_table_exists(store)? {
        if config_table_is_legacy_shape(store)? {
            return Err(SeedError::LegacyShape);
        }
        info!("schema already present, skipping seed");
        return Ok(());
    }

    info!("no config table found, applying schema and seed data");
    store.execute_batch(SCHEMA_SQL)?;
    store.execute_batch(SEED_SQL)?;
    store.execute_batch(CRON_SEED_SQL)?;
    store.execute_batch(BOOTSTRAP_SQL)?;
    Ok(())
}

fn config_table_exists(store: &Store) -> Result<bool, StoreError> {
    let exists: Option<String> = store
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'config'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

fn config_table_is_legacy_shape(store: &Store) -> Result<bool, StoreError> {
    let mut stmt = store.prepare("PRAGMA table_info(config)")?;
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;
    Ok(!columns.iter().any(|c| c == "value_type"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_seeds_cleanly() {
        let store = Store::open_in_memory().unwrap();
        ensure_schema(&store).unwrap();
        let sector_count: i64 = store
            .query_row("SELECT COUNT(*) FROM sectors", [], |r| r.get(0))
            .unwrap();
        assert!(sector_count >= 14);
        let cron_count: i64 = store
            .query_row("SELECT COUNT(*) FROM cron_tasks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(cron_count, 25);
    }

    #[test]
    fn second_call_is_a_noop() {
        let store = Store::open_in_memory().unwrap();
        ensure_schema(&store).unwrap();
        ensure_schema(&store).unwrap();
        let sector_count: i64 = store
            .query_row("SELECT COUNT(*) FROM sectors", [], |r| r.get(0))
            .unwrap();
        assert!(sector_count >= 14);
    }

    #[test]
    fn legacy_config_shape_is_refused() {
        let store = Store::open_in_memory().unwrap();
        store
            .execute_batch("CREATE TABLE config (key TEXT PRIMARY KEY, value TEXT NOT NULL);")
            .unwrap();
        let err = ensure_schema(&store).unwrap_err();
        assert!(matches!(err, SeedError::LegacyShape));
    }
}
