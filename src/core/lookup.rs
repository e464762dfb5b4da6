//! Read-only "already processed" lookup consulted once per run

use rusqlite::{Connection, OpenFlags};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::errors::{Result, TranslationError};
use crate::core::models::TranslationUnit;

/// Source of natural keys that no longer need translating
pub trait ExistingUnitLookup: Send + Sync {
    /// Keys of units that already have a successful record
    fn existing_ids(&self) -> Result<HashSet<String>>;
}

/// Reads successful rows from a database built from earlier SQL artifacts
#[derive(Debug, Clone)]
pub struct SqliteLookup {
    path: PathBuf,
}

impl SqliteLookup {
    /// Lookup against the database at `path`; opened lazily
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

const EXISTING_QUERIES: [(&str, &str); 2] = [
    ("words", "SELECT DISTINCT lower(queried_word) FROM words WHERE error IS NULL"),
    ("sentences", "SELECT DISTINCT unit_id FROM sentences WHERE error IS NULL"),
];

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
}

fn sqlite_error(path: &Path, e: rusqlite::Error) -> TranslationError {
    TranslationError::FileError {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

impl ExistingUnitLookup for SqliteLookup {
    fn existing_ids(&self) -> Result<HashSet<String>> {
        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| sqlite_error(&self.path, e))?;

        let mut ids = HashSet::new();
        for (table, query) in EXISTING_QUERIES {
            if !table_exists(&conn, table).map_err(|e| sqlite_error(&self.path, e))? {
                continue;
            }
            let mut stmt = conn
                .prepare(query)
                .map_err(|e| sqlite_error(&self.path, e))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| sqlite_error(&self.path, e))?;
            for id in rows {
                ids.insert(id.map_err(|e| sqlite_error(&self.path, e))?);
            }
        }
        Ok(ids)
    }
}

/// Fixed set of ids, for callers that already know what exists
impl ExistingUnitLookup for HashSet<String> {
    fn existing_ids(&self) -> Result<HashSet<String>> {
        Ok(self.clone())
    }
}

/// Drop units the lookup already knows; a failing lookup keeps every unit
pub fn filter_new_units(
    units: Vec<TranslationUnit>,
    lookup: Option<&dyn ExistingUnitLookup>,
) -> (Vec<TranslationUnit>, usize) {
    let Some(lookup) = lookup else {
        return (units, 0);
    };

    match lookup.existing_ids() {
        Ok(existing) => {
            let total = units.len();
            let fresh: Vec<TranslationUnit> = units
                .into_iter()
                .filter(|u| !existing.contains(u.id.as_str()))
                .collect();
            let skipped = total - fresh.len();
            info!(
                "Identified {} new unit(s); {} already processed",
                fresh.len(),
                skipped
            );
            (fresh, skipped)
        }
        Err(e) => {
            warn!("Existence lookup failed ({}); treating all units as new", e);
            (units, 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::LanguagePair;

    fn words(list: &[&str]) -> Vec<TranslationUnit> {
        list.iter()
            .map(|w| TranslationUnit::word(w, LanguagePair::default()))
            .collect()
    }

    #[test]
    fn test_sqlite_lookup_ignores_failure_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(crate::core::store::SCHEMA_SQL).unwrap();
        conn.execute_batch(
            "INSERT INTO words (queried_word, base_form) VALUES ('haus', 'Haus');
             INSERT INTO words (queried_word, error) VALUES ('baum', 'exhausted');",
        )
        .unwrap();
        drop(conn);

        let (fresh, skipped) =
            filter_new_units(words(&["haus", "baum", "auto"]), Some(&SqliteLookup::new(&path)));
        assert_eq!(skipped, 1);
        let ids: Vec<&str> = fresh.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["baum", "auto"]);
    }

    #[test]
    fn test_missing_database_keeps_all_units() {
        let dir = tempfile::tempdir().unwrap();
        let lookup = SqliteLookup::new(dir.path().join("absent.db"));

        let (fresh, skipped) = filter_new_units(words(&["haus", "baum"]), Some(&lookup));
        assert_eq!(fresh.len(), 2);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn test_database_without_tables_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE other (x INTEGER);")
            .unwrap();

        assert!(SqliteLookup::new(&path).existing_ids().unwrap().is_empty());
    }
}
