//! Append-only SQL artifact buffer
//!
//! Statements are buffered rather than executed, so child rows reference
//! their parents through natural-key sub-selects instead of captured ids.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{
    FailureRecord, ParsedFields, TranslationRecord, UnitId, UnitKind, WordEntry,
};

/// Idempotent schema emitted at the top of every SQL artifact
pub const SCHEMA_SQL: &str = "\
PRAGMA foreign_keys = ON;
CREATE TABLE IF NOT EXISTS words (
    word_id INTEGER PRIMARY KEY,
    queried_word TEXT NOT NULL UNIQUE,
    base_form TEXT,
    base_form_json JSON,
    primary_type TEXT,
    definition TEXT,
    info_json JSON,
    source_model TEXT,
    error TEXT
);
CREATE TABLE IF NOT EXISTS word_translations (
    translation_id INTEGER PRIMARY KEY,
    word_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    meaning TEXT NOT NULL,
    additional_info TEXT,
    meta_type TEXT,
    UNIQUE(word_id, position),
    FOREIGN KEY (word_id) REFERENCES words(word_id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS translation_examples (
    example_id INTEGER PRIMARY KEY,
    translation_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    source_text TEXT NOT NULL,
    target_text TEXT NOT NULL,
    UNIQUE(translation_id, position),
    FOREIGN KEY (translation_id) REFERENCES word_translations(translation_id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS sentences (
    sentence_id INTEGER PRIMARY KEY,
    unit_id TEXT NOT NULL UNIQUE,
    original TEXT,
    translated TEXT,
    source_model TEXT,
    error TEXT
);
CREATE INDEX IF NOT EXISTS idx_word_translations_word_id ON word_translations(word_id);
CREATE INDEX IF NOT EXISTS idx_translation_examples_translation_id ON translation_examples(translation_id);
";

/// Quote a value as an SQL string literal
pub fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn sql_opt(value: Option<&str>) -> String {
    value.map(sql_quote).unwrap_or_else(|| "NULL".to_string())
}

#[derive(Debug, Default)]
struct Buffers {
    recorded: HashSet<UnitId>,
    statements: Vec<String>,
    journal: Vec<String>,
    failures: Vec<FailureRecord>,
}

/// Point-in-time copy of everything buffered
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactSnapshot {
    /// SQL statements in record order
    pub statements: Vec<String>,
    /// Accepted response documents, one JSON line each
    pub journal: Vec<String>,
    /// Terminal failures in record order
    pub failures: Vec<FailureRecord>,
}

impl ArtifactSnapshot {
    /// Full SQL artifact: schema, then every buffered statement
    pub fn sql(&self) -> String {
        let mut out = String::with_capacity(SCHEMA_SQL.len() + self.statements.len() * 128);
        out.push_str(SCHEMA_SQL);
        out.push('\n');
        for statement in &self.statements {
            out.push_str(statement);
            out.push('\n');
        }
        out
    }

    /// Successful responses, one JSON object per line
    pub fn journal(&self) -> String {
        self.journal.iter().map(|line| format!("{}\n", line)).collect()
    }

    /// Human-readable failure report
    pub fn error_log(&self) -> String {
        let mut out = String::new();
        for failure in &self.failures {
            out.push_str(&format!("Unit: {} ({})\n", failure.unit_id, failure.kind));
            out.push_str(&format!("Reason: {}\n", failure.reason));
            if let Some(raw) = &failure.last_raw_output {
                out.push_str(&format!("Raw Output:\n{}\n", raw));
            }
            out.push_str(&"-".repeat(30));
            out.push('\n');
        }
        out
    }
}

/// Accumulates terminal records as SQL statements
#[derive(Debug, Default)]
pub struct ArtifactStore {
    buffers: Mutex<Buffers>,
}

impl ArtifactStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Buffers> {
        // Appends never panic mid-update, so a poisoned buffer is still consistent
        self.buffers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append statements for a successful record; `false` if the unit was already recorded
    pub fn record(&self, record: &TranslationRecord) -> bool {
        let statements = match &record.fields {
            ParsedFields::Sentence {
                original,
                translated,
            } => vec![sentence_upsert(
                &record.unit_id,
                original,
                translated,
                &record.source_model,
            )],
            ParsedFields::Word(entry) => word_statements(&record.unit_id, entry, &record.source_model),
        };
        let journal_line = serde_json::json!({
            "unit_id": record.unit_id,
            "model": record.source_model,
            "timestamp": chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            "response_data": record.response_data,
        })
        .to_string();

        let mut buffers = self.lock();
        if !buffers.recorded.insert(record.unit_id.clone()) {
            debug!(unit = %record.unit_id, "Ignoring duplicate record");
            return false;
        }
        buffers.statements.extend(statements);
        buffers.journal.push(journal_line);
        true
    }

    /// Append a null-payload row for a unit that could not be translated
    pub fn record_failure(&self, failure: &FailureRecord) -> bool {
        let statement = match failure.kind {
            UnitKind::Word => format!(
                "INSERT OR IGNORE INTO words (queried_word, error) VALUES ({}, {});",
                sql_quote(failure.unit_id.as_str()),
                sql_quote(&failure.reason)
            ),
            UnitKind::Sentence => format!(
                "INSERT OR IGNORE INTO sentences (unit_id, error) VALUES ({}, {});",
                sql_quote(failure.unit_id.as_str()),
                sql_quote(&failure.reason)
            ),
        };

        let mut buffers = self.lock();
        if !buffers.recorded.insert(failure.unit_id.clone()) {
            debug!(unit = %failure.unit_id, "Ignoring duplicate failure");
            return false;
        }
        buffers.statements.push(statement);
        buffers.failures.push(failure.clone());
        true
    }

    /// Number of units with a terminal record
    pub fn len(&self) -> usize {
        self.lock().recorded.len()
    }

    /// True before the first terminal record
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the buffers so they can be written without holding the lock
    pub fn snapshot(&self) -> ArtifactSnapshot {
        let buffers = self.lock();
        ArtifactSnapshot {
            statements: buffers.statements.clone(),
            journal: buffers.journal.clone(),
            failures: buffers.failures.clone(),
        }
    }

    /// Write the SQL artifact (schema + statements) in one replace
    pub async fn flush(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.snapshot().sql()).await
    }

    /// Write the successful-response journal
    pub async fn flush_journal(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.snapshot().journal()).await
    }

    /// Write the failure report
    pub async fn flush_error_log(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.snapshot().error_log()).await
    }
}

/// Write to a sibling temp file and rename it over `path`
pub async fn write_atomic(path: &Path, content: String) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| TranslationError::FileError {
            path: path.display().to_string(),
            message: "not a file path".to_string(),
        })?
        .to_string_lossy()
        .into_owned();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| TranslationError::FileError {
            path: tmp.display().to_string(),
            message: e.to_string(),
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| TranslationError::FileError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    Ok(())
}

fn sentence_upsert(unit_id: &UnitId, original: &str, translated: &str, model: &str) -> String {
    format!(
        "INSERT INTO sentences (unit_id, original, translated, source_model) VALUES ({}, {}, {}, {}) \
         ON CONFLICT(unit_id) DO UPDATE SET original = excluded.original, translated = excluded.translated, \
         source_model = excluded.source_model, error = NULL WHERE sentences.error IS NOT NULL;",
        sql_quote(unit_id.as_str()),
        sql_quote(original),
        sql_quote(translated),
        sql_quote(model)
    )
}

fn word_statements(unit_id: &UnitId, entry: &WordEntry, model: &str) -> Vec<String> {
    let queried = sql_quote(unit_id.as_str());
    let mut statements = vec![format!(
        "INSERT INTO words (queried_word, base_form, base_form_json, primary_type, definition, info_json, source_model) \
         VALUES ({}, {}, {}, {}, {}, {}, {}) \
         ON CONFLICT(queried_word) DO UPDATE SET base_form = excluded.base_form, base_form_json = excluded.base_form_json, \
         primary_type = excluded.primary_type, definition = excluded.definition, info_json = excluded.info_json, \
         source_model = excluded.source_model, error = NULL WHERE words.error IS NOT NULL;",
        queried,
        sql_quote(&entry.base_form.canonical()),
        sql_quote(&entry.base_form.to_json()),
        sql_quote(&entry.primary_type()),
        sql_quote(&entry.definition),
        sql_quote(&entry.additional_info.to_string()),
        sql_quote(model)
    )];

    let word_id = format!("(SELECT word_id FROM words WHERE queried_word = {})", queried);

    for (position, translation) in entry.translations.iter().enumerate() {
        statements.push(format!(
            "INSERT OR IGNORE INTO word_translations (word_id, position, meaning, additional_info, meta_type) \
             VALUES ({}, {}, {}, {}, {});",
            word_id,
            position,
            sql_quote(&translation.meaning),
            sql_opt(translation.additional_info.as_deref()),
            sql_opt(translation.meta_type.as_deref())
        ));

        let translation_id = format!(
            "(SELECT translation_id FROM word_translations WHERE word_id = {} AND position = {})",
            word_id, position
        );

        for (example_position, example) in translation.examples.iter().enumerate() {
            statements.push(format!(
                "INSERT OR IGNORE INTO translation_examples (translation_id, position, source_text, target_text) \
                 VALUES ({}, {}, {}, {});",
                translation_id,
                example_position,
                sql_quote(&example.source),
                sql_quote(&example.target)
            ));
        }
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{BaseForm, ExamplePair, WordTranslation};
    use serde_json::json;

    fn haus_record() -> TranslationRecord {
        TranslationRecord {
            unit_id: UnitId::word("haus"),
            fields: ParsedFields::Word(WordEntry {
                base_form: BaseForm::Scalar("Haus".into()),
                definition: "building".into(),
                additional_info: json!({"type": "noun"}),
                translations: vec![WordTranslation {
                    meaning: "house".into(),
                    additional_info: None,
                    meta_type: Some("noun".into()),
                    examples: vec![ExamplePair {
                        source: "<em>Haus</em>".into(),
                        target: "<em>house</em>".into(),
                    }],
                }],
            }),
            source_model: "primary".into(),
            parse_warnings: vec![],
            response_data: json!({}),
        }
    }

    #[test]
    fn test_word_record_emits_parent_children_and_examples() {
        let store = ArtifactStore::new();
        assert!(store.record(&haus_record()));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.statements.len(), 3);
        assert!(snapshot.statements[0].starts_with("INSERT INTO words"));
        assert!(snapshot.statements[1].contains("(SELECT word_id FROM words WHERE queried_word = 'haus')"));
        assert!(snapshot.statements[2].contains("'<em>Haus</em>'"));
        assert_eq!(snapshot.journal.len(), 1);
    }

    #[test]
    fn test_duplicate_unit_is_ignored() {
        let store = ArtifactStore::new();
        assert!(store.record(&haus_record()));
        assert!(!store.record(&haus_record()));
        assert!(!store.record_failure(&FailureRecord {
            unit_id: UnitId::word("haus"),
            kind: UnitKind::Word,
            reason: "late".into(),
            last_raw_output: None,
        }));

        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot().statements.len(), 3);
    }

    #[test]
    fn test_failure_row_has_null_payload() {
        let store = ArtifactStore::new();
        store.record_failure(&FailureRecord {
            unit_id: UnitId::sentence("1", 1),
            kind: UnitKind::Sentence,
            reason: "model's answer was empty".into(),
            last_raw_output: Some("".into()),
        });

        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.statements,
            vec!["INSERT OR IGNORE INTO sentences (unit_id, error) VALUES ('1/1', 'model''s answer was empty');"]
        );
        assert!(snapshot.error_log().contains("Unit: 1/1 (sentence)"));
    }

    #[tokio::test]
    async fn test_flush_starts_with_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inserts.sql");
        let store = ArtifactStore::new();
        store.record(&haus_record());

        store.flush(&path).await.unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("PRAGMA foreign_keys = ON;"));
        assert!(written.contains("CREATE TABLE IF NOT EXISTS words"));
        assert!(written.trim_end().ends_with(';'));
        assert!(!dir.path().join(".inserts.sql.tmp").exists());
    }

    #[test]
    fn test_generated_sql_applies_idempotently() {
        let store = ArtifactStore::new();
        store.record(&haus_record());
        store.record_failure(&FailureRecord {
            unit_id: UnitId::word("baum"),
            kind: UnitKind::Word,
            reason: "exhausted".into(),
            last_raw_output: None,
        });
        let sql = store.snapshot().sql();

        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(&sql).unwrap();
        conn.execute_batch(&sql).unwrap();

        let words: i64 = conn
            .query_row("SELECT COUNT(*) FROM words", [], |row| row.get(0))
            .unwrap();
        let examples: i64 = conn
            .query_row("SELECT COUNT(*) FROM translation_examples", [], |row| row.get(0))
            .unwrap();
        assert_eq!(words, 2);
        assert_eq!(examples, 1);
    }
}
