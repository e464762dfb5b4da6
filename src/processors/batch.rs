//! Offline batch path: JSONL request files out, JSONL response files in
//!
//! Request lines are `{"request": <generateContent body>}`. Response lines
//! echo the request next to a `response` body (and an optional `status`
//! string that is non-empty when the row failed upstream).

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::checkpoint::OutputPaths;
use crate::core::errors::{Result, TranslationError};
use crate::core::models::{
    FailureRecord, IngestStats, LanguagePair, TranslationRecord, TranslationUnit, UnitKind,
};
use crate::core::parser::ResponseParser;
use crate::core::prompt::{response_text, GenerationSettings, PromptTemplate};
use crate::core::store::{write_atomic, ArtifactStore};

/// Where ingestion writes its artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutputs {
    /// SQL, journal and error log
    pub artifacts: OutputPaths,
    /// Request lines for units that need resubmitting
    pub retry_file: PathBuf,
}

impl IngestOutputs {
    /// Standard file names under `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            artifacts: OutputPaths::in_dir(dir),
            retry_file: dir.join("batch_retry_requests.jsonl"),
        }
    }
}

/// Builds batch request files and ingests their responses
#[derive(Debug, Clone)]
pub struct BatchJobCoordinator {
    template: PromptTemplate,
    parser: ResponseParser,
    language_pair: LanguagePair,
    model: String,
}

/// How one response line ended
enum LineOutcome {
    Success(TranslationRecord),
    Failure {
        unit: TranslationUnit,
        failure: FailureRecord,
    },
    Unrecoverable(String),
}

impl BatchJobCoordinator {
    /// Coordinator for one unit kind and model
    pub fn new(
        kind: UnitKind,
        language_pair: LanguagePair,
        model: impl Into<String>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            template: PromptTemplate::new(kind, settings),
            parser: ResponseParser::new(kind),
            language_pair,
            model: model.into(),
        }
    }

    fn request_line(&self, unit: &TranslationUnit) -> String {
        json!({ "request": self.template.request_body(unit) }).to_string()
    }

    fn render_lines(&self, units: &[TranslationUnit]) -> String {
        units
            .iter()
            .map(|unit| format!("{}\n", self.request_line(unit)))
            .collect()
    }

    /// Write one self-contained request per unit; no network call is made
    pub async fn build_batch_file(&self, units: &[TranslationUnit], path: &Path) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        write_atomic(path, self.render_lines(units)).await?;
        info!(
            "Wrote {} batch request(s) for {} to {}",
            units.len(),
            self.language_pair,
            path.display()
        );
        Ok(path.to_path_buf())
    }

    /// Parse a response file into SQL artifacts and a retry file for failures
    pub async fn ingest_response_file(
        &self,
        path: &Path,
        outputs: &IngestOutputs,
    ) -> Result<IngestStats> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TranslationError::FileError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        if let Some(dir) = outputs.artifacts.dir() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }

        let store = ArtifactStore::new();
        let mut stats = IngestStats::default();
        let mut retry_units = Vec::new();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            stats.total += 1;

            match self.ingest_line(line) {
                LineOutcome::Success(record) => {
                    for warning in &record.parse_warnings {
                        warn!(unit = %record.unit_id, "{}", warning);
                    }
                    if store.record(&record) {
                        stats.successful += 1;
                    } else {
                        warn!(unit = %record.unit_id, "Duplicate response line ignored");
                        stats.duplicates += 1;
                    }
                }
                LineOutcome::Failure { unit, failure } => {
                    if store.record_failure(&failure) {
                        warn!(unit = %unit.id, "Batch response rejected: {}", failure.reason);
                        retry_units.push(unit);
                        stats.failed += 1;
                    } else {
                        warn!(unit = %unit.id, "Duplicate response line ignored");
                        stats.duplicates += 1;
                    }
                }
                LineOutcome::Unrecoverable(reason) => {
                    warn!("Line {} of {} skipped: {}", index + 1, path.display(), reason);
                    stats.failed += 1;
                }
            }
        }

        store.flush(&outputs.artifacts.sql).await?;
        store.flush_journal(&outputs.artifacts.journal).await?;
        store.flush_error_log(&outputs.artifacts.error_log).await?;

        if retry_units.is_empty() {
            if tokio::fs::try_exists(&outputs.retry_file).await.unwrap_or(false) {
                tokio::fs::remove_file(&outputs.retry_file).await?;
            }
        } else {
            write_atomic(&outputs.retry_file, self.render_lines(&retry_units)).await?;
            stats.retry_file = Some(outputs.retry_file.clone());
        }

        info!(
            "Ingested {}: {} total, {} successful, {} failed, {} duplicate",
            path.display(),
            stats.total,
            stats.successful,
            stats.failed,
            stats.duplicates
        );
        Ok(stats)
    }

    fn ingest_line(&self, line: &str) -> LineOutcome {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => return LineOutcome::Unrecoverable(format!("not JSON: {}", e)),
        };
        let Some(request) = value.get("request") else {
            return LineOutcome::Unrecoverable("no embedded request".to_string());
        };
        let Some(unit) = self.template.recover_unit(request, &self.language_pair) else {
            return LineOutcome::Unrecoverable("no <unit> marker in request".to_string());
        };

        let upstream_status = value
            .get("status")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        let raw = value.get("response").and_then(response_text);

        let reason = match (upstream_status, raw.as_deref()) {
            (Some(status), _) => format!("upstream status: {}", status),
            (None, None) => "response has no candidate text".to_string(),
            (None, Some(raw)) if raw.trim().is_empty() => {
                TranslationError::EmptyResponseError {
                    model: self.model.clone(),
                }
                .to_string()
            }
            (None, Some(raw)) => match self.parser.parse(raw) {
                Ok(parsed) => {
                    return LineOutcome::Success(TranslationRecord {
                        unit_id: unit.id,
                        fields: parsed.fields,
                        source_model: self.model.clone(),
                        parse_warnings: parsed.warnings,
                        response_data: parsed.document,
                    })
                }
                Err(errors) => TranslationError::ValidationError { errors }.to_string(),
            },
        };

        LineOutcome::Failure {
            failure: FailureRecord {
                unit_id: unit.id.clone(),
                kind: unit.kind,
                reason,
                last_raw_output: raw,
            },
            unit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ParsedFields;

    fn coordinator() -> BatchJobCoordinator {
        BatchJobCoordinator::new(
            UnitKind::Word,
            LanguagePair::default(),
            "batch-model",
            GenerationSettings::default(),
        )
    }

    fn word_payload(word: &str) -> String {
        json!({
            "word_info": {"base_form": word, "definition": "d", "additional_info": {}},
            "translations": [{"meaning": "m", "examples": [{"source": format!("|{}|", word), "target": "|m|"}]}]
        })
        .to_string()
    }

    fn respond(request_line: &str, text: &str) -> String {
        let mut value: Value = serde_json::from_str(request_line).unwrap();
        value["response"] = json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]});
        value["status"] = json!("");
        value.to_string()
    }

    #[tokio::test]
    async fn test_build_writes_one_line_per_unit() {
        let dir = tempfile::tempdir().unwrap();
        let units = vec![
            TranslationUnit::word("haus", LanguagePair::default()),
            TranslationUnit::word("baum", LanguagePair::default()),
        ];
        let path = coordinator()
            .build_batch_file(&units, &dir.path().join("requests.jsonl"))
            .await
            .unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(
            first["request"]["contents"][0]["parts"][0]["text"],
            "de-en? <unit id=\"haus\">haus</unit>"
        );
    }

    #[tokio::test]
    async fn test_bad_line_goes_to_retry_file() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator();
        let haus = coordinator.request_line(&TranslationUnit::word("haus", LanguagePair::default()));
        let baum = coordinator.request_line(&TranslationUnit::word("baum", LanguagePair::default()));
        let responses = format!(
            "{}\n{}\n{}\n",
            respond(&haus, &word_payload("Haus")),
            respond(&baum, r#"{"word_info":{"base_form":"Baum","definition":"d","additional_info":{}},"translations":[{"meaning":"tree","examples":[{"source":"Baum","target":"|tree|"}]}]}"#),
            "{broken"
        );
        let input = dir.path().join("responses.jsonl");
        std::fs::write(&input, responses).unwrap();

        let outputs = IngestOutputs::in_dir(&dir.path().join("out"));
        let stats = coordinator.ingest_response_file(&input, &outputs).await.unwrap();

        assert_eq!(stats.total, 3);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.retry_file.as_deref(), Some(outputs.retry_file.as_path()));

        let retry = std::fs::read_to_string(&outputs.retry_file).unwrap();
        assert_eq!(retry, format!("{}\n", baum));

        let sql = std::fs::read_to_string(&outputs.artifacts.sql).unwrap();
        assert!(sql.contains("INSERT OR IGNORE INTO words (queried_word, error) VALUES ('baum'"));
    }

    #[tokio::test]
    async fn test_failing_line_after_success_is_not_resubmitted() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator();
        let haus = coordinator.request_line(&TranslationUnit::word("haus", LanguagePair::default()));
        let responses = format!(
            "{}\n{}\n",
            respond(&haus, &word_payload("Haus")),
            respond(&haus, "garbage")
        );
        let input = dir.path().join("responses.jsonl");
        std::fs::write(&input, responses).unwrap();

        let outputs = IngestOutputs::in_dir(&dir.path().join("out"));
        let stats = coordinator.ingest_response_file(&input, &outputs).await.unwrap();

        assert_eq!(stats.total, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.retry_file, None);
        assert!(!outputs.retry_file.exists());
        assert_eq!(std::fs::read_to_string(&outputs.artifacts.error_log).unwrap(), "");
    }

    #[tokio::test]
    async fn test_upstream_status_is_failure() {
        let coordinator = coordinator();
        let haus = coordinator.request_line(&TranslationUnit::word("haus", LanguagePair::default()));
        let mut value: Value = serde_json::from_str(&haus).unwrap();
        value["status"] = json!("RESOURCE_EXHAUSTED");

        match coordinator.ingest_line(&value.to_string()) {
            LineOutcome::Failure { unit, failure } => {
                assert_eq!(unit.id.as_str(), "haus");
                assert!(failure.reason.contains("RESOURCE_EXHAUSTED"));
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn test_sentence_line_recovers_id() {
        let coordinator = BatchJobCoordinator::new(
            UnitKind::Sentence,
            LanguagePair::default(),
            "batch-model",
            GenerationSettings::default(),
        );
        let unit = TranslationUnit::sentence("4", 2, "Guten Morgen.", LanguagePair::default());
        let line = respond(
            &coordinator.request_line(&unit),
            r#"{"original":"Guten Morgen.","translated":"Good morning."}"#,
        );

        match coordinator.ingest_line(&line) {
            LineOutcome::Success(record) => {
                assert_eq!(record.unit_id.as_str(), "4/2");
                assert!(matches!(record.fields, ParsedFields::Sentence { .. }));
            }
            _ => panic!("expected success"),
        }
    }
}
