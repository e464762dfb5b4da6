//! Core data models for translation

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::core::errors::TranslationError;

/// What kind of text a unit carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// A single extracted word, keyed by its normalized form
    Word,
    /// A sentence, keyed by `group/sequence`
    Sentence,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Word => write!(f, "word"),
            UnitKind::Sentence => write!(f, "sentence"),
        }
    }
}

impl FromStr for UnitKind {
    type Err = TranslationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "word" | "words" => Ok(UnitKind::Word),
            "sentence" | "sentences" => Ok(UnitKind::Sentence),
            other => Err(TranslationError::InvalidFormat {
                format: format!("unit kind '{}'", other),
            }),
        }
    }
}

/// Source and target language, written `de-en`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LanguagePair {
    /// Source language code
    pub source: String,
    /// Target language code
    pub target: String,
}

impl LanguagePair {
    /// Pair from two language codes
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl Default for LanguagePair {
    fn default() -> Self {
        Self::new("de", "en")
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.target)
    }
}

impl FromStr for LanguagePair {
    type Err = TranslationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('-') {
            Some((source, target)) if !source.is_empty() && !target.is_empty() => {
                Ok(Self::new(source.to_lowercase(), target.to_lowercase()))
            }
            _ => Err(TranslationError::InvalidFormat {
                format: format!("language pair '{}' (expected e.g. de-en)", s),
            }),
        }
    }
}

/// Natural key of a unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    /// Key for an extracted word
    pub fn word(word: &str) -> Self {
        Self(word.trim().to_lowercase())
    }

    /// Key for the `sequence`-th sentence of `group`
    pub fn sentence(group: &str, sequence: usize) -> Self {
        Self(format!("{}/{}", group, sequence))
    }

    /// Wrap an already-formed key (e.g. recovered from a batch line)
    pub fn raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Key as stored in SQL
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One sentence or word scheduled for translation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationUnit {
    /// Stable key, unique within a run
    pub id: UnitId,
    /// Text sent to the model
    pub source_text: String,
    /// Languages to translate between
    pub language_pair: LanguagePair,
    /// Word or sentence
    pub kind: UnitKind,
}

impl TranslationUnit {
    /// Word unit keyed by its lowercased form
    pub fn word(word: &str, language_pair: LanguagePair) -> Self {
        let id = UnitId::word(word);
        Self {
            source_text: id.as_str().to_string(),
            id,
            language_pair,
            kind: UnitKind::Word,
        }
    }

    /// Sentence unit keyed by `group/sequence`
    pub fn sentence(
        group: &str,
        sequence: usize,
        text: impl Into<String>,
        language_pair: LanguagePair,
    ) -> Self {
        Self {
            id: UnitId::sentence(group, sequence),
            source_text: text.into(),
            language_pair,
            kind: UnitKind::Sentence,
        }
    }
}

/// `base_form` as the model returns it: a plain string or a keyed object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BaseForm {
    /// Plain headword
    Scalar(String),
    /// Keys such as `nominative` or `infinitive`, in document order
    Structured(Map<String, Value>),
}

impl BaseForm {
    /// Preferred keys when the base form is structured
    const PREFERRED_KEYS: [&'static str; 3] = ["nominative", "infinitive", "form"];

    /// Resolve to the single headword used for display
    pub fn canonical(&self) -> String {
        match self {
            BaseForm::Scalar(s) => s.clone(),
            BaseForm::Structured(map) => {
                for key in Self::PREFERRED_KEYS {
                    if let Some(value) = map.get(key) {
                        return value_as_text(value);
                    }
                }
                match map.values().next() {
                    Some(value) => value_as_text(value),
                    None => Value::Object(map.clone()).to_string(),
                }
            }
        }
    }

    /// JSON form stored in the `base_form_json` column
    pub fn to_json(&self) -> String {
        match self {
            BaseForm::Scalar(s) => Value::String(s.clone()).to_string(),
            BaseForm::Structured(map) => Value::Object(map.clone()).to_string(),
        }
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Example sentence pair with the inflected span already marked up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamplePair {
    /// Source-language sentence with `<em>` markup
    pub source: String,
    /// Translated sentence, same markup
    pub target: String,
}

/// One meaning of a word
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTranslation {
    /// Meaning in the target language
    pub meaning: String,
    /// Usage note for this meaning
    pub additional_info: Option<String>,
    /// Part of speech or register, when the model gives one
    pub meta_type: Option<String>,
    /// Example pairs for this meaning
    pub examples: Vec<ExamplePair>,
}

/// Validated word payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordEntry {
    /// Dictionary form
    pub base_form: BaseForm,
    /// Definition in the source language
    pub definition: String,
    /// Free-form grammar notes, stored as JSON
    pub additional_info: Value,
    /// At least one meaning
    pub translations: Vec<WordTranslation>,
}

impl WordEntry {
    /// Coarse word class used to group rows
    pub fn primary_type(&self) -> String {
        match &self.base_form {
            BaseForm::Structured(map) if !map.is_empty() => {
                let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
                keys.sort_unstable();
                keys.join("/")
            }
            BaseForm::Structured(_) => "unknown".to_string(),
            BaseForm::Scalar(_) => ["type", "usage"]
                .iter()
                .find_map(|key| self.additional_info.get(*key).and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

/// Validated payload of either shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum ParsedFields {
    /// Sentence and its translation
    Sentence { original: String, translated: String },
    /// Dictionary entry
    Word(WordEntry),
}

/// Terminal success for a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRecord {
    /// Unit this record belongs to
    pub unit_id: UnitId,
    /// Validated payload
    pub fields: ParsedFields,
    /// Model that produced the accepted response
    pub source_model: String,
    /// Non-fatal notes from the parser
    pub parse_warnings: Vec<String>,
    /// The JSON document the fields were parsed from
    pub response_data: Value,
}

/// Terminal failure for a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Unit this record belongs to
    pub unit_id: UnitId,
    /// Word or sentence
    pub kind: UnitKind,
    /// Exhaustion message plus the last error
    pub reason: String,
    /// Last raw response, if any call got that far
    pub last_raw_output: Option<String>,
}

/// How a single model call ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Response parsed and accepted
    Accepted,
    /// Model returned no text
    Empty,
    /// Response failed validation
    Invalid(String),
    /// Call failed before a response arrived
    Transport(String),
}

/// One call against one model, kept only for logging
#[derive(Debug, Clone)]
pub struct ModelAttempt {
    /// Unit this record belongs to
    pub unit_id: UnitId,
    /// Model that was called
    pub model: String,
    /// 1-based attempt number on this model
    pub attempt: u32,
    /// How the call ended
    pub outcome: AttemptOutcome,
    /// When the call finished
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Counts reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Units that reached a terminal record
    pub processed: usize,
    /// Units with a translation
    pub successful: usize,
    /// Units that exhausted every model
    pub failed: usize,
    /// Units filtered out because they already exist downstream
    pub skipped: usize,
    /// Completed checkpoint flushes, final flush included
    pub checkpoints: u64,
}

/// Counts reported by batch ingestion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Non-empty response lines read
    pub total: usize,
    /// Units with a translation
    pub successful: usize,
    /// Lines that failed, including lines with no recoverable unit
    pub failed: usize,
    /// Lines for a unit that already has a terminal record
    pub duplicates: usize,
    /// Set only when at least one unit needs resubmitting
    pub retry_file: Option<PathBuf>,
}
