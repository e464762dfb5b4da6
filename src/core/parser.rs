//! Response validation for raw model output

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use thiserror::Error;

use crate::core::models::{
    BaseForm, ExamplePair, ParsedFields, UnitKind, WordEntry, WordTranslation,
};

/// A single reason a response was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not parseable as JSON after fence stripping
    #[error("response is not valid JSON: {message}")]
    InvalidJson { message: String },

    /// Required field absent
    #[error("missing field `{path}`")]
    MissingField { path: String },

    /// Field present with the wrong JSON type
    #[error("field `{path}` must be {expected}")]
    WrongType { path: String, expected: &'static str },

    /// Required text field is blank
    #[error("field `{path}` is empty")]
    EmptyField { path: String },

    /// Example has no `|span|` marking the inflected form
    #[error("field `{path}` has no |delimited| span")]
    MissingDelimiter { path: String },
}

/// Fields plus non-fatal notes from a successful parse
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    /// Validated payload
    pub fields: ParsedFields,
    /// Non-fatal notes, e.g. one-sided examples
    pub warnings: Vec<String>,
    /// Document with fences stripped, as stored in the journal
    pub document: Value,
}

/// Validates raw text against the expected response shape
#[derive(Debug, Clone, Copy)]
pub struct ResponseParser {
    kind: UnitKind,
}

fn delimiter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\|([^|]+)\|").expect("static regex is valid"))
}

/// Replace `|span|` with `<em>span</em>`
pub fn mark_inflections(text: &str) -> String {
    delimiter_pattern()
        .replace_all(text, "<em>$1</em>")
        .into_owned()
}

impl ResponseParser {
    /// Parser for one unit kind
    pub fn new(kind: UnitKind) -> Self {
        Self { kind }
    }

    /// Parse and validate, collecting every problem found
    pub fn parse(&self, raw: &str) -> Result<Parsed, Vec<ParseError>> {
        let body = strip_code_fence(raw.trim());
        let document: Value = serde_json::from_str(body).map_err(|e| {
            vec![ParseError::InvalidJson {
                message: e.to_string(),
            }]
        })?;

        let Some(object) = document.as_object() else {
            return Err(vec![ParseError::WrongType {
                path: "$".into(),
                expected: "an object",
            }]);
        };

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let fields = match self.kind {
            UnitKind::Sentence => parse_sentence(object, &mut errors),
            UnitKind::Word => parse_word(object, &mut errors, &mut warnings),
        };

        match fields {
            Some(fields) if errors.is_empty() => Ok(Parsed {
                fields,
                warnings,
                document,
            }),
            _ => Err(errors),
        }
    }
}

/// Models like to wrap JSON in ```json fences
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn required_string(
    object: &Map<String, Value>,
    key: &str,
    path: &str,
    errors: &mut Vec<ParseError>,
) -> Option<String> {
    match object.get(key) {
        None | Some(Value::Null) => {
            errors.push(ParseError::MissingField { path: path.into() });
            None
        }
        Some(Value::String(s)) if s.trim().is_empty() => {
            errors.push(ParseError::EmptyField { path: path.into() });
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push(ParseError::WrongType {
                path: path.into(),
                expected: "a string",
            });
            None
        }
    }
}

fn optional_string(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

fn parse_sentence(
    object: &Map<String, Value>,
    errors: &mut Vec<ParseError>,
) -> Option<ParsedFields> {
    let original = required_string(object, "original", "original", errors);
    let translated = required_string(object, "translated", "translated", errors);
    Some(ParsedFields::Sentence {
        original: original?,
        translated: translated?,
    })
}

fn parse_word(
    object: &Map<String, Value>,
    errors: &mut Vec<ParseError>,
    warnings: &mut Vec<String>,
) -> Option<ParsedFields> {
    let info = match object.get("word_info") {
        Some(Value::Object(info)) => Some(info),
        None | Some(Value::Null) => {
            errors.push(ParseError::MissingField {
                path: "word_info".into(),
            });
            None
        }
        Some(_) => {
            errors.push(ParseError::WrongType {
                path: "word_info".into(),
                expected: "an object",
            });
            None
        }
    };

    let translations = match object.get("translations") {
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| parse_translation(i, item, errors, warnings))
                .collect::<Vec<_>>(),
        ),
        None | Some(Value::Null) => {
            errors.push(ParseError::MissingField {
                path: "translations".into(),
            });
            None
        }
        Some(_) => {
            errors.push(ParseError::WrongType {
                path: "translations".into(),
                expected: "an array",
            });
            None
        }
    };

    let info = info?;
    let base_form = match info.get("base_form") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(BaseForm::Scalar(s.clone())),
        Some(Value::String(_)) => {
            errors.push(ParseError::EmptyField {
                path: "word_info.base_form".into(),
            });
            None
        }
        Some(Value::Object(map)) => Some(BaseForm::Structured(map.clone())),
        None | Some(Value::Null) => {
            errors.push(ParseError::MissingField {
                path: "word_info.base_form".into(),
            });
            None
        }
        Some(_) => {
            errors.push(ParseError::WrongType {
                path: "word_info.base_form".into(),
                expected: "a string or an object",
            });
            None
        }
    };
    let definition = required_string(info, "definition", "word_info.definition", errors);
    let additional_info = match info.get("additional_info") {
        Some(value) => Some(value.clone()),
        None => {
            errors.push(ParseError::MissingField {
                path: "word_info.additional_info".into(),
            });
            None
        }
    };

    Some(ParsedFields::Word(WordEntry {
        base_form: base_form?,
        definition: definition?,
        additional_info: additional_info?,
        translations: translations?,
    }))
}

fn parse_translation(
    index: usize,
    item: &Value,
    errors: &mut Vec<ParseError>,
    warnings: &mut Vec<String>,
) -> Option<WordTranslation> {
    let path = format!("translations[{}]", index);
    let Some(object) = item.as_object() else {
        errors.push(ParseError::WrongType {
            path,
            expected: "an object",
        });
        return None;
    };

    let meaning = required_string(object, "meaning", &format!("{}.meaning", path), errors);

    let mut examples = Vec::new();
    match object.get("examples") {
        Some(Value::Array(items)) => {
            for (j, example) in items.iter().enumerate() {
                let example_path = format!("{}.examples[{}]", path, j);
                if let Some(pair) = parse_example(&example_path, example, errors, warnings) {
                    examples.push(pair);
                }
            }
        }
        None | Some(Value::Null) => {}
        Some(_) => errors.push(ParseError::WrongType {
            path: format!("{}.examples", path),
            expected: "an array",
        }),
    }

    Some(WordTranslation {
        meaning: meaning?,
        additional_info: optional_string(object, "additionalInfo"),
        meta_type: optional_string(object, "type"),
        examples,
    })
}

fn parse_example(
    path: &str,
    example: &Value,
    errors: &mut Vec<ParseError>,
    warnings: &mut Vec<String>,
) -> Option<ExamplePair> {
    let Some(object) = example.as_object() else {
        errors.push(ParseError::WrongType {
            path: path.to_string(),
            expected: "an object",
        });
        return None;
    };

    let source = checked_example_side(object, "source", path, errors);
    let target = checked_example_side(object, "target", path, errors);

    match (source?, target?) {
        (Some(source), Some(target)) => Some(ExamplePair {
            source: mark_inflections(&source),
            target: mark_inflections(&target),
        }),
        _ => {
            warnings.push(format!("{} skipped: needs both source and target", path));
            None
        }
    }
}

/// `Some(None)` when the side is absent, `None` when it is invalid
fn checked_example_side(
    object: &Map<String, Value>,
    key: &str,
    path: &str,
    errors: &mut Vec<ParseError>,
) -> Option<Option<String>> {
    let side_path = format!("{}.{}", path, key);
    match object.get(key) {
        None | Some(Value::Null) => Some(None),
        Some(Value::String(s)) if s.trim().is_empty() => Some(None),
        Some(Value::String(s)) => {
            if delimiter_pattern().is_match(s) {
                Some(Some(s.clone()))
            } else {
                errors.push(ParseError::MissingDelimiter { path: side_path });
                None
            }
        }
        Some(_) => {
            errors.push(ParseError::WrongType {
                path: side_path,
                expected: "a string",
            });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HAUS: &str = r#"{"word_info":{"base_form":"Haus","definition":"d","additional_info":{}},"translations":[{"meaning":"house","examples":[{"source":"|Haus|","target":"|house|"}]}]}"#;

    fn word_entry(parsed: Parsed) -> WordEntry {
        match parsed.fields {
            ParsedFields::Word(entry) => entry,
            other => panic!("expected word, got {:?}", other),
        }
    }

    #[test]
    fn test_haus_scenario() {
        let parsed = ResponseParser::new(UnitKind::Word).parse(HAUS).unwrap();
        let entry = word_entry(parsed);

        assert_eq!(entry.base_form.canonical(), "Haus");
        assert_eq!(entry.translations.len(), 1);
        assert_eq!(entry.translations[0].meaning, "house");
        assert_eq!(
            entry.translations[0].examples,
            vec![ExamplePair {
                source: "<em>Haus</em>".into(),
                target: "<em>house</em>".into(),
            }]
        );
    }

    #[test]
    fn test_example_without_delimiter_is_rejected() {
        let raw = HAUS.replace("|house|", "house");
        let errors = ResponseParser::new(UnitKind::Word).parse(&raw).unwrap_err();
        assert_eq!(
            errors,
            vec![ParseError::MissingDelimiter {
                path: "translations[0].examples[0].target".into()
            }]
        );
    }

    #[test]
    fn test_structured_base_form() {
        let raw = r#"{"word_info":{"base_form":{"infinitive":"gehen","form":"ging"},"definition":"to go","additional_info":null},"translations":[]}"#;
        let entry = word_entry(ResponseParser::new(UnitKind::Word).parse(raw).unwrap());
        assert_eq!(entry.base_form.canonical(), "gehen");
        assert_eq!(entry.primary_type(), "form/infinitive");
    }

    #[test]
    fn test_collects_all_missing_fields() {
        let raw = r#"{"word_info":{"definition":"d"},"translations":[{"examples":[]}]}"#;
        let errors = ResponseParser::new(UnitKind::Word).parse(raw).unwrap_err();

        assert!(errors.contains(&ParseError::MissingField {
            path: "word_info.base_form".into()
        }));
        assert!(errors.contains(&ParseError::MissingField {
            path: "word_info.additional_info".into()
        }));
        assert!(errors.contains(&ParseError::MissingField {
            path: "translations[0].meaning".into()
        }));
    }

    #[test]
    fn test_one_sided_example_is_dropped_with_warning() {
        let raw = HAUS.replace(r#","target":"|house|""#, "");
        let parsed = ResponseParser::new(UnitKind::Word).parse(&raw).unwrap();
        assert_eq!(parsed.warnings.len(), 1);
        assert!(word_entry(parsed).translations[0].examples.is_empty());
    }

    #[test]
    fn test_sentence_shape() {
        let parser = ResponseParser::new(UnitKind::Sentence);
        let parsed = parser
            .parse("```json\n{\"original\":\"Hallo.\",\"translated\":\"Hello.\"}\n```")
            .unwrap();
        assert_eq!(
            parsed.fields,
            ParsedFields::Sentence {
                original: "Hallo.".into(),
                translated: "Hello.".into()
            }
        );

        let errors = parser.parse(r#"{"original":"Hallo.","translated":""}"#).unwrap_err();
        assert_eq!(
            errors,
            vec![ParseError::EmptyField {
                path: "translated".into()
            }]
        );
    }

    #[test]
    fn test_non_json_payload() {
        let errors = ResponseParser::new(UnitKind::Sentence)
            .parse("Sorry, I cannot help")
            .unwrap_err();
        assert!(matches!(errors[0], ParseError::InvalidJson { .. }));
    }

    #[test]
    fn test_mark_inflections() {
        assert_eq!(
            mark_inflections("Das |Haus| ist |groß|."),
            "Das <em>Haus</em> ist <em>groß</em>."
        );
    }
}
