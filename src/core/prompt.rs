//! Prompt rendering shared by the live gateway and the batch path
//!
//! Every prompt wraps the unit in `<unit id="...">...</unit>` so the unit can
//! be recovered from a request echoed back inside a batch response line.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::OnceLock;

use crate::core::models::{LanguagePair, TranslationUnit, UnitId, UnitKind};

/// Generation parameters sent with every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    /// Sampling temperature
    pub temperature: f32,
    /// Nucleus sampling cutoff
    pub top_p: f32,
    /// Response length cap
    pub max_output_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.95,
            max_output_tokens: 4096,
        }
    }
}

/// Safety categories relaxed so dictionary content is never blocked
const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HARASSMENT",
];

/// Unit text recovered from a rendered prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedUnit {
    /// Id from the `<unit>` marker
    pub id: UnitId,
    /// Unescaped unit text
    pub text: String,
}

/// Renders prompts and request bodies for one kind of unit
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    kind: UnitKind,
    settings: GenerationSettings,
}

impl PromptTemplate {
    /// Template for one unit kind
    pub fn new(kind: UnitKind, settings: GenerationSettings) -> Self {
        Self { kind, settings }
    }

    /// User prompt for a unit
    pub fn render(&self, unit: &TranslationUnit) -> String {
        let wrapped = wrap_unit(&unit.id, &unit.source_text);
        match self.kind {
            UnitKind::Word => format!("{}? {}", unit.language_pair, wrapped),
            UnitKind::Sentence => format!(
                "Translate from {} to {}. Reply with JSON {{\"original\", \"translated\"}}. {}",
                unit.language_pair.source, unit.language_pair.target, wrapped
            ),
        }
    }

    /// `generateContent` request body for a unit
    pub fn request_body(&self, unit: &TranslationUnit) -> Value {
        let safety: Vec<Value> = SAFETY_CATEGORIES
            .iter()
            .map(|category| json!({"category": category, "threshold": "BLOCK_NONE"}))
            .collect();

        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": self.render(unit) }]
            }],
            "generationConfig": {
                "temperature": self.settings.temperature,
                "topP": self.settings.top_p,
                "maxOutputTokens": self.settings.max_output_tokens,
                "responseMimeType": "application/json"
            },
            "safetySettings": safety
        })
    }

    /// Rebuild the unit a request body was rendered for
    pub fn recover_unit(&self, request: &Value, pair: &LanguagePair) -> Option<TranslationUnit> {
        let text = request_text(request)?;
        let embedded = extract_unit(&text)?;
        Some(TranslationUnit {
            id: embedded.id,
            source_text: embedded.text,
            language_pair: pair.clone(),
            kind: self.kind,
        })
    }
}

fn wrap_unit(id: &UnitId, text: &str) -> String {
    format!(
        "<unit id=\"{}\">{}</unit>",
        escape_markup(id.as_str()),
        escape_markup(text)
    )
}

/// Escape the characters that would end the id attribute or the element early
fn escape_markup(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape_markup(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&")
}

fn unit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)<unit id="([^"]*)">(.*?)</unit>"#).expect("static regex is valid")
    })
}

/// Locate the delimiter-wrapped unit inside prompt text
pub fn extract_unit(text: &str) -> Option<EmbeddedUnit> {
    let caps = unit_pattern().captures(text)?;
    Some(EmbeddedUnit {
        id: UnitId::raw(unescape_markup(&caps[1])),
        text: unescape_markup(&caps[2]),
    })
}

/// Concatenate every text part of the request's contents
fn request_text(request: &Value) -> Option<String> {
    let contents = request.get("contents")?.as_array()?;
    let text: String = contents
        .iter()
        .filter_map(|c| c.get("parts").and_then(Value::as_array))
        .flatten()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    Some(text)
}

/// Concatenate the text parts of the first candidate of a response body
pub fn response_text(response: &Value) -> Option<String> {
    let parts = response
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    Some(
        parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_include;

    #[test]
    fn test_word_prompt_wraps_unit() {
        let template = PromptTemplate::new(UnitKind::Word, GenerationSettings::default());
        let unit = TranslationUnit::word("haus", LanguagePair::default());
        assert_eq!(template.render(&unit), "de-en? <unit id=\"haus\">haus</unit>");
    }

    #[test]
    fn test_request_body_shape() {
        let template = PromptTemplate::new(UnitKind::Word, GenerationSettings::default());
        let unit = TranslationUnit::word("haus", LanguagePair::default());
        let body = template.request_body(&unit);

        assert_json_include!(
            actual: body,
            expected: json!({
                "contents": [{"role": "user", "parts": [{"text": "de-en? <unit id=\"haus\">haus</unit>"}]}],
                "generationConfig": {"maxOutputTokens": 4096}
            })
        );
    }

    #[test]
    fn test_recover_sentence_unit() {
        let template = PromptTemplate::new(UnitKind::Sentence, GenerationSettings::default());
        let pair = LanguagePair::new("de", "fr");
        let unit = TranslationUnit::sentence("2", 4, "Das ist\nein Haus.", pair.clone());

        let recovered = template
            .recover_unit(&template.request_body(&unit), &pair)
            .unwrap();
        assert_eq!(recovered, unit);
    }

    #[test]
    fn test_markup_in_text_and_id_round_trips() {
        let template = PromptTemplate::new(UnitKind::Sentence, GenerationSettings::default());
        let pair = LanguagePair::default();
        let unit = TranslationUnit::sentence(
            "kapitel \"eins\":1",
            1,
            "Er schrieb \"</unit>\" & <b>ging</b>.",
            pair.clone(),
        );

        let rendered = template.render(&unit);
        assert_eq!(rendered.matches("</unit>").count(), 1);

        let recovered = template
            .recover_unit(&template.request_body(&unit), &pair)
            .unwrap();
        assert_eq!(recovered, unit);
    }

    #[test]
    fn test_response_text_joins_parts() {
        let response = json!({
            "candidates": [{"content": {"parts": [{"text": "{\"a\":"}, {"text": "1}"}]}}]
        });
        assert_eq!(response_text(&response).as_deref(), Some("{\"a\":1}"));
        assert_eq!(response_text(&json!({"candidates": []})), None);
    }
}
