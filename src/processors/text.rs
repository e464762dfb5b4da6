//! Plain-text unit extraction

use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{LanguagePair, TranslationUnit, UnitKind};

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\p{Alphabetic}+\b").expect("static regex is valid"))
}

fn sentence_end() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"[.!?…]+["'»«”“)]*\s+"#).expect("static regex is valid"))
}

fn paragraph_break() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\n\s*\n").expect("static regex is valid"))
}

/// Splits raw text into ordered translation units with stable keys
#[derive(Debug, Clone)]
pub struct UnitExtractor {
    language_pair: LanguagePair,
}

impl UnitExtractor {
    /// Extractor producing units for `language_pair`
    pub fn new(language_pair: LanguagePair) -> Self {
        Self { language_pair }
    }

    /// Unique lower-cased words, sorted
    pub fn extract_words(&self, text: &str) -> Vec<TranslationUnit> {
        let words: BTreeSet<String> = word_pattern()
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        words
            .iter()
            .map(|w| TranslationUnit::word(w, self.language_pair.clone()))
            .collect()
    }

    /// Sentences keyed `paragraph/sentence`, optionally prefixed by a group name
    pub fn extract_sentences(&self, text: &str, group_prefix: Option<&str>) -> Vec<TranslationUnit> {
        let mut units = Vec::new();
        let paragraphs = paragraph_break()
            .split(text)
            .map(str::trim)
            .filter(|p| !p.is_empty());

        for (p_index, paragraph) in paragraphs.enumerate() {
            let group = match group_prefix {
                Some(prefix) => format!("{}:{}", prefix, p_index + 1),
                None => (p_index + 1).to_string(),
            };
            for (s_index, sentence) in split_sentences(paragraph).into_iter().enumerate() {
                units.push(TranslationUnit::sentence(
                    &group,
                    s_index + 1,
                    sentence,
                    self.language_pair.clone(),
                ));
            }
        }
        units
    }

    /// Find `.txt` files below a directory, in path order
    pub fn find_text_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(TranslationError::FileError {
                path: dir.display().to_string(),
                message: "Not a directory".to_string(),
            });
        }

        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| p.is_file() && is_text_file(p))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Read a file or every text file in a directory and extract units
    pub async fn extract_from_path(&self, path: &Path, kind: UnitKind) -> Result<Vec<TranslationUnit>> {
        let files = if path.is_dir() {
            self.find_text_files(path)?
        } else {
            vec![path.to_path_buf()]
        };
        let multi = files.len() > 1;

        let mut combined = String::new();
        let mut units = Vec::new();
        for file in &files {
            let content = tokio::fs::read_to_string(file)
                .await
                .map_err(|e| TranslationError::FileError {
                    path: file.display().to_string(),
                    message: e.to_string(),
                })?;
            debug!("Read {} bytes from {}", content.len(), file.display());

            match kind {
                UnitKind::Word => {
                    combined.push_str(&content);
                    combined.push('\n');
                }
                UnitKind::Sentence => {
                    let prefix = multi.then(|| file_stem(file));
                    units.extend(self.extract_sentences(&content, prefix.as_deref()));
                }
            }
        }

        if kind == UnitKind::Word {
            units = self.extract_words(&combined);
        }
        info!(
            "Found {} {} unit(s) in {} file(s)",
            units.len(),
            kind,
            files.len()
        );
        Ok(units)
    }
}

fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in sentence_end().find_iter(paragraph) {
        push_sentence(&mut sentences, &paragraph[start..m.end()]);
        start = m.end();
    }
    push_sentence(&mut sentences, &paragraph[start..]);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, raw: &str) {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if !normalized.is_empty() {
        sentences.push(normalized);
    }
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            ext == "txt" || ext == "text"
        })
        .unwrap_or(false)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> UnitExtractor {
        UnitExtractor::new(LanguagePair::default())
    }

    #[test]
    fn test_extract_words_unique_and_sorted() {
        let units = extractor().extract_words("Das Haus, das HAUS und die Straße. 42 Bäume!");
        let ids: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["bäume", "das", "die", "haus", "straße", "und"]);
        assert!(units.iter().all(|u| u.kind == UnitKind::Word));
    }

    #[test]
    fn test_extract_sentences_ids() {
        let text = "Es war einmal ein Haus. Es stand am Wald!\n\n  Dann kam der Winter?  Ja.";
        let units = extractor().extract_sentences(text, None);
        let ids: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["1/1", "1/2", "2/1", "2/2"]);
        assert_eq!(units[1].source_text, "Es stand am Wald!");
        assert_eq!(units[3].source_text, "Ja.");
    }

    #[test]
    fn test_sentence_group_prefix() {
        let units = extractor().extract_sentences("Eins. Zwei.", Some("chapter1"));
        assert_eq!(units[1].id.as_str(), "chapter1:1/2");
    }

    #[tokio::test]
    async fn test_extract_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "Haus Baum").unwrap();
        std::fs::write(dir.path().join("b.txt"), "Baum Auto").unwrap();
        std::fs::write(dir.path().join("notes.md"), "Ignoriert").unwrap();

        let units = extractor()
            .extract_from_path(dir.path(), UnitKind::Word)
            .await
            .unwrap();
        let ids: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["auto", "baum", "haus"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_file_error() {
        let err = extractor()
            .extract_from_path(Path::new("/definitely/not/here.txt"), UnitKind::Word)
            .await
            .unwrap_err();
        assert!(matches!(err, TranslationError::FileError { .. }));
    }
}
