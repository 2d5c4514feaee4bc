//! Document extractors: document-in, document-out transforms run between
//! parsing and chunking.  An extractor failure is logged and skipped; the
//! pipeline proceeds with the unchanged documents.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::document::Document;
use lf_domain::config::ExtractorConfig;
use lf_domain::{Error, Result};

pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, docs: Vec<Document>) -> Result<Vec<Document>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Keyword extractor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeywordExtractorSettings {
    #[serde(default = "d_max_keywords")]
    pub max_keywords: usize,
    #[serde(default = "d_min_word_len")]
    pub min_word_length: usize,
}

fn d_max_keywords() -> usize {
    10
}

fn d_min_word_len() -> usize {
    4
}

impl Default for KeywordExtractorSettings {
    fn default() -> Self {
        Self {
            max_keywords: d_max_keywords(),
            min_word_length: d_min_word_len(),
        }
    }
}

/// Frequency-based keyword extraction into `metadata.keywords`.
pub struct KeywordExtractor {
    settings: KeywordExtractorSettings,
}

impl KeywordExtractor {
    pub fn new(settings: KeywordExtractorSettings) -> Self {
        Self { settings }
    }
}

const STOPWORDS: &[&str] = &[
    "that", "this", "with", "from", "have", "been", "were", "their", "which", "about",
    "would", "there", "these", "those", "other", "into", "more", "some", "such", "only",
];

impl Extractor for KeywordExtractor {
    fn name(&self) -> &'static str {
        "keywords"
    }

    fn extract(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        let out = docs
            .into_iter()
            .map(|mut doc| {
                let mut counts: HashMap<String, usize> = HashMap::new();
                for word in doc
                    .content
                    .split(|c: char| !c.is_alphanumeric())
                    .map(|w| w.to_lowercase())
                {
                    if word.len() >= self.settings.min_word_length
                        && !STOPWORDS.contains(&word.as_str())
                    {
                        *counts.entry(word).or_insert(0) += 1;
                    }
                }

                let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
                ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                let keywords: Vec<serde_json::Value> = ranked
                    .into_iter()
                    .take(self.settings.max_keywords)
                    .map(|(w, _)| w.into())
                    .collect();

                doc.metadata
                    .insert("keywords".into(), serde_json::Value::Array(keywords));
                doc
            })
            .collect();
        Ok(out)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Heading extractor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Collects markdown headings into `metadata.headings`.
#[derive(Default)]
pub struct HeadingExtractor;

impl Extractor for HeadingExtractor {
    fn name(&self) -> &'static str {
        "headings"
    }

    fn extract(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        let out = docs
            .into_iter()
            .map(|mut doc| {
                let headings: Vec<serde_json::Value> = doc
                    .content
                    .lines()
                    .filter_map(|line| {
                        let trimmed = line.trim_start();
                        let level = trimmed.bytes().take_while(|b| *b == b'#').count();
                        if level == 0 || level > 6 {
                            return None;
                        }
                        let title = trimmed[level..].trim();
                        if title.is_empty() {
                            return None;
                        }
                        Some(serde_json::json!({"level": level, "title": title}))
                    })
                    .collect();
                if !headings.is_empty() {
                    doc.metadata
                        .insert("headings".into(), serde_json::Value::Array(headings));
                }
                doc
            })
            .collect();
        Ok(out)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn build_extractor(entry: &ExtractorConfig) -> Result<Box<dyn Extractor>> {
    let config = entry.config.clone().unwrap_or(serde_json::Value::Null);
    match entry.kind.as_str() {
        "keywords" => {
            let settings = if config.is_null() {
                KeywordExtractorSettings::default()
            } else {
                serde_json::from_value(config)
                    .map_err(|e| Error::InvalidArgument(format!("invalid extractor config: {e}")))?
            };
            Ok(Box::new(KeywordExtractor::new(settings)))
        }
        "headings" => Ok(Box::new(HeadingExtractor)),
        other => Err(Error::InvalidArgument(format!(
            "no extractor implementation for type \"{other}\""
        ))),
    }
}

/// Run the strategy's extractors in order.  Per the pipeline contract a
/// failing extractor is logged and skipped, leaving the documents as they
/// were before it ran.
pub fn run_extractors(entries: &[ExtractorConfig], mut docs: Vec<Document>) -> Vec<Document> {
    for entry in entries {
        let extractor = match build_extractor(entry) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(extractor = %entry.kind, error = %e, "skipping unbuildable extractor");
                continue;
            }
        };
        match extractor.extract(docs.clone()) {
            Ok(transformed) => docs = transformed,
            Err(e) => {
                tracing::warn!(extractor = extractor.name(), error = %e,
                    "extractor failed; continuing with unchanged documents");
            }
        }
    }
    docs
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_extractor_ranks_by_frequency() {
        let doc = Document::new(
            "alpha alpha alpha bravo bravo charlie is a common word word word word",
            "t",
        );
        let extractor = KeywordExtractor::new(KeywordExtractorSettings {
            max_keywords: 2,
            min_word_length: 4,
        });
        let out = extractor.extract(vec![doc]).unwrap();
        let keywords = out[0].metadata["keywords"].as_array().unwrap();
        assert_eq!(keywords[0], "word");
        assert_eq!(keywords[1], "alpha");
    }

    #[test]
    fn keyword_extractor_skips_stopwords_and_short_words() {
        let doc = Document::new("that that that is is cat cat longword", "t");
        let extractor = KeywordExtractor::new(KeywordExtractorSettings::default());
        let out = extractor.extract(vec![doc]).unwrap();
        let keywords = out[0].metadata["keywords"].as_array().unwrap();
        assert!(!keywords.iter().any(|k| k == "that"));
        assert!(!keywords.iter().any(|k| k == "cat"));
        assert!(keywords.iter().any(|k| k == "longword"));
    }

    #[test]
    fn heading_extractor_collects_levels() {
        let doc = Document::new("# Top\ntext\n## Sub\n### Deep\nbody", "t");
        let out = HeadingExtractor.extract(vec![doc]).unwrap();
        let headings = out[0].metadata["headings"].as_array().unwrap();
        assert_eq!(headings.len(), 3);
        assert_eq!(headings[0]["level"], 1);
        assert_eq!(headings[0]["title"], "Top");
        assert_eq!(headings[2]["level"], 3);
    }

    #[test]
    fn heading_extractor_leaves_plain_docs_alone() {
        let doc = Document::new("no headings here", "t");
        let out = HeadingExtractor.extract(vec![doc]).unwrap();
        assert!(!out[0].metadata.contains_key("headings"));
    }

    #[test]
    fn unknown_extractor_kind_fails_build() {
        let entry = ExtractorConfig {
            kind: "sentiment".into(),
            config: None,
        };
        assert!(build_extractor(&entry).is_err());
    }

    #[test]
    fn run_extractors_skips_failures() {
        let entries = vec![
            ExtractorConfig {
                kind: "nonexistent".into(),
                config: None,
            },
            ExtractorConfig {
                kind: "headings".into(),
                config: None,
            },
        ];
        let docs = vec![Document::new("# H\nbody", "t")];
        let out = run_extractors(&entries, docs);
        // The bad entry was skipped; the good one still ran.
        assert!(out[0].metadata.contains_key("headings"));
    }
}
