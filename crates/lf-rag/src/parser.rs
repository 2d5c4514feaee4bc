//! File parsers: convert raw bytes into documents.
//!
//! Each parser kind has an explicit settings struct (unknown keys are
//! rejected when the merged config is deserialized).  Parser selection
//! walks the strategy's parser list in order and picks the first whose
//! patterns / extensions / MIME types match the file; no match fails that
//! file with `no-parser` and the dataset moves on.

use serde::{Deserialize, Serialize};

use crate::chunker::{ChunkSettings, ChunkStrategy};
use crate::document::Document;
use lf_domain::config::ParserConfig;
use lf_domain::{Error, Result};

/// Input handed to a parser.
#[derive(Debug, Clone)]
pub struct ParseInput {
    pub data: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

/// A file parser.  Parsers own their chunk settings so the pipeline can
/// chunk with the parser's merged configuration.
pub trait Parser: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn chunk_settings(&self) -> &ChunkSettings;
    fn parse(&self, input: &ParseInput) -> Result<Vec<Document>>;
}

fn d_chunk_size() -> usize {
    512
}

fn d_chunk_overlap() -> usize {
    50
}

fn d_true() -> bool {
    true
}

macro_rules! chunking_fields {
    ($settings:expr) => {
        ChunkSettings {
            chunk_size: $settings.chunk_size,
            chunk_overlap: $settings.chunk_overlap,
            chunk_strategy: $settings.chunk_strategy,
        }
    };
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Text parser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextParserSettings {
    #[serde(default = "d_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "d_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub chunk_strategy: ChunkStrategy,
    /// Strip trailing whitespace from each line.
    #[serde(default)]
    pub normalize_whitespace: bool,
}

impl Default for TextParserSettings {
    fn default() -> Self {
        Self {
            chunk_size: d_chunk_size(),
            chunk_overlap: d_chunk_overlap(),
            chunk_strategy: ChunkStrategy::default(),
            normalize_whitespace: false,
        }
    }
}

#[derive(Debug)]
pub struct TextParser {
    settings: TextParserSettings,
    chunking: ChunkSettings,
}

impl TextParser {
    pub fn new(settings: TextParserSettings) -> Self {
        let chunking = chunking_fields!(settings);
        Self { settings, chunking }
    }
}

impl Parser for TextParser {
    fn name(&self) -> &'static str {
        "text"
    }

    fn chunk_settings(&self) -> &ChunkSettings {
        &self.chunking
    }

    fn parse(&self, input: &ParseInput) -> Result<Vec<Document>> {
        let text = String::from_utf8_lossy(&input.data);
        let content = if self.settings.normalize_whitespace {
            text.lines()
                .map(str::trim_end)
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            text.into_owned()
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Document::new(content, &input.filename)
            .with_metadata("mime_type", input.mime_type.clone().into())])
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Markdown parser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkdownParserSettings {
    #[serde(default = "d_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "d_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub chunk_strategy: ChunkStrategy,
    /// Emit one document per top-level section instead of one per file.
    #[serde(default)]
    pub split_on_headings: bool,
}

impl Default for MarkdownParserSettings {
    fn default() -> Self {
        Self {
            chunk_size: d_chunk_size(),
            chunk_overlap: d_chunk_overlap(),
            chunk_strategy: ChunkStrategy::default(),
            split_on_headings: false,
        }
    }
}

#[derive(Debug)]
pub struct MarkdownParser {
    settings: MarkdownParserSettings,
    chunking: ChunkSettings,
}

impl MarkdownParser {
    pub fn new(settings: MarkdownParserSettings) -> Self {
        let chunking = chunking_fields!(settings);
        Self { settings, chunking }
    }
}

impl Parser for MarkdownParser {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn chunk_settings(&self) -> &ChunkSettings {
        &self.chunking
    }

    fn parse(&self, input: &ParseInput) -> Result<Vec<Document>> {
        let text = String::from_utf8_lossy(&input.data).into_owned();
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        if !self.settings.split_on_headings {
            return Ok(vec![Document::new(text, &input.filename)]);
        }

        // Section per `#`-level heading; preamble before the first heading
        // becomes its own document.
        let mut sections: Vec<(Option<String>, Vec<&str>)> = vec![(None, Vec::new())];
        for line in text.lines() {
            if let Some(title) = line.strip_prefix("# ") {
                sections.push((Some(title.trim().to_owned()), Vec::new()));
            } else {
                sections.last_mut().expect("never empty").1.push(line);
            }
        }

        let docs = sections
            .into_iter()
            .filter_map(|(title, lines)| {
                let body = lines.join("\n");
                let content = match &title {
                    Some(t) => format!("# {t}\n{body}"),
                    None => body,
                };
                if content.trim().is_empty() {
                    return None;
                }
                let mut doc = Document::new(content, &input.filename);
                if let Some(t) = title {
                    doc = doc.with_metadata("heading", t.into());
                }
                Some(doc)
            })
            .collect();
        Ok(docs)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CSV parser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsvParserSettings {
    #[serde(default = "d_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "d_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub chunk_strategy: ChunkStrategy,
    #[serde(default = "d_delimiter")]
    pub delimiter: char,
    #[serde(default = "d_true")]
    pub has_header: bool,
}

fn d_delimiter() -> char {
    ','
}

impl Default for CsvParserSettings {
    fn default() -> Self {
        Self {
            chunk_size: d_chunk_size(),
            chunk_overlap: d_chunk_overlap(),
            chunk_strategy: ChunkStrategy::default(),
            delimiter: d_delimiter(),
            has_header: true,
        }
    }
}

/// One document per row, rendered as `header: value` lines so the text is
/// embeddable.
#[derive(Debug)]
pub struct CsvParser {
    settings: CsvParserSettings,
    chunking: ChunkSettings,
}

impl CsvParser {
    pub fn new(settings: CsvParserSettings) -> Self {
        let chunking = chunking_fields!(settings);
        Self { settings, chunking }
    }
}

impl Parser for CsvParser {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn chunk_settings(&self) -> &ChunkSettings {
        &self.chunking
    }

    fn parse(&self, input: &ParseInput) -> Result<Vec<Document>> {
        let text = String::from_utf8_lossy(&input.data);
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());

        let header: Option<Vec<String>> = if self.settings.has_header {
            lines.next().map(|l| {
                l.split(self.settings.delimiter)
                    .map(|c| c.trim().to_owned())
                    .collect()
            })
        } else {
            None
        };

        let mut docs = Vec::new();
        for (row_idx, line) in lines.enumerate() {
            let cells: Vec<&str> = line.split(self.settings.delimiter).map(str::trim).collect();
            let content = match &header {
                Some(columns) => cells
                    .iter()
                    .enumerate()
                    .map(|(i, cell)| {
                        let col = columns.get(i).map(String::as_str).unwrap_or("column");
                        format!("{col}: {cell}")
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
                None => cells.join(" "),
            };
            docs.push(
                Document::new(content, &input.filename)
                    .with_metadata("row", serde_json::json!(row_idx)),
            );
        }
        Ok(docs)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Construction & selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build a parser from its kind and merged config.  Unknown config keys are
/// rejected by the settings structs; unknown kinds fail the file (which the
/// pipeline reports as `no-parser`).
pub fn build_parser(kind: &str, config: &serde_json::Value) -> Result<Box<dyn Parser>> {
    let parser: Box<dyn Parser> = match kind {
        "text" => Box::new(TextParser::new(from_config(config)?)),
        "markdown" => Box::new(MarkdownParser::new(from_config(config)?)),
        "csv" => Box::new(CsvParser::new(from_config(config)?)),
        other => {
            return Err(Error::InvalidArgument(format!(
                "no parser implementation for type \"{other}\""
            )));
        }
    };
    parser.chunk_settings().validate()?;
    Ok(parser)
}

fn from_config<T: serde::de::DeserializeOwned + Default>(config: &serde_json::Value) -> Result<T> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone())
        .map_err(|e| Error::InvalidArgument(format!("invalid parser config: {e}")))
}

/// Default filename patterns for parser kinds that declare none.
fn default_patterns(kind: &str) -> &'static [&'static str] {
    match kind {
        "text" => &["*.txt", "*.log"],
        "markdown" => &["*.md", "*.markdown"],
        "csv" => &["*.csv"],
        _ => &[],
    }
}

/// Default MIME types per kind.
fn default_mime_types(kind: &str) -> &'static [&'static str] {
    match kind {
        "text" => &["text/plain"],
        "markdown" => &["text/markdown"],
        "csv" => &["text/csv"],
        _ => &[],
    }
}

fn pattern_matches(pattern: &str, filename: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        filename
            .to_ascii_lowercase()
            .ends_with(&suffix.to_ascii_lowercase())
    } else {
        pattern.eq_ignore_ascii_case(filename)
    }
}

/// Pick the first parser entry matching the file, or `None`.
pub fn select_parser<'a>(
    parsers: &'a [ParserConfig],
    filename: &str,
    mime_type: &str,
) -> Option<&'a ParserConfig> {
    parsers.iter().find(|p| {
        let Some(kind) = p.kind.as_deref() else {
            return false;
        };

        let patterns: Vec<&str> = if p.patterns.is_empty() {
            default_patterns(kind).to_vec()
        } else {
            p.patterns.iter().map(String::as_str).collect()
        };
        if patterns.iter().any(|pat| pattern_matches(pat, filename)) {
            return true;
        }

        let mimes: Vec<&str> = if p.mime_types.is_empty() {
            default_mime_types(kind).to_vec()
        } else {
            p.mime_types.iter().map(String::as_str).collect()
        };
        mimes.iter().any(|m| m.eq_ignore_ascii_case(mime_type))
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(name: &str, mime: &str, data: &str) -> ParseInput {
        ParseInput {
            data: data.as_bytes().to_vec(),
            filename: name.to_owned(),
            mime_type: mime.to_owned(),
        }
    }

    fn parser_entry(kind: &str) -> ParserConfig {
        ParserConfig {
            kind: Some(kind.to_owned()),
            patterns: vec![],
            mime_types: vec![],
            config: None,
        }
    }

    // ── Text ────────────────────────────────────────────────────────

    #[test]
    fn text_parser_produces_one_document() {
        let parser = TextParser::new(TextParserSettings::default());
        let docs = parser
            .parse(&input("a.txt", "text/plain", "hello world"))
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "hello world");
        assert_eq!(docs[0].source, "a.txt");
    }

    #[test]
    fn text_parser_empty_file_yields_nothing() {
        let parser = TextParser::new(TextParserSettings::default());
        let docs = parser.parse(&input("a.txt", "text/plain", "  \n ")).unwrap();
        assert!(docs.is_empty());
    }

    // ── Markdown ────────────────────────────────────────────────────

    #[test]
    fn markdown_splits_on_headings() {
        let parser = MarkdownParser::new(MarkdownParserSettings {
            split_on_headings: true,
            ..Default::default()
        });
        let text = "intro text\n\n# First\nbody one\n\n# Second\nbody two";
        let docs = parser.parse(&input("a.md", "text/markdown", text)).unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[1].metadata["heading"], "First");
        assert!(docs[2].content.contains("body two"));
    }

    #[test]
    fn markdown_without_split_is_single_document() {
        let parser = MarkdownParser::new(MarkdownParserSettings::default());
        let docs = parser
            .parse(&input("a.md", "text/markdown", "# A\ntext"))
            .unwrap();
        assert_eq!(docs.len(), 1);
    }

    // ── CSV ─────────────────────────────────────────────────────────

    #[test]
    fn csv_with_header_renders_columns() {
        let parser = CsvParser::new(CsvParserSettings::default());
        let docs = parser
            .parse(&input("a.csv", "text/csv", "name,age\nalice,30\nbob,25"))
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].content, "name: alice\nage: 30");
        assert_eq!(docs[1].metadata["row"], 1);
    }

    #[test]
    fn csv_without_header_joins_cells() {
        let parser = CsvParser::new(CsvParserSettings {
            has_header: false,
            ..Default::default()
        });
        let docs = parser.parse(&input("a.csv", "text/csv", "alice,30")).unwrap();
        assert_eq!(docs[0].content, "alice 30");
    }

    // ── build_parser ────────────────────────────────────────────────

    #[test]
    fn build_parser_applies_config() {
        let parser =
            build_parser("text", &json!({"chunk_size": 128, "chunk_overlap": 16})).unwrap();
        assert_eq!(parser.chunk_settings().chunk_size, 128);
        assert_eq!(parser.chunk_settings().chunk_overlap, 16);
    }

    #[test]
    fn build_parser_rejects_unknown_keys() {
        let err = build_parser("text", &json!({"chunk_sizzle": 128})).unwrap_err();
        assert_eq!(err.kind(), lf_domain::ErrorKind::InvalidArgument);
    }

    #[test]
    fn build_parser_rejects_unknown_kind() {
        assert!(build_parser("hologram", &serde_json::Value::Null).is_err());
    }

    #[test]
    fn build_parser_rejects_invalid_chunking() {
        let err =
            build_parser("text", &json!({"chunk_size": 10, "chunk_overlap": 10})).unwrap_err();
        assert_eq!(err.kind(), lf_domain::ErrorKind::InvalidArgument);
    }

    // ── Selection ───────────────────────────────────────────────────

    #[test]
    fn selection_is_first_match() {
        let parsers = vec![parser_entry("markdown"), parser_entry("text")];
        let chosen = select_parser(&parsers, "notes.md", "text/markdown").unwrap();
        assert_eq!(chosen.kind.as_deref(), Some("markdown"));
    }

    #[test]
    fn selection_falls_through_to_later_entries() {
        let parsers = vec![parser_entry("markdown"), parser_entry("text")];
        let chosen = select_parser(&parsers, "notes.txt", "text/plain").unwrap();
        assert_eq!(chosen.kind.as_deref(), Some("text"));
    }

    #[test]
    fn selection_matches_on_mime_when_extension_unknown() {
        let parsers = vec![parser_entry("csv")];
        let chosen = select_parser(&parsers, "export.data", "text/csv");
        assert!(chosen.is_some());
    }

    #[test]
    fn no_match_returns_none() {
        let parsers = vec![parser_entry("csv")];
        assert!(select_parser(&parsers, "image.png", "image/png").is_none());
    }

    #[test]
    fn explicit_patterns_override_defaults() {
        let mut entry = parser_entry("text");
        entry.patterns = vec!["*.custom".into()];
        let parsers = vec![entry];
        assert!(select_parser(&parsers, "a.custom", "application/octet-stream").is_some());
    }

    #[test]
    fn typeless_entry_never_matches() {
        let entry = ParserConfig {
            kind: None,
            patterns: vec!["*.txt".into()],
            mime_types: vec![],
            config: None,
        };
        assert!(select_parser(&[entry], "a.txt", "text/plain").is_none());
    }
}
