//! Model identity parsing and cache-key construction.
//!
//! A model is addressed by `<id>[:<QUANT>]` on the wire.  The full cache key
//! also folds in the context-window size and (for encoders) the
//! normalization mode, because two otherwise-identical models with different
//! settings are not interchangeable.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Model backend family.  Family selection is a tagged variant, never a
/// class hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Language,
    Encoder,
    Speech,
    Vision,
    Anomaly,
    Drift,
    Timeseries,
    Adtk,
}

impl ModelFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelFamily::Language => "language",
            ModelFamily::Encoder => "encoder",
            ModelFamily::Speech => "speech",
            ModelFamily::Vision => "vision",
            ModelFamily::Anomaly => "anomaly",
            ModelFamily::Drift => "drift",
            ModelFamily::Timeseries => "timeseries",
            ModelFamily::Adtk => "adtk",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum length of a quantization token (e.g. `Q4_K_M`, `F16`).
const MAX_QUANT_LEN: usize = 16;

/// True if `s` looks like a quantization token: uppercase letters, digits,
/// and underscores only, length 1..=16.
pub fn is_quantization_token(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_QUANT_LEN
        && s.bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

/// Split a wire identifier into `(base_id, quantization)`.
///
/// The split is on the **last** `:` so that ids which themselves contain
/// colons (registry prefixes) survive.  A suffix that does not look like a
/// quantization token is left attached to the id.
pub fn parse_identifier(s: &str) -> (String, Option<String>) {
    if let Some(pos) = s.rfind(':') {
        let (base, suffix) = (&s[..pos], &s[pos + 1..]);
        if is_quantization_token(suffix) {
            return (base.to_owned(), Some(suffix.to_owned()));
        }
    }
    (s.to_owned(), None)
}

/// Inverse of [`parse_identifier`].
pub fn format_identifier(base: &str, quantization: Option<&str>) -> String {
    match quantization {
        Some(q) => format!("{base}:{q}"),
        None => base.to_owned(),
    }
}

/// Identity tuple for a loadable model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelIdentity {
    pub family: ModelFamily,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantization: Option<String>,
}

impl ModelIdentity {
    /// Parse from wire form (`id[:QUANT]`).
    pub fn parse(family: ModelFamily, wire: &str) -> Self {
        let (id, quantization) = parse_identifier(wire);
        Self {
            family,
            id,
            quantization,
        }
    }
}

/// Deterministic cache-key builder.
///
/// Keys look like `language:org/model:quantQ4_K_M:ctx4096` or
/// `encoder:org/embed:quantdefault:ctxauto:norml2`.  Absent settings use the
/// literals `default` / `auto` so two callers that omit them agree on the
/// key.
#[derive(Debug, Clone)]
pub struct CacheKey {
    family: ModelFamily,
    id: String,
    quantization: Option<String>,
    context_window: Option<u32>,
    normalize: Option<String>,
}

impl CacheKey {
    pub fn new(family: ModelFamily, id: impl Into<String>) -> Self {
        Self {
            family,
            id: id.into(),
            quantization: None,
            context_window: None,
            normalize: None,
        }
    }

    pub fn quantization(mut self, quant: Option<String>) -> Self {
        self.quantization = quant;
        self
    }

    pub fn context_window(mut self, ctx: Option<u32>) -> Self {
        self.context_window = ctx;
        self
    }

    pub fn normalize(mut self, mode: Option<String>) -> Self {
        self.normalize = mode;
        self
    }

    pub fn build(&self) -> String {
        let quant = self.quantization.as_deref().unwrap_or("default");
        let mut key = format!("{}:{}:quant{}", self.family, self.id, quant);
        match self.context_window {
            Some(n) => key.push_str(&format!(":ctx{n}")),
            None => key.push_str(":ctxauto"),
        }
        if let Some(mode) = &self.normalize {
            key.push_str(&format!(":norm{mode}"));
        }
        key
    }
}

impl From<&ModelIdentity> for CacheKey {
    fn from(ident: &ModelIdentity) -> Self {
        CacheKey::new(ident.family, ident.id.clone())
            .quantization(ident.quantization.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── parse_identifier ────────────────────────────────────────────

    #[test]
    fn parses_quantization_suffix() {
        assert_eq!(
            parse_identifier("unsloth/Qwen3-1.7B-GGUF:Q4_K_M"),
            ("unsloth/Qwen3-1.7B-GGUF".to_owned(), Some("Q4_K_M".to_owned()))
        );
    }

    #[test]
    fn plain_id_has_no_quantization() {
        assert_eq!(
            parse_identifier("google/gemma-3-1b-it"),
            ("google/gemma-3-1b-it".to_owned(), None)
        );
    }

    #[test]
    fn lowercase_suffix_is_not_quantization() {
        assert_eq!(
            parse_identifier("registry:model"),
            ("registry:model".to_owned(), None)
        );
    }

    #[test]
    fn overlong_suffix_is_not_quantization() {
        let id = "m:QQQQQQQQQQQQQQQQQ"; // 17 chars after the colon
        assert_eq!(parse_identifier(id), (id.to_owned(), None));
    }

    #[test]
    fn splits_on_last_colon() {
        assert_eq!(
            parse_identifier("a:b:Q8_0"),
            ("a:b".to_owned(), Some("Q8_0".to_owned()))
        );
    }

    #[test]
    fn round_trip() {
        for (id, quant) in [
            ("org/model", Some("Q4_K_M")),
            ("org/model", Some("F16")),
            ("org/model", None),
            ("a:b", Some("Q8_0")),
        ] {
            let wire = format_identifier(id, quant);
            assert_eq!(
                parse_identifier(&wire),
                (id.to_owned(), quant.map(str::to_owned))
            );
        }
    }

    // ── CacheKey ────────────────────────────────────────────────────

    #[test]
    fn language_key_defaults() {
        let key = CacheKey::new(ModelFamily::Language, "test/model").build();
        assert_eq!(key, "language:test/model:quantdefault:ctxauto");
    }

    #[test]
    fn language_key_with_settings() {
        let key = CacheKey::new(ModelFamily::Language, "test/model")
            .quantization(Some("Q4_K_M".into()))
            .context_window(Some(4096))
            .build();
        assert_eq!(key, "language:test/model:quantQ4_K_M:ctx4096");
    }

    #[test]
    fn encoder_key_includes_normalize_mode() {
        let key = CacheKey::new(ModelFamily::Encoder, "test/embed")
            .normalize(Some("l2".into()))
            .build();
        assert_eq!(key, "encoder:test/embed:quantdefault:ctxauto:norml2");
    }

    #[test]
    fn keys_differ_by_context_window() {
        let a = CacheKey::new(ModelFamily::Language, "m")
            .context_window(Some(2048))
            .build();
        let b = CacheKey::new(ModelFamily::Language, "m")
            .context_window(Some(4096))
            .build();
        assert_ne!(a, b);
    }

    #[test]
    fn identity_to_cache_key() {
        let ident = ModelIdentity::parse(ModelFamily::Language, "m:Q8_0");
        let key = CacheKey::from(&ident).build();
        assert_eq!(key, "language:m:quantQ8_0:ctxauto");
    }
}
