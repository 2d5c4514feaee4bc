//! Strategy resolution: the three-level configuration cascade and the
//! reference/inline rules for database creation.
//!
//! The cascade per parser type is: built-in defaults ← strategy config ←
//! per-request overrides.  Merging is a recursive deep-merge over JSON maps
//! that never mutates its inputs.

use serde_json::{Map, Value};

use lf_domain::config::{
    ComponentsConfig, DataProcessingStrategyConfig, DatabaseConfig, DistanceMetric,
    EmbeddingStrategyConfig, ProjectConfig, RetrievalStrategyConfig, StrategyRef,
};
use lf_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in parser defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Built-in default config per parser type.  Unknown types yield an empty
/// map (the caller logs a warning, not an error).
pub fn parser_defaults(parser_type: &str) -> Map<String, Value> {
    let value = match parser_type {
        "text" | "markdown" => serde_json::json!({
            "chunk_size": 512,
            "chunk_overlap": 50,
        }),
        "csv" => serde_json::json!({
            "delimiter": ",",
            "has_header": true,
        }),
        "pdf_llamaindex" => serde_json::json!({
            "chunk_size": 512,
            "chunk_overlap": 50,
            "extract_images": false,
        }),
        "docx" => serde_json::json!({
            "include_tables": true,
        }),
        _ => serde_json::json!({}),
    };
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Recursive deep-merge: for each key in `overlay`, recurse when both sides
/// are maps, otherwise the overlay value replaces.  Neither input is
/// mutated.
pub fn deep_merge(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    let mut out = base.clone();
    for (key, value) in overlay {
        match (out.get(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                out.insert(key.clone(), Value::Object(deep_merge(existing, incoming)));
            }
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Strategy resolver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct StrategyResolver<'a> {
    config: &'a ProjectConfig,
}

impl<'a> StrategyResolver<'a> {
    pub fn new(config: &'a ProjectConfig) -> Self {
        Self { config }
    }

    /// Look up a data-processing strategy by name; the error lists what is
    /// available.
    pub fn get_strategy(&self, name: &str) -> Result<&DataProcessingStrategyConfig> {
        self.config
            .components
            .data_processing_strategies
            .get(name)
            .ok_or_else(|| {
                let available: Vec<&String> = self
                    .config
                    .components
                    .data_processing_strategies
                    .keys()
                    .collect();
                Error::NotFound(format!(
                    "strategy \"{name}\" not found in configuration; available: {available:?}"
                ))
            })
    }

    /// Return a copy of the strategy with every parser's config merged:
    /// built-in defaults ← strategy config ← request overrides (keyed by
    /// parser type).
    pub fn resolve_processing_strategy(
        &self,
        name: &str,
        api_overrides: Option<&Map<String, Value>>,
    ) -> Result<DataProcessingStrategyConfig> {
        let mut resolved = self.get_strategy(name)?.clone();

        for parser in &mut resolved.parsers {
            let Some(parser_type) = parser.kind.clone() else {
                tracing::warn!("parser entry missing type; skipping defaults merge");
                continue;
            };

            let defaults = parser_defaults(&parser_type);
            if defaults.is_empty() {
                tracing::warn!(parser_type = %parser_type, "no built-in defaults for parser type");
            }

            let mut merged = defaults;
            match parser.config.as_ref() {
                Some(Value::Object(map)) => merged = deep_merge(&merged, map),
                Some(other) => {
                    tracing::warn!(
                        parser_type = %parser_type,
                        config_type = other_type_name(other),
                        "parser config is not a map; skipping merge"
                    );
                }
                None => {}
            }

            if let Some(overrides) = api_overrides {
                match overrides.get(&parser_type) {
                    Some(Value::Object(map)) => merged = deep_merge(&merged, map),
                    Some(other) => {
                        tracing::warn!(
                            parser_type = %parser_type,
                            config_type = other_type_name(other),
                            "request override is not a map; skipping merge"
                        );
                    }
                    None => {}
                }
            }

            parser.config = Some(Value::Object(merged));
        }

        Ok(resolved)
    }
}

fn other_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Database creation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A database-creation request: each strategy slot may name a component or
/// carry an inline definition, never both.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DatabaseSpec {
    pub name: String,
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default)]
    pub distance_metric: Option<DistanceMetric>,
    #[serde(default)]
    pub embedding_strategy: Option<String>,
    #[serde(default)]
    pub embedding: Option<EmbeddingStrategyConfig>,
    #[serde(default)]
    pub retrieval_strategy: Option<String>,
    #[serde(default)]
    pub retrieval: Option<RetrievalStrategyConfig>,
}

/// Resolve a creation request into a database record with both strategies
/// inlined.  Reference XOR inline per slot; with neither, the component
/// defaults apply; with no default either, the request fails.
pub fn resolve_database_spec(
    spec: &DatabaseSpec,
    components: &ComponentsConfig,
) -> Result<DatabaseConfig> {
    let embedding = resolve_slot(
        "embedding",
        spec.embedding_strategy.as_deref(),
        spec.embedding.clone(),
        components.defaults.embedding_strategy.as_deref(),
        |name| components.embedding_strategies.get(name).cloned(),
    )?;
    let retrieval = resolve_slot(
        "retrieval",
        spec.retrieval_strategy.as_deref(),
        spec.retrieval.clone(),
        components.defaults.retrieval_strategy.as_deref(),
        |name| components.retrieval_strategies.get(name).cloned(),
    )?;

    Ok(DatabaseConfig {
        name: spec.name.clone(),
        store: spec.store.clone().unwrap_or_else(|| "memory".into()),
        // Cosine is the global default metric so no store-specific
        // "unspecified" interpretation can leak in.
        distance_metric: spec.distance_metric.unwrap_or(DistanceMetric::Cosine),
        embedding_strategy: Some(StrategyRef::Inline(embedding)),
        retrieval_strategy: Some(StrategyRef::Inline(retrieval)),
    })
}

fn resolve_slot<T>(
    slot: &str,
    reference: Option<&str>,
    inline: Option<T>,
    default_name: Option<&str>,
    lookup: impl Fn(&str) -> Option<T>,
) -> Result<T> {
    match (reference, inline) {
        (Some(_), Some(_)) => Err(Error::InvalidArgument(format!(
            "{slot} strategy given both by reference and inline; supply one"
        ))),
        (Some(name), None) => lookup(name).ok_or_else(|| {
            Error::InvalidArgument(format!("unknown {slot} strategy \"{name}\""))
        }),
        (None, Some(inline)) => Ok(inline),
        (None, None) => match default_name {
            Some(name) => lookup(name).ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "defaults.{slot}_strategy references unknown strategy \"{name}\""
                ))
            }),
            None => Err(Error::InvalidArgument(format!(
                "no {slot} strategy supplied and no default configured"
            ))),
        },
    }
}

/// Resolve the strategies a configured database uses, inlining references.
pub fn resolve_database_strategies(
    db: &DatabaseConfig,
    components: &ComponentsConfig,
) -> Result<(EmbeddingStrategyConfig, RetrievalStrategyConfig)> {
    let embedding = match &db.embedding_strategy {
        Some(StrategyRef::Inline(cfg)) => cfg.clone(),
        Some(StrategyRef::Name(name)) => components
            .embedding_strategies
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("embedding strategy \"{name}\"")))?,
        None => resolve_slot(
            "embedding",
            None,
            None,
            components.defaults.embedding_strategy.as_deref(),
            |name| components.embedding_strategies.get(name).cloned(),
        )?,
    };
    let retrieval = match &db.retrieval_strategy {
        Some(StrategyRef::Inline(cfg)) => cfg.clone(),
        Some(StrategyRef::Name(name)) => components
            .retrieval_strategies
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("retrieval strategy \"{name}\"")))?,
        None => resolve_slot(
            "retrieval",
            None,
            None,
            components.defaults.retrieval_strategy.as_deref(),
            |name| components.retrieval_strategies.get(name).cloned(),
        )?,
    };
    Ok((embedding, retrieval))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
