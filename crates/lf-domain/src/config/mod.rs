mod datasets;
mod prompts;
mod rag;
mod runtime;
mod server;

pub use datasets::*;
pub use prompts::*;
pub use rag::*;
pub use runtime::*;
pub use server::*;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Project config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Immutable snapshot of a project's declarative configuration
/// (`llamafarm.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub prompts: Vec<PromptSet>,
    #[serde(default)]
    pub components: ComponentsConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

impl ProjectConfig {
    /// Stable content hash of the config snapshot, recorded on event-log
    /// entries so runs can be correlated with the config version.
    pub fn config_hash(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        hex::encode(&digest[..8])
    }

    pub fn dataset(&self, name: &str) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.name == name)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl ProjectConfig {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.  Cross-reference
    /// rules: every strategy reference must name a component of the matching
    /// kind, every dataset must reference an existing database and strategy,
    /// and `default_model` must name a runtime model.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.name.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "name".into(),
                message: "project name must not be empty".into(),
            });
        }

        // default_model must point at a declared model.
        if let Some(default) = &self.runtime.default_model {
            if self.runtime.model(default).is_none() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "runtime.default_model".into(),
                    message: format!("references unknown model \"{default}\""),
                });
            }
        }

        // Duplicate model names shadow each other.
        let mut seen_models: HashSet<&str> = HashSet::new();
        for (i, model) in self.runtime.models.iter().enumerate() {
            if model.name.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("runtime.models[{i}].name"),
                    message: "model name must not be empty".into(),
                });
            } else if !seen_models.insert(&model.name) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    field: format!("runtime.models[{i}].name"),
                    message: format!(
                        "duplicate model name \"{}\" — later entry shadows earlier one",
                        model.name
                    ),
                });
            }
            if let Some(ctx) = model.context_window {
                if ctx <= 0 {
                    issues.push(ConfigIssue {
                        severity: ConfigSeverity::Error,
                        field: format!("runtime.models[{i}].context_window"),
                        message: format!("context window must be positive (got {ctx})"),
                    });
                }
            }
        }

        // Databases: strategy references must resolve; ref XOR inline.
        for (i, db) in self.rag.databases.iter().enumerate() {
            if let Some(StrategyRef::Name(name)) = &db.embedding_strategy {
                if !self.components.embedding_strategies.contains_key(name) {
                    issues.push(ConfigIssue {
                        severity: ConfigSeverity::Error,
                        field: format!("rag.databases[{i}].embedding_strategy"),
                        message: format!("references unknown embedding strategy \"{name}\""),
                    });
                }
            }
            if let Some(StrategyRef::Name(name)) = &db.retrieval_strategy {
                if !self.components.retrieval_strategies.contains_key(name) {
                    issues.push(ConfigIssue {
                        severity: ConfigSeverity::Error,
                        field: format!("rag.databases[{i}].retrieval_strategy"),
                        message: format!("references unknown retrieval strategy \"{name}\""),
                    });
                }
            }
        }

        // Datasets: database and strategy must exist.
        for (i, ds) in self.datasets.iter().enumerate() {
            if self.rag.database(&ds.database).is_none() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("datasets[{i}].database"),
                    message: format!("references unknown database \"{}\"", ds.database),
                });
            }
            if !self
                .components
                .data_processing_strategies
                .contains_key(&ds.data_processing_strategy)
            {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("datasets[{i}].data_processing_strategy"),
                    message: format!(
                        "references unknown data-processing strategy \"{}\"",
                        ds.data_processing_strategy
                    ),
                });
            }
        }

        // Parser kinds outside the known set still resolve (empty defaults),
        // but flag them so typos surface early.
        for (name, strategy) in &self.components.data_processing_strategies {
            for (i, parser) in strategy.parsers.iter().enumerate() {
                match &parser.kind {
                    None => issues.push(ConfigIssue {
                        severity: ConfigSeverity::Warning,
                        field: format!(
                            "components.data_processing_strategies.{name}.parsers[{i}]"
                        ),
                        message: "parser entry has no type and will be skipped".into(),
                    }),
                    Some(kind) if !KNOWN_PARSER_KINDS.contains(&kind.as_str()) => {
                        issues.push(ConfigIssue {
                            severity: ConfigSeverity::Warning,
                            field: format!(
                                "components.data_processing_strategies.{name}.parsers[{i}].type"
                            ),
                            message: format!("unknown parser type \"{kind}\""),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        // Rerank-mode retrieval strategies need a reranker model.
        for (name, strategy) in &self.components.retrieval_strategies {
            if strategy.mode == RetrievalMode::Rerank && strategy.reranker.is_none() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("components.retrieval_strategies.{name}.reranker"),
                    message: "rerank mode requires a reranker model".into(),
                });
            }
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ModelFamily;

    /// Helper: build a minimal valid ProjectConfig.
    fn valid_config() -> ProjectConfig {
        let yaml = r#"
name: demo
namespace: default
runtime:
  models:
    - name: chat
      model: "unsloth/Qwen3-1.7B-GGUF:Q4_K_M"
      context_window: 4096
  default_model: chat
components:
  embedding_strategies:
    default_embed:
      model: "org/embedder"
      dimension: 384
  retrieval_strategies:
    default_retrieval:
      mode: similarity
      top_k: 5
  data_processing_strategies:
    docs:
      parsers:
        - type: text
          patterns: ["*.txt"]
  defaults:
    embedding_strategy: default_embed
    retrieval_strategy: default_retrieval
rag:
  databases:
    - name: main
      embedding_strategy: default_embed
      retrieval_strategy: default_retrieval
datasets:
  - name: corpus
    database: main
    data_processing_strategy: docs
"#;
        serde_yaml::from_str(yaml).unwrap()
    }

    fn find_issue<'a>(issues: &'a [ConfigIssue], field_prefix: &str) -> Option<&'a ConfigIssue> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn valid_config_passes() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn yaml_parses_model_family_default() {
        let cfg = valid_config();
        assert_eq!(cfg.runtime.models[0].family, ModelFamily::Language);
    }

    // ── Cross references ────────────────────────────────────────────

    #[test]
    fn unknown_default_model_is_error() {
        let mut cfg = valid_config();
        cfg.runtime.default_model = Some("ghost".into());
        let issues = cfg.validate();
        let issue = find_issue(&issues, "runtime.default_model").expect("expected issue");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn unknown_embedding_strategy_ref_is_error() {
        let mut cfg = valid_config();
        cfg.rag.databases[0].embedding_strategy =
            Some(StrategyRef::Name("missing".into()));
        let issues = cfg.validate();
        let issue =
            find_issue(&issues, "rag.databases[0].embedding_strategy").expect("expected issue");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn dataset_with_unknown_database_is_error() {
        let mut cfg = valid_config();
        cfg.datasets[0].database = "nope".into();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "datasets[0].database").expect("expected issue");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn dataset_with_unknown_strategy_is_error() {
        let mut cfg = valid_config();
        cfg.datasets[0].data_processing_strategy = "nope".into();
        let issues = cfg.validate();
        let issue =
            find_issue(&issues, "datasets[0].data_processing_strategy").expect("expected issue");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    // ── Models ──────────────────────────────────────────────────────

    #[test]
    fn non_positive_context_window_is_error() {
        let mut cfg = valid_config();
        cfg.runtime.models[0].context_window = Some(0);
        let issues = cfg.validate();
        let issue =
            find_issue(&issues, "runtime.models[0].context_window").expect("expected issue");
        assert_eq!(issue.severity, ConfigSeverity::Error);

        cfg.runtime.models[0].context_window = Some(-1);
        assert!(find_issue(&cfg.validate(), "runtime.models[0].context_window").is_some());
    }

    #[test]
    fn duplicate_model_names_is_warning() {
        let mut cfg = valid_config();
        let dup = cfg.runtime.models[0].clone();
        cfg.runtime.models.push(dup);
        let issues = cfg.validate();
        let issue = find_issue(&issues, "runtime.models[1].name").expect("expected issue");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    // ── Parsers & retrieval ─────────────────────────────────────────

    #[test]
    fn unknown_parser_type_is_warning() {
        let mut cfg = valid_config();
        cfg.components
            .data_processing_strategies
            .get_mut("docs")
            .unwrap()
            .parsers
            .push(ParserConfig {
                kind: Some("hologram".into()),
                patterns: vec![],
                mime_types: vec![],
                config: None,
            });
        let issues = cfg.validate();
        let issue = issues
            .iter()
            .find(|e| e.message.contains("hologram"))
            .expect("expected warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn parser_without_type_is_warning() {
        let mut cfg = valid_config();
        cfg.components
            .data_processing_strategies
            .get_mut("docs")
            .unwrap()
            .parsers
            .push(ParserConfig {
                kind: None,
                patterns: vec![],
                mime_types: vec![],
                config: None,
            });
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|e| e.message.contains("no type") && e.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn rerank_without_reranker_is_error() {
        let mut cfg = valid_config();
        cfg.components.retrieval_strategies.insert(
            "rr".into(),
            RetrievalStrategyConfig {
                mode: RetrievalMode::Rerank,
                top_k: 5,
                reranker: None,
                score_threshold: None,
            },
        );
        let issues = cfg.validate();
        let issue =
            find_issue(&issues, "components.retrieval_strategies.rr").expect("expected issue");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    // ── Hash & display ──────────────────────────────────────────────

    #[test]
    fn config_hash_is_stable_and_sensitive() {
        let cfg = valid_config();
        assert_eq!(cfg.config_hash(), cfg.config_hash());

        let mut changed = cfg.clone();
        changed.name = "other".into();
        assert_ne!(cfg.config_hash(), changed.config_hash());
    }

    #[test]
    fn issue_display_format() {
        let issue = ConfigIssue {
            severity: ConfigSeverity::Error,
            field: "name".into(),
            message: "project name must not be empty".into(),
        };
        assert_eq!(
            format!("{issue}"),
            "[ERROR] name: project name must not be empty"
        );
    }

    #[test]
    fn strategy_ref_untagged_forms_parse() {
        let by_name: DatabaseConfig = serde_yaml::from_str(
            r#"
name: db
embedding_strategy: some_strategy
"#,
        )
        .unwrap();
        assert!(matches!(
            by_name.embedding_strategy,
            Some(StrategyRef::Name(ref n)) if n == "some_strategy"
        ));

        let inline: DatabaseConfig = serde_yaml::from_str(
            r#"
name: db
embedding_strategy:
  model: "org/embedder"
  dimension: 128
"#,
        )
        .unwrap();
        assert!(matches!(
            inline.embedding_strategy,
            Some(StrategyRef::Inline(ref s)) if s.dimension == Some(128)
        ));
    }
}
