//! Project registry: loads and persists `llamafarm.yaml` manifests under
//! `<data_root>/<namespace>/<project>/` and answers project CRUD.

use std::path::{Path, PathBuf};

use lf_domain::config::{ConfigSeverity, ProjectConfig};
use lf_domain::paths::safe_join;
use lf_domain::{Error, Result};

pub const MANIFEST_NAME: &str = "llamafarm.yaml";

pub struct ProjectRegistry {
    data_root: PathBuf,
}

impl ProjectRegistry {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Validated project directory (namespace and project are external
    /// names).
    pub fn project_dir(&self, namespace: &str, project: &str) -> Result<PathBuf> {
        let ns_dir = safe_join(&self.data_root, namespace)?;
        safe_join(&ns_dir, project)
    }

    fn manifest_path(&self, namespace: &str, project: &str) -> Result<PathBuf> {
        Ok(self.project_dir(namespace, project)?.join(MANIFEST_NAME))
    }

    pub fn exists(&self, namespace: &str, project: &str) -> bool {
        self.manifest_path(namespace, project)
            .map(|p| p.exists())
            .unwrap_or(false)
    }

    /// Load a project config.
    pub fn get(&self, namespace: &str, project: &str) -> Result<ProjectConfig> {
        let path = self.manifest_path(namespace, project)?;
        let raw = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("project {namespace}/{project}"))
            }
            _ => e.into(),
        })?;
        let config: ProjectConfig = serde_yaml::from_str(&raw)?;
        Ok(config)
    }

    /// List project names in a namespace.
    pub fn list(&self, namespace: &str) -> Result<Vec<String>> {
        let ns_dir = safe_join(&self.data_root, namespace)?;
        let entries = match std::fs::read_dir(&ns_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut projects = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.path().join(MANIFEST_NAME).exists() {
                if let Some(name) = entry.file_name().to_str() {
                    projects.push(name.to_owned());
                }
            }
        }
        projects.sort();
        Ok(projects)
    }

    /// Create a project.  Fails with `conflict` when it already exists and
    /// with `invalid-argument` when the config does not validate.
    pub fn create(&self, namespace: &str, config: &ProjectConfig) -> Result<()> {
        if config.name.is_empty() {
            return Err(Error::InvalidArgument("project name must not be empty".into()));
        }
        if self.exists(namespace, &config.name) {
            return Err(Error::Conflict(format!(
                "project {namespace}/{} already exists",
                config.name
            )));
        }
        self.validate_and_save(namespace, config)
    }

    /// Replace an existing project's config.
    pub fn update(&self, namespace: &str, project: &str, config: &ProjectConfig) -> Result<()> {
        if !self.exists(namespace, project) {
            return Err(Error::NotFound(format!("project {namespace}/{project}")));
        }
        if config.name != project {
            return Err(Error::InvalidArgument(format!(
                "config name \"{}\" does not match project \"{project}\"",
                config.name
            )));
        }
        self.validate_and_save(namespace, config)
    }

    /// Delete a project directory.  Session eviction is the caller's
    /// responsibility (the registry only owns the files).
    pub fn delete(&self, namespace: &str, project: &str) -> Result<()> {
        let dir = self.project_dir(namespace, project)?;
        if !dir.join(MANIFEST_NAME).exists() {
            return Err(Error::NotFound(format!("project {namespace}/{project}")));
        }
        std::fs::remove_dir_all(&dir)?;
        tracing::info!(namespace, project, "project deleted");
        Ok(())
    }

    fn validate_and_save(&self, namespace: &str, config: &ProjectConfig) -> Result<()> {
        let issues = config.validate();
        let errors: Vec<String> = issues
            .iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .map(ToString::to_string)
            .collect();
        if !errors.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "config validation failed: {}",
                errors.join("; ")
            )));
        }
        for warning in issues.iter().filter(|i| i.severity == ConfigSeverity::Warning) {
            tracing::warn!(project = %config.name, "{warning}");
        }

        let dir = self.project_dir(namespace, &config.name)?;
        std::fs::create_dir_all(&dir)?;
        let yaml = serde_yaml::to_string(config)?;
        std::fs::write(dir.join(MANIFEST_NAME), yaml)?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> (TempDir, ProjectRegistry) {
        let tmp = TempDir::new().unwrap();
        let registry = ProjectRegistry::new(tmp.path());
        (tmp, registry)
    }

    fn config(name: &str) -> ProjectConfig {
        ProjectConfig {
            name: name.into(),
            namespace: "default".into(),
            ..Default::default()
        }
    }

    #[test]
    fn create_get_round_trip() {
        let (_tmp, registry) = registry();
        registry.create("default", &config("demo")).unwrap();

        let loaded = registry.get("default", "demo").unwrap();
        assert_eq!(loaded.name, "demo");
        assert!(registry.exists("default", "demo"));
    }

    #[test]
    fn create_duplicate_conflicts() {
        let (_tmp, registry) = registry();
        registry.create("default", &config("demo")).unwrap();
        let err = registry.create("default", &config("demo")).unwrap_err();
        assert_eq!(err.kind(), lf_domain::ErrorKind::Conflict);
    }

    #[test]
    fn get_missing_is_not_found() {
        let (_tmp, registry) = registry();
        let err = registry.get("default", "ghost").unwrap_err();
        assert_eq!(err.kind(), lf_domain::ErrorKind::NotFound);
    }

    #[test]
    fn list_returns_sorted_projects() {
        let (_tmp, registry) = registry();
        registry.create("default", &config("zeta")).unwrap();
        registry.create("default", &config("alpha")).unwrap();
        assert_eq!(registry.list("default").unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn list_empty_namespace_is_empty() {
        let (_tmp, registry) = registry();
        assert!(registry.list("nothing").unwrap().is_empty());
    }

    #[test]
    fn update_requires_existing_project() {
        let (_tmp, registry) = registry();
        let err = registry.update("default", "ghost", &config("ghost")).unwrap_err();
        assert_eq!(err.kind(), lf_domain::ErrorKind::NotFound);
    }

    #[test]
    fn update_rejects_name_mismatch() {
        let (_tmp, registry) = registry();
        registry.create("default", &config("demo")).unwrap();
        let err = registry.update("default", "demo", &config("other")).unwrap_err();
        assert_eq!(err.kind(), lf_domain::ErrorKind::InvalidArgument);
    }

    #[test]
    fn delete_removes_directory() {
        let (tmp, registry) = registry();
        registry.create("default", &config("demo")).unwrap();
        registry.delete("default", "demo").unwrap();
        assert!(!tmp.path().join("default").join("demo").exists());
        assert_eq!(
            registry.delete("default", "demo").unwrap_err().kind(),
            lf_domain::ErrorKind::NotFound
        );
    }

    #[test]
    fn invalid_config_rejected() {
        let (_tmp, registry) = registry();
        let mut bad = config("demo");
        bad.runtime.default_model = Some("ghost".into());
        let err = registry.create("default", &bad).unwrap_err();
        assert_eq!(err.kind(), lf_domain::ErrorKind::InvalidArgument);
    }

    #[test]
    fn namespace_and_project_names_validated() {
        let (_tmp, registry) = registry();
        assert!(registry.get("../etc", "demo").is_err());
        assert!(registry.get("default", "..").is_err());
        assert!(registry.create("ns*glob", &config("demo")).is_err());
    }
}
