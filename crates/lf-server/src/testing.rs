//! Test helpers shared by the server's unit tests.

use std::sync::Arc;

use tempfile::TempDir;

use crate::backends::StubBackendFactory;
use crate::state::AppState;
use lf_domain::config::{ProjectConfig, ServerConfig};

/// Fresh state over a temp data root with stub backends.
pub fn test_state() -> (TempDir, AppState) {
    let tmp = TempDir::new().expect("temp dir");
    let config = ServerConfig {
        data_root: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let state = AppState::new(config, Arc::new(StubBackendFactory));
    (tmp, state)
}

/// Create a project from YAML and return its parsed config.
pub fn yaml_project(state: &AppState, namespace: &str, yaml: &str) -> ProjectConfig {
    let config: ProjectConfig = serde_yaml::from_str(yaml).expect("valid project yaml");
    state
        .projects
        .create(namespace, &config)
        .expect("project created");
    config
}
