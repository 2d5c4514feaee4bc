use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Server-level configuration (the per-process TOML file, not the per-project
/// manifest).  Environment variables override the file for the operational
/// knobs named in the platform contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Root directory for all namespaces/projects.
    #[serde(default = "d_data_root")]
    pub data_root: PathBuf,
    /// Maximum accepted upload size in bytes.
    #[serde(default = "d_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Seconds a cached model may sit idle before eviction.
    #[serde(default = "d_model_unload_timeout")]
    pub model_unload_timeout_secs: u64,
    /// Seconds between model-cache reaper sweeps.
    #[serde(default = "d_cleanup_check_interval")]
    pub cleanup_check_interval_secs: u64,
    /// Maximum concurrent streaming (vision/voice) sessions.
    #[serde(default = "d_max_streaming_sessions")]
    pub max_streaming_sessions: usize,
    /// Seconds a streaming session may sit idle before eviction.
    #[serde(default = "d_stream_session_ttl")]
    pub stream_session_ttl_secs: u64,
    /// Seconds between streaming-session reaper sweeps.
    #[serde(default = "d_stream_reaper_interval")]
    pub stream_reaper_interval_secs: u64,
    /// Worker-pool size for the task broker.
    #[serde(default = "d_broker_workers")]
    pub broker_workers: usize,
}

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    8000
}
fn d_data_root() -> PathBuf {
    PathBuf::from("./data")
}
fn d_max_upload_bytes() -> usize {
    100 * 1024 * 1024
}
fn d_model_unload_timeout() -> u64 {
    300
}
fn d_cleanup_check_interval() -> u64 {
    60
}
fn d_max_streaming_sessions() -> usize {
    100
}
fn d_stream_session_ttl() -> u64 {
    60
}
fn d_stream_reaper_interval() -> u64 {
    30
}
fn d_broker_workers() -> usize {
    4
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            data_root: d_data_root(),
            max_upload_bytes: d_max_upload_bytes(),
            model_unload_timeout_secs: d_model_unload_timeout(),
            cleanup_check_interval_secs: d_cleanup_check_interval(),
            max_streaming_sessions: d_max_streaming_sessions(),
            stream_session_ttl_secs: d_stream_session_ttl(),
            stream_reaper_interval_secs: d_stream_reaper_interval(),
            broker_workers: d_broker_workers(),
        }
    }
}

impl ServerConfig {
    /// Apply the documented environment overrides on top of the file values.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_u64("MODEL_UNLOAD_TIMEOUT") {
            self.model_unload_timeout_secs = v;
        }
        if let Some(v) = env_u64("CLEANUP_CHECK_INTERVAL") {
            self.cleanup_check_interval_secs = v;
        }
        if let Ok(root) = std::env::var("LF_DATA_ROOT") {
            if !root.is_empty() {
                self.data_root = PathBuf::from(root);
            }
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "ignoring unparseable env override");
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.model_unload_timeout_secs, 300);
        assert_eq!(cfg.cleanup_check_interval_secs, 60);
        assert_eq!(cfg.max_streaming_sessions, 100);
        assert_eq!(cfg.stream_session_ttl_secs, 60);
        assert_eq!(cfg.stream_reaper_interval_secs, 30);
    }

    #[test]
    fn toml_round_trip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.port, cfg.port);
        assert_eq!(back.data_root, cfg.data_root);
    }
}
