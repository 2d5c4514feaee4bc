use serde::{Deserialize, Serialize};

/// A dataset binds a data-processing strategy to a database and a list of
/// content hashes of the files to ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    pub database: String,
    pub data_processing_strategy: String,
    /// Content hashes of files in the dataset store.
    #[serde(default)]
    pub files: Vec<String>,
}
