//! Shared application state passed to all API handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::events::EventLog;
use crate::projects::ProjectRegistry;
use crate::streaming::StreamSessionMap;
use lf_broker::TaskBroker;
use lf_domain::config::{DatabaseConfig, ProjectConfig, ServerConfig};
use lf_domain::identity::{ModelFamily, ModelIdentity};
use lf_domain::{Error, Result};
use lf_models::adapter::{BackendFactory, LoadSpec};
use lf_models::{ModelCache, ModelHandle};
use lf_rag::resolver::resolve_database_strategies;
use lf_rag::{
    CircuitBreaker, Embedder, EncoderEmbedder, IngestEngine, MemoryVectorStore, RetrievalEngine,
    VectorStore,
};
use lf_sessions::{HistoryStore, SessionManager};

/// Shared application state.
///
/// Fields are grouped by concern:
/// - **Core** — server config, project registry, backend factory
/// - **Models** — the TTL cache of loaded backends
/// - **Work** — task broker
/// - **Sessions** — chat sessions and vision streaming sessions
/// - **RAG** — per-database vector stores and circuit breakers
/// - **Observability** — per-project event logs
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub projects: Arc<ProjectRegistry>,
    pub backends: Arc<dyn BackendFactory>,
    pub models: Arc<ModelCache>,
    pub broker: Arc<TaskBroker>,
    pub sessions: Arc<SessionManager>,
    pub stream_sessions: Arc<StreamSessionMap>,
    pub rag: Arc<RagResources>,
    pub events: Arc<EventLog>,
}

impl AppState {
    pub fn new(config: ServerConfig, backends: Arc<dyn BackendFactory>) -> Self {
        let config = Arc::new(config);
        Self {
            projects: Arc::new(ProjectRegistry::new(&config.data_root)),
            backends,
            models: Arc::new(ModelCache::new(Duration::from_secs(
                config.model_unload_timeout_secs,
            ))),
            broker: Arc::new(TaskBroker::new(config.broker_workers)),
            sessions: Arc::new(SessionManager::new()),
            stream_sessions: Arc::new(StreamSessionMap::new(
                Duration::from_secs(config.stream_session_ttl_secs),
                config.max_streaming_sessions,
            )),
            rag: Arc::new(RagResources::default()),
            events: Arc::new(EventLog::new(&config.data_root)),
            config,
        }
    }

    /// History store for one project.
    pub fn history_store(&self, namespace: &str, project: &str) -> Result<HistoryStore> {
        Ok(HistoryStore::new(self.projects.project_dir(namespace, project)?))
    }

    /// Load (or fetch from cache) a language model declared in the project
    /// runtime.  `model_name` defaults to the project's `default_model`.
    pub async fn language_model(
        &self,
        config: &ProjectConfig,
        model_name: Option<&str>,
    ) -> Result<(String, Arc<ModelHandle>)> {
        let record = match model_name {
            Some(name) => config
                .runtime
                .model(name)
                .ok_or_else(|| Error::NotFound(format!("model \"{name}\"")))?,
            None => config.runtime.default_model_record().ok_or_else(|| {
                Error::InvalidArgument("no model requested and no default_model configured".into())
            })?,
        };

        let identity = ModelIdentity::parse(record.family, &record.model);
        let spec = LoadSpec {
            identity: identity.clone(),
            context_window: record.context_window,
            normalize: None,
            settings: record.settings.clone(),
        };
        spec.validate()?;

        let key = lf_domain::identity::CacheKey::from(&identity)
            .context_window(record.context_window.map(|c| c as u32))
            .build();
        let backends = self.backends.clone();
        let handle = self
            .models
            .get_or_load(&key, || async move { backends.load(&spec).await })
            .await?;
        Ok((record.model.clone(), handle))
    }

    /// Load an encoder by wire id (used for embedding and reranking).
    pub async fn encoder_model(
        &self,
        wire_id: &str,
        normalize: Option<String>,
    ) -> Result<Arc<ModelHandle>> {
        let identity = ModelIdentity::parse(ModelFamily::Encoder, wire_id);
        let spec = LoadSpec {
            identity: identity.clone(),
            context_window: None,
            normalize: normalize.clone(),
            settings: None,
        };
        let key = lf_domain::identity::CacheKey::from(&identity)
            .normalize(normalize)
            .build();
        let backends = self.backends.clone();
        self.models
            .get_or_load(&key, || async move { backends.load(&spec).await })
            .await
    }

    /// Assemble the ingestion engine for a database.
    pub async fn ingest_engine(
        &self,
        namespace: &str,
        project: &str,
        config: &ProjectConfig,
        db: &DatabaseConfig,
    ) -> Result<IngestEngine> {
        let store = self.rag.store_for(self, namespace, project, db)?;
        let embedder = self.embedder_for(config, db).await?;
        let breaker = self.rag.breaker_for(namespace, project, &db.name);
        Ok(IngestEngine::new(store, embedder, breaker))
    }

    /// Assemble the retrieval engine for a database, loading the reranker
    /// when the strategy needs one.
    pub async fn retrieval_engine(
        &self,
        namespace: &str,
        project: &str,
        config: &ProjectConfig,
        db: &DatabaseConfig,
    ) -> Result<RetrievalEngine> {
        let store = self.rag.store_for(self, namespace, project, db)?;
        let embedder = self.embedder_for(config, db).await?;
        let (_, retrieval) = resolve_database_strategies(db, &config.components)?;

        let mut engine = RetrievalEngine::new(store, embedder);
        if let Some(reranker_id) = &retrieval.reranker {
            let handle = self.encoder_model(reranker_id, None).await?;
            engine = engine.with_reranker(handle.as_encoder()?.clone());
        }
        Ok(engine)
    }

    async fn embedder_for(
        &self,
        config: &ProjectConfig,
        db: &DatabaseConfig,
    ) -> Result<Arc<dyn Embedder>> {
        let (embedding, _) = resolve_database_strategies(db, &config.components)?;
        let normalize_mode = embedding.normalize.then(|| "l2".to_owned());
        let handle = self.encoder_model(&embedding.model, normalize_mode).await?;
        let encoder = handle.as_encoder()?.clone();
        Ok(Arc::new(EncoderEmbedder::new(
            encoder,
            embedding.normalize,
            embedding.batch_size,
            embedding.dimension,
        )))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RAG resources
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-database vector stores and circuit breakers, keyed by
/// `namespace/project/database`.  Stores persist under the project's
/// `lf_data/stores/` directory.
#[derive(Default)]
pub struct RagResources {
    stores: Mutex<HashMap<String, Arc<MemoryVectorStore>>>,
    breakers: Mutex<HashMap<String, Arc<Mutex<CircuitBreaker>>>>,
}

impl RagResources {
    fn key(namespace: &str, project: &str, database: &str) -> String {
        format!("{namespace}/{project}/{database}")
    }

    /// Open (or reuse) the vector store backing a database.
    pub fn store_for(
        &self,
        state: &AppState,
        namespace: &str,
        project: &str,
        db: &DatabaseConfig,
    ) -> Result<Arc<dyn VectorStore>> {
        let key = Self::key(namespace, project, &db.name);
        {
            let stores = self.stores.lock();
            if let Some(store) = stores.get(&key) {
                return Ok(store.clone());
            }
        }

        let dir = state
            .projects
            .project_dir(namespace, project)?
            .join("lf_data")
            .join("stores");
        std::fs::create_dir_all(&dir)?;
        let store = Arc::new(MemoryVectorStore::open(&dir, &db.name, db.distance_metric)?);

        let mut stores = self.stores.lock();
        let store = stores.entry(key).or_insert(store).clone();
        Ok(store)
    }

    /// The circuit breaker guarding a database's embedder.
    pub fn breaker_for(
        &self,
        namespace: &str,
        project: &str,
        database: &str,
    ) -> Arc<Mutex<CircuitBreaker>> {
        let key = Self::key(namespace, project, database);
        self.breakers
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(CircuitBreaker::default())))
            .clone()
    }

    /// Drop cached resources for a project (on delete).
    pub fn evict_project(&self, namespace: &str, project: &str) {
        let prefix = format!("{namespace}/{project}/");
        self.stores.lock().retain(|k, _| !k.starts_with(&prefix));
        self.breakers.lock().retain(|k, _| !k.starts_with(&prefix));
    }
}
