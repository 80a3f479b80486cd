use super::{Config, Secret};

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_embedding();
        self.apply_env_overrides_pipeline();
    }

    fn apply_env_overrides_embedding(&mut self) {
        if let Ok(v) = std::env::var("THUTO_EMBEDDING_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.embedding.provider = kind;
            } else {
                tracing::warn!("ignoring invalid THUTO_EMBEDDING_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("THUTO_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("THUTO_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("THUTO_EMBEDDING_DIMENSIONS")
            && let Ok(dim) = v.parse::<usize>()
        {
            self.embedding.dimensions = Some(dim);
        }
        if let Ok(v) = std::env::var("THUTO_EMBEDDING_BATCH_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.embedding.batch_size = n;
        }
        if let Ok(v) = std::env::var("THUTO_EMBEDDING_API_KEY")
            && !v.is_empty()
        {
            self.embedding.api_key = Some(Secret::new(v));
        }
    }

    fn apply_env_overrides_pipeline(&mut self) {
        if let Ok(v) = std::env::var("THUTO_CHUNK_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.chunking.chunk_size = n;
        }
        if let Ok(v) = std::env::var("THUTO_CHUNK_OVERLAP")
            && let Ok(n) = v.parse::<usize>()
        {
            self.chunking.overlap = n;
        }
        if let Ok(v) = std::env::var("THUTO_RETRIEVAL_K")
            && let Ok(k) = v.parse::<usize>()
        {
            self.retrieval.k = k;
        }
        if let Ok(v) = std::env::var("THUTO_RETRIEVAL_SCORE_THRESHOLD")
            && let Ok(t) = v.parse::<f32>()
        {
            self.retrieval.score_threshold = t;
        }
        if let Ok(v) = std::env::var("THUTO_DATA_DIR") {
            self.storage.data_dir = v;
        }
        if let Ok(v) = std::env::var("THUTO_COMPACTION_THRESHOLD")
            && let Ok(t) = v.parse::<f32>()
        {
            self.storage.compaction_threshold = t;
        }
        if let Ok(v) = std::env::var("THUTO_INGEST_TIMEOUT_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.ingest.timeout_secs = secs;
        }
        if let Ok(v) = std::env::var("THUTO_INGEST_MAX_CONCURRENT")
            && let Ok(n) = v.parse::<usize>()
        {
            self.ingest.max_concurrent = n;
        }
        if let Ok(v) = std::env::var("THUTO_LOG_LEVEL") {
            self.logging.level = v;
        }
    }
}
