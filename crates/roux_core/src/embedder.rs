//! Text embedding provider boundary.
//!
//! The store never talks to a model directly; it consumes vectors through
//! this trait. The bundled local provider wraps fastembed behind the
//! `embeddings` cargo feature so headless builds stay lean.

use roux_common::Result;

/// Stateless text-to-vector provider.
pub trait Embedder: Send + Sync {
    /// Embed one text into a fixed-dimension vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Identifier persisted next to each stored vector.
    fn model_id(&self) -> &str;
}

#[cfg(feature = "embeddings")]
pub use local::LocalEmbedder;

#[cfg(feature = "embeddings")]
mod local {
    use super::Embedder;
    use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
    use roux_common::{Result, RouxError};
    use std::sync::OnceLock;

    static EMBEDDING_MODEL: OnceLock<TextEmbedding> = OnceLock::new();

    const MODEL_ID: &str = "all-MiniLM-L6-v2";

    /// Local embedding model (all-MiniLM-L6-v2, 384 dimensions).
    pub struct LocalEmbedder;

    impl LocalEmbedder {
        /// Pre-initialize the model to move the download/load cost out of
        /// the first search.
        pub fn warm_up() -> Result<()> {
            let start = std::time::Instant::now();
            Self::model()?;
            tracing::info!(
                "embedding model pre-warmed in {}ms",
                start.elapsed().as_millis()
            );
            Ok(())
        }

        fn model() -> Result<&'static TextEmbedding> {
            if let Some(model) = EMBEDDING_MODEL.get() {
                return Ok(model);
            }

            tracing::info!("initializing embedding model ({})...", MODEL_ID);
            let start = std::time::Instant::now();

            let cache_dir = std::env::current_dir()
                .ok()
                .map(|p| p.join(".fastembed_cache"))
                .unwrap_or_else(|| std::path::PathBuf::from(".fastembed_cache"));

            let model = TextEmbedding::try_new(
                InitOptions::new(FastEmbedModel::AllMiniLML6V2)
                    .with_show_download_progress(false)
                    .with_cache_dir(cache_dir),
            )
            .map_err(|e| RouxError::Provider(format!("embedding model init failed: {}", e)))?;

            tracing::info!(
                "embedding model initialized in {}ms",
                start.elapsed().as_millis()
            );
            Ok(EMBEDDING_MODEL.get_or_init(|| model))
        }
    }

    impl Embedder for LocalEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let model = Self::model()?;
            let embeddings = model
                .embed(vec![text], None)
                .map_err(|e| RouxError::Provider(format!("embedding failed: {}", e)))?;
            embeddings
                .into_iter()
                .next()
                .ok_or_else(|| RouxError::Provider("no embedding produced".to_string()))
        }

        fn model_id(&self) -> &str {
            MODEL_ID
        }
    }
}
