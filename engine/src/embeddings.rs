//! Text embedding service boundary.
//!
//! The engine never talks to an embedding model directly — it goes through
//! the [`Embedder`] trait so tests can substitute a deterministic stub and
//! the production backend stays swappable.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

/// Output width of the default multilingual model
/// (`paraphrase-multilingual-mpnet-base-v2`).
pub const EMBEDDING_DIMENSION: usize = 768;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding model error: {0}")]
    Model(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },

    #[error("embedding task failed: {0}")]
    Task(String),
}

/// Maps text to fixed-length vectors for similarity comparison.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Width of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Embed a single query string.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of documents (bulk seeding path).
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

// ============================================================================
// FastEmbed backend
// ============================================================================

/// Production embedder backed by fastembed's ONNX runtime.
///
/// The model is CPU-bound and `embed` takes `&mut`, so calls go through a
/// `Mutex` inside `spawn_blocking` — embedding never blocks the async
/// runtime.
pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    dimension: usize,
}

impl FastEmbedder {
    /// Initialize the multilingual model, downloading it into `cache_dir` on
    /// first use.
    pub fn new(cache_dir: &Path) -> Result<Self, EmbeddingError> {
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::ParaphraseMLMpnetBaseV2)
                .with_cache_dir(cache_dir.to_path_buf())
                .with_show_download_progress(false),
        )
        .map_err(|e| EmbeddingError::Model(format!("failed to initialize embedding model: {e}")))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            dimension: EMBEDDING_DIMENSION,
        })
    }

    fn encode(
        model: &Arc<Mutex<TextEmbedding>>,
        texts: Vec<String>,
        dimension: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut guard = model
            .lock()
            .map_err(|_| EmbeddingError::Model("embedding model lock poisoned".to_string()))?;

        let vectors = guard
            .embed(texts, None)
            .map_err(|e| EmbeddingError::Model(e.to_string()))?;

        for vector in &vectors {
            if vector.len() != dimension {
                return Err(EmbeddingError::Dimension {
                    expected: dimension,
                    got: vector.len(),
                });
            }
        }

        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let texts = vec![text.to_string()];
        let mut vectors = self.embed_batch(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Model("model returned no vector".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        let dimension = self.dimension;

        tokio::task::spawn_blocking(move || Self::encode(&model, texts, dimension))
            .await
            .map_err(|e| EmbeddingError::Task(e.to_string()))?
    }
}

// ============================================================================
// Deterministic stub
// ============================================================================

/// Hash-based embedder for tests and offline runs.
///
/// Identical text always maps to the identical unit vector (cosine distance
/// 0), which is geometrically meaningful enough for KNN correctness tests.
/// Call counts are tracked so seeding idempotence can be asserted.
pub struct StubEmbedder {
    dimension: usize,
    calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `embed`/`embed_batch` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        // FNV-1a over the text seeds an xorshift generator; normalize so
        // cosine distance behaves.
        let mut seed: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in text.as_bytes() {
            seed ^= u64::from(*byte);
            seed = seed.wrapping_mul(0x0000_0100_0000_01b3);
        }
        if seed == 0 {
            seed = 0x9e37_79b9_7f4a_7c15;
        }

        let mut state = seed;
        let mut vector = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            vector.push(((state % 2000) as f32 / 1000.0) - 1.0);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_is_deterministic() {
        let stub = StubEmbedder::new(16);
        let a = stub.embed("du gainage tous les jours").await.unwrap();
        let b = stub.embed("du gainage tous les jours").await.unwrap();
        let c = stub.embed("autre chose").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn test_stub_vectors_are_normalized() {
        let stub = StubEmbedder::new(32);
        let v = stub.embed("squat").await.unwrap();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_stub_counts_calls() {
        let stub = StubEmbedder::new(8);
        assert_eq!(stub.calls(), 0);
        let _ = stub.embed("un").await.unwrap();
        let _ = stub
            .embed_batch(&["deux".to_string(), "trois".to_string()])
            .await
            .unwrap();
        assert_eq!(stub.calls(), 2);
    }
}
