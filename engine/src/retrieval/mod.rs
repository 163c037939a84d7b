//! Retrieval subsystem: query → ranked context passages + media
//! recommendations.
//!
//! The retriever owns no state across calls — it is a pure function of the
//! query text plus whatever the shared vector index currently holds.

use std::sync::Arc;

use shared_types::{Recommendation, RecommendationMap, RetrievedPassage};

use crate::embeddings::{Embedder, EmbeddingError};

pub mod seed;
pub mod store;

pub use store::{IndexError, PassagePayload, VecStore, VectorIndex};

/// Fixed number of nearest neighbors fetched per query.
pub const TOP_K: usize = 5;

/// Only hits ranked strictly below this produce a recommendation.
pub const RECOMMENDATION_CUTOFF: usize = 3;

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("embedding service unavailable: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector index unavailable: {0}")]
    Index(#[from] IndexError),
}

/// Converts a query string into grounded context plus a recommendation map.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: VectorIndex,
    collection: String,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: VectorIndex, collection: impl Into<String>) -> Self {
        Self {
            embedder,
            index,
            collection: collection.into(),
        }
    }

    /// Retrieve context for a query.
    ///
    /// Returns the formatted context text (ranked order, rule-separated) and
    /// the recommendations derived from the top-ranked hits. An index with
    /// zero documents yields `("", {})` — that is not an error.
    pub async fn retrieve(&self, query: &str) -> Result<(String, RecommendationMap), RetrievalError> {
        let vector = self.embedder.embed(query).await?;
        let passages = self.index.query(&self.collection, vector, TOP_K).await?;

        tracing::debug!(
            collection = %self.collection,
            hits = passages.len(),
            "retrieved context passages"
        );

        Ok(assemble(&passages))
    }
}

/// Build the context text and recommendation map from ranked passages.
pub(crate) fn assemble(passages: &[RetrievedPassage]) -> (String, RecommendationMap) {
    let context = passages
        .iter()
        .map(|p| format!("**{}**\n{}", p.title, p.body))
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);

    let mut recommendations = RecommendationMap::new();
    for passage in passages {
        if passage.rank >= RECOMMENDATION_CUTOFF {
            continue;
        }
        let Some(video_url) = passage.media_url.as_deref().filter(|u| !u.is_empty()) else {
            continue;
        };
        let id = format!("vid_{}", passage.rank);
        recommendations.insert(
            id.clone(),
            Recommendation {
                id,
                title: passage.title.clone(),
                video_url: video_url.to_string(),
                thumbnail_url: youtube_thumbnail(video_url).unwrap_or_default(),
            },
        );
    }

    (context, recommendations)
}

/// Derive a predictable thumbnail URL for YouTube-hosted videos.
///
/// Other hosts have no stable thumbnail convention and yield `None`.
pub fn youtube_thumbnail(video_url: &str) -> Option<String> {
    if !video_url.contains("youtube.com") {
        return None;
    }
    let (_, after) = video_url.split_once("v=")?;
    let video_id = after.split('&').next().filter(|id| !id.is_empty())?;
    Some(format!(
        "https://img.youtube.com/vi/{video_id}/maxresdefault.jpg"
    ))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(rank: usize, title: &str, media_url: Option<&str>) -> RetrievedPassage {
        RetrievedPassage {
            title: title.to_string(),
            body: format!("détails sur {title}"),
            media_url: media_url.map(str::to_string),
            distance: 0.1 * (rank as f32 + 1.0),
            rank,
        }
    }

    #[test]
    fn test_assemble_joins_context_in_ranked_order() {
        let passages = vec![
            passage(0, "Squat technique", None),
            passage(1, "Nutrition", None),
        ];
        let (context, recommendations) = assemble(&passages);
        assert_eq!(
            context,
            "**Squat technique**\ndétails sur Squat technique\n\n---\n\n**Nutrition**\ndétails sur Nutrition"
        );
        assert!(recommendations.is_empty());
    }

    #[test]
    fn test_assemble_empty_result_set() {
        let (context, recommendations) = assemble(&[]);
        assert_eq!(context, "");
        assert!(recommendations.is_empty());
    }

    #[test]
    fn test_recommendations_only_from_top_three() {
        let passages = vec![
            passage(0, "a", Some("https://youtube.com/watch?v=aaa")),
            passage(1, "b", None),
            passage(2, "c", Some("https://youtube.com/watch?v=ccc")),
            passage(3, "d", Some("https://youtube.com/watch?v=ddd")),
            passage(4, "e", Some("https://youtube.com/watch?v=eee")),
        ];
        let (_, recommendations) = assemble(&passages);

        assert_eq!(recommendations.len(), 2);
        assert_eq!(recommendations["vid_0"].video_url, "https://youtube.com/watch?v=aaa");
        assert_eq!(recommendations["vid_2"].video_url, "https://youtube.com/watch?v=ccc");
        assert!(!recommendations.contains_key("vid_1"));
        assert!(!recommendations.contains_key("vid_3"));
    }

    #[test]
    fn test_recommendation_ids_follow_rank() {
        let passages = vec![
            passage(0, "a", Some("https://youtube.com/watch?v=one")),
            passage(1, "b", Some("https://youtube.com/watch?v=two")),
            passage(2, "c", Some("https://youtube.com/watch?v=three")),
        ];
        let (_, recommendations) = assemble(&passages);
        for rank in 0..3 {
            let id = format!("vid_{rank}");
            assert_eq!(recommendations[&id].id, id);
        }
    }

    #[test]
    fn test_youtube_thumbnail_from_query_parameter() {
        assert_eq!(
            youtube_thumbnail("https://youtube.com/watch?v=abc123").as_deref(),
            Some("https://img.youtube.com/vi/abc123/maxresdefault.jpg")
        );
        assert_eq!(
            youtube_thumbnail("https://www.youtube.com/watch?v=abc123&t=42").as_deref(),
            Some("https://img.youtube.com/vi/abc123/maxresdefault.jpg")
        );
    }

    #[test]
    fn test_youtube_thumbnail_rejects_other_hosts() {
        assert_eq!(youtube_thumbnail("https://vimeo.com/12345"), None);
        assert_eq!(youtube_thumbnail("https://youtube.com/shorts/abc"), None);
        assert_eq!(youtube_thumbnail("https://youtube.com/watch?v="), None);
    }
}
