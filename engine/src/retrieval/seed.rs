//! One-time knowledge-base bootstrap.
//!
//! Reads the passage dataset, embeds every `content` field in one batch and
//! upserts the results into a fresh collection. The whole pass is skipped —
//! zero embedding calls, zero upserts — when the collection already exists,
//! so process restarts never re-embed.

use std::path::Path;

use serde::Deserialize;

use crate::embeddings::{Embedder, EmbeddingError};
use crate::retrieval::store::{IndexError, PassagePayload, VectorIndex};

/// One dataset entry: `{content, title?, video?, category?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedRecord {
    pub content: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub video: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// What a seeding pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub indexed: usize,
    pub skipped: usize,
    /// True when the collection already existed and nothing ran.
    pub already_seeded: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("dataset read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("dataset is not a JSON array: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Seed `collection` from the JSON dataset at `dataset_path`.
///
/// Malformed records (non-object entries, missing or blank `content`) are
/// skipped with a warning and do not abort the pass. Record ids are
/// `"{category}_{ordinal}"` where `ordinal` is the record's position in the
/// dataset file, so ids stay stable across re-seeds even when malformed
/// records are dropped.
pub async fn seed_collection(
    embedder: &dyn Embedder,
    index: &VectorIndex,
    collection: &str,
    dataset_path: &Path,
) -> Result<SeedReport, SeedError> {
    if index.collection_exists(collection).await? {
        tracing::info!(collection, "collection already exists; skipping seeding");
        return Ok(SeedReport {
            already_seeded: true,
            ..SeedReport::default()
        });
    }

    let raw = tokio::fs::read_to_string(dataset_path).await?;
    let entries: Vec<serde_json::Value> = serde_json::from_str(&raw)?;

    let mut records: Vec<(usize, SeedRecord)> = Vec::new();
    let mut skipped = 0usize;
    for (ordinal, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<SeedRecord>(entry) {
            Ok(record) if !record.content.trim().is_empty() => {
                records.push((ordinal, record));
            }
            Ok(_) => {
                tracing::warn!(ordinal, "seed record has no content; skipping");
                skipped += 1;
            }
            Err(e) => {
                tracing::warn!(ordinal, error = %e, "malformed seed record; skipping");
                skipped += 1;
            }
        }
    }

    let contents: Vec<String> = records.iter().map(|(_, r)| r.content.clone()).collect();
    let vectors = embedder.embed_batch(&contents).await?;

    // Only create the collection once the embeddings are in hand — a failed
    // embedding pass must not leave an empty collection behind, or the
    // existence check would suppress every retry.
    index
        .create_collection(collection, embedder.dimension())
        .await?;

    for ((ordinal, record), vector) in records.into_iter().zip(vectors) {
        let category = record
            .category
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or("general")
            .to_string();
        let passage_id = format!("{category}_{ordinal}");

        index
            .upsert(
                collection,
                &passage_id,
                vector,
                PassagePayload {
                    title: record.title,
                    content: record.content,
                    media_url: record.video.filter(|v| !v.is_empty()),
                    category,
                },
            )
            .await?;
    }

    let indexed = contents.len();
    tracing::info!(collection, indexed, skipped, "knowledge base seeded");

    Ok(SeedReport {
        indexed,
        skipped,
        already_seeded: false,
    })
}
