//! Coach engine — retrieval-augmented conversation engine for
//! fitness/nutrition questions.
//!
//! The engine grounds a language model's answers in passages retrieved from a
//! local vector index and streams the final answer alongside media
//! recommendations derived from the retrieved content.

pub mod actors;
pub mod config;
pub mod embeddings;
pub mod llm;
pub mod retrieval;
