//! LLM review orchestration for pull requests.
//!
//! Provides the review pipeline: diff acquisition from GitHub, prompt
//! construction and chunking, completion with retry, aggregation of
//! per-chunk reviews, and comment publishing.

pub mod aggregate;
pub mod github;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod publish;
