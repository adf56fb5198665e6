//! Core types, configuration, and error handling for pr-critic.
//!
//! This crate provides the shared foundation used by the other crates:
//! - [`CriticError`]: unified error type using `thiserror`
//! - [`ReviewRequest`] / [`Settings`]: run configuration resolved from the
//!   environment, optionally layered over `.critic.toml`
//! - Pipeline entities: [`ChangedUnit`], [`PromptChunk`],
//!   [`CompletionResult`], [`ReviewComment`], [`PublishOutcome`]

mod config;
mod error;
mod types;

pub use config::{
    Credentials, FileConfig, LlmSection, ReviewRequest, ReviewSection, Settings, SourceSection,
    DEFAULT_COMPLETION_BASE_URL, DEFAULT_CONCURRENCY, DEFAULT_CONTEXT_WINDOW, DEFAULT_LANGUAGE,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_SOURCE_HOST_BASE_URL,
    DEFAULT_TEMPERATURE,
};
pub use error::CriticError;
pub use types::{
    estimate_tokens, ChangedUnit, ChunkRef, CommentStyle, CommentTarget, CompletionResult,
    PromptChunk, PublishFailure, PublishOutcome, PullRequestRef, ReviewComment, ReviewMode,
    RunStage, CHARS_PER_TOKEN,
};

/// A convenience `Result` type for pr-critic operations.
pub type Result<T> = std::result::Result<T, CriticError>;
