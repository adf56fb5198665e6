use std::path::PathBuf;

/// Errors that can occur during a review run.
///
/// `Config` and `Fetch` are fatal and abort the run. `Completion` and
/// `Publish` are recovered per chunk / per comment by the pipeline and only
/// surface in the final report. The binary converts to a `miette` report at
/// the boundary, so every variant carries a diagnostic code.
///
/// # Examples
///
/// ```
/// use critic_core::CriticError;
///
/// let err = CriticError::Config("missing API_KEY".into());
/// assert!(err.to_string().contains("missing API_KEY"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CriticError {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(
        code(critic::config),
        help("check the environment variables documented in the README")
    )]
    Config(String),

    /// Diff retrieval from the source-control host failed.
    #[error("failed to fetch pull request changes: {0}")]
    #[diagnostic(
        code(critic::fetch),
        help("verify SOURCE_HOST_TOKEN, REPOSITORY and SOURCE_HOST_BASE_URL")
    )]
    Fetch(String),

    /// Completion API failure for a single chunk.
    #[error("completion error: {0}")]
    #[diagnostic(code(critic::completion))]
    Completion(String),

    /// Posting a comment to the pull request failed.
    #[error("publish error: {0}")]
    #[diagnostic(code(critic::publish))]
    Publish(String),

    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    #[diagnostic(code(critic::io))]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    #[diagnostic(code(critic::serialization))]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    #[diagnostic(code(critic::toml))]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    #[diagnostic(code(critic::file_not_found))]
    FileNotFound(PathBuf),
}
