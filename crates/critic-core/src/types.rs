use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Rough characters-per-token ratio used for every size estimate.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of a piece of text.
///
/// # Examples
///
/// ```
/// use critic_core::estimate_tokens;
///
/// assert_eq!(estimate_tokens(""), 0);
/// assert_eq!(estimate_tokens("abcd"), 1);
/// assert_eq!(estimate_tokens("abcde"), 2);
/// ```
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// How changes are pulled from the source-control host.
///
/// # Examples
///
/// ```
/// use critic_core::ReviewMode;
///
/// let mode: ReviewMode = "patch".parse().unwrap();
/// assert_eq!(mode, ReviewMode::Patch);
/// assert_eq!(ReviewMode::default(), ReviewMode::Files);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewMode {
    /// One unit per changed file.
    #[default]
    Files,
    /// One unit holding the whole unified patch.
    Patch,
}

impl fmt::Display for ReviewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewMode::Files => write!(f, "files"),
            ReviewMode::Patch => write!(f, "patch"),
        }
    }
}

impl FromStr for ReviewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "files" => Ok(ReviewMode::Files),
            "patch" => Ok(ReviewMode::Patch),
            other => Err(format!("unknown mode '{other}', expected 'files' or 'patch'")),
        }
    }
}

/// How aggregated reviews are turned into pull request comments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommentStyle {
    /// One comment per reviewed unit.
    #[default]
    PerUnit,
    /// A single comment holding every unit's review.
    Combined,
}

impl fmt::Display for CommentStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommentStyle::PerUnit => write!(f, "per-unit"),
            CommentStyle::Combined => write!(f, "combined"),
        }
    }
}

impl FromStr for CommentStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "per-unit" | "per-file" => Ok(CommentStyle::PerUnit),
            "combined" | "single" => Ok(CommentStyle::Combined),
            other => Err(format!(
                "unknown comment style '{other}', expected 'per-unit' or 'combined'"
            )),
        }
    }
}

/// Identifies a pull request on the source-control host.
///
/// # Examples
///
/// ```
/// use critic_core::PullRequestRef;
///
/// let pr = PullRequestRef::new("octocat/hello-world", 42).unwrap();
/// assert_eq!(pr.owner, "octocat");
/// assert_eq!(pr.to_string(), "octocat/hello-world#42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    /// Repository owner (user or organisation).
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Pull request number.
    pub number: u64,
}

impl PullRequestRef {
    /// Build a reference from an `owner/repo` slug and a PR number.
    ///
    /// # Errors
    ///
    /// Returns a message if the slug is not `owner/repo` or the number is zero.
    pub fn new(slug: &str, number: u64) -> Result<Self, String> {
        let Some((owner, repo)) = slug.trim().split_once('/') else {
            return Err(format!("invalid repository '{slug}', expected owner/repo"));
        };
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return Err(format!("invalid repository '{slug}', expected owner/repo"));
        }
        if number == 0 {
            return Err("pull request number must be positive".into());
        }
        Ok(Self {
            owner: owner.to_string(),
            repo: repo.trim_end_matches(".git").to_string(),
            number,
        })
    }
}

impl fmt::Display for PullRequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// One reviewable unit: a single file's diff, or the whole patch.
///
/// # Examples
///
/// ```
/// use critic_core::ChangedUnit;
///
/// let unit = ChangedUnit::file("src/lib.rs", "@@ -1 +1 @@\n-a\n+b\n");
/// assert_eq!(unit.label(), "src/lib.rs");
/// assert!(unit.size_estimate > 0);
///
/// let patch = ChangedUnit::patch("diff --git a/x b/x\n");
/// assert!(patch.path.is_none());
/// assert_eq!(patch.label(), "patch");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedUnit {
    /// File path; `None` in patch mode.
    pub path: Option<String>,
    /// Raw diff or patch text.
    pub content: String,
    /// Estimated token count of `content`.
    pub size_estimate: usize,
}

impl ChangedUnit {
    /// A unit for a single file's diff.
    pub fn file(path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            path: Some(path.into()),
            size_estimate: estimate_tokens(&content),
            content,
        }
    }

    /// A unit for the whole unified patch.
    pub fn patch(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            path: None,
            size_estimate: estimate_tokens(&content),
            content,
        }
    }

    /// Human-readable identifier used in logs and failure reports.
    pub fn label(&self) -> &str {
        self.path.as_deref().unwrap_or("patch")
    }
}

/// Position of a chunk within its source unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRef {
    /// Index of the source unit in the accepted-unit list.
    pub unit_index: usize,
    /// Zero-based position of this chunk within the unit.
    pub sequence_index: usize,
    /// Number of chunks the unit was split into.
    pub total_chunks: usize,
}

impl fmt::Display for ChunkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sequence_index + 1, self.total_chunks)
    }
}

/// A completion-ready prompt covering one slice of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptChunk {
    /// Where this chunk sits in its source unit.
    pub chunk: ChunkRef,
    /// Label of the source unit (file path or `"patch"`).
    pub unit_label: String,
    /// `None` for patch units.
    pub path: Option<String>,
    /// The slice of the unit's content carried by this chunk.
    pub content: String,
    /// Full prompt text sent to the model.
    pub text: String,
    /// Set when a single hunk exceeded the size ceiling and was passed through unsplit.
    pub oversized: bool,
}

/// Outcome of completing one [`PromptChunk`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResult {
    pub chunk: ChunkRef,
    pub unit_label: String,
    pub path: Option<String>,
    /// Model output; empty on failure.
    pub text: String,
    pub success: bool,
    pub error: Option<String>,
    /// Carried over from the chunk so the aggregator can flag truncation.
    pub oversized: bool,
}

impl CompletionResult {
    /// A successful result for `chunk`.
    pub fn succeeded(chunk: &PromptChunk, text: impl Into<String>) -> Self {
        Self {
            chunk: chunk.chunk,
            unit_label: chunk.unit_label.clone(),
            path: chunk.path.clone(),
            text: text.into(),
            success: true,
            error: None,
            oversized: chunk.oversized,
        }
    }

    /// A failed result for `chunk`.
    pub fn failed(chunk: &PromptChunk, error: impl Into<String>) -> Self {
        Self {
            chunk: chunk.chunk,
            unit_label: chunk.unit_label.clone(),
            path: chunk.path.clone(),
            text: String::new(),
            success: false,
            error: Some(error.into()),
            oversized: chunk.oversized,
        }
    }
}

/// What a review comment is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "path")]
pub enum CommentTarget {
    /// A single changed file.
    File(String),
    /// The whole patch.
    Patch,
}

impl fmt::Display for CommentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommentTarget::File(path) => write!(f, "{path}"),
            CommentTarget::Patch => write!(f, "patch"),
        }
    }
}

/// A merged review ready to be posted.
///
/// # Examples
///
/// ```
/// use critic_core::{CommentTarget, ReviewComment};
///
/// let comment = ReviewComment {
///     target: CommentTarget::File("src/auth.rs".into()),
///     body: "Looks fine.".into(),
///     ordering_key: 0,
/// };
/// assert_eq!(comment.target.to_string(), "src/auth.rs");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewComment {
    pub target: CommentTarget,
    /// Markdown body.
    pub body: String,
    /// Position of the source unit; comments are posted in this order.
    pub ordering_key: usize,
}

/// A comment that could not be posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishFailure {
    pub target: String,
    pub error: String,
}

/// Summary of the publishing stage.
///
/// # Examples
///
/// ```
/// use critic_core::PublishOutcome;
///
/// let outcome = PublishOutcome::default();
/// assert_eq!(outcome.attempted, 0);
/// assert!(outcome.is_clean());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<PublishFailure>,
}

impl PublishOutcome {
    /// `true` when every attempted comment was posted.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Stages of a review run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStage {
    Fetching,
    Filtering,
    Prompting,
    Completing,
    Aggregating,
    Publishing,
    Done,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Fetching => "fetching",
            RunStage::Filtering => "filtering",
            RunStage::Prompting => "prompting",
            RunStage::Completing => "completing",
            RunStage::Aggregating => "aggregating",
            RunStage::Publishing => "publishing",
            RunStage::Done => "done",
            RunStage::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn review_mode_from_str() {
        assert_eq!("files".parse::<ReviewMode>().unwrap(), ReviewMode::Files);
        assert_eq!("PATCH".parse::<ReviewMode>().unwrap(), ReviewMode::Patch);
        assert!("diff".parse::<ReviewMode>().is_err());
    }

    #[test]
    fn comment_style_accepts_aliases() {
        assert_eq!(
            "per_file".parse::<CommentStyle>().unwrap(),
            CommentStyle::PerUnit
        );
        assert_eq!(
            "Combined".parse::<CommentStyle>().unwrap(),
            CommentStyle::Combined
        );
        assert!("threaded".parse::<CommentStyle>().is_err());
        assert_eq!(CommentStyle::PerUnit.to_string(), "per-unit");
    }

    #[test]
    fn pull_request_ref_rejects_bad_slugs() {
        assert!(PullRequestRef::new("no-slash", 1).is_err());
        assert!(PullRequestRef::new("/repo", 1).is_err());
        assert!(PullRequestRef::new("a/b/c", 1).is_err());
        assert!(PullRequestRef::new("a/b", 0).is_err());
        let pr = PullRequestRef::new("a/b.git", 7).unwrap();
        assert_eq!(pr.repo, "b");
    }

    #[test]
    fn chunk_ref_displays_one_based() {
        let chunk = ChunkRef {
            unit_index: 0,
            sequence_index: 1,
            total_chunks: 3,
        };
        assert_eq!(chunk.to_string(), "2/3");
    }

    #[test]
    fn completion_result_serializes_camel_case() {
        let chunk = PromptChunk {
            chunk: ChunkRef {
                unit_index: 0,
                sequence_index: 0,
                total_chunks: 1,
            },
            unit_label: "a.py".into(),
            path: Some("a.py".into()),
            content: "+x".into(),
            text: "review +x".into(),
            oversized: false,
        };
        let result = CompletionResult::failed(&chunk, "timeout");
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("unitLabel").is_some());
        assert_eq!(json["chunk"]["totalChunks"], 1);
        assert_eq!(json["success"], false);
    }

    #[test]
    fn comment_target_serializes_tagged() {
        let json = serde_json::to_value(CommentTarget::File("a.rs".into())).unwrap();
        assert_eq!(json["kind"], "file");
        assert_eq!(json["path"], "a.rs");
        let json = serde_json::to_value(CommentTarget::Patch).unwrap();
        assert_eq!(json["kind"], "patch");
    }
}
