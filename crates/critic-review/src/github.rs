use async_trait::async_trait;
use critic_core::{ChangedUnit, CriticError, PullRequestRef, ReviewMode};
use octocrab::models::repos::DiffEntry;
use tracing::debug;

use crate::publish::CommentSink;

const FILES_PER_PAGE: &str = "100";

const USER_AGENT: &str = concat!("pr-critic/", env!("CARGO_PKG_VERSION"));

/// Source of a pull request's changes.
#[async_trait]
pub trait DiffSource: Send + Sync {
    /// Fetch the reviewable units of `pr` in the requested mode.
    ///
    /// # Errors
    ///
    /// Returns [`CriticError::Fetch`] if the host cannot be reached or
    /// rejects the request.
    async fn fetch_changed_units(
        &self,
        pr: &PullRequestRef,
        mode: ReviewMode,
    ) -> Result<Vec<ChangedUnit>, CriticError>;
}

/// GitHub client for fetching pull request changes and posting comments.
pub struct GitHubClient {
    octocrab: octocrab::Octocrab,
    http: reqwest::Client,
    token: String,
    base_url: String,
}

impl GitHubClient {
    /// Create a client against `base_url` (GitHub Enterprise or the public API).
    ///
    /// # Errors
    ///
    /// Returns [`CriticError::Config`] if the base URL is invalid or the
    /// client cannot be built.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use critic_core::DEFAULT_SOURCE_HOST_BASE_URL;
    /// use critic_review::github::GitHubClient;
    ///
    /// let client = GitHubClient::new("ghp_xxxx", DEFAULT_SOURCE_HOST_BASE_URL).unwrap();
    /// ```
    pub fn new(token: &str, base_url: &str) -> Result<Self, CriticError> {
        let base_url = base_url.trim_end_matches('/').to_string();

        let octocrab = octocrab::Octocrab::builder()
            .personal_token(token.to_string())
            .base_uri(base_url.as_str())
            .map_err(|e| CriticError::Config(format!("invalid source host URL '{base_url}': {e}")))?
            .build()
            .map_err(|e| CriticError::Config(format!("failed to create GitHub client: {e}")))?;

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CriticError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            octocrab,
            http,
            token: token.to_string(),
            base_url,
        })
    }

    /// Fetch the unified diff for a pull request.
    ///
    /// # Errors
    ///
    /// Returns [`CriticError::Fetch`] on network or API errors.
    pub async fn get_pr_diff(&self, pr: &PullRequestRef) -> Result<String, CriticError> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}",
            self.base_url, pr.owner, pr.repo, pr.number
        );

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github.v3.diff")
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
            .map_err(|e| CriticError::Fetch(format!("failed to fetch PR diff: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CriticError::Fetch(format!(
                "GitHub API error {status}: {body}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| CriticError::Fetch(format!("failed to read diff response: {e}")))
    }

    /// List the changed files of a pull request with their patches.
    ///
    /// # Errors
    ///
    /// Returns [`CriticError::Fetch`] on network or API errors.
    pub async fn list_file_patches(
        &self,
        pr: &PullRequestRef,
    ) -> Result<Vec<(String, Option<String>)>, CriticError> {
        let route = format!("/repos/{}/{}/pulls/{}/files", pr.owner, pr.repo, pr.number);
        let first: octocrab::Page<DiffEntry> = self
            .octocrab
            .get(route, Some(&[("per_page", FILES_PER_PAGE)]))
            .await
            .map_err(|e| CriticError::Fetch(format!("failed to list changed files: {e}")))?;

        let entries = self
            .octocrab
            .all_pages(first)
            .await
            .map_err(|e| CriticError::Fetch(format!("failed to page changed files: {e}")))?;

        Ok(entries
            .into_iter()
            .map(|entry| (entry.filename, entry.patch))
            .collect())
    }
}

#[async_trait]
impl DiffSource for GitHubClient {
    async fn fetch_changed_units(
        &self,
        pr: &PullRequestRef,
        mode: ReviewMode,
    ) -> Result<Vec<ChangedUnit>, CriticError> {
        match mode {
            ReviewMode::Files => Ok(units_from_files(self.list_file_patches(pr).await?)),
            ReviewMode::Patch => Ok(units_from_patch(self.get_pr_diff(pr).await?)),
        }
    }
}

#[async_trait]
impl CommentSink for GitHubClient {
    async fn post_comment(&self, pr: &PullRequestRef, body: &str) -> Result<(), CriticError> {
        self.octocrab
            .issues(&pr.owner, &pr.repo)
            .create_comment(pr.number, body)
            .await
            .map_err(|e| CriticError::Publish(format!("failed to post comment: {e}")))?;
        Ok(())
    }
}

/// Build file units from `(filename, patch)` pairs, in host order.
///
/// Binary files and very large diffs come back without a patch and are
/// skipped.
///
/// # Examples
///
/// ```
/// use critic_review::github::units_from_files;
///
/// let units = units_from_files(vec![
///     ("a.py".into(), Some("@@ -1 +1 @@\n-a\n+b\n".into())),
///     ("logo.png".into(), None),
/// ]);
/// assert_eq!(units.len(), 1);
/// assert_eq!(units[0].label(), "a.py");
/// ```
pub fn units_from_files(files: Vec<(String, Option<String>)>) -> Vec<ChangedUnit> {
    files
        .into_iter()
        .filter_map(|(filename, patch)| match patch {
            Some(patch) if !patch.is_empty() => Some(ChangedUnit::file(filename, patch)),
            _ => {
                debug!(file = %filename, "no patch available, skipping");
                None
            }
        })
        .collect()
}

/// Wrap a unified patch as a single unit. An empty patch yields no units.
///
/// # Examples
///
/// ```
/// use critic_review::github::units_from_patch;
///
/// assert!(units_from_patch(String::new()).is_empty());
/// assert_eq!(units_from_patch("diff --git a/x b/x\n".into()).len(), 1);
/// ```
pub fn units_from_patch(patch: String) -> Vec<ChangedUnit> {
    if patch.trim().is_empty() {
        debug!("pull request has an empty patch");
        return Vec::new();
    }
    vec![ChangedUnit::patch(patch)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_units_keep_host_order() {
        let units = units_from_files(vec![
            ("z.rs".into(), Some("+z\n".into())),
            ("a.rs".into(), Some("+a\n".into())),
        ]);
        let labels: Vec<_> = units.iter().map(|u| u.label()).collect();
        assert_eq!(labels, vec!["z.rs", "a.rs"]);
    }

    #[test]
    fn files_without_patch_are_skipped() {
        let units = units_from_files(vec![
            ("bin.dat".into(), None),
            ("empty.txt".into(), Some(String::new())),
        ]);
        assert!(units.is_empty());
    }

    #[test]
    fn whitespace_patch_is_empty() {
        assert!(units_from_patch("\n  \n".into()).is_empty());
    }

    #[test]
    fn patch_unit_has_no_path() {
        let units = units_from_patch("diff --git a/x b/x\n".into());
        assert!(units[0].path.is_none());
    }

    #[tokio::test]
    async fn client_rejects_malformed_base_url() {
        assert!(GitHubClient::new("token", "not a url").is_err());
    }

    #[tokio::test]
    async fn client_trims_trailing_slash() {
        let client = GitHubClient::new("token", "https://ghe.example.com/api/v3/").unwrap();
        assert_eq!(client.base_url, "https://ghe.example.com/api/v3");
    }
}
