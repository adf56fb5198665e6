use std::fmt::Write;

use async_trait::async_trait;
use critic_core::{
    CommentStyle, CriticError, PublishFailure, PublishOutcome, PullRequestRef, ReviewComment,
};
use tracing::{info, warn};

/// Destination for review comments.
#[async_trait]
pub trait CommentSink: Send + Sync {
    /// Post one general comment on the pull request.
    ///
    /// # Errors
    ///
    /// Returns [`CriticError::Publish`] if the comment was not accepted.
    async fn post_comment(&self, pr: &PullRequestRef, body: &str) -> Result<(), CriticError>;
}

/// Sink that prints comments instead of posting them. Used for dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

#[async_trait]
impl CommentSink for StdoutSink {
    async fn post_comment(&self, pr: &PullRequestRef, body: &str) -> Result<(), CriticError> {
        println!("----- comment on {pr} -----");
        println!("{body}");
        Ok(())
    }
}

/// Merge every comment into one body, in ordering-key order.
///
/// # Examples
///
/// ```
/// use critic_core::{CommentTarget, ReviewComment};
/// use critic_review::publish::combine;
///
/// let c = |key, body: &str| ReviewComment {
///     target: CommentTarget::File(format!("f{key}")),
///     body: body.into(),
///     ordering_key: key,
/// };
/// let merged = combine(&[c(1, "B"), c(0, "A")]);
/// assert!(merged.find('A').unwrap() < merged.find('B').unwrap());
/// ```
pub fn combine(comments: &[ReviewComment]) -> String {
    let mut sorted: Vec<&ReviewComment> = comments.iter().collect();
    sorted.sort_by_key(|c| c.ordering_key);

    let mut body = String::from("## Automated review\n");
    for comment in sorted {
        let _ = write!(body, "\n{}\n---\n", comment.body.trim_end());
    }
    body
}

/// Post the aggregated comments.
///
/// A failed post is recorded and publishing moves on to the next comment.
/// With [`CommentStyle::Combined`] a single comment is posted, and it is
/// skipped entirely when there is nothing to say.
pub async fn publish(
    sink: &dyn CommentSink,
    pr: &PullRequestRef,
    comments: &[ReviewComment],
    style: CommentStyle,
) -> PublishOutcome {
    let mut outcome = PublishOutcome::default();
    if comments.is_empty() {
        return outcome;
    }

    let posts: Vec<(String, String)> = match style {
        CommentStyle::Combined => vec![("combined".to_string(), combine(comments))],
        CommentStyle::PerUnit => {
            let mut sorted: Vec<&ReviewComment> = comments.iter().collect();
            sorted.sort_by_key(|c| c.ordering_key);
            sorted
                .into_iter()
                .map(|c| (c.target.to_string(), c.body.clone()))
                .collect()
        }
    };

    for (target, body) in posts {
        outcome.attempted += 1;
        match sink.post_comment(pr, &body).await {
            Ok(()) => {
                outcome.succeeded += 1;
                info!(%target, "posted review comment");
            }
            Err(e) => {
                outcome.failed += 1;
                warn!(%target, error = %e, "failed to post review comment");
                outcome.failures.push(PublishFailure {
                    target,
                    error: e.to_string(),
                });
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use critic_core::CommentTarget;

    use super::*;

    #[derive(Default)]
    struct Recording {
        posted: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl CommentSink for Recording {
        async fn post_comment(&self, _pr: &PullRequestRef, body: &str) -> Result<(), CriticError> {
            if self.fail_on.is_some_and(|needle| body.contains(needle)) {
                return Err(CriticError::Publish("HTTP 403".into()));
            }
            self.posted.lock().unwrap().push(body.to_string());
            Ok(())
        }
    }

    fn pr() -> PullRequestRef {
        PullRequestRef::new("o/r", 9).unwrap()
    }

    fn comment(key: usize, path: &str) -> ReviewComment {
        ReviewComment {
            target: CommentTarget::File(path.into()),
            body: format!("review of {path}"),
            ordering_key: key,
        }
    }

    #[tokio::test]
    async fn per_unit_posts_in_order() {
        let sink = Recording::default();
        let comments = [comment(1, "b.py"), comment(0, "a.py")];
        let outcome = publish(&sink, &pr(), &comments, CommentStyle::PerUnit).await;
        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.succeeded, 2);
        assert!(outcome.is_clean());
        let posted = sink.posted.lock().unwrap();
        assert_eq!(*posted, vec!["review of a.py", "review of b.py"]);
    }

    #[tokio::test]
    async fn failure_does_not_stop_remaining_posts() {
        let sink = Recording {
            fail_on: Some("a.py"),
            ..Default::default()
        };
        let comments = [comment(0, "a.py"), comment(1, "b.py")];
        let outcome = publish(&sink, &pr(), &comments, CommentStyle::PerUnit).await;
        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.failures[0].target, "a.py");
        assert!(outcome.failures[0].error.contains("403"));
        assert_eq!(sink.posted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn combined_posts_once() {
        let sink = Recording::default();
        let comments = [comment(0, "a.py"), comment(1, "b.py")];
        let outcome = publish(&sink, &pr(), &comments, CommentStyle::Combined).await;
        assert_eq!(outcome.attempted, 1);
        let posted = sink.posted.lock().unwrap();
        assert!(posted[0].contains("review of a.py"));
        assert!(posted[0].contains("review of b.py"));
    }

    #[tokio::test]
    async fn nothing_to_post() {
        let sink = Recording::default();
        let outcome = publish(&sink, &pr(), &[], CommentStyle::Combined).await;
        assert_eq!(outcome, PublishOutcome::default());
    }
}
