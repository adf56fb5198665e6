//! Merging per-chunk completions back into per-unit review comments.

use std::collections::BTreeMap;
use std::fmt::Write;

use critic_core::{CommentTarget, CompletionResult, ReviewComment};
use serde::Serialize;

/// A unit with at least one failed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitFailure {
    pub unit_label: String,
    /// One entry per failed chunk, in chunk order.
    pub errors: Vec<String>,
}

/// Output of [`aggregate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    /// One comment per unit, ordered by unit position.
    pub comments: Vec<ReviewComment>,
    /// Every unit with a failed chunk, including those that still got a comment.
    pub failed_units: Vec<UnitFailure>,
}

/// Group completions by unit and merge each group into one comment.
///
/// Chunks are ordered by sequence index regardless of the order their
/// completions arrived in. A failed chunk keeps its place in the body as a
/// visible placeholder, so a partially failed unit still gets a comment.
/// A unit where every chunk failed gets no comment, only an entry in
/// `failed_units`.
/// Duplicate results for the same chunk are collapsed, which makes the
/// function safe to call twice on the same input.
///
/// # Examples
///
/// ```
/// use critic_core::{ChunkRef, CompletionResult};
/// use critic_review::aggregate::aggregate;
///
/// let result = |seq, text: &str| CompletionResult {
///     chunk: ChunkRef { unit_index: 0, sequence_index: seq, total_chunks: 2 },
///     unit_label: "a.py".into(),
///     path: Some("a.py".into()),
///     text: text.into(),
///     success: true,
///     error: None,
///     oversized: false,
/// };
/// let agg = aggregate(&[result(1, "second"), result(0, "first")]);
/// assert_eq!(agg.comments.len(), 1);
/// let body = &agg.comments[0].body;
/// assert!(body.find("first").unwrap() < body.find("second").unwrap());
/// ```
pub fn aggregate(results: &[CompletionResult]) -> Aggregation {
    let mut groups: BTreeMap<usize, Vec<&CompletionResult>> = BTreeMap::new();
    for result in results {
        groups.entry(result.chunk.unit_index).or_default().push(result);
    }

    let mut aggregation = Aggregation::default();

    for (unit_index, mut group) in groups {
        group.sort_by_key(|r| r.chunk.sequence_index);
        group.dedup_by_key(|r| r.chunk.sequence_index);

        let first = group[0];
        let target = match &first.path {
            Some(path) => CommentTarget::File(path.clone()),
            None => CommentTarget::Patch,
        };

        let errors: Vec<String> = group
            .iter()
            .filter(|r| !r.success)
            .map(|r| {
                format!(
                    "part {}: {}",
                    r.chunk,
                    r.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        if !errors.is_empty() {
            aggregation.failed_units.push(UnitFailure {
                unit_label: first.unit_label.clone(),
                errors,
            });
        }

        if !group.iter().any(|r| r.success) {
            continue;
        }

        aggregation.comments.push(ReviewComment {
            body: render_body(&target, &group),
            target,
            ordering_key: unit_index,
        });
    }

    aggregation
}

fn render_body(target: &CommentTarget, group: &[&CompletionResult]) -> String {
    let mut body = String::new();
    match target {
        CommentTarget::File(path) => {
            let _ = writeln!(body, "### Review of `{path}`");
        }
        CommentTarget::Patch => {
            let _ = writeln!(body, "### Review of this pull request");
        }
    }

    let multipart = group.iter().any(|r| r.chunk.total_chunks > 1);
    for result in group {
        body.push('\n');
        if multipart {
            let _ = writeln!(body, "**Part {}**\n", result.chunk);
        }
        if result.success {
            body.push_str(result.text.trim_end());
            body.push('\n');
        } else {
            let _ = writeln!(
                body,
                "> :warning: This part could not be reviewed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        if result.oversized {
            let _ = writeln!(
                body,
                "\n> Note: this hunk exceeded the model's context budget and may have been \
                 truncated by the model."
            );
        }
    }

    body
}

#[cfg(test)]
mod tests {
    use critic_core::ChunkRef;

    use super::*;

    fn ok(unit: usize, seq: usize, total: usize, path: &str, text: &str) -> CompletionResult {
        CompletionResult {
            chunk: ChunkRef {
                unit_index: unit,
                sequence_index: seq,
                total_chunks: total,
            },
            unit_label: path.into(),
            path: Some(path.into()),
            text: text.into(),
            success: true,
            error: None,
            oversized: false,
        }
    }

    fn failed(unit: usize, seq: usize, total: usize, path: &str, err: &str) -> CompletionResult {
        CompletionResult {
            text: String::new(),
            success: false,
            error: Some(err.into()),
            ..ok(unit, seq, total, path, "")
        }
    }

    #[test]
    fn empty_input_produces_nothing() {
        let agg = aggregate(&[]);
        assert!(agg.comments.is_empty());
        assert_eq!(agg.failed_units.len(), 0);
    }

    #[test]
    fn comments_follow_unit_order_not_arrival_order() {
        let agg = aggregate(&[
            ok(2, 0, 1, "c.py", "C"),
            ok(0, 0, 1, "a.py", "A"),
            ok(1, 0, 1, "b.py", "B"),
        ]);
        let targets: Vec<_> = agg.comments.iter().map(|c| c.target.to_string()).collect();
        assert_eq!(targets, vec!["a.py", "b.py", "c.py"]);
        let keys: Vec<_> = agg.comments.iter().map(|c| c.ordering_key).collect();
        assert_eq!(keys, vec![0, 1, 2]);
    }

    #[test]
    fn single_chunk_has_no_part_marker() {
        let agg = aggregate(&[ok(0, 0, 1, "a.py", "All good.")]);
        let body = &agg.comments[0].body;
        assert!(body.contains("`a.py`"));
        assert!(body.contains("All good."));
        assert!(!body.contains("**Part"));
    }

    #[test]
    fn partial_failure_keeps_placeholder_and_records_unit() {
        let agg = aggregate(&[
            ok(0, 0, 3, "big.rs", "first half"),
            failed(0, 1, 3, "big.rs", "HTTP 500"),
            ok(0, 2, 3, "big.rs", "last part"),
        ]);
        assert_eq!(agg.comments.len(), 1);
        let body = &agg.comments[0].body;
        assert!(body.contains("**Part 1/3**"));
        assert!(body.contains("**Part 2/3**"));
        assert!(body.contains("could not be reviewed: HTTP 500"));
        assert!(body.find("first half").unwrap() < body.find("last part").unwrap());

        assert_eq!(agg.failed_units.len(), 1);
        assert_eq!(agg.failed_units[0].unit_label, "big.rs");
        assert_eq!(agg.failed_units[0].errors, vec!["part 2/3: HTTP 500"]);
    }

    #[test]
    fn unit_with_no_success_gets_no_comment() {
        let agg = aggregate(&[
            ok(0, 0, 1, "a.py", "fine"),
            failed(1, 0, 2, "b.py", "HTTP 401"),
            failed(1, 1, 2, "b.py", "HTTP 401"),
        ]);
        assert_eq!(agg.comments.len(), 1);
        assert_eq!(agg.comments[0].target.to_string(), "a.py");
        assert_eq!(agg.failed_units.len(), 1);
        assert_eq!(agg.failed_units[0].errors.len(), 2);
    }

    #[test]
    fn duplicate_results_are_collapsed() {
        let results = [
            ok(0, 0, 2, "a.py", "one"),
            ok(0, 0, 2, "a.py", "one"),
            ok(0, 1, 2, "a.py", "two"),
        ];
        let agg = aggregate(&results);
        assert_eq!(agg.comments[0].body.matches("one").count(), 1);
        assert_eq!(aggregate(&results), agg);
    }

    #[test]
    fn patch_unit_targets_whole_pull_request() {
        let result = CompletionResult {
            path: None,
            unit_label: "patch".into(),
            ..ok(0, 0, 1, "", "Overall fine.")
        };
        let agg = aggregate(&[result]);
        assert_eq!(agg.comments[0].target, CommentTarget::Patch);
        assert!(agg.comments[0].body.contains("this pull request"));
    }

    #[test]
    fn oversized_chunk_is_flagged_in_body() {
        let result = CompletionResult {
            oversized: true,
            ..ok(0, 0, 1, "huge.sql", "Review")
        };
        let agg = aggregate(&[result]);
        assert!(agg.comments[0].body.contains("exceeded the model's context budget"));
    }
}
