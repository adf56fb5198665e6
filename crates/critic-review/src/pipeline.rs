use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use critic_core::{
    CommentStyle, CommentTarget, CompletionResult, CriticError, PromptChunk, PublishOutcome,
    ReviewComment, ReviewMode, ReviewRequest, RunStage,
};
use critic_difflens::filter::PathFilter;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate, UnitFailure};
use crate::github::DiffSource;
use crate::llm::{self, Completer, RetryPolicy};
use crate::prompt;
use crate::publish::{publish, CommentSink};

const EMPTY_PATCH_NOTICE: &str = "Patch file does not contain any changes.";
const PANICKED: &str = "completion task panicked";
const ABANDONED: &str = "abandoned: run timeout elapsed before completion";
const SKIPPED_AFTER_SIBLING: &str = "skipped after sibling failure";

/// Summary of a finished review run.
///
/// # Examples
///
/// ```
/// use critic_core::{PublishOutcome, RunStage};
/// use critic_review::pipeline::RunReport;
///
/// let report = RunReport {
///     final_stage: RunStage::Done,
///     units_fetched: 0,
///     units_skipped: 0,
///     units_reviewed: 0,
///     chunks: 0,
///     completions_failed: 0,
///     abandoned: 0,
///     failed_units: vec![],
///     publish: PublishOutcome::default(),
/// };
/// assert!(report.is_success());
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub final_stage: RunStage,
    pub units_fetched: usize,
    /// Paths rejected by the include/exclude filter.
    pub units_skipped: usize,
    pub units_reviewed: usize,
    pub chunks: usize,
    pub completions_failed: usize,
    /// Chunks cut off by the run timeout.
    pub abandoned: usize,
    pub failed_units: Vec<UnitFailure>,
    pub publish: PublishOutcome,
}

impl RunReport {
    fn new() -> Self {
        Self {
            final_stage: RunStage::Fetching,
            units_fetched: 0,
            units_skipped: 0,
            units_reviewed: 0,
            chunks: 0,
            completions_failed: 0,
            abandoned: 0,
            failed_units: Vec::new(),
            publish: PublishOutcome::default(),
        }
    }

    /// `true` when the run ended in [`RunStage::Done`].
    pub fn is_success(&self) -> bool {
        self.final_stage == RunStage::Done
    }

    /// Human-readable cause of a failed run.
    pub fn failure_cause(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }
        let mut causes = Vec::new();
        if !self.failed_units.is_empty() {
            let labels: Vec<&str> = self
                .failed_units
                .iter()
                .map(|u| u.unit_label.as_str())
                .collect();
            causes.push(format!(
                "{} unit(s) had failed completions: {}",
                labels.len(),
                labels.join(", ")
            ));
        }
        if !self.publish.is_clean() {
            let targets: Vec<&str> = self
                .publish
                .failures
                .iter()
                .map(|f| f.target.as_str())
                .collect();
            causes.push(format!(
                "{} comment(s) could not be posted: {}",
                self.publish.failed,
                targets.join(", ")
            ));
        }
        if causes.is_empty() {
            causes.push(format!("run stopped in stage {}", self.final_stage));
        }
        Some(format!("strict mode: {}", causes.join("; ")))
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} unit(s) reviewed ({} skipped), {} comment(s) posted, \
             {} unit(s) with failed completions, {} comment(s) failed to post",
            self.final_stage,
            self.units_reviewed,
            self.units_skipped,
            self.publish.succeeded,
            self.failed_units.len(),
            self.publish.failed
        )?;
        if self.abandoned > 0 {
            write!(f, ", {} chunk(s) abandoned", self.abandoned)?;
        }
        Ok(())
    }
}

/// Review orchestrator that drives one run from fetch to publish.
///
/// Collaborators are injected as trait objects so the same pipeline runs
/// against GitHub and OpenAI in production and against in-memory fakes in
/// tests.
pub struct ReviewPipeline {
    request: Arc<ReviewRequest>,
    filter: PathFilter,
    source: Arc<dyn DiffSource>,
    completer: Arc<dyn Completer>,
    sink: Arc<dyn CommentSink>,
    policy: RetryPolicy,
}

impl ReviewPipeline {
    /// Create a pipeline for one run.
    ///
    /// # Errors
    ///
    /// Returns [`CriticError::Config`] if the request is invalid. Nothing has
    /// touched the network at that point.
    pub fn new(
        request: ReviewRequest,
        source: Arc<dyn DiffSource>,
        completer: Arc<dyn Completer>,
        sink: Arc<dyn CommentSink>,
    ) -> Result<Self, CriticError> {
        request.validate()?;
        let filter = PathFilter::from_request(&request)?;
        let policy = RetryPolicy::from_request(&request);
        Ok(Self {
            request: Arc::new(request),
            filter,
            source,
            completer,
            sink,
            policy,
        })
    }

    /// Replace the retry policy derived from the request.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Execute the run.
    ///
    /// # Errors
    ///
    /// Returns [`CriticError::Fetch`] if the changes cannot be retrieved.
    /// Completion and posting failures never surface here; they are
    /// recorded in the returned [`RunReport`], whose final stage is
    /// [`RunStage::Failed`] when strict mode escalates them.
    pub async fn run(&self) -> Result<RunReport, CriticError> {
        let started = Instant::now();
        let deadline = self.request.run_timeout.map(|t| started + t);
        let pr = &self.request.pull_request;
        let mut report = RunReport::new();

        enter(&mut report, RunStage::Fetching);
        let units = self
            .source
            .fetch_changed_units(pr, self.request.mode)
            .await
            .inspect_err(|e| warn!(stage = %RunStage::Fetching, error = %e, "run failed"))?;
        report.units_fetched = units.len();
        info!(pr = %pr, mode = %self.request.mode, units = units.len(), "fetched changes");

        if units.is_empty() && self.request.mode == ReviewMode::Patch {
            info!("patch is empty, posting notice");
            enter(&mut report, RunStage::Publishing);
            let notice = ReviewComment {
                target: CommentTarget::Patch,
                body: EMPTY_PATCH_NOTICE.to_string(),
                ordering_key: 0,
            };
            report.publish =
                publish(self.sink.as_ref(), pr, &[notice], CommentStyle::PerUnit).await;
            let stage = if self.request.strict && !report.publish.is_clean() {
                RunStage::Failed
            } else {
                RunStage::Done
            };
            enter(&mut report, stage);
            return Ok(report);
        }

        enter(&mut report, RunStage::Filtering);
        let filtered = self.filter.filter(units);
        report.units_skipped = filtered.skipped.len();
        report.units_reviewed = filtered.kept.len();
        for path in &filtered.skipped {
            debug!(file = %path, "excluded by filter");
        }
        if filtered.kept.is_empty() {
            info!("no reviewable changes");
            enter(&mut report, RunStage::Done);
            return Ok(report);
        }

        enter(&mut report, RunStage::Prompting);
        let chunks = prompt::build_prompts(&filtered.kept, &self.request);
        report.chunks = chunks.len();
        info!(
            units = filtered.kept.len(),
            chunks = chunks.len(),
            "built prompts"
        );

        enter(&mut report, RunStage::Completing);
        let (results, abandoned) = self
            .complete_all(chunks, filtered.kept.len(), deadline)
            .await;
        report.completions_failed = results.iter().filter(|r| !r.success).count();
        report.abandoned = abandoned;

        enter(&mut report, RunStage::Aggregating);
        let aggregation = aggregate(&results);
        report.failed_units = aggregation.failed_units;

        enter(&mut report, RunStage::Publishing);
        report.publish = publish(
            self.sink.as_ref(),
            pr,
            &aggregation.comments,
            self.request.comment_style,
        )
        .await;

        let degraded = !report.failed_units.is_empty() || !report.publish.is_clean();
        if degraded && self.request.strict {
            enter(&mut report, RunStage::Failed);
        } else {
            enter(&mut report, RunStage::Done);
        }
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "{report}"
        );
        Ok(report)
    }

    /// Complete every chunk on a bounded worker pool.
    ///
    /// Returns results in chunk order and the number of chunks abandoned
    /// because the deadline passed. A chunk whose task panicked is a failure
    /// but not abandoned.
    async fn complete_all(
        &self,
        chunks: Vec<PromptChunk>,
        unit_count: usize,
        deadline: Option<Instant>,
    ) -> (Vec<CompletionResult>, usize) {
        let semaphore = Arc::new(Semaphore::new(self.request.concurrency.max(1)));
        let unit_failed: Arc<Vec<AtomicBool>> =
            Arc::new((0..unit_count).map(|_| AtomicBool::new(false)).collect());
        let abort_siblings = self.request.abort_unit_on_failure;

        let mut slots: Vec<Option<CompletionResult>> = vec![None; chunks.len()];
        let mut tasks = JoinSet::new();
        let mut slot_of = HashMap::new();

        for (slot, chunk) in chunks.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let unit_failed = Arc::clone(&unit_failed);
            let completer = Arc::clone(&self.completer);
            let request = Arc::clone(&self.request);
            let policy = self.policy.clone();

            let handle = tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (slot, CompletionResult::failed(&chunk, "worker pool closed"));
                };
                let flag = &unit_failed[chunk.chunk.unit_index];
                if abort_siblings && flag.load(Ordering::Acquire) {
                    debug!(
                        unit = %chunk.unit_label,
                        chunk = %chunk.chunk,
                        "sibling already failed, not sending"
                    );
                    return (slot, CompletionResult::failed(&chunk, SKIPPED_AFTER_SIBLING));
                }
                let result = llm::complete(completer.as_ref(), &chunk, &request, &policy).await;
                if !result.success {
                    flag.store(true, Ordering::Release);
                }
                (slot, result)
            });
            slot_of.insert(handle.id(), slot);
        }

        let mut panicked = vec![false; chunks.len()];
        let mut record_panic = |e: &tokio::task::JoinError| {
            if let (true, Some(&slot)) = (e.is_panic(), slot_of.get(&e.id())) {
                panicked[slot] = true;
            }
        };

        let mut timed_out = false;
        loop {
            let next = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            timed_out = true;
                            warn!(
                                outstanding = tasks.len(),
                                "run timeout elapsed, abandoning outstanding completions"
                            );
                            tasks.abort_all();
                            break;
                        }
                    }
                }
                None => tasks.join_next().await,
            };
            match next {
                Some(Ok((slot, result))) => slots[slot] = Some(result),
                Some(Err(e)) => {
                    warn!(error = %e, "completion task did not finish");
                    record_panic(&e);
                }
                None => break,
            }
        }

        // Keep results that finished between the deadline and the abort.
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, result)) => slots[slot] = Some(result),
                Err(e) => record_panic(&e),
            }
        }

        let mut abandoned = 0;
        let results = slots
            .into_iter()
            .zip(&chunks)
            .zip(panicked)
            .map(|((slot, chunk), panicked)| {
                slot.unwrap_or_else(|| {
                    let reason = if panicked || !timed_out {
                        PANICKED
                    } else {
                        abandoned += 1;
                        ABANDONED
                    };
                    warn!(unit = %chunk.unit_label, chunk = %chunk.chunk, "{reason}");
                    CompletionResult::failed(chunk, reason)
                })
            })
            .collect();

        (results, abandoned)
    }
}

fn enter(report: &mut RunReport, stage: RunStage) {
    debug!(from = %report.final_stage, to = %stage, "stage transition");
    report.final_stage = stage;
}

#[cfg(test)]
mod tests {
    use critic_core::{PublishFailure, RunStage};

    use super::*;

    fn report(stage: RunStage) -> RunReport {
        RunReport {
            final_stage: stage,
            ..RunReport::new()
        }
    }

    #[test]
    fn done_report_has_no_cause() {
        let r = report(RunStage::Done);
        assert!(r.is_success());
        assert!(r.failure_cause().is_none());
    }

    #[test]
    fn failed_report_names_units_and_targets() {
        let mut r = report(RunStage::Failed);
        r.failed_units.push(UnitFailure {
            unit_label: "a.py".into(),
            errors: vec!["part 1/1: HTTP 401".into()],
        });
        r.publish = PublishOutcome {
            attempted: 1,
            succeeded: 0,
            failed: 1,
            failures: vec![PublishFailure {
                target: "b.py".into(),
                error: "HTTP 403".into(),
            }],
        };
        let cause = r.failure_cause().unwrap();
        assert!(cause.contains("a.py"));
        assert!(cause.contains("b.py"));
    }

    #[test]
    fn status_line_summarises_counts() {
        let mut r = report(RunStage::Done);
        r.units_reviewed = 3;
        r.publish.succeeded = 2;
        let line = r.to_string();
        assert!(line.starts_with("done: 3 unit(s) reviewed"));
        assert!(line.contains("2 comment(s) posted"));
        assert!(!line.contains("abandoned"));
    }

    #[test]
    fn report_serializes_camel_case() {
        let json = serde_json::to_value(report(RunStage::Done)).unwrap();
        assert_eq!(json["finalStage"], "done");
        assert!(json.get("unitsReviewed").is_some());
    }
}
