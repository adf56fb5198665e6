//! Include/exclude filtering of changed paths.
//!
//! Patterns are regular expressions matched anywhere in the path (search,
//! not full match). Exclusion always wins over inclusion.

use critic_core::{ChangedUnit, CriticError, ReviewRequest};
use regex::Regex;

use crate::parser::split_file_sections;

/// Decide whether `path` should be reviewed.
///
/// - `include` set and no match: reject.
/// - `exclude` set and match: reject.
/// - Otherwise accept.
///
/// # Examples
///
/// ```
/// use regex::Regex;
/// use critic_difflens::filter::should_review;
///
/// let py = Regex::new(r"\.py$").unwrap();
/// assert!(should_review("a.py", Some(&py), None));
/// assert!(!should_review("b.md", Some(&py), None));
/// assert!(!should_review("a.py", None, Some(&py)));
/// assert!(should_review("b.md", None, None));
/// ```
pub fn should_review(path: &str, include: Option<&Regex>, exclude: Option<&Regex>) -> bool {
    if let Some(inc) = include {
        if !inc.is_match(path) {
            return false;
        }
    }
    if let Some(exc) = exclude {
        if exc.is_match(path) {
            return false;
        }
    }
    true
}

/// Compiled include/exclude rules for a run.
///
/// # Examples
///
/// ```
/// use critic_difflens::filter::PathFilter;
///
/// let filter = PathFilter::new(Some(r"^src/"), Some(r"_test\.rs$")).unwrap();
/// assert!(filter.accepts("src/lib.rs"));
/// assert!(!filter.accepts("src/lib_test.rs"));
/// assert!(!filter.accepts("docs/guide.md"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl PathFilter {
    /// Compile the given patterns. Empty strings are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns [`CriticError::Config`] if either pattern is not a valid regex.
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Result<Self, CriticError> {
        Ok(Self {
            include: compile("include", include)?,
            exclude: compile("exclude", exclude)?,
        })
    }

    /// Build the filter from a run's configuration.
    ///
    /// # Errors
    ///
    /// See [`PathFilter::new`].
    pub fn from_request(request: &ReviewRequest) -> Result<Self, CriticError> {
        Self::new(
            request.include_pattern.as_deref(),
            request.exclude_pattern.as_deref(),
        )
    }

    /// Check a single path.
    pub fn accepts(&self, path: &str) -> bool {
        should_review(path, self.include.as_ref(), self.exclude.as_ref())
    }

    /// `true` when neither pattern is set.
    pub fn is_pass_through(&self) -> bool {
        self.include.is_none() && self.exclude.is_none()
    }

    /// Filter a list of units, returning only reviewable ones.
    ///
    /// File units are kept or dropped by path. A patch unit has no path of
    /// its own; instead each `diff --git` section inside it is checked and
    /// rejected sections are cut out. A patch left with no content is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use critic_core::ChangedUnit;
    /// use critic_difflens::filter::PathFilter;
    ///
    /// let filter = PathFilter::new(Some(r"\.py$"), None).unwrap();
    /// let result = filter.filter(vec![
    ///     ChangedUnit::file("a.py", "@@ -1 +1 @@\n+x\n"),
    ///     ChangedUnit::file("b.md", "@@ -1 +1 @@\n+y\n"),
    /// ]);
    /// assert_eq!(result.kept.len(), 1);
    /// assert_eq!(result.skipped, vec!["b.md".to_string()]);
    /// ```
    pub fn filter(&self, units: Vec<ChangedUnit>) -> FilterResult {
        let mut kept = Vec::new();
        let mut skipped = Vec::new();

        for unit in units {
            match &unit.path {
                Some(path) => {
                    if self.accepts(path) {
                        kept.push(unit);
                    } else {
                        skipped.push(path.clone());
                    }
                }
                None => {
                    if self.is_pass_through() {
                        kept.push(unit);
                        continue;
                    }
                    let mut content = String::new();
                    let mut kept_file = false;
                    for section in split_file_sections(&unit.content) {
                        match &section.path {
                            Some(path) if !self.accepts(path) => skipped.push(path.clone()),
                            Some(_) => {
                                kept_file = true;
                                content.push_str(section.text);
                            }
                            None => content.push_str(section.text),
                        }
                    }
                    // A preamble alone is nothing to review.
                    if !kept_file {
                        continue;
                    }
                    kept.push(ChangedUnit::patch(content));
                }
            }
        }

        FilterResult { kept, skipped }
    }
}

fn compile(which: &str, pattern: Option<&str>) -> Result<Option<Regex>, CriticError> {
    match pattern.map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) => Regex::new(p)
            .map(Some)
            .map_err(|e| CriticError::Config(format!("invalid {which} pattern '{p}': {e}"))),
        None => Ok(None),
    }
}

/// Result of filtering units.
#[derive(Debug, Clone)]
pub struct FilterResult {
    /// Units that passed the filter.
    pub kept: Vec<ChangedUnit>,
    /// Paths that were rejected.
    pub skipped: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn re(p: &str) -> Regex {
        Regex::new(p).unwrap()
    }

    #[test]
    fn exclude_wins_over_include() {
        let inc = re(r"\.rs$");
        let exc = re(r"^generated/");
        for path in ["generated/a.rs", "generated/b.rs"] {
            assert!(!should_review(path, Some(&inc), Some(&exc)));
            assert!(!should_review(path, None, Some(&exc)));
        }
        assert!(should_review("src/a.rs", Some(&inc), Some(&exc)));
    }

    #[test]
    fn patterns_match_anywhere_in_path() {
        let inc = re("api");
        assert!(should_review("src/api/handler.go", Some(&inc), None));
        assert!(!should_review("src/web/handler.go", Some(&inc), None));
    }

    #[test]
    fn empty_patterns_are_unset() {
        let filter = PathFilter::new(Some(""), Some("  ")).unwrap();
        assert!(filter.is_pass_through());
        assert!(filter.accepts("anything/at/all.txt"));
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let err = PathFilter::new(Some("([a-z"), None).unwrap_err();
        assert!(matches!(err, CriticError::Config(_)));
        let err = PathFilter::new(None, Some("*.md")).unwrap_err();
        assert!(err.to_string().contains("exclude"));
    }

    #[test]
    fn filter_keeps_order_of_accepted_units() {
        let filter = PathFilter::new(None, Some(r"\.lock$")).unwrap();
        let result = filter.filter(vec![
            ChangedUnit::file("b.rs", "+b\n"),
            ChangedUnit::file("Cargo.lock", "+x\n"),
            ChangedUnit::file("a.rs", "+a\n"),
        ]);
        let kept: Vec<_> = result.kept.iter().map(|u| u.label().to_string()).collect();
        assert_eq!(kept, vec!["b.rs", "a.rs"]);
        assert_eq!(result.skipped, vec!["Cargo.lock"]);
    }

    #[test]
    fn patch_sections_are_filtered_by_path() {
        let patch = "\
diff --git a/src/app.py b/src/app.py
--- a/src/app.py
+++ b/src/app.py
@@ -1 +1,2 @@
 import os
+import sys
diff --git a/README.md b/README.md
--- a/README.md
+++ b/README.md
@@ -1 +1 @@
-old
+new
";
        let filter = PathFilter::new(Some(r"\.py$"), None).unwrap();
        let result = filter.filter(vec![ChangedUnit::patch(patch)]);
        assert_eq!(result.kept.len(), 1);
        let content = &result.kept[0].content;
        assert!(content.contains("src/app.py"));
        assert!(!content.contains("README.md"));
        assert_eq!(result.skipped, vec!["README.md"]);
    }

    #[test]
    fn patch_with_every_section_rejected_is_dropped() {
        let patch = "diff --git a/doc.md b/doc.md\n--- a/doc.md\n+++ b/doc.md\n@@ -1 +1 @@\n-a\n+b\n";
        let filter = PathFilter::new(None, Some(r"\.md$")).unwrap();
        let result = filter.filter(vec![ChangedUnit::patch(patch)]);
        assert!(result.kept.is_empty());
    }

    #[test]
    fn patch_with_only_preamble_left_is_dropped() {
        let patch = "From abc\nSubject: docs\n\ndiff --git a/doc.md b/doc.md\n--- a/doc.md\n+++ b/doc.md\n@@ -1 +1 @@\n-a\n+b\n";
        let filter = PathFilter::new(None, Some(r"\.md$")).unwrap();
        let result = filter.filter(vec![ChangedUnit::patch(patch)]);
        assert!(result.kept.is_empty());
        assert_eq!(result.skipped, vec!["doc.md"]);
    }

    #[test]
    fn pass_through_keeps_patch_untouched() {
        let patch = "From abc\nSubject: x\n\ndiff --git a/a b/a\n@@ -1 +1 @@\n-a\n+b\n";
        let result = PathFilter::default().filter(vec![ChangedUnit::patch(patch)]);
        assert_eq!(result.kept[0].content, patch);
    }
}
