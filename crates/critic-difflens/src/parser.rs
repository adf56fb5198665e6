//! Boundary detection in unified diff text.
//!
//! Nothing here rewrites the diff: every function returns slices of the
//! input, so concatenating the pieces in order reproduces it exactly.

use std::path::PathBuf;

/// One `diff --git` file section of a unified patch.
///
/// Text before the first `diff --git` line (mail headers from
/// `git format-patch`, for instance) is returned as a section with no path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSection<'a> {
    /// Path of the file in the new version (old path for deletions).
    pub path: Option<String>,
    /// Raw text of the section, including its header lines.
    pub text: &'a str,
}

/// Split a unified patch into per-file sections.
///
/// # Examples
///
/// ```
/// use critic_difflens::parser::split_file_sections;
///
/// let patch = "diff --git a/a.rs b/a.rs\n@@ -1 +1 @@\n-x\n+y\n\
///              diff --git a/b.rs b/b.rs\n@@ -1 +1 @@\n-x\n+y\n";
/// let sections = split_file_sections(patch);
/// assert_eq!(sections.len(), 2);
/// assert_eq!(sections[1].path.as_deref(), Some("b.rs"));
/// ```
pub fn split_file_sections(input: &str) -> Vec<FileSection<'_>> {
    let mut starts = Vec::new();
    let mut offset = 0;
    for line in input.split_inclusive('\n') {
        if line.starts_with("diff --git ") {
            starts.push(offset);
        }
        offset += line.len();
    }

    let mut sections = Vec::new();
    let mut bounds = Vec::with_capacity(starts.len() + 2);
    bounds.push(0);
    bounds.extend(starts.iter().copied().filter(|s| *s > 0));
    bounds.push(input.len());

    for pair in bounds.windows(2) {
        let text = &input[pair[0]..pair[1]];
        if text.is_empty() {
            continue;
        }
        let path = if text.starts_with("diff --git ") {
            section_path(text)
        } else {
            None
        };
        sections.push(FileSection { path, text });
    }
    sections
}

/// Split diff text into segments at hunk boundaries.
///
/// A new segment starts at every `diff --git` line and every `@@` hunk
/// header, except that the header lines of a file (`diff --git`, `index`,
/// `---`, `+++`) stay attached to that file's first hunk. Lines before the
/// first boundary form their own leading segment.
///
/// # Examples
///
/// ```
/// use critic_difflens::parser::split_hunk_segments;
///
/// let diff = "@@ -1 +1 @@\n-a\n+b\n@@ -10 +10 @@\n-c\n+d\n";
/// let segments = split_hunk_segments(diff);
/// assert_eq!(segments, vec!["@@ -1 +1 @@\n-a\n+b\n", "@@ -10 +10 @@\n-c\n+d\n"]);
/// assert_eq!(segments.concat(), diff);
/// ```
pub fn split_hunk_segments(input: &str) -> Vec<&str> {
    let mut cuts = vec![0];
    let mut offset = 0;
    // Leading `---`/`+++` headers without a `diff --git` line still belong
    // to the first hunk.
    let mut in_header = true;

    for line in input.split_inclusive('\n') {
        if line.starts_with("diff --git ") {
            cuts.push(offset);
            in_header = true;
        } else if line.starts_with("@@ ") || line.starts_with("@@@ ") {
            if in_header {
                in_header = false;
            } else {
                cuts.push(offset);
            }
        }
        offset += line.len();
    }
    cuts.push(input.len());
    cuts.dedup();

    cuts.windows(2)
        .map(|w| &input[w[0]..w[1]])
        .filter(|s| !s.is_empty())
        .collect()
}

fn section_path(text: &str) -> Option<String> {
    let mut old_path = None;
    let mut new_path = None;
    for line in text.lines() {
        if line.starts_with("@@ ") {
            break;
        }
        if let Some(p) = line.strip_prefix("--- ") {
            old_path = Some(parse_path(p));
        } else if let Some(p) = line.strip_prefix("+++ ") {
            new_path = Some(parse_path(p));
        }
    }

    let dev_null = PathBuf::from("/dev/null");
    match (new_path, old_path) {
        (Some(new), _) if new != dev_null => Some(new.to_string_lossy().into_owned()),
        (_, Some(old)) if old != dev_null => Some(old.to_string_lossy().into_owned()),
        _ => text.lines().next().and_then(git_header_path),
    }
}

fn git_header_path(line: &str) -> Option<String> {
    let rest = line.strip_prefix("diff --git ")?;
    let idx = rest.rfind(" b/")?;
    Some(parse_path(&rest[idx + 1..]).to_string_lossy().into_owned())
}

fn parse_path(raw: &str) -> PathBuf {
    let normalized = raw.trim_end_matches(['\r', '\t']).trim_matches('"');

    if normalized == "/dev/null" {
        return PathBuf::from("/dev/null");
    }

    let stripped = normalized
        .strip_prefix("a/")
        .or_else(|| normalized.strip_prefix("b/"))
        .unwrap_or(normalized);

    PathBuf::from(stripped)
}
