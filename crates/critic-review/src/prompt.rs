use critic_core::{
    estimate_tokens, ChangedUnit, ChunkRef, PromptChunk, ReviewMode, ReviewRequest,
    CHARS_PER_TOKEN,
};
use critic_difflens::parser::{split_file_sections, split_hunk_segments};

/// Placeholder replaced by the diff text in custom prompts.
pub const DIFF_PLACEHOLDER: &str = "{diff}";

/// Smallest ceiling ever used, so a tiny context window still makes progress.
const MIN_CEILING_CHARS: usize = 1024;

/// Tokens reserved for the system message and chat framing.
const FRAMING_TOKENS: usize = 64;

const FILE_TEMPLATE: &str = "\
You are reviewing the changes made to `{target}` in a pull request{part}.

Look for:
1. Bugs and logic errors, including unhandled edge cases.
2. Security problems such as injection, unsafe input handling or leaked secrets.
3. Performance issues that matter at realistic input sizes.
4. Readability and maintainability: naming, structure, duplication.
5. Deviations from the conventions of the language in use.

For every finding, quote or reference the relevant changed line, explain \
the problem, and suggest a concrete fix (with a short code example when it \
helps). If the change looks correct, say so briefly instead of inventing \
issues. Format the answer as Markdown and do not repeat the diff.

Write the review in the following language: {language}.

```diff
{diff}
```
";

const PATCH_TEMPLATE: &str = "\
You are reviewing a pull request given as a unified patch{part}.
Files covered: {target}.

Review the change as a whole: correctness, security, performance, error \
handling, and whether the pieces fit together across files. Group findings \
by file, reference the changed lines, and propose concrete fixes. If \
nothing needs to change, say so briefly. Format the answer as Markdown and \
do not repeat the patch.

Write the review in the following language: {language}.

```diff
{diff}
```
";

/// Pick the instruction template for a run.
///
/// # Examples
///
/// ```
/// use critic_core::{PullRequestRef, ReviewMode, ReviewRequest};
/// use critic_review::prompt::instruction_template;
///
/// let mut request = ReviewRequest::new(PullRequestRef::new("o/r", 1).unwrap());
/// assert!(instruction_template(&request).contains("changes made to"));
/// request.mode = ReviewMode::Patch;
/// assert!(instruction_template(&request).contains("unified patch"));
/// request.custom_prompt = Some("Be brief: {diff}".into());
/// assert_eq!(instruction_template(&request), "Be brief: {diff}");
/// ```
pub fn instruction_template(request: &ReviewRequest) -> &str {
    match (&request.custom_prompt, request.mode) {
        (Some(custom), _) => custom,
        (None, ReviewMode::Files) => FILE_TEMPLATE,
        (None, ReviewMode::Patch) => PATCH_TEMPLATE,
    }
}

/// Maximum number of diff characters per chunk.
///
/// Prompt and completion share the model's context window, so the diff
/// budget is what remains after the completion budget (`max_tokens`), the
/// instruction template and chat framing.
///
/// # Examples
///
/// ```
/// use critic_core::{PullRequestRef, ReviewRequest};
/// use critic_review::prompt::size_ceiling;
///
/// let mut request = ReviewRequest::new(PullRequestRef::new("o/r", 1).unwrap());
/// let roomy = size_ceiling(&request);
/// request.max_tokens = 8192;
/// assert!(size_ceiling(&request) < roomy);
/// ```
pub fn size_ceiling(request: &ReviewRequest) -> usize {
    let overhead = estimate_tokens(instruction_template(request))
        + estimate_tokens(&request.language)
        + FRAMING_TOKENS;
    let available = (request.context_window as usize)
        .saturating_sub(request.max_tokens as usize)
        .saturating_sub(overhead);
    (available * CHARS_PER_TOKEN).max(MIN_CEILING_CHARS)
}

/// A slice of a unit's content destined for one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSlice<'a> {
    pub text: &'a str,
    /// Byte offset of `text` within the unit's content.
    pub start: usize,
    /// A single hunk larger than the ceiling, passed through unsplit.
    pub oversized: bool,
}

/// Split `content` into ordered, non-overlapping slices of at most `ceiling`
/// characters, cutting only at hunk boundaries.
///
/// Content within the ceiling comes back as one slice. A hunk that alone
/// exceeds the ceiling becomes its own slice, flagged `oversized`.
///
/// # Examples
///
/// ```
/// use critic_review::prompt::split_content;
///
/// let diff = "@@ -1 +1 @@\n-a\n+b\n@@ -9 +9 @@\n-c\n+d\n";
/// assert_eq!(split_content(diff, 1000).len(), 1);
///
/// let slices = split_content(diff, 20);
/// assert_eq!(slices.len(), 2);
/// let joined: String = slices.iter().map(|s| s.text).collect();
/// assert_eq!(joined, diff);
/// ```
pub fn split_content(content: &str, ceiling: usize) -> Vec<ContentSlice<'_>> {
    if content.len() <= ceiling {
        return vec![ContentSlice {
            text: content,
            start: 0,
            oversized: false,
        }];
    }

    let mut slices = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for segment in split_hunk_segments(content) {
        let seg_len = segment.len();
        if seg_len > ceiling {
            if end > start {
                slices.push(slice_at(content, start, end, false));
            }
            slices.push(slice_at(content, end, end + seg_len, true));
            end += seg_len;
            start = end;
            continue;
        }
        if end - start + seg_len > ceiling && end > start {
            slices.push(slice_at(content, start, end, false));
            start = end;
        }
        end += seg_len;
    }

    if end > start {
        slices.push(slice_at(content, start, end, false));
    }
    slices
}

fn slice_at(content: &str, start: usize, end: usize, oversized: bool) -> ContentSlice<'_> {
    ContentSlice {
        text: &content[start..end],
        start,
        oversized,
    }
}

/// Paths of the patch file sections overlapping `content[start..end]`.
fn covered_paths(content: &str, start: usize, end: usize) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    let mut offset = 0;
    for section in split_file_sections(content) {
        let section_end = offset + section.text.len();
        if offset < end && section_end > start {
            if let Some(path) = section.path {
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        offset = section_end;
    }
    paths
}

/// Header lines (`diff --git` through `+++`) of the file section that a
/// slice starting at `start` continues, if the slice begins mid-section.
fn continuation_header(content: &str, start: usize) -> Option<&str> {
    let mut offset = 0;
    for section in split_file_sections(content) {
        let section_end = offset + section.text.len();
        if start > offset && start < section_end {
            if section.path.is_none() {
                return None;
            }
            let text = section.text;
            let mut header_len = 0;
            for line in text.split_inclusive('\n') {
                if line.starts_with("@@ ") || line.starts_with("@@@ ") {
                    break;
                }
                header_len += line.len();
            }
            return (header_len > 0).then_some(&text[..header_len]);
        }
        offset = section_end;
    }
    None
}

/// Replace every `{key}` placeholder in one pass, so substituted values
/// are never scanned for further placeholders.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match values.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Render the prompt for one slice.
fn render(request: &ReviewRequest, target: &str, part: &str, diff: &str) -> String {
    let template = instruction_template(request);
    match &request.custom_prompt {
        Some(_) => {
            let mut prompt = if template.contains(DIFF_PLACEHOLDER) {
                template.replace(DIFF_PLACEHOLDER, diff)
            } else {
                format!("{template}\n\n```diff\n{diff}\n```\n")
            };
            if !part.is_empty() {
                prompt.push_str(&format!("\nChanges to {target}{part}.\n"));
            }
            prompt.push_str(&format!(
                "\nWrite the review in the following language: {}.\n",
                request.language
            ));
            prompt
        }
        None => fill(
            template,
            &[
                ("{target}", target),
                ("{part}", part),
                ("{language}", &request.language),
                (DIFF_PLACEHOLDER, diff),
            ],
        ),
    }
}

/// Turn accepted units into completion-ready prompt chunks.
///
/// Every unit yields at least one chunk. Chunks of a unit are numbered
/// `0..total_chunks` in content order, and `unit_index` is the unit's
/// position in `units`.
///
/// # Examples
///
/// ```
/// use critic_core::{ChangedUnit, PullRequestRef, ReviewRequest};
/// use critic_review::prompt::build_prompts;
///
/// let request = ReviewRequest::new(PullRequestRef::new("o/r", 1).unwrap());
/// let units = vec![ChangedUnit::file("a.py", "@@ -1 +1 @@\n-a\n+b\n")];
/// let chunks = build_prompts(&units, &request);
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].chunk.total_chunks, 1);
/// assert!(chunks[0].text.contains("+b"));
/// ```
pub fn build_prompts(units: &[ChangedUnit], request: &ReviewRequest) -> Vec<PromptChunk> {
    let ceiling = size_ceiling(request);
    let mut chunks = Vec::new();

    for (unit_index, unit) in units.iter().enumerate() {
        let slices = split_content(&unit.content, ceiling);
        let total = slices.len();

        for (sequence_index, slice) in slices.into_iter().enumerate() {
            let end = slice.start + slice.text.len();
            let target = match &unit.path {
                Some(path) => path.clone(),
                None => {
                    let paths = covered_paths(&unit.content, slice.start, end);
                    if paths.is_empty() {
                        "the patch".to_string()
                    } else {
                        paths
                            .iter()
                            .map(|p| format!("`{p}`"))
                            .collect::<Vec<_>>()
                            .join(", ")
                    }
                }
            };
            let part = if total > 1 {
                format!(" (part {} of {total})", sequence_index + 1)
            } else {
                String::new()
            };

            chunks.push(PromptChunk {
                chunk: ChunkRef {
                    unit_index,
                    sequence_index,
                    total_chunks: total,
                },
                unit_label: unit.label().to_string(),
                path: unit.path.clone(),
                text: match (&unit.path, continuation_header(&unit.content, slice.start)) {
                    (None, Some(header)) => {
                        render(request, &target, &part, &format!("{header}{}", slice.text))
                    }
                    _ => render(request, &target, &part, slice.text),
                },
                content: slice.text.to_string(),
                oversized: slice.oversized,
            });
        }
    }

    chunks
}
