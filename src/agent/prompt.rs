//! Prompt templates and the text helpers used to build their context.

use std::borrow::Cow;

use super::PromptKind;

/// Lines of check output passed back to the agent when asking for a fix.
pub(crate) const CHECK_FEEDBACK_LINES: usize = 80;

/// Lines of review findings passed back to the agent.
pub(crate) const FINDINGS_FEEDBACK_LINES: usize = 60;

/// Longest answer handed to the cleanup filter.
pub(crate) const CLEANUP_INPUT_CHARS: usize = 14_000;

/// Largest context embedded in a prompt. The prompt travels inside a single
/// `sh -c` argument, quoting can grow it up to four times, and Linux caps one
/// argument at 128 KiB.
pub(crate) const MAX_CONTEXT_BYTES: usize = 24 * 1024;

const QUESTION_PROMPT: &str = "Answer the following question about this repository. \
Read whatever code you need, but do not modify any files.

Question:
";

const TASK_PROMPT: &str = "You are working in a git checkout of this repository. \
Complete the task below by editing the files in the repository. \
Do not commit, push, or switch branches; that is handled for you.

Task:
";

const FIX_SETUP_PROMPT: &str = "The project does not build or its tests fail on the base branch, \
before any task work has started. Fix the environment or the project setup so the checks below pass. \
Keep the changes minimal and do not commit.

Check output:
";

const FIX_EXECUTE_PROMPT: &str = "The checks failed after your changes. \
Fix the problems so formatting, build and tests pass. Do not commit.

";

const REVIEW_PROMPT: &str = "Review the changes on the current branch compared to its base branch. \
Use git to inspect the diff. Report on correctness, design, test coverage and risks, \
and list concrete suggestions. Do not modify any files.

";

const INSPECT_PROMPT: &str = "Briefly review the recent changes in this repository \
(see `git status` and `git diff`) against the task below. \
List any major concerns, or reply with just OK if there are none. Do not modify any files.

";

const ADDRESS_FINDINGS_PROMPT: &str = "A review of your changes raised the concerns below. \
Address them by editing the repository. Do not commit.

";

const CLEANUP_PROMPT: &str = "You are a filter. The text after the separator is an answer \
written by another assistant. Remove any preamble, commentary about the steps or tools used, \
and closing remarks. Return only the cleaned response, with no introduction of your own.

---
";

/// Builds the full prompt for `kind`.
pub(crate) fn render(kind: PromptKind, context: &str) -> String {
    let template = match kind {
        PromptKind::Question => QUESTION_PROMPT,
        PromptKind::Task => TASK_PROMPT,
        PromptKind::FixSetup => FIX_SETUP_PROMPT,
        PromptKind::FixExecute => FIX_EXECUTE_PROMPT,
        PromptKind::Review => REVIEW_PROMPT,
        PromptKind::Inspect => INSPECT_PROMPT,
        PromptKind::AddressFindings => ADDRESS_FINDINGS_PROMPT,
        PromptKind::CleanupFilter => CLEANUP_PROMPT,
    };
    format!("{template}{}", clamp_middle(context.trim(), MAX_CONTEXT_BYTES))
}

/// `text` cut to about `max` bytes by dropping its middle, so both the
/// opening (the task) and the end (the failing output) survive.
pub(crate) fn clamp_middle(text: &str, max: usize) -> Cow<'_, str> {
    if text.len() <= max {
        return Cow::Borrowed(text);
    }
    let mut head_end = max / 2;
    while !text.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = text.len() - max / 2;
    while !text.is_char_boundary(tail_start) {
        tail_start += 1;
    }
    Cow::Owned(format!(
        "{}\n[... {} bytes omitted ...]\n{}",
        &text[..head_end],
        tail_start - head_end,
        &text[tail_start..]
    ))
}

/// The last `n` lines of `text`.
pub(crate) fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// At most `max` characters of `text`, cut on a character boundary.
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// First non-empty line of `text`, shortened to `max` characters.
pub(crate) fn first_line(text: &str, max: usize) -> String {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let short = truncate_chars(line, max);
    if short.len() < line.len() {
        format!("{}...", short.trim_end())
    } else {
        short.to_string()
    }
}

/// Whether an agent's reply opens by declining the request.
pub(crate) fn looks_like_refusal(text: &str) -> bool {
    const OPENERS: &[&str] = &[
        "i can't",
        "i cannot",
        "i can not",
        "i'm unable",
        "i am unable",
        "i won't",
        "i'm not able",
    ];
    let opening = first_line(text, 80).to_lowercase().replace('\u{2019}', "'");
    OPENERS.iter().any(|o| opening.starts_with(o))
}
