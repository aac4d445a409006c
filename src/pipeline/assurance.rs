//! Reading agent replies during the assurance phase.

/// Whether an inspection reply found nothing worth fixing.
///
/// An empty reply counts as clean; so does a reply that opens with OK, a
/// first line that is just "none", or a one-line reply saying there are
/// no major concerns. Anything else is a finding.
pub(crate) fn inspection_passed(reply: &str) -> bool {
    let text = reply.trim().to_lowercase();
    if text.is_empty() {
        return true;
    }

    let first = text.lines().next().unwrap_or("").trim();
    let first_word: String = first
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .chars()
        .take_while(|c| c.is_alphanumeric())
        .collect();
    if first_word == "ok" || first_word == "lgtm" {
        return true;
    }
    if first.trim_matches(|c: char| !c.is_alphanumeric()) == "none" {
        return true;
    }

    // A clean phrase next to other lines may sit beside a real finding
    if text.lines().filter(|l| !l.trim().is_empty()).count() > 1 {
        return false;
    }

    const CLEAN_PHRASES: &[&str] = &[
        "no major concerns",
        "no major issues",
        "no concerns",
        "no issues found",
        "no issues were found",
        "nothing to address",
    ];
    CLEAN_PHRASES.iter().any(|p| text.contains(p))
}

/// Whether a cleaned answer still opens with conversational filler.
pub(crate) fn has_preamble(answer: &str) -> bool {
    const OPENERS: &[&str] = &[
        "here is",
        "here's",
        "sure",
        "certainly",
        "of course",
        "okay,",
        "great",
        "let me",
        "i'll",
        "i will",
        "i have",
        "i've",
        "based on",
        "after reviewing",
        "after analyzing",
        "below is",
        "the cleaned",
    ];
    let first = answer
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .to_lowercase()
        .replace('\u{2019}', "'");
    OPENERS.iter().any(|o| first.starts_with(o))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspection_passes_on_ok() {
        assert!(inspection_passed("OK"));
        assert!(inspection_passed("ok."));
        assert!(inspection_passed("**OK** - nothing stands out"));
        assert!(inspection_passed(""));
        assert!(inspection_passed("The change is small. No major concerns."));
        assert!(inspection_passed("None."));
        assert!(inspection_passed("none\n"));
    }

    #[test]
    fn test_inspection_flags_findings() {
        assert!(!inspection_passed(
            "1. The new endpoint has no tests.\n2. Error is swallowed in login()."
        ));
        // "okay" in passing is not an approval
        assert!(!inspection_passed("Looks okay overall but the migration drops a column."));
        assert!(!inspection_passed("None of the new handlers check the auth token."));
        assert!(!inspection_passed(
            "Security: no concerns.\nCorrectness: the migration drops the users table."
        ));
    }

    #[test]
    fn test_preamble_detection() {
        assert!(has_preamble("Here's the cleaned answer:\nAuth uses JWT."));
        assert!(has_preamble("\n\nSure! Auth uses JWT."));
        assert!(has_preamble("Based on my analysis of the code, auth uses JWT."));
        assert!(!has_preamble("Auth uses JWT tokens issued by `login()`."));
        assert!(!has_preamble(""));
    }
}
