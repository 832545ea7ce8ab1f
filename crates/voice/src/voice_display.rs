//! Display-message filtering for the speech-facing adapter: suppression,
//! symbol stripping, level prefixing, and sentence-boundary truncation.
//!
//! Grounded on `original_source/.../voice/display.py`'s filter pipeline,
//! re-expressed as a pure function over `(text, level)`.

const DEFAULT_SUPPRESSION: &[&str] = &["debug:", "trace:", "[internal]"];
const MAX_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Returns `None` if the message should be suppressed entirely; otherwise
/// the filtered, speakable text.
pub fn filter_for_speech(text: &str, level: DisplayLevel) -> Option<String> {
    filter_for_speech_with_suppressions(text, level, DEFAULT_SUPPRESSION)
}

pub fn filter_for_speech_with_suppressions(
    text: &str,
    level: DisplayLevel,
    suppressions: &[&str],
) -> Option<String> {
    if level == DisplayLevel::Debug {
        return None;
    }
    if text.trim().chars().count() < 3 {
        return None;
    }
    let lower = text.to_lowercase();
    if suppressions.iter().any(|s| lower.contains(&s.to_lowercase())) {
        return None;
    }

    let mut cleaned = text
        .replace("...", " ")
        .replace("=>", "")
        .replace("->", "")
        .replace('|', "");
    cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    let lower = cleaned.to_lowercase();
    cleaned = match level {
        DisplayLevel::Error if !contains_any(&lower, &["error", "failed", "problem"]) => {
            format!("Error: {cleaned}")
        }
        DisplayLevel::Warning if !contains_any(&lower, &["warning", "caution", "note"]) => {
            format!("Note: {cleaned}")
        }
        _ => cleaned,
    };

    Some(truncate_sentence(&cleaned, MAX_LEN))
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Truncates to at most `max_len` characters on a sentence boundary when
/// possible; the result is always terminated by `.`.
fn truncate_sentence(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return ensure_period(text);
    }

    let truncated: String = text.chars().take(max_len).collect();
    let boundary = ['.', '!', '?']
        .iter()
        .filter_map(|c| truncated.rfind(*c))
        .max();

    let cut = match boundary {
        Some(pos) if pos > 0 => truncated[..=pos].to_owned(),
        _ => truncated,
    };
    ensure_period(cut.trim_end())
}

fn ensure_period(text: &str) -> String {
    let trimmed = text.trim_end();
    if trimmed.ends_with(['.', '!', '?']) {
        trimmed.to_owned()
    } else {
        format!("{trimmed}.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_level_is_always_suppressed() {
        assert_eq!(filter_for_speech("a perfectly fine message", DisplayLevel::Debug), None);
    }

    #[test]
    fn short_messages_are_suppressed() {
        assert_eq!(filter_for_speech("hi", DisplayLevel::Info), None);
    }

    #[test]
    fn suppression_list_matches_prefix_case_insensitively() {
        assert_eq!(filter_for_speech("DEBUG: internal detail", DisplayLevel::Info), None);
    }

    #[test]
    fn suppression_list_matches_anywhere_in_the_message() {
        assert_eq!(filter_for_speech("Log message [internal] detail", DisplayLevel::Info), None);
    }

    #[test]
    fn symbols_are_stripped_and_whitespace_collapsed() {
        let out = filter_for_speech("step1 => step2   ->   done | ok", DisplayLevel::Info).unwrap();
        assert!(!out.contains("=>"));
        assert!(!out.contains("->"));
        assert!(!out.contains('|'));
    }

    #[test]
    fn ellipsis_is_replaced_with_a_space() {
        let out = filter_for_speech("step one... step two", DisplayLevel::Info).unwrap();
        assert!(!out.contains("..."));
        assert!(out.contains("step one"));
        assert!(out.contains("step two"));
    }

    #[test]
    fn error_level_gets_prefixed_unless_already_mentioned() {
        let out = filter_for_speech("disk is full", DisplayLevel::Error).unwrap();
        assert!(out.starts_with("Error:"));
        let out2 = filter_for_speech("operation failed badly", DisplayLevel::Error).unwrap();
        assert!(!out2.starts_with("Error:"));
    }

    #[test]
    fn warning_level_gets_prefixed_unless_already_mentioned() {
        let out = filter_for_speech("disk space is low", DisplayLevel::Warning).unwrap();
        assert!(out.starts_with("Note:"));
        let out2 = filter_for_speech("a caution about disk space", DisplayLevel::Warning).unwrap();
        assert!(!out2.starts_with("Note:"));
    }

    #[test]
    fn truncation_prefers_sentence_boundary_and_always_ends_in_period() {
        let long = "First sentence is here. ".repeat(20);
        let out = filter_for_speech(&long, DisplayLevel::Info).unwrap();
        assert!(out.chars().count() <= 200);
        assert!(out.ends_with('.'));
    }

    #[test]
    fn short_message_gets_period_appended() {
        let out = filter_for_speech("all good now", DisplayLevel::Info).unwrap();
        assert_eq!(out, "all good now.");
    }
}
