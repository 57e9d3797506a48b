//! Text shaping applied to sandbox output and generator replies.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Keep the head and tail halves of `text` when it exceeds `limit` characters.
///
/// Returns the (possibly shortened) text and whether truncation happened.
/// Lengths are counted in characters, not bytes.
pub fn truncate(text: &str, limit: usize) -> (String, bool) {
    let total = text.chars().count();
    if total <= limit {
        return (text.to_string(), false);
    }
    let half = limit / 2;
    let head: String = text.chars().take(half).collect();
    let tail: String = text.chars().skip(total - half).collect();
    (
        format!("{head}\n...\n[Output truncated, total {total} characters]\n...\n{tail}"),
        true,
    )
}

/// Collapse repeated lines, keeping first-seen order.
///
/// Lines are trimmed and blank lines dropped. A line seen more than three
/// times is emitted once with a `(repeated N times)` suffix.
pub fn compress_duplicate_lines(text: &str) -> String {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let count = counts.entry(line).or_insert(0);
        if *count == 0 {
            order.push(line);
        }
        *count += 1;
    }
    order
        .into_iter()
        .map(|line| match counts.get(line).copied().unwrap_or(1) {
            n if n > 3 => format!("{line} (repeated {n} times)"),
            _ => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Number of characters that are not whitespace.
pub fn non_whitespace_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

static NOISE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^Looking in indexes:",
        r"^Requirement already satisfied:",
        r"^WARNING: Running pip as",
        r"^\[notice\]",
        r"^-{80,}$",
        r"^Collecting ",
        r"^Downloading ",
        r"^Installing collected packages:",
        r"^Successfully installed",
        r"━+",
        r"/workspace/tmp_code_",
        r"RuntimeWarning:",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("noise pattern"))
    .collect()
});

/// Drop installer chatter, progress bars, sandbox temp paths and blank lines.
pub fn clean_execution_output(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !NOISE_PATTERNS.iter().any(|re| re.is_match(trimmed))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        let (out, truncated) = truncate("abcdef", 6);
        assert_eq!(out, "abcdef");
        assert!(!truncated);
    }

    #[test]
    fn long_text_keeps_head_and_tail() {
        let text: String = ('a'..='z').collect();
        let (out, truncated) = truncate(&text, 10);
        assert!(truncated);
        assert!(out.starts_with("abcde\n"));
        assert!(out.ends_with("\nvwxyz"));
        assert!(out.contains("[Output truncated, total 26 characters]"));
        let overhead = "\n...\n[Output truncated, total 26 characters]\n...\n".len();
        assert!(out.chars().count() <= 10 + overhead);
    }

    #[test]
    fn truncate_counts_characters() {
        let text = "é".repeat(20);
        let (out, truncated) = truncate(&text, 8);
        assert!(truncated);
        assert!(out.starts_with("éééé\n"));
    }

    #[test]
    fn repeated_lines_get_suffix_only_above_three() {
        let text = "x\nx\nx\nx\ny\ny\ny\n  \nz";
        let out = compress_duplicate_lines(text);
        assert_eq!(out, "x (repeated 4 times)\ny\nz");
    }

    #[test]
    fn compression_preserves_first_seen_order() {
        let out = compress_duplicate_lines("b\n a \nb\na");
        assert_eq!(out, "b\na");
    }

    #[test]
    fn whitespace_is_not_counted() {
        assert_eq!(non_whitespace_len(" a b\n\tc "), 3);
    }

    #[test]
    fn noise_lines_are_removed() {
        let raw = "Collecting pandas\nRequirement already satisfied: numpy\n\
                   ━━━━━━━━ 10 MB\n\nresult: 3 anomalies\n\
                   /workspace/tmp_code_abc.py:3: RuntimeWarning: divide\n\
                   --------------------------------------------------------------------------------\n\
                   done";
        assert_eq!(clean_execution_output(raw), "result: 3 anomalies\ndone");
    }
}
