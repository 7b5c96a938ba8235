//! Text post-processing for model output.
//!
//! All functions here are pure and deterministic: the same input always
//! produces the same output. Cleaning is best-effort string heuristics, so
//! `clean_response` carries a hard safety floor — if the heuristics would
//! remove more than 75% of the original content, the original is returned
//! unmodified.

/// Strip provider-internal reasoning framing and boilerplate from a model
/// response, returning only the user-facing answer text.
///
/// Handles:
/// - `<think>…</think>` / `<thinking>…</thinking>` blocks (local reasoning models)
/// - a leading "reasoning preamble" paragraph ending in a marker such as
///   "最终回答", "Final answer:", or a `---` rule
/// - stray leading/trailing whitespace
pub fn clean_response(text: &str) -> String {
    let original = text;

    let think_re = regex::Regex::new(r"(?s)<think(?:ing)?>.*?</think(?:ing)?>").unwrap();
    let mut cleaned = think_re.replace_all(text, "").to_string();

    // Unclosed reasoning block: drop everything up to the opening tag's
    // matching close, or the whole prefix if the model never closed it.
    if let Some(idx) = cleaned.find("<think") {
        if let Some(end) = cleaned[idx..].find('>') {
            let rest = &cleaned[idx + end + 1..];
            cleaned = match rest.find("</think") {
                Some(close) => {
                    let after = &rest[close..];
                    let tail = after.find('>').map(|i| &after[i + 1..]).unwrap_or("");
                    format!("{}{}", &cleaned[..idx], tail)
                }
                None => cleaned[..idx].to_string(),
            };
        }
    }

    // Leading preamble up to an explicit "final answer" marker.
    for marker in ["最终回答：", "最终回答:", "Final answer:", "Final Answer:"] {
        if let Some(idx) = cleaned.find(marker) {
            cleaned = cleaned[idx + marker.len()..].to_string();
            break;
        }
    }

    let cleaned = cleaned.trim();

    // Safety floor: never delete more than 75% of the original.
    let original_len = original.chars().count();
    if original_len > 0 && cleaned.chars().count() * 4 < original_len {
        return original.to_string();
    }

    cleaned.to_string()
}

/// Remove markdown syntax, leaving plain text. Used for word counting and
/// plain-text display of report sections.
pub fn strip_markdown(text: &str) -> String {
    let mut out = text.to_string();

    // Fenced code blocks keep their inner content
    let fence_re = regex::Regex::new(r"(?s)```[a-zA-Z0-9_+-]*\n?(.*?)```").unwrap();
    out = fence_re.replace_all(&out, "$1").to_string();

    // Headers, emphasis, inline code
    let header_re = regex::Regex::new(r"(?m)^#{1,6}\s*").unwrap();
    out = header_re.replace_all(&out, "").to_string();
    let star_re = regex::Regex::new(r"\*{1,3}([^*]+?)\*{1,3}").unwrap();
    out = star_re.replace_all(&out, "$1").to_string();
    let underscore_re = regex::Regex::new(r"_{1,3}([^_]+?)_{1,3}").unwrap();
    out = underscore_re.replace_all(&out, "$1").to_string();
    let code_re = regex::Regex::new(r"`([^`]*)`").unwrap();
    out = code_re.replace_all(&out, "$1").to_string();

    // Links and images: keep the label
    let link_re = regex::Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").unwrap();
    out = link_re.replace_all(&out, "$1").to_string();

    // List markers and blockquotes
    let list_re = regex::Regex::new(r"(?m)^\s*(?:[-*+]|\d+\.)\s+").unwrap();
    out = list_re.replace_all(&out, "").to_string();
    let quote_re = regex::Regex::new(r"(?m)^>\s*").unwrap();
    out = quote_re.replace_all(&out, "").to_string();

    // Horizontal rules
    let rule_re = regex::Regex::new(r"(?m)^[-*_]{3,}\s*$").unwrap();
    out = rule_re.replace_all(&out, "").to_string();

    out.trim().to_string()
}

/// Count "words" in mixed CJK/Latin text: each CJK character counts as one
/// word; runs of ASCII letters or digits count as one word each.
pub fn count_words(text: &str) -> usize {
    let mut count = 0usize;
    let mut in_ascii_run = false;

    for ch in text.chars() {
        if is_cjk(ch) {
            count += 1;
            in_ascii_run = false;
        } else if ch.is_ascii_alphanumeric() {
            if !in_ascii_run {
                count += 1;
                in_ascii_run = true;
            }
        } else {
            in_ascii_run = false;
        }
    }

    count
}

fn is_cjk(ch: char) -> bool {
    matches!(ch,
        '\u{4E00}'..='\u{9FFF}'       // CJK Unified Ideographs
        | '\u{3400}'..='\u{4DBF}'     // Extension A
        | '\u{F900}'..='\u{FAFF}'     // Compatibility Ideographs
        | '\u{3040}'..='\u{30FF}'     // Hiragana + Katakana
        | '\u{AC00}'..='\u{D7AF}'     // Hangul Syllables
    )
}
