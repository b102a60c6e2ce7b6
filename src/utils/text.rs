//! Text helpers for building prompts and reading model output

/// Extract a JSON object from a response that might have extra text
///
/// Handles bare objects, objects followed by chatter, and objects wrapped in
/// ```json fences. Returns the trimmed input when nothing better is found.
pub fn extract_json(response: &str) -> String {
    let trimmed = response.trim();

    if trimmed.starts_with('{') {
        if let Some(object) = balanced_object(trimmed) {
            return object.to_string();
        }
    }

    // Fenced block with a language tag
    if let Some(start) = trimmed.find("```json") {
        let json_start = start + 7;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim().to_string();
        }
    }

    // Bare fence
    if let Some(start) = trimmed.find("```") {
        let content_start = start + 3;
        if let Some(end) = trimmed[content_start..].find("```") {
            let content = trimmed[content_start..content_start + end].trim();
            if let Some(newline) = content.find('\n') {
                let after_lang = &content[newline + 1..];
                if after_lang.trim().starts_with('{') {
                    return after_lang.trim().to_string();
                }
            }
            return content.to_string();
        }
    }

    // Object embedded in prose
    if let Some(start) = trimmed.find('{') {
        if let Some(object) = balanced_object(&trimmed[start..]) {
            return object.to_string();
        }
    }

    trimmed.to_string()
}

/// Prefix of `text` (which starts with '{') up to its matching close brace
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Truncate to at most `max_chars` characters, preferring a word boundary
///
/// Appends "..." when anything was cut.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let head = &text[..cut];

    // Only back off to a space if that keeps most of the text
    let head = match head.rfind(char::is_whitespace) {
        Some(space) if space > cut * 4 / 5 => &head[..space],
        _ => head,
    };

    format!("{}...", head.trim_end())
}

/// Keep the start and end of a long text, dropping the middle
///
/// Methods sit near the start of a paper and results near the end, so both
/// halves survive.
pub fn truncate_middle(text: &str, max_chars: usize) -> String {
    const MARKER: &str = "\n\n[...text truncated...]\n\n";

    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }

    let half = max_chars / 2;
    let head: String = text.chars().take(half).collect();
    let tail: String = text.chars().skip(total - half).collect();
    format!("{}{}{}", head, MARKER, tail)
}

/// Rough token count, four characters per token
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    (text.chars().count() / 4).max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_pure() {
        let input = r#"{"decision": "included", "confidence": 0.9} trailing words"#;
        assert_eq!(
            extract_json(input),
            r#"{"decision": "included", "confidence": 0.9}"#
        );
    }

    #[test]
    fn test_extract_json_with_markdown() {
        let input = "Here's the JSON:\n```json\n{\"decision\": \"excluded\"}\n```";
        assert_eq!(extract_json(input), r#"{"decision": "excluded"}"#);
    }

    #[test]
    fn test_extract_json_braces_in_strings() {
        let input = r#"Result: {"reason": "uses {curly} \"quotes\"", "confidence": 1} ok"#;
        let json = extract_json(input);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["confidence"], 1);
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        let text = "word ".repeat(100);
        let out = truncate_text(&text, 52);
        assert!(out.ends_with("..."));
        assert!(out.chars().count() <= 55);
        assert!(!out.trim_end_matches("...").ends_with(' '));

        // Multi-byte characters are never split
        let accented = "é".repeat(20);
        assert_eq!(truncate_text(&accented, 5), format!("{}...", "é".repeat(5)));
    }

    #[test]
    fn test_truncate_middle() {
        assert_eq!(truncate_middle("short", 10), "short");

        let text = format!("{}{}{}", "a".repeat(50), "b".repeat(100), "c".repeat(50));
        let out = truncate_middle(&text, 100);
        assert!(out.starts_with(&"a".repeat(50)));
        assert!(out.ends_with(&"c".repeat(50)));
        assert!(out.contains("[...text truncated...]"));
        assert!(!out.contains('b'));
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens(&"a".repeat(400)), 100);
    }
}
