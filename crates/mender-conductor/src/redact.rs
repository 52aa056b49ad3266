/// Longest command output kept in the audit trail.
pub const MAX_OUTPUT_CHARS: usize = 2000;

/// Mask secrets in output strings before they are audited.
pub fn mask_secrets(text: &str) -> String {
    let patterns = [
        (r"sk-[a-zA-Z0-9]{20,}", "[MASKED]"),
        (r"Bearer\s+[a-zA-Z0-9._\-]+", "Bearer [MASKED]"),
        (
            r"(?i)(password|passwd|secret|token|key|api_key|apikey)=[^\s&]+",
            "$1=[MASKED]",
        ),
        (r"(?i)(redis-cli\b[^\n]*?\s-a)\s+\S+", "$1 [MASKED]"),
        (r"(?i)(postgres(?:ql)?://[^:\s]+):[^@\s]+@", "$1:[MASKED]@"),
    ];

    let mut result = text.to_string();
    for (pattern, replacement) in patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            result = re.replace_all(&result, replacement).into_owned();
        }
    }
    result
}

/// Mask, then keep the last `MAX_OUTPUT_CHARS` characters (errors land at the end).
pub fn sanitize_output(text: &str) -> String {
    let masked = mask_secrets(text);
    let trimmed = masked.trim();
    let count = trimmed.chars().count();
    if count <= MAX_OUTPUT_CHARS {
        return trimmed.to_string();
    }
    let tail: String = trimmed.chars().skip(count - MAX_OUTPUT_CHARS).collect();
    format!("...{tail}")
}

/// Last non-empty line, for one-line failure details.
pub fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
        .unwrap_or_default()
}
