use once_cell::sync::Lazy;
use regex::Regex;

/// Token shapes that must never reach an event payload or a log line.
static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"sk-[A-Za-z0-9_-]{8,}").unwrap(),
        Regex::new(r"ghp_[A-Za-z0-9]{8,}").unwrap(),
        Regex::new(r"(?i)Bearer\s+[A-Za-z0-9._-]+").unwrap(),
    ]
});

/// Replace anything secret-shaped with `[REDACTED]`.
pub fn redact(text: &str) -> String {
    let mut sanitized = text.to_string();
    for pattern in SENSITIVE_PATTERNS.iter() {
        sanitized = pattern.replace_all(&sanitized, "[REDACTED]").into_owned();
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_api_key_shapes() {
        let text = "use sk-1234567890abcdef and ghp_abcdef123456 to login";
        let clean = redact(text);
        assert!(!clean.contains("sk-1234567890abcdef"));
        assert!(!clean.contains("ghp_abcdef123456"));
        assert_eq!(clean.matches("[REDACTED]").count(), 2);
    }

    #[test]
    fn masks_bearer_headers() {
        let clean = redact("Authorization: Bearer abc.def-ghi");
        assert_eq!(clean, "Authorization: [REDACTED]");
    }

    #[test]
    fn leaves_plain_text_alone() {
        let text = "nothing secret here";
        assert_eq!(redact(text), text);
    }
}
