use regex::Regex;
use std::sync::LazyLock;

static SECRET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"Bearer\s+[a-zA-Z0-9._\-]{10,}",
        r#"(?i)"(access_token|refresh_token|id_token|password)"\s*:\s*"[^"]*""#,
        r"(?i)(access_token|refresh_token|password)=[^&\s]+",
        r"eyJ[a-zA-Z0-9_\-]{8,}\.[a-zA-Z0-9_\-]+\.[a-zA-Z0-9_\-]*",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Replace token-like material in `text` with `[REDACTED]`.
///
/// Applied to destination response bodies before they end up in errors or
/// logs.
pub fn redact(text: &str) -> String {
    let mut result = text.to_string();
    for regex in SECRET_PATTERNS.iter() {
        result = regex.replace_all(&result, "[REDACTED]").into_owned();
    }
    result
}
