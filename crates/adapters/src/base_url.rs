use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/v\d+/?$").expect("valid version suffix regex"));
static OLLAMA_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(/v1|/api)/?$").expect("valid ollama suffix regex"));

/// Normalises an OpenAI-compatible endpoint so it ends in a version segment.
/// A trailing `#` opts out and is stripped.
pub fn check_base_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if let Some(verbatim) = trimmed.strip_suffix('#') {
        return verbatim.to_string();
    }
    if VERSION_SUFFIX_RE.is_match(trimmed) || trimmed.contains("/v1/") {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("{}/v1", trimmed.trim_end_matches('/'))
    }
}

/// Server root for Ollama's native API: `http://host:11434/v1` and
/// `http://host:11434/api/` both become `http://host:11434`.
pub fn ollama_api_root(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('#');
    OLLAMA_SUFFIX_RE
        .replace(trimmed, "")
        .trim_end_matches('/')
        .to_string()
}
