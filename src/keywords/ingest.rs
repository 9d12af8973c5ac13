use once_cell::sync::Lazy;
use regex::Regex;

static LINE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r\n|\r|\n").expect("line break pattern is valid"));

static SCRIPT_OR_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script>|<style\b[^>]*>.*?</style>")
        .expect("script/style pattern is valid")
});

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"));

/// Removes HTML tags (and the bodies of script/style blocks).
pub fn strip_markup(raw: &str) -> String {
    let without_blocks = SCRIPT_OR_STYLE.replace_all(raw, "");
    TAG.replace_all(&without_blocks, "").into_owned()
}

/// Splits free text into keywords: one per line, markup stripped, trimmed,
/// blank lines dropped. Duplicates are kept.
pub fn parse_keyword_lines(raw: &str) -> Vec<String> {
    LINE_BREAK
        .split(raw)
        .map(|line| strip_markup(line).trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}
