//! Ingest-time removal of actively dangerous HTML constructs.
//!
//! This is not an HTML sanitizer in the allow-list sense. Feed content keeps its
//! markup; only script/style blocks, `javascript:` URIs and inline event-handler
//! attributes are removed here. The render layer sanitizes again.

use regex::Regex;
use std::sync::LazyLock;

/// `<script>...</script>` and `<style>...</style>`, non-greedy, across lines.
static SCRIPT_STYLE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(?:script|style)\s*>")
        .expect("Invalid script/style block pattern")
});

/// Self-closing `<script src="..."/>`.
static SCRIPT_STYLE_SELF_CLOSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(?:script|style)\b[^>]*/>").expect("Invalid self-closing pattern")
});

/// An opener with no matching close tag swallows the rest of the fragment.
static SCRIPT_STYLE_UNTERMINATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:script|style)\b.*\z").expect("Invalid unterminated pattern")
});

static OPENING_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[A-Za-z][^>]*>").expect("Invalid tag pattern"));

/// `onclick="..."`, `onerror='...'`, `onload=alert(1)`, preceded by whitespace,
/// `/` or the closing quote of the previous attribute. The quote is captured so
/// it can be put back.
static EVENT_HANDLER_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:(["'])|[\s/])[\s/]*on[a-z]+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#)
        .expect("Invalid event handler pattern")
});

static JAVASCRIPT_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript\s*:").expect("Invalid javascript URI pattern"));

/// `="..."`, `='...'` or a bare value inside an opening tag.
static ATTR_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"=\s*(?:"[^"]*"|'[^']*'|[^\s>"']+)"#).expect("Invalid attribute value pattern")
});

/// `&#115;`, `&#x73;`, with or without the trailing `;`.
static NUMERIC_CHAR_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)&#(?:x([0-9a-f]{1,6})|([0-9]{1,7}));?").expect("Invalid character reference pattern")
});

/// Strips script/style blocks, `javascript:` URIs and `on*=` attributes, then trims.
///
/// ```
/// use feedloom::feed::sanitize;
///
/// let cleaned = sanitize(r#"<p onclick="x()">Hi</p><script>evil()</script>"#);
/// assert_eq!(cleaned, "<p>Hi</p>");
/// ```
pub fn sanitize(input: &str) -> String {
    let without_blocks = SCRIPT_STYLE_BLOCK.replace_all(input, "");
    let without_self_closing = SCRIPT_STYLE_SELF_CLOSING.replace_all(&without_blocks, "");
    let without_unterminated = SCRIPT_STYLE_UNTERMINATED.replace_all(&without_self_closing, "");
    let without_uris = JAVASCRIPT_URI.replace_all(&without_unterminated, "");

    OPENING_TAG
        .replace_all(&without_uris, |caps: &regex::Captures| {
            // A removed handler takes its neighbour's separating quote with it
            let mut tag = caps[0].to_owned();
            while EVENT_HANDLER_ATTR.is_match(&tag) {
                tag = EVENT_HANDLER_ATTR.replace_all(&tag, "${1}").into_owned();
            }
            ATTR_VALUE
                .replace_all(&tag, |value: &regex::Captures| {
                    if hides_javascript_uri(&value[0]) {
                        "=\"\"".to_owned()
                    } else {
                        value[0].to_owned()
                    }
                })
                .into_owned()
        })
        .trim()
        .to_owned()
}

/// True if the attribute value spells `javascript:` once character references
/// are decoded and the whitespace and control characters browsers skip in a
/// URL scheme are dropped.
fn hides_javascript_uri(value: &str) -> bool {
    let decoded = NUMERIC_CHAR_REF.replace_all(value, |caps: &regex::Captures| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (None, Some(dec)) => dec.as_str().parse().ok(),
            (None, None) => None,
        };
        code.and_then(char::from_u32).map(String::from).unwrap_or_default()
    });

    let compact: String = decoded
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase()
        .replace("&tab;", "")
        .replace("&newline;", "")
        .replace("&colon;", ":");

    compact.contains("javascript:")
}
