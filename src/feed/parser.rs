//! Tolerant RSS/Atom parsing.
//!
//! The document is first cut into segments (channel header, one segment per
//! `<item>`/`<entry>`) by a forgiving tag scanner, then each segment's direct
//! children are read with `quick-xml`. A segment that fails to parse loses only
//! itself: a broken entry is dropped, a broken header falls back to defaults.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use std::ops::Range;
use thiserror::Error;
use url::Url;

use super::sanitize::sanitize;
use crate::util::clean_title;

/// Title used when a feed does not declare one.
pub const UNKNOWN_FEED_TITLE: &str = "Unknown Feed";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Neither an RSS `<rss>`/`<channel>` nor an Atom `<feed>` marker was found
    #[error("not a valid RSS or Atom feed")]
    UnsupportedFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Rss,
    Atom,
}

/// A feed document reduced to the fields the store keeps.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFeed {
    pub format: FeedFormat,
    pub title: String,
    pub description: String,
    /// Canonical site link, empty when absent or not an absolute http(s) URL
    pub link: String,
    pub entries: Vec<NormalizedEntry>,
    /// Entries dropped for lacking a title or a resolvable URL
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEntry {
    pub title: String,
    pub content: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub guid: String,
}

/// Parses raw feed bytes, stamping undated entries with the current time.
pub fn parse_feed(bytes: &[u8]) -> Result<NormalizedFeed, ParseError> {
    parse_feed_at(bytes, Utc::now())
}

/// Parses raw feed bytes using `now` as the fallback publication time.
pub fn parse_feed_at(bytes: &[u8], now: DateTime<Utc>) -> Result<NormalizedFeed, ParseError> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_start_matches('\u{feff}');
    // ASCII lowercasing keeps byte offsets identical to `text`
    let lower = text.to_ascii_lowercase();

    let format = detect_format(&lower).ok_or(ParseError::UnsupportedFormat)?;
    let whole = 0..text.len();

    let (container, entry_tag) = match format {
        FeedFormat::Rss => {
            let channel = element_spans(&lower, "channel", whole.clone()).into_iter().next();
            let rss = || element_spans(&lower, "rss", whole.clone()).into_iter().next();
            (channel.or_else(rss).unwrap_or(whole.clone()), "item")
        }
        FeedFormat::Atom => {
            let feed = element_spans(&lower, "feed", whole.clone()).into_iter().next();
            (feed.unwrap_or(whole.clone()), "entry")
        }
    };

    // RSS 1.0 places items beside the channel, so scan the whole document
    let entry_spans = element_spans(&lower, entry_tag, whole);

    let header = child_elements(&without_spans(text, container, &entry_spans));
    let (title, description, link) = match format {
        FeedFormat::Rss => (
            first_text(&header, &["title"]),
            first_text(&header, &["description"]),
            first_text(&header, &["link"]),
        ),
        FeedFormat::Atom => (
            first_text(&header, &["title"]),
            first_text(&header, &["subtitle", "tagline"]),
            atom_link(&header),
        ),
    };

    let link = link
        .and_then(|l| resolve_url(l, None))
        .unwrap_or_default();
    let base = Url::parse(&link).ok();

    let mut title = title.map(|t| clean_title(&sanitize(t))).unwrap_or_default();
    if title.is_empty() {
        title = UNKNOWN_FEED_TITLE.to_owned();
    }

    let mut entries = Vec::with_capacity(entry_spans.len());
    let mut skipped = 0;
    for span in entry_spans {
        let children = child_elements(&text[span]);
        let entry = match format {
            FeedFormat::Rss => rss_item(&children, base.as_ref(), now),
            FeedFormat::Atom => atom_entry(&children, base.as_ref(), now),
        };
        match entry {
            Some(entry) => entries.push(entry),
            None => skipped += 1,
        }
    }

    Ok(NormalizedFeed {
        format,
        title,
        description: description.map(sanitize).unwrap_or_default(),
        link,
        entries,
        skipped,
    })
}

fn detect_format(lower: &str) -> Option<FeedFormat> {
    if find_open_tag(lower, "rss", 0).is_some() || find_open_tag(lower, "channel", 0).is_some() {
        Some(FeedFormat::Rss)
    } else if find_open_tag(lower, "feed", 0).is_some() {
        Some(FeedFormat::Atom)
    } else {
        None
    }
}

fn rss_item(children: &[Element], base: Option<&Url>, now: DateTime<Utc>) -> Option<NormalizedEntry> {
    let title = clean_title(&sanitize(first_text(children, &["title"])?));
    if title.is_empty() {
        return None;
    }

    let guid = first_text(children, &["guid"]).map(str::trim).filter(|g| !g.is_empty());

    // A guid without isPermaLink="false" is, per RSS 2.0, the item's permalink
    let permalink = children
        .iter()
        .find(|c| c.name == "guid")
        .filter(|c| !c.attr("ispermalink").is_some_and(|v| v.eq_ignore_ascii_case("false")))
        .map(|c| c.text.as_str());

    let url = first_text(children, &["link"])
        .and_then(|l| resolve_url(l, base))
        .or_else(|| permalink.and_then(|p| resolve_url(p, None)))?;

    Some(NormalizedEntry {
        title,
        content: first_text(children, &["content:encoded", "description"])
            .map(sanitize)
            .unwrap_or_default(),
        guid: guid.map(str::to_owned).unwrap_or_else(|| url.clone()),
        published_at: parse_date(first_text(children, &["pubdate", "dc:date"]), now),
        url,
    })
}

fn atom_entry(children: &[Element], base: Option<&Url>, now: DateTime<Utc>) -> Option<NormalizedEntry> {
    let title = clean_title(&sanitize(first_text(children, &["title"])?));
    if title.is_empty() {
        return None;
    }

    let url = atom_link(children).and_then(|l| resolve_url(l, base))?;
    let guid = first_text(children, &["id"]).map(str::trim).filter(|g| !g.is_empty());

    Some(NormalizedEntry {
        title,
        content: first_text(children, &["content", "summary"])
            .map(sanitize)
            .unwrap_or_default(),
        guid: guid.map(str::to_owned).unwrap_or_else(|| url.clone()),
        published_at: parse_date(first_text(children, &["published", "updated"]), now),
        url,
    })
}

/// Picks the `rel="alternate"` (or rel-less) link, falling back to any link with an href.
fn atom_link(children: &[Element]) -> Option<&str> {
    let links = || {
        children
            .iter()
            .filter(|c| c.name == "link")
            .filter_map(|c| Some((c.attr("rel"), c.attr("href")?)))
            .filter(|(_, href)| !href.trim().is_empty())
    };
    links()
        .find(|(rel, _)| rel.is_none_or(|r| r.eq_ignore_ascii_case("alternate")))
        .or_else(|| links().next())
        .map(|(_, href)| href)
}

/// Accepts absolute http(s) URLs as written; relative ones only if a base resolves them.
fn resolve_url(raw: &str, base: Option<&Url>) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let is_web = |u: &Url| matches!(u.scheme(), "http" | "https");
    match Url::parse(raw) {
        Ok(url) => is_web(&url).then(|| raw.to_owned()),
        Err(url::ParseError::RelativeUrlWithoutBase) => base
            .and_then(|b| b.join(raw).ok())
            .filter(is_web)
            .map(String::from),
        Err(_) => None,
    }
}

fn parse_date(raw: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(parse_lenient_date)
        .unwrap_or(now)
}

fn parse_lenient_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // "UTC" is common in the wild but not an RFC 2822 zone
    if let Some(prefix) = s.strip_suffix("UTC") {
        if let Ok(dt) = DateTime::parse_from_rfc2822(&format!("{prefix}+0000")) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S %z", "%Y-%m-%dT%H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Segment scanning
// ============================================================================

/// Finds `<name` followed by whitespace, `>` or `/` at or after `from`.
fn find_open_tag(lower: &str, name: &str, from: usize) -> Option<usize> {
    let needle = format!("<{name}");
    let mut pos = from;
    while let Some(rel) = lower.get(pos..)?.find(&needle) {
        let start = pos + rel;
        let after = start + needle.len();
        match lower.as_bytes().get(after) {
            Some(b) if b.is_ascii_whitespace() || *b == b'>' || *b == b'/' => return Some(start),
            Some(_) => pos = after,
            None => return None,
        }
    }
    None
}

/// Finds `</name>` at or after `from`, returning `(start, end_after_gt)`.
fn find_close_tag(lower: &str, name: &str, from: usize) -> Option<(usize, usize)> {
    let needle = format!("</{name}");
    let mut pos = from;
    while let Some(rel) = lower.get(pos..)?.find(&needle) {
        let start = pos + rel;
        let after = start + needle.len();
        match lower.as_bytes().get(after) {
            Some(b) if b.is_ascii_whitespace() || *b == b'>' => {
                let gt = lower[after..].find('>')?;
                return Some((start, after + gt + 1));
            }
            Some(_) => pos = after,
            None => return None,
        }
    }
    None
}

/// Byte spans of every `name` element inside `within`.
///
/// An element whose close tag is missing ends where the next sibling of the
/// same name opens (or at the end of `within`). Each forward search result is
/// kept until the cursor moves past it, and a failed search is never repeated,
/// so the scan stays linear however many close tags are missing.
fn element_spans(lower: &str, name: &str, within: Range<usize>) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut next_gt: Option<Option<usize>> = None;
    let mut next_close: Option<Option<(usize, usize)>> = None;
    let mut next_open = find_open_tag(lower, name, within.start);

    while let Some(start) = next_open.filter(|&s| s < within.end) {
        if next_gt.is_none_or(|gt| gt.is_some_and(|g| g < start)) {
            next_gt = Some(lower[start..].find('>').map(|i| start + i));
        }
        let tag_end = next_gt
            .flatten()
            .map_or(within.end, |g| g + 1)
            .min(within.end);

        next_open = find_open_tag(lower, name, tag_end);

        if lower[start..tag_end].ends_with("/>") {
            spans.push(start..tag_end);
            continue;
        }

        if next_close.is_none_or(|close| close.is_some_and(|(s, _)| s < tag_end)) {
            next_close = Some(find_close_tag(lower, name, tag_end));
        }

        let sibling = next_open.filter(|&s| s < within.end);
        let end = match next_close.flatten() {
            Some((close_start, close_end))
                if close_end <= within.end && sibling.is_none_or(|n| close_start < n) =>
            {
                close_end
            }
            _ => sibling.unwrap_or(within.end),
        };

        spans.push(start..end);
        // `</item <item>` puts an opener inside the close tag itself
        if next_open.is_some_and(|n| n < end) {
            next_open = find_open_tag(lower, name, end);
        }
    }

    spans
}

/// Copies `container` out of `text` with every span in `holes` cut out.
fn without_spans(text: &str, container: Range<usize>, holes: &[Range<usize>]) -> String {
    let mut out = String::with_capacity(container.len());
    let mut cursor = container.start;
    for hole in holes {
        if hole.start >= cursor && hole.end <= container.end {
            out.push_str(&text[cursor..hole.start]);
            cursor = hole.end;
        }
    }
    out.push_str(&text[cursor..container.end]);
    out
}

// ============================================================================
// Child extraction
// ============================================================================

/// A direct child of a segment's root element.
#[derive(Debug, Default)]
struct Element {
    /// Qualified, lowercased name (`title`, `content:encoded`, `dc:date`)
    name: String,
    attrs: Vec<(String, String)>,
    /// Text content; nested markup is kept as markup
    text: String,
}

impl Element {
    fn open(start: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Self {
        let attrs = start
            .html_attributes()
            .flatten()
            .map(|attr| {
                let key = String::from_utf8_lossy(attr.key.as_ref()).to_ascii_lowercase();
                let value = attr
                    .decode_and_unescape_value(reader.decoder())
                    .map(Cow::into_owned)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
                (key, value)
            })
            .collect();

        Self {
            name: String::from_utf8_lossy(start.name().as_ref()).to_ascii_lowercase(),
            attrs,
            text: String::new(),
        }
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// First non-blank text among children named `names`, in priority order.
fn first_text<'a>(children: &'a [Element], names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| {
        children
            .iter()
            .filter(|c| c.name == *name)
            .map(|c| c.text.trim())
            .find(|t| !t.is_empty())
    })
}

/// Reads the direct children of the fragment's root element.
///
/// End-tag names are not checked. A syntax error ends extraction early and
/// keeps the children completed so far.
fn child_elements(fragment: &str) -> Vec<Element> {
    let mut reader = Reader::from_str(fragment);
    reader.config_mut().check_end_names = false;

    let mut children = Vec::new();
    let mut current: Option<Element> = None;
    let mut depth: usize = 0;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    position = reader.buffer_position(),
                    "Feed fragment truncated at malformed markup"
                );
                return children;
            }
        };

        match event {
            Event::Start(e) => {
                depth += 1;
                if depth == 2 {
                    current = Some(Element::open(&e, &reader));
                } else if let Some(el) = current.as_mut() {
                    el.text.push('<');
                    el.text.push_str(&String::from_utf8_lossy(&e));
                    el.text.push('>');
                }
            }
            Event::Empty(e) => match depth {
                0 => return children,
                1 => children.push(Element::open(&e, &reader)),
                _ => {
                    if let Some(el) = current.as_mut() {
                        el.text.push('<');
                        el.text.push_str(&String::from_utf8_lossy(&e));
                        el.text.push_str("/>");
                    }
                }
            },
            Event::End(e) => {
                match depth {
                    0 | 1 => return children,
                    2 => children.extend(current.take()),
                    _ => {
                        if let Some(el) = current.as_mut() {
                            el.text.push_str("</");
                            el.text.push_str(&String::from_utf8_lossy(&e));
                            el.text.push('>');
                        }
                    }
                }
                depth -= 1;
            }
            Event::Text(e) => {
                if let Some(el) = current.as_mut() {
                    // Text directly in the field is entity-decoded (escaped HTML
                    // becomes markup); text inside nested markup stays escaped.
                    if depth == 2 {
                        match e.unescape() {
                            Ok(text) => el.text.push_str(&text),
                            Err(_) => el.text.push_str(&String::from_utf8_lossy(&e)),
                        }
                    } else {
                        el.text.push_str(&String::from_utf8_lossy(&e));
                    }
                }
            }
            Event::CData(e) => {
                if let Some(el) = current.as_mut() {
                    el.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::Eof => {
                children.extend(current.take());
                return children;
            }
            _ => {}
        }
    }
}
