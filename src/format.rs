//! Telegram message text for a single cast.

use crate::feed::Post;
use chrono::{DateTime, NaiveDate, NaiveDateTime};

const MAX_BODY_CHARS: usize = 300;
const ELLIPSIS: &str = "...";

/// Characters treated as line boundaries in cast bodies.
const LINE_BREAKS: [char; 10] = [
    '\n', '\r', '\x0b', '\x0c', '\x1c', '\x1d', '\x1e', '\u{85}', '\u{2028}', '\u{2029}',
];

const OUT_FORMAT: &str = "%Y-%m-%d %H:%M";

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M%z",
];

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Render a cast as a three-line HTML message: author (with date when
/// known), body, permalink.
pub fn format_post(post: &Post) -> String {
    let author = escape_html(post.author_handle());
    let body = escape_html(&truncate_body(&single_line(&post.text)));
    let link = escape_html(&post.link());

    match post.timestamp.as_deref().and_then(format_timestamp) {
        Some(date) => format!("👤 <b>@{}</b> ({})\n📝 {}\n🔗 {}", author, date, body, link),
        None => format!("👤 <b>@{}</b>\n📝 {}\n🔗 {}", author, body, link),
    }
}

/// Trim, then replace each line break with a single space.
pub fn single_line(text: &str) -> String {
    text.trim()
        .replace("\r\n", "\n")
        .split(LINE_BREAKS)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Bodies over 300 characters keep the first 297 plus "...".
pub fn truncate_body(text: &str) -> String {
    if text.chars().count() <= MAX_BODY_CHARS {
        return text.to_string();
    }
    let keep = MAX_BODY_CHARS - ELLIPSIS.len();
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// `YYYY-MM-DD HH:MM` in the timestamp's own offset, or `None` if unparseable.
/// Accepts ISO-8601 date-times with `Z`, a `+hh:mm`/`+hhmm` offset or none,
/// `T` or space separated, with or without seconds. A bare date renders as 00:00.
pub fn format_timestamp(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let zoned = match raw.strip_suffix(['Z', 'z']) {
        Some(rest) => format!("{}+00:00", rest),
        None => raw.to_string(),
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&zoned) {
        return Some(dt.format(OUT_FORMAT).to_string());
    }
    if let Some(dt) = OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(&zoned, fmt).ok())
    {
        return Some(dt.format(OUT_FORMAT).to_string());
    }
    if let Some(dt) = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    {
        return Some(dt.format(OUT_FORMAT).to_string());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.format(OUT_FORMAT).to_string())
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(text: &str, timestamp: Option<&str>) -> Post {
        Post {
            id: "0xfeed".to_string(),
            author: Some("alice".to_string()),
            text: text.to_string(),
            timestamp: timestamp.map(str::to_string),
        }
    }

    #[test]
    fn test_layout_with_timestamp() {
        let msg = format_post(&post("gm", Some("2024-05-01T10:07:33.000Z")));
        assert_eq!(
            msg,
            "👤 <b>@alice</b> (2024-05-01 10:07)\n📝 gm\n🔗 https://warpcast.com/alice/0xfeed"
        );
    }

    #[test]
    fn test_layout_without_timestamp() {
        let msg = format_post(&post("gm", None));
        assert_eq!(msg, "👤 <b>@alice</b>\n📝 gm\n🔗 https://warpcast.com/alice/0xfeed");
    }

    #[test]
    fn test_unparseable_timestamp_is_omitted() {
        let msg = format_post(&post("gm", Some("yesterday-ish")));
        assert!(msg.starts_with("👤 <b>@alice</b>\n"));
    }

    #[test]
    fn test_unknown_author() {
        let mut p = post("gm", None);
        p.author = None;
        let msg = format_post(&p);
        assert!(msg.starts_with("👤 <b>@unknown</b>\n"));
        assert!(msg.ends_with("https://warpcast.com/unknown/0xfeed"));
    }

    #[test]
    fn test_line_breaks_become_spaces() {
        assert_eq!(single_line("  one\ntwo\r\nthree\rfour \n"), "one two three four");
        assert_eq!(single_line("a\n\nb"), "a  b");
    }

    #[test]
    fn test_exactly_300_chars_is_untouched() {
        let body = "x".repeat(300);
        assert_eq!(truncate_body(&body), body);
    }

    #[test]
    fn test_310_chars_truncates_to_300() {
        let body: String = ('a'..='z').cycle().take(310).collect();
        let out = truncate_body(&body);
        assert_eq!(out.chars().count(), 300);
        assert!(out.ends_with("..."));
        assert_eq!(&out[..297], &body[..297]);
    }

    #[test]
    fn test_truncation_counts_characters_not_bytes() {
        let body = "é".repeat(301);
        let out = truncate_body(&body);
        assert_eq!(out.chars().count(), 300);
        assert!(out.starts_with("éé"));
    }

    #[test]
    fn test_truncation_applies_after_collapsing() {
        let text = format!("{}\n{}", "a".repeat(150), "b".repeat(150));
        // 301 chars once the newline becomes a space
        let msg = format_post(&post(&text, None));
        let body_line = msg.lines().nth(1).unwrap();
        assert_eq!(body_line.trim_start_matches("📝 ").chars().count(), 300);
    }

    #[test]
    fn test_markup_in_body_is_escaped() {
        let msg = format_post(&post("1 < 2 & <b>bold</b>", None));
        assert!(msg.contains("📝 1 &lt; 2 &amp; &lt;b&gt;bold&lt;/b&gt;\n"));
    }

    #[test]
    fn test_iso_8601_variants() {
        let cases = [
            ("2024-05-01T10:07:33.000Z", Some("2024-05-01 10:07")),
            ("2024-05-01T10:07:33Z", Some("2024-05-01 10:07")),
            ("2024-05-01T10:07Z", Some("2024-05-01 10:07")),
            ("2024-05-01T10:07+02:00", Some("2024-05-01 10:07")),
            ("2024-05-01 10:07:33", Some("2024-05-01 10:07")),
            ("2024-05-01 10:07:33Z", Some("2024-05-01 10:07")),
            ("2024-05-01 10:07", Some("2024-05-01 10:07")),
            ("2024-05-01T10:07:33+0000", Some("2024-05-01 10:07")),
            ("2024-05-01T10:07:33.123456-0500", Some("2024-05-01 10:07")),
            ("2024-05-01", Some("2024-05-01 00:00")),
            ("  2024-05-01T10:07:33Z  ", Some("2024-05-01 10:07")),
            ("2024-13-01T10:07:33Z", None),
            ("2024-05-01T25:00:00Z", None),
            ("10:07", None),
            ("Z", None),
            ("not a date", None),
        ];
        for (raw, expected) in cases {
            assert_eq!(format_timestamp(raw).as_deref(), expected, "input {:?}", raw);
        }
    }

    #[test]
    fn test_unicode_line_separators_become_spaces() {
        assert_eq!(single_line("a\u{2028}b\u{2029}c\u{85}d\x0be\x0cf\x1cg"), "a b c d e f g");
    }

    #[test]
    fn test_author_is_escaped_in_link_too() {
        let mut p = post("gm", None);
        p.author = Some("a<b>&c".to_string());
        let msg = format_post(&p);
        assert!(msg.starts_with("👤 <b>@a&lt;b&gt;&amp;c</b>\n"));
        assert!(msg.ends_with("🔗 https://warpcast.com/a&lt;b&gt;&amp;c/0xfeed"));
        assert!(!msg.contains("a<b>"));
    }

    #[test]
    fn test_timestamp_keeps_its_offset() {
        assert_eq!(
            format_timestamp("2024-05-01T23:59:00+03:00").as_deref(),
            Some("2024-05-01 23:59")
        );
        assert_eq!(format_timestamp("2024-05-01T08:15:00").as_deref(), Some("2024-05-01 08:15"));
        assert_eq!(format_timestamp(""), None);
    }
}
