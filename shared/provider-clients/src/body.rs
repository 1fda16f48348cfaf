//! Normalizes a message body into plain text: strips HTML when that's all
//! a provider gave us, then collapses quoted history so downstream
//! classification sees the new content, not the whole thread.

use regex::Regex;
use std::sync::OnceLock;

fn quote_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(On .{0,120} wrote:\s*$|>.*$|-{2,}\s*Original [Mm]essage\s*-{2,}\s*$)")
            .expect("quote marker regex is valid")
    })
}

/// Converts an HTML body to plain text.
pub fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 120)
}

/// Cuts the body at the first quoted-history marker, applied before any
/// HTML-to-text conversion has a chance to move line boundaries.
pub fn collapse_quoted_history(body_text: &str) -> String {
    match quote_marker().find(body_text) {
        Some(m) => body_text[..m.start()].trim_end().to_string(),
        None => body_text.trim_end().to_string(),
    }
}

/// Full normalization pipeline: collapse quotes first (line-boundary
/// sensitive), then strip HTML if `is_html`.
pub fn normalize_body(raw: &str, is_html: bool) -> String {
    let collapsed = collapse_quoted_history(raw);
    if is_html {
        html_to_text(&collapsed)
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_on_wrote_marker() {
        let body = "New reply here.\n\nOn Mon, Jan 5, 2026 at 9:00 AM, Jane Doe wrote:\n> old stuff";
        assert_eq!(collapse_quoted_history(body), "New reply here.");
    }

    #[test]
    fn collapses_leading_angle_bracket_quotes() {
        let body = "Thanks!\n> previous line one\n> previous line two";
        assert_eq!(collapse_quoted_history(body), "Thanks!");
    }

    #[test]
    fn leaves_unquoted_body_untouched() {
        let body = "Just a plain message with no history.";
        assert_eq!(collapse_quoted_history(body), body);
    }

    #[test]
    fn strips_html_tags() {
        let html = "<p>Hello <b>world</b></p>";
        let text = html_to_text(html);
        assert!(text.contains("Hello"));
        assert!(!text.contains("<b>"));
    }
}
