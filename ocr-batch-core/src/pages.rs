//! Splits OCR output into pages.
//!
//! The OCR prompt asks the model to wrap every page in
//! `<page number="N">...</page>`. Text without any such section is a
//! single-block result and yields no pages.

use crate::contract::Page;
use regex::Regex;
use std::sync::OnceLock;

fn page_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)<page\s+number\s*=\s*"?(\d+)"?\s*>(.*?)</page>"#)
            .expect("page pattern is a valid regex")
    })
}

/// Extracts page sections in ascending page order, or `None` when there are none.
pub fn split_pages(text: &str) -> Option<Vec<Page>> {
    let mut pages: Vec<Page> = page_pattern()
        .captures_iter(text)
        .filter_map(|caps| {
            let number: u32 = caps.get(1)?.as_str().parse().ok()?;
            if number == 0 {
                return None;
            }
            let body = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
            Some(Page::new(number, body))
        })
        .collect();

    if pages.is_empty() {
        return None;
    }
    pages.sort_by_key(|p| p.page_number);
    Some(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_sorted_and_trimmed() {
        let text = r#"<page number="2">
second
</page>
<page number="1">first</page>"#;
        let pages = split_pages(text).expect("pages");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[0].content, "first");
        assert_eq!(pages[1].content, "second");
        assert_eq!(pages[1].length, 6);
    }

    #[test]
    fn plain_text_has_no_pages() {
        assert!(split_pages("just some text").is_none());
    }

    #[test]
    fn page_zero_is_dropped() {
        let pages = split_pages(r#"<page number="0">x</page><page number="3">y</page>"#)
            .expect("pages");
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_number, 3);
    }
}
