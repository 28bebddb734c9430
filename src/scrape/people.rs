use std::sync::LazyLock;

use regex::Regex;

use super::catalog::PERSON_ANCHOR_CLASS;
use super::html::{absolutize, blocks, capture_text, first_anchor_with_class};
use crate::model::{PeoplePage, PersonItem};

static CARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<div\s+class="[^"]*\bauthor_item\b[^"]*""#).expect("card pattern is valid")
});

static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<span\s+class="[^"]*author_item_books_count[^"]*"[^>]*>(.*?)</span>"#)
        .expect("count pattern is valid")
});

static NAME_SPAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<span\b[^>]*>(.*?)</span>").expect("name pattern is valid")
});

static PAGE_NAV_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)PageNav\(\s*(\{[^}]*\})").expect("page nav pattern is valid")
});

static PAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""page"\s*:\s*"?(\d+)"#).expect("page pattern is valid"));

static PAGES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""pages"\s*:\s*"?(\d+)"#).expect("pages pattern is valid"));

/// Parses an author/reader listing page.
///
/// Cards without a display name are dropped; a missing profile link leaves
/// the URL empty. Pagination defaults to `1/1` when the page navigation
/// initializer is absent.
pub fn parse_people(html: &str, base_url: &str) -> PeoplePage {
    let items = blocks(html, &CARD_RE)
        .into_iter()
        .filter_map(|card| parse_person_card(card, base_url))
        .collect();
    let (page, pages) = parse_pagination(html);
    PeoplePage { items, page, pages }
}

fn parse_person_card(card: &str, base_url: &str) -> Option<PersonItem> {
    let anchor = first_anchor_with_class(card, PERSON_ANCHOR_CLASS);
    let name = anchor
        .and_then(|a| capture_text(&NAME_SPAN_RE, a.inner))
        .or_else(|| anchor.map(|a| a.text()).filter(|text| !text.is_empty()))?;
    let url = anchor
        .and_then(|a| a.href())
        .filter(|href| !href.is_empty())
        .map(|href| absolutize(base_url, &href))
        .unwrap_or_default();

    Some(PersonItem {
        name,
        url,
        count: capture_text(&COUNT_RE, card),
    })
}

pub(crate) fn parse_pagination(html: &str) -> (u32, u32) {
    let Some(init) = PAGE_NAV_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
    else {
        return (1, 1);
    };
    let number = |re: &Regex| {
        re.captures(init)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
    };
    let page = number(&PAGE_RE).unwrap_or(1).max(1);
    let pages = number(&PAGES_RE).unwrap_or(1).max(page);
    (page, pages)
}
