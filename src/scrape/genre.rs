use std::sync::LazyLock;

use regex::Regex;

use super::html::{absolutize, attr, blocks, capture_text, first_anchor_with_class, first_img_attrs};
use crate::model::{BookResult, GenrePage, GenrePageMeta};

pub const UNTITLED_AUDIOBOOK: &str = "Audiobook";

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<div\s+class="page_title"[^>]*>.*?<h1[^>]*>(.*?)</h1>"#)
        .expect("page title pattern is valid")
});

static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<span\s+class="page_title_count"[^>]*>(.*?)</span>"#)
        .expect("page count pattern is valid")
});

static CARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<div\s+class="bookkitem\s*""#).expect("card pattern is valid")
});

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="[^"]*bookkitem_name[^"]*"[^>]*>([^<]+)<"#)
        .expect("name pattern is valid")
});

static AUTHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="[^"]*bookkitem_author_label[^"]*"[^>]*>[^<]*</span>\s*<[^>]*>([^<]+)<"#)
        .expect("author pattern is valid")
});

static READER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)class="[^"]*bookkitem_meta_label[^"]*"[^>]*>\s*Читает\s*</span>\s*(?:<span[^>]*>\s*)?<a[^>]*>([^<]+)<"#,
    )
    .expect("reader pattern is valid")
});

static GENRE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="[^"]*bookkitem_genre[^"]*"[^>]*>[^<]*<a[^>]*>([^<]+)<"#)
        .expect("genre pattern is valid")
});

/// Parses a genre (or any book listing) page: an optional header plus book
/// cards whose fields are each extracted independently.
pub fn parse_genre_page(html: &str, base_url: &str) -> GenrePage {
    GenrePage {
        meta: parse_page_meta(html),
        books: blocks(html, &CARD_RE)
            .into_iter()
            .map(|card| parse_book_card(card, base_url))
            .collect(),
    }
}

pub(crate) fn parse_page_meta(html: &str) -> Option<GenrePageMeta> {
    let title = capture_text(&TITLE_RE, html)?;
    Some(GenrePageMeta {
        title,
        count: capture_text(&COUNT_RE, html),
    })
}

fn parse_book_card(card: &str, base_url: &str) -> BookResult {
    let img = first_img_attrs(card);
    let cover = img
        .and_then(|attrs| attr(attrs, "src"))
        .filter(|src| !src.is_empty())
        .map(|src| absolutize(base_url, &src));
    let alt = img
        .and_then(|attrs| attr(attrs, "alt"))
        .filter(|alt| !alt.is_empty());

    let title = capture_text(&NAME_RE, card)
        .or(alt)
        .unwrap_or_else(|| UNTITLED_AUDIOBOOK.to_string());
    let url = first_anchor_with_class(card, "bookkitem_cover")
        .and_then(|anchor| anchor.href())
        .filter(|href| !href.is_empty())
        .map(|href| absolutize(base_url, &href))
        .unwrap_or_default();

    BookResult {
        id: if url.is_empty() { title.clone() } else { url.clone() },
        title,
        authors: capture_text(&AUTHOR_RE, card).unwrap_or_default(),
        readers: capture_text(&READER_RE, card).unwrap_or_default(),
        cover,
        url,
        likes: 0,
        dislikes: 0,
        genre: capture_text(&GENRE_RE, card),
    }
}
