use std::cell::Cell;

use clap::ValueEnum;
use tracing::debug;

use crate::http::{Fetch, FetchError};
use crate::model::{
    BookResult, CatalogItem, GenrePage, GenrePageMeta, PeoplePage, PersonItem, Track,
};
use crate::scrape::{
    GENRE_ANCHOR_CLASS, PERSON_ANCHOR_CLASS, extract_tracks_for_resume, parse_catalog,
    parse_genre_page, parse_people, parse_quick_search,
};

/// Letter filters offered for people listings, grouped by script.
pub const LETTER_GROUPS: &[(&str, &[&str])] = &[
    (
        "ru",
        &[
            "А", "Б", "В", "Г", "Д", "Е", "Ж", "З", "И", "Й", "К", "Л", "М", "Н", "О", "П", "Р",
            "С", "Т", "У", "Ф", "Х", "Ц", "Ч", "Ш", "Щ", "Ы", "Э", "Ю", "Я",
        ],
    ),
    (
        "en",
        &[
            "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q",
            "R", "S", "T", "U", "V", "W", "X", "Y", "Z",
        ],
    ),
    (
        "other",
        &[
            "(", ".", "0", "«", "圣", "夜", "奥", "快", "点", "跃", "銀", "아", "유", "은", "한",
        ],
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeopleKind {
    Authors,
    Readers,
}

impl PeopleKind {
    pub fn as_path(self) -> &'static str {
        match self {
            Self::Authors => "authors",
            Self::Readers => "readers",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeopleFilter {
    All,
    Letter(String),
    Search(String),
}

impl PeopleFilter {
    /// A non-blank query wins over a letter; blank inputs mean no filter.
    pub fn from_parts(letter: Option<&str>, query: Option<&str>) -> Self {
        if let Some(query) = query.map(str::trim).filter(|query| !query.is_empty()) {
            return Self::Search(query.to_string());
        }
        match letter.filter(|letter| !letter.is_empty()) {
            Some(letter) => Self::Letter(letter.to_string()),
            None => Self::All,
        }
    }
}

/// Time window for popularity and rating listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Period {
    Today,
    Week,
    Month,
    #[value(name = "alltime", alias = "all-time")]
    AllTime,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Week => "week",
            Self::Month => "month",
            Self::AllTime => "alltime",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenreListing {
    Newest,
    Popular(Period),
    TopRated(Period),
}

/// Canonical request URLs for every listing the app browses.
#[derive(Debug, Clone)]
pub struct CatalogUrls {
    base_url: String,
}

impl CatalogUrls {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn quick_search(&self, query: &str) -> String {
        format!(
            "{}/search/quick.json?q={}",
            self.base_url,
            urlencoding::encode(query.trim())
        )
    }

    pub fn genres_index(&self) -> String {
        format!("{}/genres/", self.base_url)
    }

    pub fn people(&self, kind: PeopleKind, filter: &PeopleFilter, page: u32) -> String {
        let page = page.max(1);
        let kind = kind.as_path();
        match filter {
            PeopleFilter::Search(query) => format!(
                "{}/search/{kind}/?q={}&page={page}&button=",
                self.base_url,
                urlencoding::encode(query.trim())
            ),
            PeopleFilter::Letter(letter) => format!(
                "{}/{kind}/letter/{}/?page={page}",
                self.base_url,
                urlencoding::encode(letter)
            ),
            PeopleFilter::All if page > 1 => format!("{}/{kind}/{page}/", self.base_url),
            PeopleFilter::All => format!("{}/{kind}/", self.base_url),
        }
    }

    pub fn genre(&self, genre_url: &str, listing: GenreListing) -> String {
        let base = genre_url.trim_end_matches('/');
        match listing {
            GenreListing::Newest => format!("{base}/"),
            GenreListing::Popular(period) => format!("{base}/popular/?period={}", period.as_str()),
            GenreListing::TopRated(period) => format!("{base}/rating/?period={}", period.as_str()),
        }
    }
}

/// Fetch-then-parse orchestration for each listing kind. One blocking fetch
/// per call; a fetch failure surfaces as [`FetchError`], an empty parse as an
/// empty result.
pub struct Navigator<'a, F: Fetch> {
    fetcher: &'a F,
    urls: CatalogUrls,
}

impl<'a, F: Fetch> Navigator<'a, F> {
    pub fn new(fetcher: &'a F, base_url: &str) -> Self {
        Self {
            fetcher,
            urls: CatalogUrls::new(base_url),
        }
    }

    pub fn search_books(&self, query: &str) -> Result<Vec<BookResult>, FetchError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let payload = self.fetcher.get_json(&self.urls.quick_search(query))?;
        let books = parse_quick_search(&payload, self.urls.base_url());
        debug!(query, found = books.len(), "quick search");
        Ok(books)
    }

    pub fn genres(&self) -> Result<Vec<CatalogItem>, FetchError> {
        let html = self.fetcher.get_text(&self.urls.genres_index())?;
        Ok(parse_catalog(&html, GENRE_ANCHOR_CLASS, self.urls.base_url()))
    }

    /// Loads one page of people. When no person card is recognized the
    /// plain name anchors are used instead, without counts.
    pub fn people(
        &self,
        kind: PeopleKind,
        filter: &PeopleFilter,
        page: u32,
    ) -> Result<PeoplePage, FetchError> {
        let html = self.fetcher.get_text(&self.urls.people(kind, filter, page))?;
        let mut listing = parse_people(&html, self.urls.base_url());
        if listing.items.is_empty() {
            listing.items = parse_catalog(&html, PERSON_ANCHOR_CLASS, self.urls.base_url())
                .into_iter()
                .map(|item| PersonItem {
                    name: item.title,
                    url: item.url,
                    count: None,
                })
                .collect();
            if !listing.items.is_empty() {
                debug!(kind = kind.as_path(), "people cards missing, using name anchors");
            }
        }
        Ok(listing)
    }

    /// Loads one genre listing. Pages without their own header get one
    /// built from the catalog entry that led here.
    pub fn genre_page(
        &self,
        genre: &CatalogItem,
        listing: GenreListing,
    ) -> Result<GenrePage, FetchError> {
        let html = self.fetcher.get_text(&self.urls.genre(&genre.url, listing))?;
        let mut page = parse_genre_page(&html, self.urls.base_url());
        if page.meta.is_none() {
            page.meta = Some(GenrePageMeta {
                title: genre.title.clone(),
                count: None,
            });
        }
        Ok(page)
    }

    pub fn book_tracks(
        &self,
        book_url: &str,
        resume_url: Option<&str>,
    ) -> Result<Vec<Track>, FetchError> {
        let html = self.fetcher.get_text(book_url)?;
        let tracks = extract_tracks_for_resume(&html, resume_url);
        debug!(book_url, tracks = tracks.len(), "extracted tracks");
        Ok(tracks)
    }
}

/// Ticket handed out when a screen starts a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// Latest-wins relevance for one screen: results are only applied when they
/// carry the newest ticket. Older requests still run to completion.
#[derive(Debug, Default)]
pub struct RequestGate {
    latest: Cell<u64>,
}

impl RequestGate {
    pub fn issue(&self) -> Ticket {
        let next = self.latest.get() + 1;
        self.latest.set(next);
        Ticket(next)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.latest.get() == ticket.0
    }

    /// Passes `result` through only when `ticket` is still the latest.
    pub fn accept<T>(&self, ticket: Ticket, result: T) -> Option<T> {
        if self.is_current(ticket) {
            Some(result)
        } else {
            debug!(ticket = ticket.0, latest = self.latest.get(), "discarding stale result");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;

    const BASE: &str = "https://knigavuhe.org";

    #[derive(Default)]
    struct MapFetcher {
        pages: HashMap<String, String>,
        requested: RefCell<Vec<String>>,
    }

    impl MapFetcher {
        fn with(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), body.to_string());
            self
        }
    }

    impl Fetch for MapFetcher {
        fn get_text(&self, url: &str) -> Result<String, FetchError> {
            self.requested.borrow_mut().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::LoadFailed {
                    url: url.to_string(),
                    reason: "HTTP status 404".to_string(),
                })
        }
    }

    #[test]
    fn people_urls_cover_search_letter_and_plain_listing() {
        let urls = CatalogUrls::new("https://knigavuhe.org/");
        assert_eq!(
            urls.people(
                PeopleKind::Authors,
                &PeopleFilter::Search(" Толстой ".to_string()),
                2
            ),
            "https://knigavuhe.org/search/authors/?q=%D0%A2%D0%BE%D0%BB%D1%81%D1%82%D0%BE%D0%B9&page=2&button="
        );
        assert_eq!(
            urls.people(PeopleKind::Readers, &PeopleFilter::Letter("Б".to_string()), 3),
            "https://knigavuhe.org/readers/letter/%D0%91/?page=3"
        );
        assert_eq!(
            urls.people(PeopleKind::Authors, &PeopleFilter::All, 1),
            "https://knigavuhe.org/authors/"
        );
        assert_eq!(
            urls.people(PeopleKind::Authors, &PeopleFilter::All, 4),
            "https://knigavuhe.org/authors/4/"
        );
        assert_eq!(
            urls.people(PeopleKind::Authors, &PeopleFilter::All, 0),
            "https://knigavuhe.org/authors/"
        );
    }

    #[test]
    fn genre_urls_cover_every_listing_variant() {
        let urls = CatalogUrls::new(BASE);
        let genre = "https://knigavuhe.org/genre/fantastika/";
        assert_eq!(
            urls.genre(genre, GenreListing::Newest),
            "https://knigavuhe.org/genre/fantastika/"
        );
        assert_eq!(
            urls.genre(genre, GenreListing::Popular(Period::Week)),
            "https://knigavuhe.org/genre/fantastika/popular/?period=week"
        );
        assert_eq!(
            urls.genre("https://knigavuhe.org/genre/fantastika", GenreListing::TopRated(Period::AllTime)),
            "https://knigavuhe.org/genre/fantastika/rating/?period=alltime"
        );
        assert_eq!(
            urls.genre(genre, GenreListing::Popular(Period::Today)),
            "https://knigavuhe.org/genre/fantastika/popular/?period=today"
        );
    }

    #[test]
    fn quick_search_url_encodes_the_trimmed_query() {
        let urls = CatalogUrls::new(BASE);
        assert_eq!(
            urls.quick_search("  war & peace "),
            "https://knigavuhe.org/search/quick.json?q=war%20%26%20peace"
        );
        assert_eq!(urls.genres_index(), "https://knigavuhe.org/genres/");
        assert_eq!(
            urls.people(PeopleKind::Readers, &PeopleFilter::All, 1),
            "https://knigavuhe.org/readers/"
        );
    }

    #[test]
    fn people_filter_prefers_query_over_letter() {
        assert_eq!(
            PeopleFilter::from_parts(Some("А"), Some(" Пушкин ")),
            PeopleFilter::Search("Пушкин".to_string())
        );
        assert_eq!(
            PeopleFilter::from_parts(Some("А"), Some("  ")),
            PeopleFilter::Letter("А".to_string())
        );
        assert_eq!(PeopleFilter::from_parts(None, None), PeopleFilter::All);
    }

    #[test]
    fn blank_search_skips_the_fetch() {
        let fetcher = MapFetcher::default();
        let navigator = Navigator::new(&fetcher, BASE);
        assert!(navigator.search_books("   ").expect("blank search").is_empty());
        assert!(fetcher.requested.borrow().is_empty());
    }

    #[test]
    fn search_parses_the_quick_search_payload() {
        let payload = r#"{"results":{"books":{"items":[7]}},
            "books":{"7":{"id":7,"name":"Война и мир","url":"/book/war/","likes":3}},
            "books_extra":{"7":{"authors":[1],"readers":[]}},
            "authors":{"1":{"name":"Лев","surname":"Толстой"}}}"#;
        let fetcher = MapFetcher::default().with(
            "https://knigavuhe.org/search/quick.json?q=%D0%B2%D0%BE%D0%B9%D0%BD%D0%B0",
            payload,
        );
        let navigator = Navigator::new(&fetcher, BASE);

        let books = navigator.search_books("война").expect("search");
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].title, "Война и мир");
        assert_eq!(books[0].authors, "Лев Толстой");
        assert_eq!(books[0].url, "https://knigavuhe.org/book/war/");
    }

    #[test]
    fn genre_page_without_header_uses_the_catalog_title() {
        let fetcher = MapFetcher::default().with(
            "https://knigavuhe.org/genre/detektivy/popular/?period=month",
            "<html><body>nothing here</body></html>",
        );
        let navigator = Navigator::new(&fetcher, BASE);
        let genre = CatalogItem {
            title: "Детективы".to_string(),
            url: "https://knigavuhe.org/genre/detektivy/".to_string(),
        };

        let page = navigator
            .genre_page(&genre, GenreListing::Popular(Period::Month))
            .expect("genre page");
        assert!(page.books.is_empty());
        assert_eq!(
            page.meta,
            Some(GenrePageMeta {
                title: "Детективы".to_string(),
                count: None,
            })
        );
    }

    #[test]
    fn people_fall_back_to_name_anchors_without_cards() {
        let html = r#"<ul><li><a class="author_item_name" href="/author/pushkin/">Пушкин</a></li></ul>
            <script>new PageNav({"page":2,"pages":5});</script>"#;
        let fetcher = MapFetcher::default().with("https://knigavuhe.org/authors/2/", html);
        let navigator = Navigator::new(&fetcher, BASE);

        let listing = navigator
            .people(PeopleKind::Authors, &PeopleFilter::All, 2)
            .expect("people");
        assert_eq!(
            listing.items,
            vec![PersonItem {
                name: "Пушкин".to_string(),
                url: "https://knigavuhe.org/author/pushkin/".to_string(),
                count: None,
            }]
        );
        assert_eq!((listing.page, listing.pages), (2, 5));
    }

    #[test]
    fn fetch_failures_surface_as_load_failed() {
        let fetcher = MapFetcher::default();
        let navigator = Navigator::new(&fetcher, BASE);
        let err = navigator.genres().expect_err("missing page should fail");
        assert!(err.to_string().contains("could not load https://knigavuhe.org/genres/"));
    }

    #[test]
    fn book_tracks_keeps_the_resume_url() {
        let fetcher = MapFetcher::default().with("https://knigavuhe.org/book/x/", "<html></html>");
        let navigator = Navigator::new(&fetcher, BASE);
        let tracks = navigator
            .book_tracks("https://knigavuhe.org/book/x/", Some("https://s.test/audio/9.mp3"))
            .expect("tracks");
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].url, "https://s.test/audio/9.mp3");
    }

    #[test]
    fn request_gate_only_accepts_the_latest_ticket() {
        let gate = RequestGate::default();
        let first = gate.issue();
        let second = gate.issue();

        assert_eq!(gate.accept(first, "stale"), None);
        assert_eq!(gate.accept(second, "fresh"), Some("fresh"));
        assert!(gate.is_current(second));
    }

    #[test]
    fn letter_groups_have_no_blank_entries() {
        assert!(
            LETTER_GROUPS
                .iter()
                .flat_map(|(_, letters)| letters.iter())
                .all(|letter| !letter.trim().is_empty())
        );
    }
}
