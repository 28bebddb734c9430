/// One book as shown in search results and genre listings.
///
/// `id` is the upstream identifier when the source exposes one, otherwise a
/// key synthesized from the page URL or title. It is only stable within a
/// single parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookResult {
    pub id: String,
    pub title: String,
    pub authors: String,
    pub readers: String,
    pub cover: Option<String>,
    pub url: String,
    pub likes: u64,
    pub dislikes: u64,
    pub genre: Option<String>,
}

/// A named link into a sub-catalog (genre, author or reader).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenrePageMeta {
    pub title: String,
    pub count: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenrePage {
    pub meta: Option<GenrePageMeta>,
    pub books: Vec<BookResult>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonItem {
    pub name: String,
    pub url: String,
    pub count: Option<String>,
}

/// One page of a people listing together with its pagination state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeoplePage {
    pub items: Vec<PersonItem>,
    pub page: u32,
    pub pages: u32,
}

/// One playable audio segment. Position in the parent list is significant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub title: String,
    pub url: String,
}
