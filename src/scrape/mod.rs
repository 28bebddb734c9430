//! Text parsers for upstream pages and payloads.
//!
//! Every parser is a pure function over text that was already fetched. None
//! of them fail: a missing fragment yields an empty or partial record, and
//! the caller decides whether "nothing found" needs a message.
//!
//! HTML is matched with small, independent fragment rules instead of a DOM
//! parse. The markup is not a contract, so each field is located on its own
//! and a drifted field only loses that field.

mod catalog;
mod genre;
pub(crate) mod html;
mod people;
mod quick_search;
mod tracks;


pub use catalog::{GENRE_ANCHOR_CLASS, PERSON_ANCHOR_CLASS, parse_catalog};
pub use genre::parse_genre_page;
pub use people::parse_people;
pub use quick_search::{UNTITLED_BOOK, parse_quick_search};
pub use tracks::extract_tracks_for_resume;
