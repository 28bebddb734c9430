use super::html::{absolutize, anchors};
use crate::model::CatalogItem;

pub const GENRE_ANCHOR_CLASS: &str = "genre2_item_name";
/// Author and reader indexes share the same anchor class.
pub const PERSON_ANCHOR_CLASS: &str = "author_item_name";

/// Collects every anchor whose class contains `anchor_class`.
///
/// Anchors without an `href` or with no visible text are skipped.
pub fn parse_catalog(html: &str, anchor_class: &str, base_url: &str) -> Vec<CatalogItem> {
    anchors(html)
        .filter(|anchor| anchor.has_class(anchor_class))
        .filter_map(|anchor| {
            let href = anchor.href().filter(|href| !href.is_empty())?;
            let title = anchor.text();
            if title.is_empty() {
                return None;
            }
            Some(CatalogItem {
                title,
                url: absolutize(base_url, &href),
            })
        })
        .collect()
}
