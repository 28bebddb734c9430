use serde_json::Value;

use super::html::absolutize;
use crate::model::BookResult;

pub const UNTITLED_BOOK: &str = "Untitled";

/// Builds search results from a quick-search payload.
///
/// The upstream sometimes wraps the real response in an array of
/// intermediate objects; the first element carrying `results` wins, with the
/// last element as the fallback. A payload without `results.books.items` is
/// the "no matches" outcome and yields an empty list.
pub fn parse_quick_search(payload: &Value, base_url: &str) -> Vec<BookResult> {
    let Some(data) = select_payload(payload) else {
        return Vec::new();
    };
    let Some(items) = data
        .pointer("/results/books/items")
        .and_then(Value::as_array)
        .filter(|items| !items.is_empty())
    else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item_id| {
            let key = key_of(item_id)?;
            Some(build_result(data, &key, base_url))
        })
        .collect()
}

pub(crate) fn select_payload(payload: &Value) -> Option<&Value> {
    match payload {
        Value::Array(parts) => parts
            .iter()
            .find(|part| part.get("results").is_some_and(|results| !results.is_null()))
            .or_else(|| parts.last()),
        other => Some(other),
    }
}

fn build_result(data: &Value, key: &str, base_url: &str) -> BookResult {
    let book = lookup(data.get("books"), key);
    let extra = lookup(data.get("books_extra"), key);

    let id = book
        .and_then(|b| b.get("id"))
        .and_then(key_of)
        .unwrap_or_else(|| key.to_string());
    let title = book
        .and_then(|b| b.get("name"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(UNTITLED_BOOK)
        .to_string();
    let path = book
        .and_then(|b| b.get("url"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let genre = book
        .and_then(|b| b.get("genre_id"))
        .and_then(key_of)
        .and_then(|genre_id| lookup(data.get("genres"), &genre_id))
        .and_then(|genre| genre.get("name"))
        .and_then(Value::as_str)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());

    BookResult {
        id,
        title,
        authors: display_names(extra.and_then(|e| e.get("authors")), data.get("authors")),
        readers: display_names(extra.and_then(|e| e.get("readers")), data.get("readers")),
        cover: book
            .and_then(|b| b.get("poster_list_url"))
            .and_then(Value::as_str)
            .filter(|cover| !cover.trim().is_empty())
            .map(str::to_string),
        url: absolutize(base_url, path),
        likes: count_of(book, "likes"),
        dislikes: count_of(book, "dislikes"),
        genre,
    }
}

/// Resolves a list of person ids against a dictionary and joins their
/// display names with `", "`.
pub(crate) fn display_names(ids: Option<&Value>, dictionary: Option<&Value>) -> String {
    let Some(ids) = ids.and_then(Value::as_array) else {
        return String::new();
    };
    ids.iter()
        .filter_map(key_of)
        .filter_map(|id| lookup(dictionary, &id))
        .map(person_name)
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn person_name(person: &Value) -> String {
    ["name", "surname"]
        .iter()
        .filter_map(|field| person.get(*field).and_then(Value::as_str))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn lookup<'a>(dictionary: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    let found = match dictionary? {
        Value::Object(map) => map.get(key),
        Value::Array(list) => list.get(key.parse::<usize>().ok()?),
        _ => None,
    };
    found.filter(|value| !value.is_null())
}

fn key_of(id: &Value) -> Option<String> {
    match id {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn count_of(book: Option<&Value>, field: &str) -> u64 {
    book.and_then(|b| b.get(field))
        .and_then(|value| value.as_u64().or_else(|| value.as_str()?.trim().parse().ok()))
        .unwrap_or(0)
}
