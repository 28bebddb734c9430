use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::model::Track;

/// Upper bound on tracks taken from one page.
pub const MAX_TRACKS: usize = 80;
pub const RESUME_TRACK_TITLE: &str = "Last played track";

static PLAYER_INIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"new\s+BookPlayer\(\s*[^,\[\]]+,\s*\[").expect("player init pattern is valid")
});

static AUDIO_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[^\s"'<>]+?/audio[^\s"'<>]*?\.mp3\b(?:\?[^\s"'<>]*)?"#)
        .expect("audio url pattern is valid")
});

#[derive(Debug, Deserialize)]
struct RawTrack {
    #[serde(default)]
    title: Value,
    #[serde(default)]
    url: Value,
}

/// Extracts the ordered, playable track list of a book page.
///
/// The player initializer is authoritative when present; otherwise every
/// audio URL in the document is collected in first-occurrence order.
pub fn extract_tracks(html: &str) -> Vec<Track> {
    let mut tracks = match structured_tracks(html) {
        Some(tracks) if !tracks.is_empty() => tracks,
        Some(_) => {
            debug!("player initializer had no playable entries, scanning for audio urls");
            heuristic_tracks(html)
        }
        None => {
            debug!("no usable player initializer, scanning for audio urls");
            heuristic_tracks(html)
        }
    };
    tracks.truncate(MAX_TRACKS);
    tracks
}

/// Same as [`extract_tracks`], then guarantees `resume_url` is playable.
pub fn extract_tracks_for_resume(html: &str, resume_url: Option<&str>) -> Vec<Track> {
    with_resume_track(extract_tracks(html), resume_url)
}

/// Prepends `resume_url` as a continuation track when the list lacks it.
pub fn with_resume_track(mut tracks: Vec<Track>, resume_url: Option<&str>) -> Vec<Track> {
    let Some(resume_url) = resume_url.map(str::trim).filter(|url| !url.is_empty()) else {
        return tracks;
    };
    if tracks.iter().any(|track| track.url == resume_url) {
        return tracks;
    }
    tracks.insert(
        0,
        Track {
            title: RESUME_TRACK_TITLE.to_string(),
            url: resume_url.to_string(),
        },
    );
    tracks
}

pub(crate) fn structured_tracks(html: &str) -> Option<Vec<Track>> {
    let init = PLAYER_INIT_RE.find(html)?;
    let array_start = init.end() - 1;
    let Some(raw) = balanced_array(&html[array_start..]) else {
        debug!("player initializer array is not terminated");
        return None;
    };
    let normalized = raw.replace("\\/", "/").replace('\t', " ");
    let parsed: Vec<RawTrack> = match serde_json::from_str(&normalized) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(%err, "player initializer array is not valid json");
            return None;
        }
    };

    Some(
        parsed
            .into_iter()
            .enumerate()
            .filter_map(|(idx, raw)| {
                let url = match raw.url {
                    Value::String(url) => url.trim().to_string(),
                    _ => return None,
                };
                if !is_absolute_http(&url) {
                    return None;
                }
                let title = raw
                    .title
                    .as_str()
                    .map(str::trim)
                    .filter(|title| !title.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| numbered_title(idx));
                Some(Track { title, url })
            })
            .collect(),
    )
}

pub(crate) fn heuristic_tracks(html: &str) -> Vec<Track> {
    let normalized = html
        .replace("\\\\", "\\")
        .replace("\\/", "/")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let mut seen = HashSet::new();
    AUDIO_URL_RE
        .find_iter(&normalized)
        .map(|m| m.as_str())
        .filter(|url| seen.insert(*url))
        .enumerate()
        .map(|(idx, url)| Track {
            title: numbered_title(idx),
            url: url.to_string(),
        })
        .collect()
}

fn numbered_title(idx: usize) -> String {
    format!("Track {}", idx + 1)
}

fn is_absolute_http(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

/// Returns the `[...]` literal at the start of `text`, honouring nesting and
/// string quoting. `None` when the brackets never balance.
fn balanced_array(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                in_string = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => in_string = Some(ch),
            '[' => depth += 1,
            ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}
