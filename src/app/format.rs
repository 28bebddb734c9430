use chrono::{Local, TimeZone};

use crate::db::HistoryRecord;
use crate::playback::{DurationKnowledge, PlaybackSnapshot};

pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}

/// `H:MM:SS` above an hour, `M:SS` below.
pub(crate) fn format_ms(ms: u64) -> String {
    let total_secs = ms / 1000;
    let (hours, minutes, seconds) = (total_secs / 3600, (total_secs / 60) % 60, total_secs % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

pub(crate) fn format_updated_at(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}

pub(crate) fn format_percent(ratio: Option<f64>) -> String {
    match ratio {
        Some(ratio) => format!("{:.0}%", ratio * 100.0),
        None => "?".to_string(),
    }
}

/// Where a stored book stands: track, in-track time and whole-book share.
pub(crate) fn history_progress(record: &HistoryRecord) -> String {
    let entry = &record.entry;
    let track = format!(
        "track {} at {}/{} ({})",
        entry.track_index + 1,
        format_ms(entry.position_ms),
        format_ms(entry.duration_ms),
        format_percent(Some(record.track_progress()))
    );
    match record.book_progress() {
        Some(ratio) => format!("{track}, book {}", format_percent(Some(ratio))),
        None => track,
    }
}

pub(crate) fn snapshot_line(snapshot: &PlaybackSnapshot, track_title: &str) -> String {
    let mut line = format!(
        "[{}/{}] {} {}/{}",
        snapshot.active_index + 1,
        snapshot.track_count,
        track_title,
        format_ms(snapshot.position_ms),
        format_ms(snapshot.duration_ms)
    );
    if let (Some(elapsed), Some(total)) = (snapshot.elapsed_ms, snapshot.total_ms) {
        // `~` marks totals extrapolated from the tracks seen so far.
        let approx = if snapshot.knowledge == DurationKnowledge::FullyKnown {
            ""
        } else {
            "~"
        };
        line.push_str(&format!(
            " | book {}/{approx}{}",
            format_ms(elapsed),
            format_ms(total)
        ));
    }
    line
}
