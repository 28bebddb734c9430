//! Playback coordination: ties the audio capability's progress events to
//! history persistence and resume-on-open.

mod coordinator;
mod durations;
mod throttle;


use anyhow::Result;
use chrono::Utc;

use crate::db::{Database, HistoryEntry, HistoryRecord, StoreError};
use crate::model::Track;

pub use coordinator::{PlaybackCoordinator, PlaybackSnapshot, SessionState, Transport};
pub use durations::DurationKnowledge;

/// One status report from the audio capability.
///
/// `duration_ms == 0` means the engine has not learned the track length yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressEvent {
    pub position_ms: u64,
    pub duration_ms: u64,
    pub active_index: usize,
    pub is_playing: bool,
    pub just_finished: bool,
}

/// The native audio engine, seen from the coordinator.
pub trait AudioEngine {
    fn replace_queue(&mut self, tracks: &[Track]) -> Result<()>;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn seek(&mut self, position_ms: u64) -> Result<()>;
    fn skip_to(&mut self, index: usize) -> Result<()>;
    /// Positions a freshly queued list at `index`, `position_ms` into the
    /// track. Engines that load asynchronously override this so the offset
    /// lands on the right file.
    fn start_at(&mut self, index: usize, position_ms: u64) -> Result<()> {
        if index > 0 {
            self.skip_to(index)?;
        }
        if position_ms > 0 {
            self.seek(position_ms)?;
        }
        Ok(())
    }
    fn skip_next(&mut self) -> Result<()>;
    fn skip_previous(&mut self) -> Result<()>;
    fn status(&mut self) -> Result<ProgressEvent>;
}

/// Where history writes go.
pub trait HistorySink {
    fn record(&self, entry: &HistoryEntry) -> Result<(), StoreError>;
}

impl HistorySink for Database {
    fn record(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
        self.upsert(entry).map(|_| ())
    }
}

impl<T: HistorySink + ?Sized> HistorySink for &T {
    fn record(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
        (**self).record(entry)
    }
}

pub trait Clock {
    fn now_ms(&self) -> i64;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_ms(&self) -> i64 {
        (**self).now_ms()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Descriptive fields of the book being played; copied into every write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BookMeta {
    pub book_id: String,
    pub title: String,
    pub authors: String,
    pub readers: String,
    pub cover: String,
    pub book_url: String,
}

impl From<&HistoryRecord> for BookMeta {
    fn from(record: &HistoryRecord) -> Self {
        Self {
            book_id: record.entry.book_id.clone(),
            title: record.entry.title.clone(),
            authors: record.entry.authors.clone(),
            readers: record.entry.readers.clone(),
            cover: record.entry.cover.clone(),
            book_url: record.entry.book_url.clone(),
        }
    }
}

/// Stored resume state applied when a book is reopened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub track_index: usize,
    pub position_ms: u64,
    pub audio_url: Option<String>,
}

impl ResumePoint {
    /// Picks the track to resume: the one carrying the stored audio URL,
    /// else the stored index clamped to the list.
    pub fn resolve_index(&self, tracks: &[Track]) -> usize {
        let last = tracks.len().saturating_sub(1);
        if let Some(url) = self.audio_url.as_deref() {
            if tracks.get(self.track_index).is_some_and(|track| track.url == url) {
                return self.track_index;
            }
            if let Some(idx) = tracks.iter().position(|track| track.url == url) {
                return idx;
            }
        }
        self.track_index.min(last)
    }
}

impl From<&HistoryRecord> for ResumePoint {
    fn from(record: &HistoryRecord) -> Self {
        Self {
            track_index: record.entry.track_index,
            position_ms: record.entry.position_ms,
            audio_url: Some(record.entry.audio_url.clone()).filter(|url| !url.is_empty()),
        }
    }
}
