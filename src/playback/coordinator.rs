use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::db::HistoryEntry;
use crate::model::Track;

use super::durations::{DurationKnowledge, TrackDurations};
use super::throttle::WriteThrottle;
use super::{AudioEngine, BookMeta, Clock, HistorySink, ProgressEvent, ResumePoint};

/// Keeps relative seeks clear of the very end so they never trip completion.
const END_GUARD_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    LoadingTracks,
    /// The book page produced no playable tracks.
    Empty,
    Ready(Transport),
}

/// Point-in-time view of the session for the presentation shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub state: SessionState,
    pub active_index: usize,
    pub track_count: usize,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub elapsed_ms: Option<u64>,
    pub total_ms: Option<u64>,
    pub knowledge: DurationKnowledge,
}

/// Drives one "current book" session: seeds the engine queue, follows its
/// progress events and keeps the history record fresh at a bounded rate.
pub struct PlaybackCoordinator<E, H, C> {
    engine: E,
    sink: H,
    clock: C,
    state: SessionState,
    book: BookMeta,
    tracks: Vec<Track>,
    durations: TrackDurations,
    throttle: WriteThrottle,
    active: usize,
    position_ms: u64,
    duration_ms: u64,
    finished: bool,
}

impl<E, H, C> PlaybackCoordinator<E, H, C>
where
    E: AudioEngine,
    H: HistorySink,
    C: Clock,
{
    pub fn new(engine: E, sink: H, clock: C) -> Self {
        Self {
            engine,
            sink,
            clock,
            state: SessionState::Idle,
            book: BookMeta::default(),
            tracks: Vec::new(),
            durations: TrackDurations::default(),
            throttle: WriteThrottle::default(),
            active: 0,
            position_ms: 0,
            duration_ms: 0,
            finished: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Starts a new book session. The previous queue is dropped before
    /// anything of the new book is loaded.
    pub fn begin(&mut self, book: BookMeta) -> Result<()> {
        self.engine.replace_queue(&[])?;
        info!(book_id = %book.book_id, "starting book session");
        self.book = book;
        self.tracks.clear();
        self.durations = TrackDurations::default();
        self.throttle.reset();
        self.active = 0;
        self.position_ms = 0;
        self.duration_ms = 0;
        self.finished = false;
        self.state = SessionState::LoadingTracks;
        Ok(())
    }

    /// Fills the queue and starts playback, applying `resume` once the
    /// whole list is queued.
    pub fn load_tracks(&mut self, tracks: Vec<Track>, resume: Option<&ResumePoint>) -> Result<()> {
        if self.state != SessionState::LoadingTracks {
            bail!("tracks can only be loaded right after a session begins");
        }
        if tracks.is_empty() {
            info!(book_id = %self.book.book_id, "book has no playable tracks");
            self.state = SessionState::Empty;
            return Ok(());
        }

        self.engine.replace_queue(&tracks)?;
        self.durations = TrackDurations::new(tracks.len());
        self.tracks = tracks;

        let (index, position_ms) = match resume {
            Some(point) => (point.resolve_index(&self.tracks), point.position_ms),
            None => (0, 0),
        };
        let position_ms = if index > 0 || position_ms > 0 {
            match self.engine.start_at(index, position_ms) {
                Ok(()) => position_ms,
                Err(err) => {
                    warn!(
                        book_id = %self.book.book_id,
                        index,
                        error = %err,
                        "could not restore the resume point, starting the track from the top"
                    );
                    0
                }
            }
        } else {
            0
        };
        self.engine.play()?;

        self.active = index;
        self.position_ms = position_ms;
        self.state = SessionState::Ready(Transport::Playing);
        debug!(index, position_ms, tracks = self.tracks.len(), "queue ready");
        Ok(())
    }

    pub fn play(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.engine.play()?;
        self.finished = false;
        self.state = SessionState::Ready(Transport::Playing);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.engine.pause()?;
        self.state = SessionState::Ready(Transport::Paused);
        Ok(())
    }

    pub fn toggle(&mut self) -> Result<()> {
        match self.state {
            SessionState::Ready(Transport::Playing) => self.pause(),
            _ => self.play(),
        }
    }

    pub fn seek(&mut self, position_ms: u64) -> Result<()> {
        self.ensure_ready()?;
        let target = self.clamp_position(position_ms);
        self.engine.seek(target)?;
        self.position_ms = target;
        Ok(())
    }

    /// Relative seek within the active track, kept inside
    /// `[0, duration - 500ms]` when the duration is known.
    pub fn skip_by(&mut self, delta_ms: i64) -> Result<()> {
        let target = self.position_ms.saturating_add_signed(delta_ms);
        self.seek(target)
    }

    /// Moves to the next track. A no-op on the last one.
    pub fn skip_next(&mut self) -> Result<()> {
        self.ensure_ready()?;
        if self.active + 1 >= self.tracks.len() {
            return Ok(());
        }
        self.engine.skip_next()?;
        self.change_track(self.active + 1);
        Ok(())
    }

    /// Moves to the previous track. A no-op on the first one.
    pub fn skip_previous(&mut self) -> Result<()> {
        self.ensure_ready()?;
        if self.active == 0 {
            return Ok(());
        }
        self.engine.skip_previous()?;
        self.change_track(self.active - 1);
        Ok(())
    }

    pub fn select_track(&mut self, index: usize) -> Result<()> {
        self.ensure_ready()?;
        if index >= self.tracks.len() {
            bail!("track {} is out of range (book has {})", index + 1, self.tracks.len());
        }
        if index == self.active {
            return Ok(());
        }
        self.engine.skip_to(index)?;
        self.change_track(index);
        Ok(())
    }

    /// Pulls one status report from the engine and applies it.
    pub fn poll(&mut self) -> Result<ProgressEvent> {
        let event = self.engine.status()?;
        self.on_progress(event)?;
        Ok(event)
    }

    /// Applies one progress event. History writes happen here: at most once
    /// per throttle window, and always on track change or completion.
    pub fn on_progress(&mut self, event: ProgressEvent) -> Result<()> {
        let SessionState::Ready(transport) = self.state else {
            debug!(state = ?self.state, "progress event outside a ready session");
            return Ok(());
        };
        self.durations.record(event.active_index, event.duration_ms);

        if event.active_index != self.active && event.active_index < self.tracks.len() {
            self.active = event.active_index;
            self.position_ms = event.position_ms;
            self.duration_ms = event.duration_ms;
            self.finished = false;
            self.persist();
            return Ok(());
        }

        self.position_ms = event.position_ms;
        if event.duration_ms > 0 {
            self.duration_ms = event.duration_ms;
        }
        if transport != Transport::Stopped {
            let next = if event.is_playing {
                Transport::Playing
            } else {
                Transport::Paused
            };
            self.state = SessionState::Ready(next);
        }

        if event.just_finished {
            if self.finished {
                return Ok(());
            }
            if self.active + 1 < self.tracks.len() {
                debug!(from = self.active, "track finished, advancing");
                self.engine.skip_next()?;
                self.change_track(self.active + 1);
                // The engine pauses itself at end of file.
                if transport == Transport::Playing {
                    self.engine.play()?;
                    self.state = SessionState::Ready(Transport::Playing);
                }
            } else {
                info!(book_id = %self.book.book_id, "reached the end of the book");
                self.engine.pause()?;
                self.finished = true;
                self.state = SessionState::Ready(Transport::Stopped);
                self.persist();
            }
            return Ok(());
        }

        if self.throttle.ready(self.clock.now_ms()) {
            self.persist();
        }
        Ok(())
    }

    /// Ends the session with a final write of the resume point.
    pub fn close(&mut self) {
        if matches!(self.state, SessionState::Ready(_)) {
            self.persist();
        }
        self.state = SessionState::Idle;
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            state: self.state,
            active_index: self.active,
            track_count: self.tracks.len(),
            position_ms: self.position_ms,
            duration_ms: self.duration_ms,
            elapsed_ms: self.durations.elapsed(self.active, self.position_ms),
            total_ms: self.durations.total(),
            knowledge: self.durations.knowledge(),
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            SessionState::Ready(_) => Ok(()),
            state => bail!("no playable session (state: {state:?})"),
        }
    }

    fn clamp_position(&self, position_ms: u64) -> u64 {
        let duration = self.durations.get(self.active).unwrap_or(self.duration_ms);
        if duration == 0 {
            return position_ms;
        }
        position_ms.min(duration.saturating_sub(END_GUARD_MS))
    }

    fn change_track(&mut self, index: usize) {
        if self.state == SessionState::Ready(Transport::Stopped) {
            self.state = SessionState::Ready(Transport::Paused);
        }
        self.active = index;
        self.position_ms = 0;
        self.duration_ms = self.durations.get(index).unwrap_or(0);
        self.finished = false;
        self.persist();
    }

    /// Writes the current resume point. Failures only cost resume accuracy,
    /// so they are logged and playback carries on.
    fn persist(&mut self) {
        let Some(track) = self.tracks.get(self.active) else {
            return;
        };
        let position_ms = if self.duration_ms > 0 {
            self.position_ms.min(self.duration_ms)
        } else {
            self.position_ms
        };
        let total_duration_ms = self.durations.total();
        let total_position_ms = self
            .durations
            .elapsed(self.active, position_ms)
            .map(|elapsed| total_duration_ms.map_or(elapsed, |total| elapsed.min(total)));

        let entry = HistoryEntry {
            book_id: self.book.book_id.clone(),
            title: self.book.title.clone(),
            authors: self.book.authors.clone(),
            readers: self.book.readers.clone(),
            cover: self.book.cover.clone(),
            book_url: self.book.book_url.clone(),
            audio_url: track.url.clone(),
            track_index: self.active,
            position_ms,
            duration_ms: self.duration_ms,
            total_position_ms,
            total_duration_ms,
        };
        self.throttle.mark(self.clock.now_ms());
        if let Err(err) = self.sink.record(&entry) {
            warn!(book_id = %entry.book_id, error = %err, "failed to save playback progress");
        }
    }
}
