/// How much is known about per-track durations of the current book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationKnowledge {
    /// No duration sample yet; whole-book totals are undefined.
    Unknown,
    /// Some tracks reported a duration; the rest are extrapolated.
    PartiallyKnown,
    FullyKnown,
}

/// Per-track durations learned as each track is loaded at least once.
#[derive(Debug, Clone, Default)]
pub struct TrackDurations {
    known: Vec<Option<u64>>,
}

impl TrackDurations {
    pub fn new(track_count: usize) -> Self {
        Self {
            known: vec![None; track_count],
        }
    }

    /// Records a reported duration. Zero means "not reported yet" and is ignored.
    pub fn record(&mut self, index: usize, duration_ms: u64) {
        if duration_ms == 0 {
            return;
        }
        if let Some(slot) = self.known.get_mut(index) {
            *slot = Some(duration_ms);
        }
    }

    pub fn get(&self, index: usize) -> Option<u64> {
        self.known.get(index).copied().flatten()
    }

    pub fn knowledge(&self) -> DurationKnowledge {
        let known = self.known.iter().filter(|slot| slot.is_some()).count();
        if known == 0 {
            DurationKnowledge::Unknown
        } else if known == self.known.len() {
            DurationKnowledge::FullyKnown
        } else {
            DurationKnowledge::PartiallyKnown
        }
    }

    /// Stand-in duration for tracks that have not reported yet: the mean of
    /// the known ones. With a single sample this is that sample.
    pub fn estimate(&self) -> Option<u64> {
        let (sum, count) = self
            .known
            .iter()
            .flatten()
            .fold((0u64, 0u64), |(sum, count), duration| (sum + duration, count + 1));
        (count > 0).then(|| sum / count)
    }

    /// Whole-book elapsed time at `position_ms` into track `active`.
    pub fn elapsed(&self, active: usize, position_ms: u64) -> Option<u64> {
        let estimate = self.estimate();
        let mut before = 0u64;
        for idx in 0..active.min(self.known.len()) {
            before += self.get(idx).or(estimate)?;
        }
        Some(before + position_ms)
    }

    /// Whole-book duration, `None` while nothing is known.
    pub fn total(&self) -> Option<u64> {
        if self.knowledge() == DurationKnowledge::Unknown {
            return None;
        }
        let estimate = self.estimate()?;
        Some(
            self.known
                .iter()
                .map(|slot| slot.unwrap_or(estimate))
                .sum(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_sums_when_every_duration_is_known() {
        let mut durations = TrackDurations::new(2);
        durations.record(0, 60_000);
        durations.record(1, 90_000);

        assert_eq!(durations.knowledge(), DurationKnowledge::FullyKnown);
        assert_eq!(durations.elapsed(1, 30_000), Some(90_000));
        assert_eq!(durations.total(), Some(150_000));
    }

    #[test]
    fn extrapolates_from_a_single_sample() {
        let mut durations = TrackDurations::new(4);
        durations.record(2, 50_000);

        assert_eq!(durations.knowledge(), DurationKnowledge::PartiallyKnown);
        assert_eq!(durations.elapsed(2, 10_000), Some(2 * 50_000 + 10_000));
        assert_eq!(durations.total(), Some(4 * 50_000));
    }

    #[test]
    fn totals_are_unknown_before_any_sample() {
        let durations = TrackDurations::new(3);
        assert_eq!(durations.knowledge(), DurationKnowledge::Unknown);
        assert_eq!(durations.total(), None);
        assert_eq!(durations.elapsed(0, 1_500), Some(1_500));
        assert_eq!(durations.elapsed(1, 1_500), None);
    }

    #[test]
    fn zero_and_out_of_range_samples_are_ignored() {
        let mut durations = TrackDurations::new(1);
        durations.record(0, 0);
        durations.record(5, 1_000);
        assert_eq!(durations.knowledge(), DurationKnowledge::Unknown);
    }
}
