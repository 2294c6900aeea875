use std::time::Duration;

/// The single scheduling anchor for gapless playback.
///
/// All times are offsets on the player's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeline {
    overlap: Duration,
    anchor: Duration,
}

impl Timeline {
    pub const fn new(overlap: Duration, now: Duration) -> Self {
        Self {
            overlap,
            anchor: now,
        }
    }

    /// Place a segment of `duration` and return its start time.
    pub fn place(&mut self, now: Duration, duration: Duration) -> Duration {
        let start = now.max(self.anchor);
        // A segment shorter than the overlap must not pull the anchor back.
        self.anchor = (start + duration).saturating_sub(self.overlap).max(start);
        start
    }

    /// Where the next segment would start if the clock stood still.
    pub const fn anchor(&self) -> Duration {
        self.anchor
    }

    pub fn reset(&mut self, now: Duration) {
        self.anchor = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn back_to_back_segments_overlap_by_constant() {
        let mut timeline = Timeline::new(ms(50), ms(0));
        let durations = [ms(1200), ms(800), ms(30), ms(2000)];

        let mut starts = Vec::new();
        for duration in durations {
            starts.push(timeline.place(ms(10), duration));
        }

        assert_eq!(starts, vec![ms(10), ms(1160), ms(1910), ms(1910)]);
        assert!(starts.windows(2).all(|w| w[0] <= w[1]));
        for (i, duration) in durations.iter().take(2).enumerate() {
            assert_eq!(starts[i] + *duration - starts[i + 1], ms(50));
        }
    }

    #[test]
    fn late_segment_starts_now() {
        let mut timeline = Timeline::new(ms(50), ms(0));
        timeline.place(ms(0), ms(500));
        let start = timeline.place(ms(3000), ms(500));
        assert_eq!(start, ms(3000));
        assert_eq!(timeline.anchor(), ms(3450));
    }

    #[test]
    fn reset_moves_anchor_to_now() {
        let mut timeline = Timeline::new(ms(50), ms(0));
        timeline.place(ms(0), ms(5000));
        timeline.reset(ms(700));
        assert_eq!(timeline.place(ms(700), ms(100)), ms(700));
    }
}
