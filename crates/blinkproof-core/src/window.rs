use std::collections::VecDeque;

/// Default number of recent frames the window remembers.
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Bounded FIFO of recent per-frame blink verdicts.
///
/// Recording into a full window evicts the oldest verdict first, so
/// `len()` never exceeds `capacity()`.
#[derive(Debug, Clone)]
pub struct LivenessWindow {
    capacity: usize,
    verdicts: VecDeque<bool>,
}

impl LivenessWindow {
    /// A window holding at most `capacity` verdicts (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            verdicts: VecDeque::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, is_blink: bool) {
        if self.verdicts.len() >= self.capacity {
            self.verdicts.pop_front();
        }
        self.verdicts.push_back(is_blink);
    }

    /// Number of blink verdicts currently held.
    pub fn vote_count(&self) -> usize {
        self.verdicts.iter().filter(|&&v| v).count()
    }

    pub fn reset(&mut self) {
        self.verdicts.clear();
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Verdicts from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.verdicts.iter().copied()
    }
}

impl Default for LivenessWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_votes_under_capacity() {
        let mut w = LivenessWindow::default();
        let seq = [true, false, false, true, true, false, false];
        for v in seq {
            w.record(v);
        }
        assert_eq!(w.len(), seq.len());
        assert_eq!(w.vote_count(), 3);
    }

    #[test]
    fn test_every_prefix_counts_exactly() {
        let seq = [false, true, true, false, true, false, false, true, false, true];
        let mut w = LivenessWindow::default();
        for (i, v) in seq.iter().enumerate() {
            w.record(*v);
            let expected = seq[..=i].iter().filter(|&&b| b).count();
            assert_eq!(w.vote_count(), expected, "after {} records", i + 1);
        }
    }

    #[test]
    fn test_oldest_evicted_when_full() {
        let mut w = LivenessWindow::default();
        w.record(true);
        for _ in 0..9 {
            w.record(false);
        }
        assert_eq!(w.len(), 10);
        assert_eq!(w.vote_count(), 1);

        // 11th record pushes out the leading `true`.
        w.record(false);
        assert_eq!(w.len(), 10);
        assert_eq!(w.vote_count(), 0);
    }

    #[test]
    fn test_len_never_exceeds_capacity() {
        let mut w = LivenessWindow::new(3);
        for i in 0..50 {
            w.record(i % 2 == 0);
            assert!(w.len() <= 3);
        }
        assert_eq!(w.iter().collect::<Vec<_>>(), vec![false, true, false]);
    }

    #[test]
    fn test_reset_clears() {
        let mut w = LivenessWindow::default();
        w.record(true);
        w.record(true);
        w.reset();
        assert!(w.is_empty());
        assert_eq!(w.vote_count(), 0);
    }

    #[test]
    fn test_reset_empty_is_noop() {
        let mut w = LivenessWindow::default();
        w.reset();
        w.reset();
        assert!(w.is_empty());
        assert_eq!(w.capacity(), DEFAULT_WINDOW_SIZE);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut w = LivenessWindow::new(0);
        w.record(true);
        w.record(false);
        assert_eq!(w.len(), 1);
        assert_eq!(w.vote_count(), 0);
    }
}
