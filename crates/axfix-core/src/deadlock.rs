use crate::issue::IssueSignature;
use std::collections::VecDeque;

/// Default trailing window: the same kinds for three rounds running.
pub const DEFAULT_WINDOW: usize = 3;

/// Declares non-convergence when one non-empty signature fills the whole
/// trailing window. Scoped to a single phase; call [`reset`](Self::reset)
/// between phases.
#[derive(Debug, Clone)]
pub struct DeadlockDetector {
    window: usize,
    recent: VecDeque<IssueSignature>,
}

impl Default for DeadlockDetector {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl DeadlockDetector {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            recent: VecDeque::with_capacity(window),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Record the next round's signature. Returns true once deadlocked.
    pub fn observe(&mut self, signature: IssueSignature) -> bool {
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(signature);

        if self.recent.len() < self.window {
            return false;
        }
        let Some(current) = self.recent.back() else {
            return false;
        };
        !current.is_empty() && self.recent.iter().all(|seen| seen == current)
    }

    pub fn reset(&mut self) {
        self.recent.clear();
    }

    pub fn history(&self) -> impl Iterator<Item = &IssueSignature> {
        self.recent.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(kinds: &[&str]) -> IssueSignature {
        kinds.iter().copied().collect()
    }

    #[test]
    fn test_quiet_for_first_two_rounds() {
        let mut detector = DeadlockDetector::default();
        assert!(!detector.observe(sig(&["alt-text"])));
        assert!(!detector.observe(sig(&["alt-text"])));
    }

    #[test]
    fn test_fires_on_third_identical_round() {
        let mut detector = DeadlockDetector::default();
        detector.observe(sig(&["alt-text", "label"]));
        detector.observe(sig(&["label", "alt-text"]));
        assert!(detector.observe(sig(&["alt-text", "label"])));
    }

    #[test]
    fn test_added_kind_breaks_the_window() {
        let mut detector = DeadlockDetector::default();
        detector.observe(sig(&["alt-text"]));
        detector.observe(sig(&["alt-text", "label"]));
        assert!(!detector.observe(sig(&["alt-text"])));
    }

    #[test]
    fn test_removed_kind_breaks_the_window() {
        let mut detector = DeadlockDetector::default();
        detector.observe(sig(&["alt-text", "label"]));
        detector.observe(sig(&["alt-text"]));
        assert!(!detector.observe(sig(&["alt-text", "label"])));
    }

    #[test]
    fn test_window_slides() {
        let mut detector = DeadlockDetector::default();
        detector.observe(sig(&["label"]));
        detector.observe(sig(&["alt-text"]));
        detector.observe(sig(&["alt-text"]));
        assert!(detector.observe(sig(&["alt-text"])));
    }

    #[test]
    fn test_empty_signatures_never_deadlock() {
        let mut detector = DeadlockDetector::default();
        for _ in 0..5 {
            assert!(!detector.observe(IssueSignature::default()));
        }
    }

    #[test]
    fn test_reset_clears_history() {
        let mut detector = DeadlockDetector::default();
        detector.observe(sig(&["alt-text"]));
        detector.observe(sig(&["alt-text"]));
        detector.reset();
        assert_eq!(detector.history().count(), 0);
        assert!(!detector.observe(sig(&["alt-text"])));
    }

    #[test]
    fn test_custom_window() {
        let mut detector = DeadlockDetector::new(2);
        detector.observe(sig(&["alt-text"]));
        assert!(detector.observe(sig(&["alt-text"])));
        assert_eq!(DeadlockDetector::new(0).window(), 1);
    }
}
