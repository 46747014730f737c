use std::time::{Duration, Instant};

/// Holds back rapid submissions until input has been quiet for the
/// submitted delay.
///
/// A new submission replaces the pending value and restarts the timer, so
/// only the last value of a burst is ever emitted, exactly once.
#[derive(Debug)]
pub struct Debouncer<T> {
    pending: Option<(T, Instant)>,
}

impl<T> Default for Debouncer<T> {
    fn default() -> Self {
        Self { pending: None }
    }
}

impl<T> Debouncer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each call carries its own delay; the latest call's delay wins.
    pub fn submit(&mut self, value: T, delay: Duration, now: Instant) {
        self.pending = Some((value, now + delay));
    }

    /// Emits the pending value once its quiet period has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((_, due)) if now >= *due => self.pending.take().map(|(value, _)| value),
            _ => None,
        }
    }

    /// When the pending value becomes due, for scheduling a wake-up.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, due)| *due)
    }

    /// Emits the pending value right away, e.g. when the user presses Enter.
    pub fn flush(&mut self) -> Option<T> {
        self.pending.take().map(|(value, _)| value)
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn burst_emits_only_last_value_once() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();

        debouncer.submit("a", ms(300), start);
        debouncer.submit("ab", ms(300), start + ms(20));
        debouncer.submit("abc", ms(300), start + ms(50));

        assert_eq!(debouncer.poll(start + ms(300)), None);
        assert_eq!(debouncer.poll(start + ms(349)), None);
        assert_eq!(debouncer.poll(start + ms(350)), Some("abc"));
        assert_eq!(debouncer.poll(start + ms(1000)), None);
    }

    #[test]
    fn separated_submissions_emit_in_order() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();
        let mut emitted = Vec::new();

        debouncer.submit("first", ms(300), start);
        emitted.extend(debouncer.poll(start + ms(300)));
        debouncer.submit("second", ms(300), start + ms(400));
        emitted.extend(debouncer.poll(start + ms(500)));
        emitted.extend(debouncer.poll(start + ms(700)));

        assert_eq!(emitted, ["first", "second"]);
    }

    #[test]
    fn resubmission_restarts_the_timer() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();

        debouncer.submit(1, ms(300), start);
        assert_eq!(debouncer.deadline(), Some(start + ms(300)));
        debouncer.submit(2, ms(300), start + ms(250));
        assert_eq!(debouncer.deadline(), Some(start + ms(550)));
        assert_eq!(debouncer.poll(start + ms(300)), None);
    }

    #[test]
    fn latest_submission_sets_the_delay() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();

        debouncer.submit("slow", ms(500), start);
        debouncer.submit("quick", ms(100), start + ms(10));
        assert_eq!(debouncer.deadline(), Some(start + ms(110)));
        assert_eq!(debouncer.poll(start + ms(110)), Some("quick"));
    }

    #[test]
    fn cancel_and_flush() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();

        debouncer.submit("x", ms(300), start);
        debouncer.cancel();
        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.poll(start + ms(600)), None);

        debouncer.submit("y", ms(300), start);
        assert!(debouncer.is_pending());
        assert_eq!(debouncer.flush(), Some("y"));
        assert_eq!(debouncer.deadline(), None);
    }
}
