use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::debug;

/// Monotonic time source.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.elapsed.set(self.elapsed.get() + by);
    }

    pub fn set_elapsed(&self, elapsed: Duration) {
        self.elapsed.set(elapsed);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed.get()
    }
}

/// Remembers when each plate text was last let through.
///
/// A repeat within the window is a duplicate and does not move the window, so
/// a vehicle idling in front of the camera is reported again once the window
/// measured from its first sighting has passed. Entries older than twice the
/// window are dropped on every call, which bounds the map by the number of
/// distinct plates seen in that span.
pub struct DuplicateSuppressor {
    last_seen: HashMap<String, Instant>,
    clock: Box<dyn Clock>,
}

impl DuplicateSuppressor {
    pub fn new() -> Self {
        Self::with_clock(Box::new(MonotonicClock))
    }

    pub fn with_clock(clock: Box<dyn Clock>) -> Self {
        Self {
            last_seen: HashMap::new(),
            clock,
        }
    }

    pub fn is_duplicate(&mut self, plate_text: &str, window: Duration) -> bool {
        let now = self.clock.now();

        let duplicate = match self.last_seen.get(plate_text) {
            Some(seen) => now.saturating_duration_since(*seen) < window,
            None => false,
        };
        if !duplicate {
            self.last_seen.insert(plate_text.to_string(), now);
        }

        self.purge(now, window * 2);
        duplicate
    }

    fn purge(&mut self, now: Instant, max_age: Duration) {
        let before = self.last_seen.len();
        self.last_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) <= max_age);
        let purged = before - self.last_seen.len();
        if purged > 0 {
            debug!("Purged {} stale plate entries", purged);
        }
    }

    pub fn last_seen(&self, plate_text: &str) -> Option<Instant> {
        self.last_seen.get(plate_text).copied()
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

impl Default for DuplicateSuppressor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    fn suppressor() -> (DuplicateSuppressor, ManualClock) {
        let clock = ManualClock::new();
        (DuplicateSuppressor::with_clock(Box::new(clock.clone())), clock)
    }

    #[test]
    fn first_sighting_is_not_a_duplicate() {
        let (mut suppressor, _) = suppressor();
        assert!(!suppressor.is_duplicate("ABC1234", WINDOW));
        assert_eq!(suppressor.len(), 1);
    }

    #[test]
    fn repeat_inside_window_is_a_duplicate() {
        let (mut suppressor, clock) = suppressor();
        assert!(!suppressor.is_duplicate("ABC1234", WINDOW));
        clock.advance(Duration::from_secs(10));
        assert!(suppressor.is_duplicate("ABC1234", WINDOW));
    }

    #[test]
    fn repeat_after_window_is_not_a_duplicate() {
        let (mut suppressor, clock) = suppressor();
        assert!(!suppressor.is_duplicate("ABC1234", WINDOW));
        clock.advance(WINDOW);
        assert!(!suppressor.is_duplicate("ABC1234", WINDOW));
    }

    #[test]
    fn duplicate_does_not_refresh_last_seen() {
        let (mut suppressor, clock) = suppressor();
        suppressor.is_duplicate("ABC1234", WINDOW);
        let first = suppressor.last_seen("ABC1234").unwrap();

        clock.advance(Duration::from_secs(10));
        assert!(suppressor.is_duplicate("ABC1234", WINDOW));
        assert_eq!(suppressor.last_seen("ABC1234"), Some(first));

        clock.set_elapsed(Duration::from_secs(70));
        assert!(!suppressor.is_duplicate("ABC1234", WINDOW));
        assert_eq!(suppressor.last_seen("ABC1234"), Some(clock.now()));
    }

    #[test]
    fn plates_are_tracked_independently() {
        let (mut suppressor, clock) = suppressor();
        assert!(!suppressor.is_duplicate("ABC1234", WINDOW));
        clock.advance(Duration::from_secs(5));
        assert!(!suppressor.is_duplicate("XYZ987", WINDOW));
        assert!(suppressor.is_duplicate("ABC1234", WINDOW));
        assert_eq!(suppressor.len(), 2);
    }

    #[test]
    fn stale_entries_are_purged_on_any_call() {
        let (mut suppressor, clock) = suppressor();
        suppressor.is_duplicate("OLD1234", WINDOW);

        clock.advance(Duration::from_secs(100));
        suppressor.is_duplicate("NEW5678", WINDOW);
        assert_eq!(suppressor.len(), 2);

        clock.advance(Duration::from_secs(21));
        suppressor.is_duplicate("NEW5678", WINDOW);
        assert_eq!(suppressor.len(), 1);
        assert!(suppressor.last_seen("OLD1234").is_none());
    }
}
