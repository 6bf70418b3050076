//! Cancelable one-shot timers on a virtual clock.
//!
//! Every entry records the queue generation it was scheduled in. Bumping the
//! generation with [`TimerQueue::invalidate_all`] turns all pending entries
//! stale; they are discarded when they come due instead of firing.

use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug)]
struct Pending<E> {
    generation: u64,
    event: E,
}

#[derive(Debug)]
pub struct TimerQueue<E> {
    now: Duration,
    generation: u64,
    next_id: u64,
    // Ordered by due time, then scheduling order.
    pending: BTreeMap<(Duration, u64), Pending<E>>,
}

impl<E> Default for TimerQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> TimerQueue<E> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            generation: 0,
            next_id: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Schedules `event` to fire `delay` after the current virtual time.
    pub fn schedule(&mut self, delay: Duration, event: E) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(
            (self.now + delay, id),
            Pending {
                generation: self.generation,
                event,
            },
        );
        TimerId(id)
    }

    /// Cancels one timer. Returns whether it was still pending.
    pub fn cancel(&mut self, timer: TimerId) -> bool {
        let key = self.pending.keys().find(|(_, id)| *id == timer.0).copied();
        key.and_then(|k| self.pending.remove(&k)).is_some()
    }

    /// Makes every pending timer stale.
    pub fn invalidate_all(&mut self) {
        self.generation += 1;
    }

    /// Due time of the earliest live timer.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.pending
            .iter()
            .find(|(_, p)| p.generation == self.generation)
            .map(|((due, _), _)| *due)
    }

    /// Pops the earliest live timer due at or before `until`.
    ///
    /// The clock moves to the timer's due time, so anything the handler
    /// schedules is relative to when the timer was meant to fire.
    pub fn pop_due(&mut self, until: Duration) -> Option<E> {
        loop {
            let key = *self.pending.keys().next()?;
            if key.0 > until {
                return None;
            }
            let entry = self.pending.remove(&key)?;
            if entry.generation != self.generation {
                log::trace!(target: "timer", "discarding stale timer {}", key.1);
                continue;
            }
            self.now = self.now.max(key.0);
            return Some(entry.event);
        }
    }

    /// Moves the clock forward; it never goes backwards.
    pub fn advance_to(&mut self, now: Duration) {
        self.now = self.now.max(now);
    }

    /// Number of live timers.
    pub fn live_count(&self) -> usize {
        self.pending
            .values()
            .filter(|p| p.generation == self.generation)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn fires_in_due_order() {
        let mut q = TimerQueue::new();
        q.schedule(ms(30), "c");
        q.schedule(ms(10), "a");
        q.schedule(ms(10), "b");

        assert_eq!(q.pop_due(ms(100)), Some("a"));
        assert_eq!(q.now(), ms(10));
        assert_eq!(q.pop_due(ms(100)), Some("b"));
        assert_eq!(q.pop_due(ms(100)), Some("c"));
        assert_eq!(q.pop_due(ms(100)), None);
    }

    #[test]
    fn not_due_yet() {
        let mut q = TimerQueue::new();
        q.schedule(ms(50), ());
        assert_eq!(q.pop_due(ms(49)), None);
        assert_eq!(q.next_deadline(), Some(ms(50)));
        assert_eq!(q.pop_due(ms(50)), Some(()));
    }

    #[test]
    fn scheduling_is_relative_to_fire_time() {
        let mut q = TimerQueue::new();
        q.schedule(ms(50), 1);
        assert_eq!(q.pop_due(ms(500)), Some(1));
        q.schedule(ms(50), 2);
        assert_eq!(q.next_deadline(), Some(ms(100)));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut q = TimerQueue::new();
        let id = q.schedule(ms(10), "x");
        assert!(q.cancel(id));
        assert!(!q.cancel(id));
        assert_eq!(q.pop_due(ms(100)), None);
    }

    #[test]
    fn invalidated_timers_are_discarded() {
        let mut q = TimerQueue::new();
        q.schedule(ms(10), "old");
        q.invalidate_all();
        q.schedule(ms(20), "new");

        assert_eq!(q.live_count(), 1);
        assert_eq!(q.next_deadline(), Some(ms(20)));
        assert_eq!(q.pop_due(ms(100)), Some("new"));
        assert_eq!(q.pop_due(ms(100)), None);
    }

    #[test]
    fn clock_never_moves_backwards() {
        let mut q: TimerQueue<()> = TimerQueue::new();
        q.advance_to(ms(100));
        q.advance_to(ms(40));
        assert_eq!(q.now(), ms(100));
    }
}
