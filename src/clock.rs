//! Time source for every blocking wait in the fetch pipeline.
//!
//! Orchestrators and the reconciler never call `thread::sleep` directly; they
//! go through a [`Clock`]. Production code uses [`SystemClock`]. Tests use
//! [`ManualClock`], whose `sleep` advances virtual time instantly and fires
//! actions scheduled for that moment (a file appearing, a download growing),
//! so multi-minute download scenarios run in microseconds.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Monotonic time since the clock was created.
    fn elapsed(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

type ScheduledAction = Box<dyn FnOnce() + Send>;

struct Scheduled {
    due: Duration,
    seq: u64,
    action: ScheduledAction,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_seq: u64,
    pending: Vec<Scheduled>,
}

/// Virtual clock: `sleep` jumps forward and runs whatever became due.
#[derive(Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `action` once virtual time reaches `at`.
    pub fn schedule_at<F>(&self, at: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(Scheduled {
            due: at,
            seq,
            action: Box::new(action),
        });
    }

    pub fn schedule_after<F>(&self, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let at = self.elapsed() + delay;
        self.schedule_at(at, action);
    }

    pub fn advance(&self, duration: Duration) {
        let target = self.lock().now + duration;
        loop {
            let next = {
                let mut state = self.lock();
                let due_index = state
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, item)| item.due <= target)
                    .min_by_key(|(_, item)| (item.due, item.seq))
                    .map(|(index, _)| index);
                match due_index {
                    Some(index) => {
                        let item = state.pending.swap_remove(index);
                        if item.due > state.now {
                            state.now = item.due;
                        }
                        Some(item.action)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            // actions run unlocked so they may schedule follow-ups
            match next {
                Some(action) => action(),
                None => break,
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        self.lock().now
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn elapsed(&self) -> Duration {
        (**self).elapsed()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn manual_clock_fires_in_order() {
        let clock = ManualClock::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for (at, label) in [(3, "c"), (1, "a"), (2, "b")] {
            let log = log.clone();
            clock.schedule_at(Duration::from_secs(at), move || {
                log.lock().unwrap().push(label);
            });
        }

        clock.sleep(Duration::from_secs(2));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(clock.elapsed(), Duration::from_secs(2));

        clock.sleep(Duration::from_secs(5));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(clock.elapsed(), Duration::from_secs(7));
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn actions_can_reschedule() {
        let clock = ManualClock::new();
        let counter = Arc::new(AtomicUsize::new(0));

        fn tick(clock: ManualClock, counter: Arc<AtomicUsize>) {
            if counter.fetch_add(1, Ordering::SeqCst) < 4 {
                let next = clock.clone();
                clock.schedule_after(Duration::from_secs(1), move || tick(next, counter));
            }
        }

        let first = clock.clone();
        let c = counter.clone();
        clock.schedule_at(Duration::from_secs(1), move || tick(first, c));
        clock.sleep(Duration::from_secs(10));
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }
}
