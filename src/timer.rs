use std::cell::RefCell;
use std::collections::BTreeMap;
use std::time::Duration;

pub type TimerTask = Box<dyn FnOnce()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// One-shot timers.
pub trait Scheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId;
    /// Returns `false` when the timer already fired or was cancelled.
    fn cancel(&self, id: TimerId) -> bool;
}

struct ClockState {
    now: Duration,
    next_id: u64,
    pending: BTreeMap<(Duration, u64), TimerTask>,
}

/// Virtual clock that only moves when told to.
///
/// Timers due at the same instant fire in scheduling order.
pub struct ManualScheduler {
    state: RefCell<ClockState>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self {
            state: RefCell::new(ClockState {
                now: Duration::ZERO,
                next_id: 0,
                pending: BTreeMap::new(),
            }),
        }
    }
}

impl ManualScheduler {
    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Moves the clock forward, running every timer that comes due, and
    /// returns how many ran. Tasks scheduled by a running task fire in the
    /// same call when they fall inside the window.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state.borrow().now + by;
        let mut fired = 0;
        loop {
            let task = {
                let mut guard = self.state.borrow_mut();
                let state = &mut *guard;
                let Some(entry) = state.pending.first_entry() else {
                    break;
                };
                let (due, _) = *entry.key();
                if due > target {
                    break;
                }
                state.now = due;
                entry.remove()
            };
            task();
            fired += 1;
        }
        self.state.borrow_mut().now = target;
        fired
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId {
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;
        let due = state.now + delay;
        state.pending.insert((due, id), task);
        TimerId(id)
    }

    fn cancel(&self, id: TimerId) -> bool {
        let mut state = self.state.borrow_mut();
        let key = state.pending.keys().find(|(_, i)| *i == id.0).copied();
        match key {
            Some(key) => state.pending.remove(&key).is_some(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    #[test]
    fn fires_in_due_order_and_respects_cancel() {
        let clock = ManualScheduler::default();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = Rc::clone(&log);
        clock.schedule(Duration::from_millis(300), Box::new(move || l.borrow_mut().push("late")));
        let l = Rc::clone(&log);
        clock.schedule(Duration::from_millis(100), Box::new(move || l.borrow_mut().push("early")));
        let l = Rc::clone(&log);
        let cancelled =
            clock.schedule(Duration::from_millis(200), Box::new(move || l.borrow_mut().push("never")));

        assert!(clock.cancel(cancelled));
        assert!(!clock.cancel(cancelled));

        assert_eq!(clock.advance(Duration::from_millis(150)), 1);
        assert_eq!(clock.advance(Duration::from_millis(150)), 1);
        assert_eq!(*log.borrow(), vec!["early", "late"]);
        assert_eq!(clock.now(), Duration::from_millis(300));
        assert_eq!(clock.pending_count(), 0);
    }

    #[test]
    fn chained_tasks_fire_within_one_advance() {
        let clock = Rc::new(ManualScheduler::default());
        let fired = Rc::new(RefCell::new(Vec::new()));

        let (c, f) = (Rc::clone(&clock), Rc::clone(&fired));
        clock.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                f.borrow_mut().push(c.now());
                let f = Rc::clone(&f);
                let inner = Rc::clone(&c);
                c.schedule(
                    Duration::from_millis(5),
                    Box::new(move || f.borrow_mut().push(inner.now())),
                );
            }),
        );

        assert_eq!(clock.advance(Duration::from_millis(20)), 2);
        assert_eq!(
            *fired.borrow(),
            vec![Duration::from_millis(10), Duration::from_millis(15)]
        );
    }
}
