//! Cooperative routines resumed on the tick clock.
//!
//! A routine is a resumable step function owned by gameplay code. Each time
//! it runs it returns a [`Wait`] saying when it wants to run again. The
//! [`RoutineScheduler`] records that suspension and, on every tick, hands
//! back the keys of the routines that are due. Nothing here runs code on
//! its own; the caller resumes each due routine and reports its next
//! [`Wait`] through [`RoutineScheduler::suspend`].
//!
//! `C` is whatever read-only view the caller lets predicates inspect.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// When a routine wants to run next.
pub enum Wait<C> {
    /// On the next tick.
    NextTick,
    /// After this many ticks (0 behaves like 1).
    Ticks(u32),
    /// After at least this much logical time, rounded up to whole ticks.
    Elapsed(Duration),
    /// On the first tick where the predicate holds.
    Until(Box<dyn Fn(&C) -> bool + Send>),
    /// Never again.
    Done,
}

impl<C> Wait<C> {
    /// Shorthand for [`Wait::Until`].
    pub fn until(predicate: impl Fn(&C) -> bool + Send + 'static) -> Self {
        Wait::Until(Box::new(predicate))
    }
}

impl<C> fmt::Debug for Wait<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wait::NextTick => f.write_str("NextTick"),
            Wait::Ticks(n) => f.debug_tuple("Ticks").field(n).finish(),
            Wait::Elapsed(d) => f.debug_tuple("Elapsed").field(d).finish(),
            Wait::Until(_) => f.write_str("Until(..)"),
            Wait::Done => f.write_str("Done"),
        }
    }
}

enum Suspension<C> {
    AtTick(u64),
    Until(Box<dyn Fn(&C) -> bool + Send>),
}

/// Tracks suspended routines by key.
///
/// Keys are kept ordered, so routines that become due on the same tick are
/// resumed in key order.
pub struct RoutineScheduler<K, C> {
    suspended: BTreeMap<K, Suspension<C>>,
}

impl<K: Ord + Copy, C> Default for RoutineScheduler<K, C> {
    fn default() -> Self {
        Self {
            suspended: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Copy, C> RoutineScheduler<K, C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a routine that is due on the next [`due`](Self::due) call.
    pub fn start(&mut self, key: K) {
        self.suspended.insert(key, Suspension::AtTick(0));
    }

    /// Removes and returns every routine due on `tick`, in key order.
    ///
    /// A removed routine stays out of the scheduler until it is suspended
    /// again, so a routine that is not re-suspended is finished.
    pub fn due(&mut self, tick: u64, view: &C) -> Vec<K> {
        let ready: Vec<K> = self
            .suspended
            .iter()
            .filter(|(_, suspension)| match suspension {
                Suspension::AtTick(at) => *at <= tick,
                Suspension::Until(predicate) => predicate(view),
            })
            .map(|(key, _)| *key)
            .collect();
        for key in &ready {
            self.suspended.remove(key);
        }
        ready
    }

    /// Suspends `key` according to `wait`, relative to `tick`.
    ///
    /// `dt` converts [`Wait::Elapsed`] to a tick count.
    pub fn suspend(&mut self, key: K, wait: Wait<C>, tick: u64, dt: Duration) {
        let suspension = match wait {
            Wait::NextTick => Suspension::AtTick(tick + 1),
            Wait::Ticks(n) => Suspension::AtTick(tick + u64::from(n.max(1))),
            Wait::Elapsed(duration) => {
                Suspension::AtTick(tick + ticks_for(duration, dt))
            }
            Wait::Until(predicate) => Suspension::Until(predicate),
            Wait::Done => {
                self.suspended.remove(&key);
                return;
            }
        };
        self.suspended.insert(key, suspension);
    }

    /// Drops the routine for `key`, if any.
    pub fn cancel(&mut self, key: K) {
        self.suspended.remove(&key);
    }

    /// Drops every routine whose key matches.
    pub fn cancel_where(&mut self, mut matches: impl FnMut(&K) -> bool) {
        self.suspended.retain(|key, _| !matches(key));
    }

    pub fn contains(&self, key: K) -> bool {
        self.suspended.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.suspended.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suspended.is_empty()
    }

    pub fn clear(&mut self) {
        self.suspended.clear();
    }
}

/// Whole ticks covering `duration`, at least 1.
fn ticks_for(duration: Duration, dt: Duration) -> u64 {
    if dt.is_zero() {
        return 1;
    }
    let dt_nanos = dt.as_nanos();
    let ticks = duration.as_nanos().div_ceil(dt_nanos);
    u64::try_from(ticks).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: Duration = Duration::from_millis(20);

    /// A stand-in for the session view predicates inspect.
    struct View {
        connections: usize,
    }

    fn idle() -> View {
        View { connections: 0 }
    }

    #[test]
    fn test_start_is_due_immediately() {
        let mut s: RoutineScheduler<u32, View> = RoutineScheduler::new();
        s.start(7);
        assert_eq!(s.due(1, &idle()), vec![7]);
        assert!(s.is_empty(), "due routines are removed until re-suspended");
    }

    #[test]
    fn test_next_tick_resumes_one_tick_later() {
        let mut s: RoutineScheduler<u32, View> = RoutineScheduler::new();
        s.suspend(1, Wait::NextTick, 10, DT);
        assert!(s.due(10, &idle()).is_empty());
        assert_eq!(s.due(11, &idle()), vec![1]);
    }

    #[test]
    fn test_ticks_zero_behaves_like_next_tick() {
        let mut s: RoutineScheduler<u32, View> = RoutineScheduler::new();
        s.suspend(1, Wait::Ticks(0), 3, DT);
        assert!(s.due(3, &idle()).is_empty());
        assert_eq!(s.due(4, &idle()), vec![1]);
    }

    #[test]
    fn test_elapsed_rounds_up_to_whole_ticks() {
        let mut s: RoutineScheduler<u32, View> = RoutineScheduler::new();
        // 50 ms at 20 ms per tick is 3 ticks.
        s.suspend(1, Wait::Elapsed(Duration::from_millis(50)), 0, DT);
        assert!(s.due(2, &idle()).is_empty());
        assert_eq!(s.due(3, &idle()), vec![1]);
    }

    #[test]
    fn test_until_waits_for_predicate() {
        let mut s: RoutineScheduler<u32, View> = RoutineScheduler::new();
        s.suspend(1, Wait::until(|v: &View| v.connections > 0), 0, DT);
        assert!(s.due(1, &idle()).is_empty());
        assert!(s.due(2, &idle()).is_empty());
        assert_eq!(s.due(3, &View { connections: 1 }), vec![1]);
    }

    #[test]
    fn test_done_removes_routine() {
        let mut s: RoutineScheduler<u32, View> = RoutineScheduler::new();
        s.suspend(1, Wait::NextTick, 0, DT);
        s.suspend(1, Wait::Done, 0, DT);
        assert!(!s.contains(1));
    }

    #[test]
    fn test_due_returns_keys_in_order() {
        let mut s: RoutineScheduler<(u32, usize), View> = RoutineScheduler::new();
        s.start((5, 1));
        s.start((2, 0));
        s.start((5, 0));
        assert_eq!(s.due(1, &idle()), vec![(2, 0), (5, 0), (5, 1)]);
    }

    #[test]
    fn test_cancel_where_drops_matching_keys() {
        let mut s: RoutineScheduler<(u32, usize), View> = RoutineScheduler::new();
        s.start((1, 0));
        s.start((1, 1));
        s.start((2, 0));
        s.cancel_where(|(object, _)| *object == 1);
        assert_eq!(s.len(), 1);
        assert!(s.contains((2, 0)));
    }

    #[test]
    fn test_wait_debug_hides_predicate() {
        let wait: Wait<View> = Wait::until(|_| true);
        assert_eq!(format!("{wait:?}"), "Until(..)");
    }
}
