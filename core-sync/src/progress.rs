//! # Progress Tracker
//!
//! Counts processed items per group and estimates the time remaining.
//!
//! ## Overview
//!
//! A traversal registers one group per phase (`"movies/ratings"`,
//! `"artifacts"`, ...), announces how much work it expects with
//! [`ProgressGroup::add`] and advances with [`ProgressGroup::step`]. Overall
//! completion is the sum of completed units over the sum of expected units
//! across every group.
//!
//! The remaining-time estimate is an exponentially smoothed percent-per-second
//! rate, updated on every progress event. Events that arrive without any time
//! having elapsed leave the rate untouched. Groups registered or grown
//! mid-run lower the overall percent; such a drop restarts the sample
//! instead of counting as negative progress.
//!
//! The tracker is cheap to clone; the sync manager keeps a clone so
//! [`SyncManager::progress`](crate::SyncManager::progress) can read it while
//! the worker advances it.

use bridge_traits::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct GroupState {
    label: String,
    total: u64,
    completed: u64,
}

#[derive(Debug)]
struct TrackerState {
    groups: Vec<GroupState>,
    last_sample: (DateTime<Utc>, f64),
    /// Smoothed percent per second
    rate: Option<f64>,
}

impl TrackerState {
    fn percent(&self) -> f64 {
        let (completed, total) = self
            .groups
            .iter()
            .fold((0u64, 0u64), |(c, t), g| (c + g.completed, t + g.total));
        if total == 0 {
            0.0
        } else {
            (completed as f64 / total as f64 * 100.0).min(100.0)
        }
    }

    fn sample(&mut self, now: DateTime<Utc>, smoothing: f64) {
        let percent = self.percent();
        let (at, previous) = self.last_sample;
        if percent < previous {
            self.last_sample = (now, percent);
            return;
        }
        let elapsed = (now - at).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return;
        }

        let instant = (percent - previous) / elapsed;
        self.rate = Some(match self.rate {
            Some(rate) => smoothing * instant + (1.0 - smoothing) * rate,
            None => instant,
        });
        self.last_sample = (now, percent);
    }
}

/// Point-in-time view of a tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub percent: f64,
    pub seconds_remaining: Option<f64>,
    pub groups: Vec<GroupProgress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupProgress {
    pub label: String,
    pub completed: u64,
    pub total: u64,
}

/// Shared progress state of one task
#[derive(Clone)]
pub struct ProgressTracker {
    state: Arc<Mutex<TrackerState>>,
    clock: Arc<dyn Clock>,
    smoothing: f64,
}

impl ProgressTracker {
    /// Create a tracker starting at the clock's current time.
    ///
    /// `smoothing` is the weight of the newest rate sample, in `(0, 1]`.
    pub fn new(clock: Arc<dyn Clock>, smoothing: f64) -> Self {
        let now = clock.now();
        Self {
            state: Arc::new(Mutex::new(TrackerState {
                groups: Vec::new(),
                last_sample: (now, 0.0),
                rate: None,
            })),
            clock,
            smoothing,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new group of work
    pub fn group(&self, label: impl Into<String>) -> ProgressGroup {
        let mut state = self.lock();
        state.groups.push(GroupState {
            label: label.into(),
            total: 0,
            completed: 0,
        });
        ProgressGroup {
            tracker: self.clone(),
            index: state.groups.len() - 1,
        }
    }

    /// Overall completion in percent
    pub fn percent(&self) -> f64 {
        self.lock().percent()
    }

    /// Estimated seconds until completion, if a positive rate is known
    pub fn seconds_remaining(&self) -> Option<f64> {
        let state = self.lock();
        match state.rate {
            Some(rate) if rate > 0.0 => Some((100.0 - state.percent()).max(0.0) / rate),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let groups = self
            .lock()
            .groups
            .iter()
            .map(|g| GroupProgress {
                label: g.label.clone(),
                completed: g.completed,
                total: g.total,
            })
            .collect();

        ProgressSnapshot {
            percent: self.percent(),
            seconds_remaining: self.seconds_remaining(),
            groups,
        }
    }

    fn update(&self, index: usize, apply: impl FnOnce(&mut GroupState)) {
        let now = self.clock.now();
        let mut state = self.lock();
        if let Some(group) = state.groups.get_mut(index) {
            apply(group);
        }
        state.sample(now, self.smoothing);
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("percent", &self.percent())
            .field("smoothing", &self.smoothing)
            .finish()
    }
}

/// Handle to one group of a [`ProgressTracker`]
#[derive(Debug, Clone)]
pub struct ProgressGroup {
    tracker: ProgressTracker,
    index: usize,
}

impl ProgressGroup {
    /// Expect `n` more units of work
    pub fn add(&self, n: u64) {
        self.tracker.update(self.index, |g| g.total += n);
    }

    /// Complete one unit of work
    pub fn step(&self) {
        self.tracker.update(self.index, |g| {
            g.completed += 1;
            g.total = g.total.max(g.completed);
        });
    }

    /// Mark the group finished, including any work that was skipped
    pub fn stop(&self) {
        self.tracker.update(self.index, |g| g.completed = g.total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::ManualClock;
    use chrono::{Duration, TimeZone};

    fn tracker() -> (Arc<ManualClock>, ProgressTracker) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let tracker = ProgressTracker::new(clock.clone(), 0.5);
        (clock, tracker)
    }

    #[test]
    fn test_percent_sums_across_groups() {
        let (_clock, tracker) = tracker();
        let movies = tracker.group("movies");
        let shows = tracker.group("shows");
        movies.add(2);
        shows.add(2);

        movies.step();
        assert!((tracker.percent() - 25.0).abs() < 1e-9);

        movies.step();
        shows.stop();
        assert!((tracker.percent() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_tracker_is_zero_percent() {
        let (_clock, tracker) = tracker();
        assert_eq!(tracker.percent(), 0.0);
        assert_eq!(tracker.seconds_remaining(), None);
    }

    #[test]
    fn test_no_rate_update_without_elapsed_time() {
        let (_clock, tracker) = tracker();
        let group = tracker.group("movies");
        group.add(4);
        group.step();
        group.step();

        assert!((tracker.percent() - 50.0).abs() < 1e-9);
        assert_eq!(tracker.seconds_remaining(), None);
    }

    #[test]
    fn test_smoothed_remaining_estimate() {
        let (clock, tracker) = tracker();
        let group = tracker.group("movies");
        group.add(10);

        // 10% in 1s
        clock.advance(Duration::seconds(1));
        group.step();
        let remaining = tracker.seconds_remaining().unwrap();
        assert!((remaining - 9.0).abs() < 1e-9);

        // 10% in 3s: rate = 0.5 * 3.333 + 0.5 * 10
        clock.advance(Duration::seconds(3));
        group.step();
        let rate = 0.5 * (10.0 / 3.0) + 0.5 * 10.0;
        let remaining = tracker.seconds_remaining().unwrap();
        assert!((remaining - 80.0 / rate).abs() < 1e-9);
    }

    #[test]
    fn test_step_beyond_total_grows_total() {
        let (_clock, tracker) = tracker();
        let group = tracker.group("lists");
        group.step();
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.groups[0].completed, 1);
        assert_eq!(snapshot.groups[0].total, 1);
        assert!((snapshot.percent - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_new_work_mid_run_keeps_rate_positive() {
        let (clock, tracker) = tracker();
        let fetch = tracker.group("fetch");
        fetch.add(2);
        clock.advance(Duration::seconds(1));
        fetch.step();
        clock.advance(Duration::seconds(1));
        fetch.step();
        assert!((tracker.percent() - 100.0).abs() < 1e-9);

        // A later phase registers its work and the percent falls back
        let push = tracker.group("push movies/ratings");
        clock.advance(Duration::seconds(1));
        push.add(6);
        assert!((tracker.percent() - 25.0).abs() < 1e-9);
        let remaining = tracker.seconds_remaining().unwrap();
        assert!(remaining > 0.0);

        clock.advance(Duration::seconds(1));
        push.step();
        let remaining = tracker.seconds_remaining().unwrap();
        assert!(remaining > 0.0);
        assert!(tracker.snapshot().seconds_remaining.unwrap() > 0.0);
    }
}
