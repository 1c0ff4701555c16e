use std::time::{Duration, Instant};

/// Counters of one scheduler run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunStats {
    pub dispatched: u32,
    pub applied: u32,
    pub rejected: u32,
    pub waits: u32,
    pub virtual_time: f64,
}

impl RunStats {
    pub(crate) fn record_dispatch(&mut self) {
        self.dispatched = self.dispatched.saturating_add(1);
    }

    pub(crate) fn record_applied(&mut self, is_wait: bool) {
        if is_wait {
            self.waits = self.waits.saturating_add(1);
        } else {
            self.applied = self.applied.saturating_add(1);
        }
    }

    pub(crate) fn record_rejected(&mut self) {
        self.rejected = self.rejected.saturating_add(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunProgressSnapshot {
    pub steps_per_second: f32,
    pub virtual_time: f64,
    pub virtual_rate: f64,
    pub stats: RunStats,
}

/// Collects host-side step counts and emits a snapshot once per interval.
#[derive(Debug)]
pub struct RunProgressAccumulator {
    interval_start: Instant,
    interval: Duration,
    steps: u32,
    virtual_at_start: f64,
}

impl RunProgressAccumulator {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    pub fn starting_at(start: Instant, interval: Duration) -> Self {
        Self {
            interval_start: start,
            interval,
            steps: 0,
            virtual_at_start: 0.0,
        }
    }

    pub fn record_step(&mut self) {
        self.steps = self.steps.saturating_add(1);
    }

    pub fn maybe_snapshot(&mut self, now: Instant, stats: RunStats) -> Option<RunProgressSnapshot> {
        let elapsed = now.saturating_duration_since(self.interval_start);
        if elapsed < self.interval {
            return None;
        }

        let elapsed_seconds = elapsed.as_secs_f64().max(f64::EPSILON);
        let snapshot = RunProgressSnapshot {
            steps_per_second: (self.steps as f64 / elapsed_seconds) as f32,
            virtual_time: stats.virtual_time,
            virtual_rate: (stats.virtual_time - self.virtual_at_start) / elapsed_seconds,
            stats,
        };

        self.interval_start = now;
        self.steps = 0;
        self.virtual_at_start = stats.virtual_time;

        Some(snapshot)
    }
}
