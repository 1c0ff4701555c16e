use std::io::{self, Write};
use std::thread;
use std::time::{Duration, Instant};

use plan_engine::{PlanRun, RunProgressAccumulator, RunStats, SchedulerEvent};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub(crate) struct LoopConfig {
    pub(crate) target_tps: u32,
    pub(crate) max_frame_delta: Duration,
    pub(crate) max_ticks_per_frame: u32,
    pub(crate) progress_log_interval: Duration,
    /// Pace steps against the wall clock instead of stepping as fast as possible.
    pub(crate) realtime: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_tps: 60,
            max_frame_delta: Duration::from_millis(250),
            max_ticks_per_frame: 5,
            progress_log_interval: Duration::from_secs(1),
            realtime: false,
        }
    }
}

/// Drives `run` until it completes or aborts, writing every event line to `out`.
pub(crate) fn run_to_completion<W: Write>(
    run: &mut PlanRun,
    config: &LoopConfig,
    out: &mut W,
) -> io::Result<RunStats> {
    let fixed_dt = Duration::from_secs_f64(1.0 / config.target_tps.max(1) as f64);
    let fixed_dt_seconds = fixed_dt.as_secs_f64();
    let max_ticks_per_frame = config.max_ticks_per_frame.max(1);
    let mut progress = RunProgressAccumulator::new(config.progress_log_interval);
    let mut reporter = EventReporter::default();

    info!(
        run = %run.context().label,
        target_tps = config.target_tps,
        realtime = config.realtime,
        max_ticks_per_frame,
        "host_loop_started"
    );

    let mut last_frame_instant = Instant::now();
    let mut accumulator = Duration::ZERO;
    while !run.is_complete() {
        let ticks = if config.realtime {
            let now = Instant::now();
            let frame_dt = clamp_frame_delta(
                now.saturating_duration_since(last_frame_instant),
                config.max_frame_delta,
            );
            last_frame_instant = now;
            accumulator = accumulator.saturating_add(frame_dt);

            let step_plan = plan_sim_steps(accumulator, fixed_dt, max_ticks_per_frame);
            accumulator = step_plan.remaining_accumulator;
            if step_plan.dropped_backlog > Duration::ZERO {
                warn!(
                    dropped_backlog_ms = step_plan.dropped_backlog.as_millis() as u64,
                    max_ticks_per_frame, "sim_clamp_triggered"
                );
            }
            step_plan.ticks_to_run
        } else {
            1
        };

        for _ in 0..ticks {
            for event in run.step(fixed_dt_seconds) {
                reporter.report(&event, out)?;
            }
            progress.record_step();
            if run.is_complete() {
                break;
            }
        }

        if let Some(snapshot) = progress.maybe_snapshot(Instant::now(), run.stats()) {
            info!(
                steps_per_second = snapshot.steps_per_second,
                virtual_time = snapshot.virtual_time,
                virtual_rate = snapshot.virtual_rate,
                dispatched = snapshot.stats.dispatched,
                applied = snapshot.stats.applied,
                rejected = snapshot.stats.rejected,
                "run_progress"
            );
        }

        if config.realtime && !run.is_complete() {
            let elapsed = Instant::now().saturating_duration_since(last_frame_instant);
            if elapsed < fixed_dt {
                thread::sleep(fixed_dt - elapsed);
            }
        }
    }

    out.flush()?;
    Ok(run.stats())
}

/// Turns scheduler events into one printable line each.
#[derive(Debug, Default)]
struct EventReporter {
    clock: f64,
}

impl EventReporter {
    fn report<W: Write>(&mut self, event: &SchedulerEvent, out: &mut W) -> io::Result<()> {
        match self.format(event) {
            Some(line) => writeln!(out, "{line}"),
            None => Ok(()),
        }
    }

    fn format(&mut self, event: &SchedulerEvent) -> Option<String> {
        match event {
            SchedulerEvent::Dispatched { clock, .. } => {
                self.clock = *clock;
                None
            }
            SchedulerEvent::TransitionCompleted { clock, .. } => {
                self.clock = *clock;
                None
            }
            SchedulerEvent::Applied { index, transition } => {
                Some(format!("[{:>9.3}] #{index} {transition}", self.clock))
            }
            SchedulerEvent::Rejected {
                index,
                action,
                reason,
            } => Some(format!(
                "[{:>9.3}] #{index} rejected {action}: {reason}",
                self.clock
            )),
            SchedulerEvent::RobotPhaseChanged(change) => Some(format!(
                "[{:>9.3}] robot {} {} -> {}",
                self.clock, change.robot, change.from, change.to
            )),
            SchedulerEvent::Completed { clock, stats } => Some(format!(
                "completed at {clock:.3}: dispatched={} applied={} rejected={} waits={}",
                stats.dispatched, stats.applied, stats.rejected, stats.waits
            )),
            SchedulerEvent::Aborted { reason } => Some(format!("aborted: {reason}")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct StepPlan {
    ticks_to_run: u32,
    remaining_accumulator: Duration,
    dropped_backlog: Duration,
}

fn plan_sim_steps(
    mut accumulator: Duration,
    fixed_dt: Duration,
    max_ticks_per_frame: u32,
) -> StepPlan {
    let mut ticks_to_run = 0u32;
    while accumulator >= fixed_dt && ticks_to_run < max_ticks_per_frame {
        accumulator = accumulator.saturating_sub(fixed_dt);
        ticks_to_run = ticks_to_run.saturating_add(1);
    }

    let dropped_backlog = if accumulator >= fixed_dt {
        std::mem::replace(&mut accumulator, Duration::ZERO)
    } else {
        Duration::ZERO
    };
    StepPlan {
        ticks_to_run,
        remaining_accumulator: accumulator,
        dropped_backlog,
    }
}

fn clamp_frame_delta(frame_dt: Duration, max_frame_delta: Duration) -> Duration {
    frame_dt.min(max_frame_delta)
}
