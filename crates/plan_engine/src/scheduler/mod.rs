mod stats;

use std::fmt;

use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::domain::{
    DecodeError, DomainAction, DomainActionTable, PhaseChange, Rejection, Transition,
    TransitionProgress,
};
use crate::plan::{NormalizedPlan, TimedAction};
use crate::world::WorldModel;

pub use stats::{RunProgressAccumulator, RunProgressSnapshot, RunStats};

pub const NO_PLAN_REASON: &str = "no plan";
pub const CANCELLED_REASON: &str = "cancelled";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Completed,
    Aborted { reason: String },
}

impl SchedulerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted { .. })
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Running => f.write_str("running"),
            Self::Completed => f.write_str("completed"),
            Self::Aborted { reason } => write!(f, "aborted ({reason})"),
        }
    }
}

/// Everything observable that happens on the timeline, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    Dispatched {
        index: usize,
        action: TimedAction,
        clock: f64,
    },
    Applied {
        index: usize,
        transition: Transition,
    },
    Rejected {
        index: usize,
        action: TimedAction,
        reason: Rejection,
    },
    TransitionCompleted {
        index: usize,
        clock: f64,
    },
    RobotPhaseChanged(PhaseChange),
    Completed {
        clock: f64,
        stats: RunStats,
    },
    Aborted {
        reason: String,
    },
}

#[derive(Debug, Clone)]
struct ScheduledAction {
    timed: TimedAction,
    decoded: Result<DomainAction, DecodeError>,
}

#[derive(Debug)]
struct ActiveTransition {
    index: usize,
    action: DomainAction,
    progress: TransitionProgress,
}

/// Replays a normalized plan on a virtual clock, one action at a time.
///
/// Host time handed to [`PlanScheduler::step`] is scaled by the speed multiplier. An
/// action is dispatched once the clock reaches its start time and the previous
/// transition has completed, so a long transition delays everything after it.
#[derive(Debug)]
pub struct PlanScheduler {
    speed: f64,
    table: DomainActionTable,
    entries: Vec<ScheduledAction>,
    next: usize,
    clock: f64,
    active: Option<ActiveTransition>,
    state: SchedulerState,
    stats: RunStats,
}

impl PlanScheduler {
    /// Decodes every action up front against the run's domain table.
    pub fn new(ctx: &RunContext, plan: &NormalizedPlan, table: DomainActionTable) -> Self {
        let entries = plan
            .actions
            .iter()
            .map(|timed| ScheduledAction {
                timed: timed.clone(),
                decoded: table.decode(timed),
            })
            .collect();
        Self {
            speed: ctx.config.speed_multiplier,
            table,
            entries,
            next: 0,
            clock: 0.0,
            active: None,
            state: SchedulerState::Idle,
            stats: RunStats::default(),
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub fn table(&self) -> &DomainActionTable {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the next action to dispatch.
    pub fn cursor(&self) -> usize {
        self.next
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_terminal()
    }

    /// Moves `Idle` to `Running`, or straight to `Aborted` when there is nothing to run.
    pub fn start(&mut self) -> Vec<SchedulerEvent> {
        if self.state != SchedulerState::Idle {
            return Vec::new();
        }
        if self.entries.is_empty() {
            return self.abort(NO_PLAN_REASON);
        }
        info!(actions = self.entries.len(), speed = self.speed, "scheduler_started");
        self.state = SchedulerState::Running;
        Vec::new()
    }

    /// Advances by `host_dt` seconds of host time and returns what happened.
    pub fn step(&mut self, host_dt: f64, world: &mut WorldModel) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        if self.state != SchedulerState::Running {
            return events;
        }

        let mut budget = (host_dt * self.speed).max(0.0);
        loop {
            if let Some(active) = self.active.as_mut() {
                let leftover = active.progress.advance(budget);
                if !active.progress.is_complete() {
                    self.clock += budget;
                    break;
                }
                self.clock += budget - leftover;
                budget = leftover;
                self.finish_active(&mut events);
                continue;
            }

            let Some(entry) = self.entries.get(self.next) else {
                self.complete(&mut events);
                break;
            };
            let wait = entry.timed.start_time - self.clock;
            if wait > 0.0 {
                if budget < wait {
                    self.clock += budget;
                    break;
                }
                budget -= wait;
                self.clock = entry.timed.start_time;
            }
            self.dispatch_next(world, &mut events);
        }

        self.stats.virtual_time = self.clock;
        events
    }

    /// Stops the run. Effects already committed stay; the running transition is dropped.
    pub fn cancel(&mut self) -> Vec<SchedulerEvent> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.active = None;
        let mut events = self
            .table
            .settle()
            .into_iter()
            .map(SchedulerEvent::RobotPhaseChanged)
            .collect::<Vec<_>>();
        events.extend(self.abort(CANCELLED_REASON));
        events
    }

    fn dispatch_next(&mut self, world: &mut WorldModel, events: &mut Vec<SchedulerEvent>) {
        let index = self.next;
        self.next += 1;
        let entry = &self.entries[index];
        let timed = entry.timed.clone();
        self.stats.record_dispatch();
        debug!(index, clock = self.clock, action = %timed, "action_dispatched");
        events.push(SchedulerEvent::Dispatched {
            index,
            action: timed.clone(),
            clock: self.clock,
        });

        let outcome = match &entry.decoded {
            Ok(action) => {
                let action = action.clone();
                self.table
                    .dispatch(&action, &timed, world, self.clock)
                    .map(|applied| (action, applied))
            }
            Err(err) => Err(Rejection::Decode(err.clone())),
        };

        match outcome {
            Ok((action, applied)) => {
                self.stats.record_applied(timed.is_wait());
                debug!(index, transition = %applied.transition, "action_applied");
                let progress = TransitionProgress::new(applied.transition.completion);
                events.push(SchedulerEvent::Applied {
                    index,
                    transition: applied.transition,
                });
                events.extend(
                    applied
                        .phase_changes
                        .into_iter()
                        .map(SchedulerEvent::RobotPhaseChanged),
                );
                self.active = Some(ActiveTransition {
                    index,
                    action,
                    progress,
                });
            }
            Err(reason) => {
                self.stats.record_rejected();
                warn!(
                    index,
                    line = timed.line,
                    action = %timed,
                    reason = %reason,
                    "action_rejected"
                );
                events.push(SchedulerEvent::Rejected {
                    index,
                    action: timed,
                    reason,
                });
            }
        }
    }

    fn finish_active(&mut self, events: &mut Vec<SchedulerEvent>) {
        let Some(active) = self.active.take() else {
            return;
        };
        events.push(SchedulerEvent::TransitionCompleted {
            index: active.index,
            clock: self.clock,
        });
        events.extend(
            self.table
                .finish(&active.action)
                .into_iter()
                .map(SchedulerEvent::RobotPhaseChanged),
        );
    }

    fn complete(&mut self, events: &mut Vec<SchedulerEvent>) {
        events.extend(
            self.table
                .settle()
                .into_iter()
                .map(SchedulerEvent::RobotPhaseChanged),
        );
        self.state = SchedulerState::Completed;
        self.stats.virtual_time = self.clock;
        info!(
            clock = self.clock,
            dispatched = self.stats.dispatched,
            applied = self.stats.applied,
            rejected = self.stats.rejected,
            "scheduler_completed"
        );
        events.push(SchedulerEvent::Completed {
            clock: self.clock,
            stats: self.stats,
        });
    }

    fn abort(&mut self, reason: &str) -> Vec<SchedulerEvent> {
        warn!(reason, clock = self.clock, "scheduler_aborted");
        self.state = SchedulerState::Aborted {
            reason: reason.to_string(),
        };
        vec![SchedulerEvent::Aborted {
            reason: reason.to_string(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::context::{DomainKind, DomainSelection, DomainVariant};
    use crate::domain::{Completion, RobotPhase, TransitionKind};
    use crate::plan::PlanTextNormalizer;
    use crate::problem::ProblemModel;
    use crate::world::{EntityId, RelationKind, ResourceKey};

    fn context(kind: DomainKind, variant: DomainVariant) -> RunContext {
        RunContext::new(
            "test",
            DomainSelection::new(kind, variant).expect("selection"),
            RunConfig::default(),
        )
    }

    fn prepared(ctx: &RunContext, problem: &ProblemModel) -> (DomainActionTable, WorldModel) {
        let mut world = WorldModel::from_problem(problem).expect("world");
        let mut table = DomainActionTable::new(ctx);
        table.prepare(&mut world).expect("prepare");
        (table, world)
    }

    fn robot_problem() -> ProblemModel {
        let mut problem = ProblemModel::new("sweep", "robot");
        problem.add_object("r1", "robot");
        problem.add_object("room1", "room");
        problem.add_object("room2", "room");
        problem.add_predicate("at-robby", &["r1", "room1"]);
        problem.add_predicate("connected", &["room1", "room2"]);
        problem
    }

    fn elevator_problem() -> ProblemModel {
        let mut problem = ProblemModel::new("lift", "elevator");
        problem.add_object("e1", "elevator");
        problem.add_object("f1", "floor");
        problem.add_object("f2", "floor");
        problem.add_object("p1", "person");
        problem.add_predicate("above", &["f2", "f1"]);
        problem.add_predicate("at-elevator", &["e1", "f1"]);
        problem.add_predicate("at-person", &["p1", "f1"]);
        problem.add_function("capacity", &["e1"], 1.0);
        problem
    }

    fn run_to_end(
        scheduler: &mut PlanScheduler,
        world: &mut WorldModel,
        dt: f64,
    ) -> Vec<SchedulerEvent> {
        let mut events = scheduler.start();
        for _ in 0..10_000 {
            if scheduler.is_complete() {
                break;
            }
            events.extend(scheduler.step(dt, world));
        }
        events
    }

    #[test]
    fn temporal_action_waits_for_start_and_uses_declared_duration() {
        let ctx = context(DomainKind::Robot, DomainVariant::Temporal);
        let plan = PlanTextNormalizer::new(&ctx).parse(["2.0: (move r1 room1 room2) [3.000]"]);
        let (table, mut world) = prepared(&ctx, &robot_problem());
        let mut scheduler = PlanScheduler::new(&ctx, &plan, table);
        scheduler.start();

        assert!(scheduler.step(1.5, &mut world).is_empty());
        assert_eq!(scheduler.clock(), 1.5);

        let events = scheduler.step(1.0, &mut world);
        let SchedulerEvent::Dispatched { clock, .. } = &events[0] else {
            panic!("expected dispatch, got {events:?}");
        };
        assert_eq!(*clock, 2.0);
        let SchedulerEvent::Applied { transition, .. } = &events[1] else {
            panic!("expected applied, got {events:?}");
        };
        assert_eq!(transition.nominal_duration, 3.0);
        assert_eq!(transition.completion, Completion::Elapsed { duration: 3.0 });

        let rest = scheduler.step(2.5, &mut world);
        assert!(rest.contains(&SchedulerEvent::TransitionCompleted {
            index: 0,
            clock: 5.0
        }));
        assert_eq!(scheduler.state(), &SchedulerState::Completed);
        assert_eq!(
            world.query_relation(RelationKind::At, &EntityId::new("r1")),
            Some(&EntityId::new("room2"))
        );
    }

    #[test]
    fn rejected_action_leaves_world_and_run_continues() {
        let ctx = context(DomainKind::Elevator, DomainVariant::Numeric);
        let plan = PlanTextNormalizer::new(&ctx)
            .parse(["0: (load p1 e1 f1)", "0: (load p1 e1 f1)", "1: (move-up e1 f1 f2)"]);
        let (table, mut world) = prepared(&ctx, &elevator_problem());
        let mut scheduler = PlanScheduler::new(&ctx, &plan, table);

        let events = run_to_end(&mut scheduler, &mut world, 0.25);

        let rejected = events
            .iter()
            .filter(|event| matches!(event, SchedulerEvent::Rejected { index: 1, .. }))
            .count();
        assert_eq!(rejected, 1);
        assert_eq!(
            world.resource(&EntityId::new("e1"), &ResourceKey::Passengers),
            Some(1.0)
        );
        let stats = scheduler.stats();
        assert_eq!((stats.dispatched, stats.applied, stats.rejected), (3, 2, 1));
        assert_eq!(scheduler.state(), &SchedulerState::Completed);
    }

    #[test]
    fn actions_run_strictly_in_sequence() {
        let ctx = context(DomainKind::Robot, DomainVariant::Temporal);
        let plan = PlanTextNormalizer::new(&ctx).parse([
            "0.0: (move r1 room1 room2) [4.000]",
            "1.0: (move r1 room2 room1) [1.000]",
        ]);
        let (table, mut world) = prepared(&ctx, &robot_problem());
        let mut scheduler = PlanScheduler::new(&ctx, &plan, table);

        let events = run_to_end(&mut scheduler, &mut world, 0.5);
        let second_dispatch = events
            .iter()
            .find_map(|event| match event {
                SchedulerEvent::Dispatched { index: 1, clock, .. } => Some(*clock),
                _ => None,
            })
            .expect("second dispatch");

        assert_eq!(second_dispatch, 4.0);
        assert_eq!(scheduler.clock(), 5.0);
    }

    #[test]
    fn speed_multiplier_scales_host_time() {
        let ctx = context(DomainKind::Robot, DomainVariant::Temporal);
        let plan = PlanTextNormalizer::new(&ctx).parse(["4.0: (move r1 room1 room2) [1.000]"]);
        let (table, mut world) = prepared(&ctx, &robot_problem());
        let mut scheduler = PlanScheduler::new(&ctx, &plan, table).with_speed(4.0);
        scheduler.start();

        let events = scheduler.step(1.0, &mut world);
        assert!(matches!(events[0], SchedulerEvent::Dispatched { .. }));
        assert_eq!(scheduler.clock(), 4.0);
    }

    #[test]
    fn empty_plan_aborts_with_no_plan() {
        let ctx = context(DomainKind::Robot, DomainVariant::Classical);
        let (table, mut world) = prepared(&ctx, &robot_problem());
        let mut scheduler = PlanScheduler::new(&ctx, &NormalizedPlan::empty(), table);

        let events = scheduler.start();
        assert_eq!(
            events,
            vec![SchedulerEvent::Aborted {
                reason: NO_PLAN_REASON.to_string()
            }]
        );
        assert!(scheduler.is_complete());
        assert!(scheduler.step(1.0, &mut world).is_empty());
    }

    #[test]
    fn cancel_keeps_committed_effects() {
        let ctx = context(DomainKind::Robot, DomainVariant::Event);
        let plan = PlanTextNormalizer::new(&ctx).parse(["0: (startmove r1 room1 room2)"]);
        let (table, mut world) = prepared(&ctx, &robot_problem());
        let mut scheduler = PlanScheduler::new(&ctx, &plan, table);
        scheduler.start();
        scheduler.step(0.5, &mut world);

        let events = scheduler.cancel();
        assert!(events.iter().any(|event| matches!(
            event,
            SchedulerEvent::RobotPhaseChanged(change) if change.to == RobotPhase::Arrived
        )));
        assert_eq!(
            scheduler.state(),
            &SchedulerState::Aborted {
                reason: CANCELLED_REASON.to_string()
            }
        );
        assert_eq!(
            world.query_relation(RelationKind::At, &EntityId::new("r1")),
            Some(&EntityId::new("room2"))
        );
        assert!(scheduler.cancel().is_empty());
    }

    #[test]
    fn undecodable_actions_are_rejected_in_order() {
        let ctx = context(DomainKind::Robot, DomainVariant::Classical);
        let plan = PlanTextNormalizer::new(&ctx).parse(["(fly r1 room1)", "(move r1 room1 room2)"]);
        let (table, mut world) = prepared(&ctx, &robot_problem());
        let mut scheduler = PlanScheduler::new(&ctx, &plan, table);

        let events = run_to_end(&mut scheduler, &mut world, 1.0);
        assert!(matches!(
            &events[1],
            SchedulerEvent::Rejected {
                reason: Rejection::Decode(DecodeError::UnknownVerb { .. }),
                ..
            }
        ));
        let applied = events.iter().find_map(|event| match event {
            SchedulerEvent::Applied { transition, .. } => Some(transition.kind),
            _ => None,
        });
        assert_eq!(applied, Some(TransitionKind::Move));
    }
}
