use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::config::RobotParams;
use crate::context::{DomainKind, RunContext};
use crate::plan::TimedAction;
use crate::world::{
    ConstraintViolation, Effect, EntityId, EntityKind, Fact, Relation, RelationKind, ResourceKey,
    WorldModel,
};

use super::{
    expect_arity, Completion, DecodeError, Dispatch, DomainHandler, Endpoint, Transition,
    TransitionKind,
};

const FREE: &str = "free";
/// Distance still to cover on an interrupted route, kept on the robot.
const ROUTE_REMAINING: &str = "route-remaining";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RobotPhase {
    #[default]
    Idle,
    Moving,
    Arrived,
    BatteryDead,
    Charging,
}

impl RobotPhase {
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Moving => "moving",
            Self::Arrived => "arrived",
            Self::BatteryDead => "battery_dead",
            Self::Charging => "charging",
        }
    }

    fn can_start_move(self) -> bool {
        matches!(self, Self::Idle | Self::Arrived)
    }
}

impl fmt::Display for RobotPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseChange {
    pub robot: EntityId,
    pub from: RobotPhase,
    pub to: RobotPhase,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RobotAction {
    /// Instantaneous hop between connected rooms.
    Move {
        robot: EntityId,
        from: EntityId,
        to: EntityId,
    },
    Pick {
        ball: EntityId,
        room: EntityId,
        robot: EntityId,
    },
    Drop {
        ball: EntityId,
        room: EntityId,
        robot: EntityId,
    },
    /// Battery-limited travel. `resume` continues an interrupted route.
    Travel {
        robot: EntityId,
        from: EntityId,
        to: EntityId,
        resume: bool,
    },
    StartCharge {
        robot: EntityId,
    },
    StopCharge {
        robot: EntityId,
    },
}

/// How a battery-limited route plays out, decided when it is dispatched.
#[derive(Debug, Clone, Copy, PartialEq)]
struct RoutePlan {
    length: f64,
    travelled: f64,
    battery_after: Option<f64>,
}

impl RoutePlan {
    fn arrives(&self) -> bool {
        self.travelled >= self.length
    }
}

#[derive(Debug, Clone, Default)]
struct RobotState {
    phase: RobotPhase,
    /// Outcome applied when the current travel animation finishes.
    landing: Option<RobotPhase>,
    charge_started: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RobotHandler {
    params: RobotParams,
    default_duration: f64,
    uses_gripper: bool,
    robots: BTreeMap<EntityId, RobotState>,
}

impl RobotHandler {
    pub fn new(ctx: &RunContext) -> Self {
        Self {
            params: ctx.config.robot.clone(),
            default_duration: ctx.config.default_action_duration,
            uses_gripper: false,
            robots: BTreeMap::new(),
        }
    }

    pub fn phase(&self, robot: &EntityId) -> RobotPhase {
        self.robots
            .get(robot)
            .map(|state| state.phase)
            .unwrap_or_default()
    }

    /// Fills empty batteries to capacity and notes whether the problem models a gripper.
    pub(crate) fn prepare(&mut self, world: &WorldModel) -> Vec<Effect> {
        self.uses_gripper = world.has_facts_named(FREE);
        self.robots = world
            .entities_of_kind(&EntityKind::Robot)
            .map(|robot| (robot.clone(), RobotState::default()))
            .collect();
        world
            .entities_of_kind(&EntityKind::Robot)
            .filter(|robot| world.resource(robot, &ResourceKey::Battery).is_none())
            .map(|robot| Effect::SetResource {
                entity: robot.clone(),
                key: ResourceKey::Battery,
                value: self.params.battery_capacity,
            })
            .collect()
    }

    fn transition_phase(&mut self, robot: &EntityId, to: RobotPhase) -> Vec<PhaseChange> {
        let state = self.robots.entry(robot.clone()).or_default();
        if state.phase == to {
            return Vec::new();
        }
        let change = PhaseChange {
            robot: robot.clone(),
            from: state.phase,
            to,
        };
        state.phase = to;
        debug!(robot = %robot, from = %change.from, to = %change.to, "robot_phase_changed");
        vec![change]
    }

    fn route_length(
        &self,
        world: &WorldModel,
        robot: &EntityId,
        from: &EntityId,
        to: &EntityId,
        resume: bool,
    ) -> f64 {
        if resume {
            if let Some(remaining) = world
                .resource(robot, &ResourceKey::Other(ROUTE_REMAINING.to_string()))
                .filter(|remaining| *remaining > 0.0)
            {
                return remaining;
            }
        }
        world
            .fluent(&ResourceKey::Distance, &[from.clone(), to.clone()])
            .filter(|distance| *distance > 0.0)
            .unwrap_or(self.params.route_length)
    }

    /// Drains `battery_drain_rate` per unit of travel time. A robot whose battery would
    /// drop below the depletion threshold stops where it reaches the threshold.
    fn plan_route(
        &self,
        world: &WorldModel,
        robot: &EntityId,
        from: &EntityId,
        to: &EntityId,
        resume: bool,
    ) -> RoutePlan {
        let length = self.route_length(world, robot, from, to, resume);
        let Some(battery) = world.resource(robot, &ResourceKey::Battery) else {
            return RoutePlan {
                length,
                travelled: length,
                battery_after: None,
            };
        };
        let drain_per_distance = self.params.battery_drain_rate / self.params.move_speed;
        let needed = drain_per_distance * length;
        let spare = (battery - self.params.depletion_threshold).max(0.0);
        if needed <= spare || drain_per_distance <= 0.0 {
            return RoutePlan {
                length,
                travelled: length,
                battery_after: Some(battery - needed),
            };
        }
        RoutePlan {
            length,
            travelled: spare / drain_per_distance,
            battery_after: Some(self.params.depletion_threshold),
        }
    }

    fn require_at(
        world: &WorldModel,
        robot: &EntityId,
        room: &EntityId,
    ) -> Result<(), ConstraintViolation> {
        let at = Relation::new(RelationKind::At, robot, room);
        if world.holds(&at) {
            Ok(())
        } else {
            Err(ConstraintViolation::MissingRelation(at))
        }
    }

    fn require_battery(
        &self,
        world: &WorldModel,
        robot: &EntityId,
    ) -> Result<(), ConstraintViolation> {
        match world.resource(robot, &ResourceKey::Battery) {
            Some(battery) if battery <= self.params.depletion_threshold => {
                Err(ConstraintViolation::InsufficientResource {
                    entity: robot.clone(),
                    key: ResourceKey::Battery,
                    required: self.params.depletion_threshold,
                    available: battery,
                })
            }
            _ => Ok(()),
        }
    }

    fn validate_travel(
        &self,
        robot: &EntityId,
        from: &EntityId,
        to: &EntityId,
        resume: bool,
        world: &WorldModel,
    ) -> Result<Vec<Effect>, ConstraintViolation> {
        let phase = self.phase(robot);
        if !phase.can_start_move() {
            return Err(ConstraintViolation::Precondition(format!(
                "{robot} cannot start moving while {phase}"
            )));
        }
        Self::require_at(world, robot, from)?;
        self.require_battery(world, robot)?;

        let plan = self.plan_route(world, robot, from, to, resume);
        let remaining_key = ResourceKey::Other(ROUTE_REMAINING.to_string());
        let mut effects = Vec::new();
        if let Some(battery) = plan.battery_after {
            effects.push(Effect::SetResource {
                entity: robot.clone(),
                key: ResourceKey::Battery,
                value: battery,
            });
        }
        if plan.arrives() {
            effects.push(Effect::Relate(Relation::new(RelationKind::At, robot, to)));
            if world.resource(robot, &remaining_key).is_some() {
                effects.push(Effect::SetResource {
                    entity: robot.clone(),
                    key: remaining_key,
                    value: 0.0,
                });
            }
        } else {
            effects.push(Effect::SetResource {
                entity: robot.clone(),
                key: remaining_key,
                value: plan.length - plan.travelled,
            });
        }
        Ok(effects)
    }

    fn validate_pick(
        &self,
        ball: &EntityId,
        room: &EntityId,
        robot: &EntityId,
        world: &WorldModel,
    ) -> Result<Vec<Effect>, ConstraintViolation> {
        Self::require_at(world, robot, room)?;
        let ball_at = Relation::new(RelationKind::At, ball, room);
        if !world.holds(&ball_at) {
            return Err(ConstraintViolation::MissingRelation(ball_at));
        }
        let mut effects = vec![
            Effect::Unrelate(ball_at),
            Effect::Relate(Relation::new(RelationKind::Carries, robot, ball)),
        ];
        if self.uses_gripper {
            let free = Fact::new(FREE, &[robot]);
            if !world.has_fact(&free) {
                return Err(ConstraintViolation::MissingFact(free));
            }
            effects.push(Effect::RetractFact(free));
        }
        Ok(effects)
    }

    fn validate_drop(
        &self,
        ball: &EntityId,
        room: &EntityId,
        robot: &EntityId,
        world: &WorldModel,
    ) -> Result<Vec<Effect>, ConstraintViolation> {
        Self::require_at(world, robot, room)?;
        let carries = Relation::new(RelationKind::Carries, robot, ball);
        if !world.holds(&carries) {
            return Err(ConstraintViolation::MissingRelation(carries));
        }
        let mut effects = vec![
            Effect::Unrelate(carries),
            Effect::Relate(Relation::new(RelationKind::At, ball, room)),
        ];
        if self.uses_gripper {
            effects.push(Effect::AssertFact(Fact::new(FREE, &[robot])));
        }
        Ok(effects)
    }

    /// Battery level after charging from `level` for `elapsed` time units:
    /// `max - (max - level) * e^(-rate * elapsed)`.
    fn charged_level(&self, level: f64, elapsed: f64) -> f64 {
        let max = self.params.battery_capacity;
        let charged = max - (max - level) * (-self.params.charge_rate * elapsed.max(0.0)).exp();
        charged.clamp(level.min(max), max)
    }

    fn charge_elapsed(&self, robot: &EntityId, clock: f64) -> f64 {
        self.robots
            .get(robot)
            .and_then(|state| state.charge_started)
            .map(|started| (clock - started).max(0.0))
            .unwrap_or(0.0)
    }
}

impl DomainHandler for RobotHandler {
    type Action = RobotAction;

    fn decode(&self, action: &TimedAction) -> Result<RobotAction, DecodeError> {
        let args = &action.args;
        match action.name.as_str() {
            "move" => {
                expect_arity(action, &[3], "3")?;
                Ok(RobotAction::Move {
                    robot: args[0].clone(),
                    from: args[1].clone(),
                    to: args[2].clone(),
                })
            }
            "pick" => {
                expect_arity(action, &[3], "3")?;
                Ok(RobotAction::Pick {
                    ball: args[0].clone(),
                    room: args[1].clone(),
                    robot: args[2].clone(),
                })
            }
            "drop" => {
                expect_arity(action, &[3], "3")?;
                Ok(RobotAction::Drop {
                    ball: args[0].clone(),
                    room: args[1].clone(),
                    robot: args[2].clone(),
                })
            }
            verb @ ("startmove" | "reprisemovement") => {
                expect_arity(action, &[3], "3")?;
                Ok(RobotAction::Travel {
                    robot: args[0].clone(),
                    from: args[1].clone(),
                    to: args[2].clone(),
                    resume: verb == "reprisemovement",
                })
            }
            "startcharge" => {
                expect_arity(action, &[1], "1")?;
                Ok(RobotAction::StartCharge {
                    robot: args[0].clone(),
                })
            }
            "stopcharge" => {
                expect_arity(action, &[1], "1")?;
                Ok(RobotAction::StopCharge {
                    robot: args[0].clone(),
                })
            }
            other => Err(DecodeError::UnknownVerb {
                domain: DomainKind::Robot,
                verb: other.to_string(),
            }),
        }
    }

    fn referenced<'a>(&self, action: &'a RobotAction) -> Vec<&'a EntityId> {
        match action {
            RobotAction::Move { robot, from, to } | RobotAction::Travel { robot, from, to, .. } => {
                vec![robot, from, to]
            }
            RobotAction::Pick { ball, room, robot } | RobotAction::Drop { ball, room, robot } => {
                vec![ball, room, robot]
            }
            RobotAction::StartCharge { robot } | RobotAction::StopCharge { robot } => vec![robot],
        }
    }

    fn validate(
        &self,
        action: &RobotAction,
        dispatch: &Dispatch<'_>,
        world: &WorldModel,
    ) -> Result<Vec<Effect>, ConstraintViolation> {
        match action {
            RobotAction::Move { robot, from, to } => {
                Self::require_at(world, robot, from)?;
                if world.has_relations(RelationKind::Connected) {
                    let forward = Relation::new(RelationKind::Connected, from, to);
                    let backward = Relation::new(RelationKind::Connected, to, from);
                    if !world.holds(&forward) && !world.holds(&backward) {
                        return Err(ConstraintViolation::MissingRelation(forward));
                    }
                }
                self.require_battery(world, robot)?;
                Ok(vec![Effect::Relate(Relation::new(RelationKind::At, robot, to))])
            }
            RobotAction::Pick { ball, room, robot } => self.validate_pick(ball, room, robot, world),
            RobotAction::Drop { ball, room, robot } => self.validate_drop(ball, room, robot, world),
            RobotAction::Travel {
                robot,
                from,
                to,
                resume,
            } => self.validate_travel(robot, from, to, *resume, world),
            RobotAction::StartCharge { robot } => {
                let phase = self.phase(robot);
                if matches!(phase, RobotPhase::Charging | RobotPhase::Moving) {
                    return Err(ConstraintViolation::Precondition(format!(
                        "{robot} cannot start charging while {phase}"
                    )));
                }
                Ok(Vec::new())
            }
            RobotAction::StopCharge { robot } => {
                let phase = self.phase(robot);
                if phase != RobotPhase::Charging {
                    return Err(ConstraintViolation::Precondition(format!(
                        "{robot} is not charging ({phase})"
                    )));
                }
                let Some(level) = world.resource(robot, &ResourceKey::Battery) else {
                    return Ok(Vec::new());
                };
                let elapsed = self.charge_elapsed(robot, dispatch.clock);
                Ok(vec![Effect::SetResource {
                    entity: robot.clone(),
                    key: ResourceKey::Battery,
                    value: self.charged_level(level, elapsed),
                }])
            }
        }
    }

    fn describe_transition(
        &self,
        action: &RobotAction,
        dispatch: &Dispatch<'_>,
        world: &WorldModel,
    ) -> Transition {
        let verb = dispatch.timed.name.as_str();
        match action {
            RobotAction::Move { robot, from, to } => Transition::new(
                verb,
                Some(robot),
                TransitionKind::Move,
                Endpoint::Entity(from.clone()),
                Endpoint::Entity(to.clone()),
                Completion::Elapsed {
                    duration: dispatch.duration_or(self.default_duration),
                },
            ),
            RobotAction::Pick { ball, room, robot } => Transition::new(
                verb,
                Some(ball),
                TransitionKind::Attach,
                Endpoint::Entity(room.clone()),
                Endpoint::Entity(robot.clone()),
                Completion::Elapsed {
                    duration: dispatch.duration_or(self.default_duration),
                },
            ),
            RobotAction::Drop { ball, room, robot } => Transition::new(
                verb,
                Some(ball),
                TransitionKind::Detach,
                Endpoint::Entity(robot.clone()),
                Endpoint::Entity(room.clone()),
                Completion::Elapsed {
                    duration: dispatch.duration_or(self.default_duration),
                },
            ),
            RobotAction::Travel {
                robot,
                from,
                to,
                resume,
            } => {
                let plan = self.plan_route(world, robot, from, to, *resume);
                let to_state = if plan.arrives() {
                    Endpoint::Entity(to.clone())
                } else {
                    Endpoint::Between {
                        from: from.clone(),
                        to: to.clone(),
                        fraction: if plan.length > 0.0 {
                            plan.travelled / plan.length
                        } else {
                            0.0
                        },
                    }
                };
                Transition::new(
                    verb,
                    Some(robot),
                    TransitionKind::Move,
                    Endpoint::Entity(from.clone()),
                    to_state,
                    Completion::Distance {
                        threshold: plan.travelled,
                        speed: self.params.move_speed,
                    },
                )
            }
            RobotAction::StartCharge { robot } => {
                let level = world.resource(robot, &ResourceKey::Battery).unwrap_or(0.0);
                Transition::new(
                    verb,
                    Some(robot),
                    TransitionKind::Marker,
                    Endpoint::Level(level),
                    Endpoint::Level(level),
                    Completion::Elapsed {
                        duration: dispatch.timed.duration,
                    },
                )
            }
            RobotAction::StopCharge { robot } => {
                let level = world.resource(robot, &ResourceKey::Battery);
                let before = level.unwrap_or(self.params.battery_capacity);
                let elapsed = self.charge_elapsed(robot, dispatch.clock);
                let after = level
                    .map(|level| self.charged_level(level, elapsed))
                    .unwrap_or(before);
                Transition::new(
                    verb,
                    Some(robot),
                    TransitionKind::ConsumeResource,
                    Endpoint::Level(before),
                    Endpoint::Level(after),
                    Completion::Elapsed {
                        duration: dispatch.timed.duration,
                    },
                )
            }
        }
    }

    fn on_committed(
        &mut self,
        action: &RobotAction,
        dispatch: &Dispatch<'_>,
        world: &WorldModel,
    ) -> Vec<PhaseChange> {
        match action {
            RobotAction::Travel { robot, to, .. } => {
                let arrived = world.holds(&Relation::new(RelationKind::At, robot, to));
                let changes = self.transition_phase(robot, RobotPhase::Moving);
                let state = self.robots.entry(robot.clone()).or_default();
                state.landing = Some(if arrived {
                    RobotPhase::Arrived
                } else {
                    RobotPhase::BatteryDead
                });
                changes
            }
            RobotAction::StartCharge { robot } => {
                let changes = self.transition_phase(robot, RobotPhase::Charging);
                let state = self.robots.entry(robot.clone()).or_default();
                state.charge_started = Some(dispatch.clock);
                changes
            }
            RobotAction::StopCharge { robot } => {
                let changes = self.transition_phase(robot, RobotPhase::Idle);
                let state = self.robots.entry(robot.clone()).or_default();
                state.charge_started = None;
                changes
            }
            _ => Vec::new(),
        }
    }

    fn on_finished(&mut self, action: &RobotAction) -> Vec<PhaseChange> {
        let RobotAction::Travel { robot, .. } = action else {
            return Vec::new();
        };
        let landing = self
            .robots
            .get_mut(robot)
            .and_then(|state| state.landing.take());
        match landing {
            Some(phase) => self.transition_phase(robot, phase),
            None => Vec::new(),
        }
    }

    fn settle(&mut self) -> Vec<PhaseChange> {
        let pending = self
            .robots
            .iter_mut()
            .filter_map(|(robot, state)| state.landing.take().map(|phase| (robot.clone(), phase)))
            .collect::<Vec<_>>();
        pending
            .into_iter()
            .flat_map(|(robot, phase)| self.transition_phase(&robot, phase))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::context::{DomainSelection, DomainVariant};
    use crate::domain::{Applied, DomainActionTable, Rejection};
    use crate::problem::ProblemModel;

    fn id(raw: &str) -> EntityId {
        EntityId::new(raw)
    }

    fn timed(line: &str) -> TimedAction {
        let mut parts = line.split_whitespace();
        let name = parts.next().expect("verb").to_string();
        TimedAction {
            start_time: 0.0,
            duration: 0.0,
            name,
            args: parts.map(EntityId::new).collect(),
            line: 1,
        }
    }

    fn rooms(battery: Option<f64>, gripper: bool) -> ProblemModel {
        let mut problem = ProblemModel::new("sweep", "robot");
        problem.add_object("r1", "robot");
        problem.add_object("room1", "room");
        problem.add_object("room2", "room");
        problem.add_object("ball1", "ball");
        problem.add_predicate("at-robby", &["r1", "room1"]);
        problem.add_predicate("at", &["ball1", "room1"]);
        problem.add_predicate("connected", &["room1", "room2"]);
        if gripper {
            problem.add_predicate("free", &["r1"]);
        }
        if let Some(level) = battery {
            problem.add_function("battery", &["r1"], level);
        }
        problem
    }

    fn setup(problem: &ProblemModel) -> (DomainActionTable, WorldModel) {
        let ctx = RunContext::new(
            "test",
            DomainSelection::new(DomainKind::Robot, DomainVariant::Event).expect("selection"),
            RunConfig::default(),
        );
        let mut world = WorldModel::from_problem(problem).expect("world");
        let mut table = DomainActionTable::new(&ctx);
        table.prepare(&mut world).expect("prepare");
        (table, world)
    }

    fn run_at(
        table: &mut DomainActionTable,
        world: &mut WorldModel,
        line: &str,
        clock: f64,
    ) -> Result<Applied, Rejection> {
        let action = timed(line);
        let decoded = table.decode(&action)?;
        table.dispatch(&decoded, &action, world, clock)
    }

    fn finish(table: &mut DomainActionTable, line: &str) -> Vec<PhaseChange> {
        let decoded = table.decode(&timed(line)).expect("decode");
        table.finish(&decoded)
    }

    fn battery(world: &WorldModel) -> f64 {
        world
            .resource(&id("r1"), &ResourceKey::Battery)
            .expect("battery")
    }

    #[test]
    fn missing_battery_is_filled_to_capacity() {
        let (table, world) = setup(&rooms(None, false));
        assert_eq!(battery(&world), 100.0);
        assert_eq!(table.robot_phase(&id("r1")), Some(RobotPhase::Idle));
    }

    #[test]
    fn full_route_drains_battery_and_arrives() {
        let (mut table, mut world) = setup(&rooms(Some(50.0), false));
        let applied =
            run_at(&mut table, &mut world, "startmove r1 room1 room2", 0.0).expect("move");

        // 5 units at speed 1 with drain 2 per time unit.
        assert_eq!(battery(&world), 40.0);
        assert_eq!(applied.transition.to_state, Endpoint::Entity(id("room2")));
        assert_eq!(applied.transition.nominal_duration, 5.0);
        assert_eq!(
            applied.phase_changes,
            vec![PhaseChange {
                robot: id("r1"),
                from: RobotPhase::Idle,
                to: RobotPhase::Moving,
            }]
        );

        let landed = finish(&mut table, "startmove r1 room1 room2");
        assert_eq!(landed[0].to, RobotPhase::Arrived);
        assert_eq!(world.query_relation(RelationKind::At, &id("r1")), Some(&id("room2")));
    }

    #[test]
    fn depleted_battery_stops_robot_part_way() {
        let (mut table, mut world) = setup(&rooms(Some(14.0), false));
        let applied =
            run_at(&mut table, &mut world, "startmove r1 room1 room2", 0.0).expect("move");

        assert_eq!(battery(&world), 10.0);
        assert_eq!(
            applied.transition.to_state,
            Endpoint::Between {
                from: id("room1"),
                to: id("room2"),
                fraction: 0.4,
            }
        );
        assert_eq!(world.query_relation(RelationKind::At, &id("r1")), Some(&id("room1")));
        assert_eq!(
            world.resource(&id("r1"), &ResourceKey::Other(ROUTE_REMAINING.to_string())),
            Some(3.0)
        );

        finish(&mut table, "startmove r1 room1 room2");
        assert_eq!(table.robot_phase(&id("r1")), Some(RobotPhase::BatteryDead));

        let err = run_at(&mut table, &mut world, "reprisemovement r1 room1 room2", 3.0)
            .expect_err("dead robots do not move");
        assert!(err.to_string().contains("battery_dead"), "{err}");
    }

    #[test]
    fn charging_revives_robot_and_resumes_route() {
        let (mut table, mut world) = setup(&rooms(Some(14.0), false));
        run_at(&mut table, &mut world, "startmove r1 room1 room2", 0.0).expect("move");
        finish(&mut table, "startmove r1 room1 room2");

        run_at(&mut table, &mut world, "startcharge r1", 2.0).expect("start charge");
        assert_eq!(table.robot_phase(&id("r1")), Some(RobotPhase::Charging));
        let stop = run_at(&mut table, &mut world, "stopcharge r1", 12.0).expect("stop charge");

        let expected = 100.0 - 90.0 * (-0.2f64 * 10.0).exp();
        assert!((battery(&world) - expected).abs() < 1e-9);
        assert_eq!(stop.transition.kind, TransitionKind::ConsumeResource);
        assert_eq!(table.robot_phase(&id("r1")), Some(RobotPhase::Idle));

        let resumed = run_at(&mut table, &mut world, "reprisemovement r1 room1 room2", 12.0)
            .expect("resume");
        assert_eq!(resumed.transition.nominal_duration, 3.0);
        assert!((battery(&world) - (expected - 6.0)).abs() < 1e-9);
        assert_eq!(world.query_relation(RelationKind::At, &id("r1")), Some(&id("room2")));
    }

    #[test]
    fn stopcharge_requires_charging() {
        let (mut table, mut world) = setup(&rooms(Some(50.0), false));
        let err = run_at(&mut table, &mut world, "stopcharge r1", 1.0).expect_err("not charging");
        assert!(matches!(
            err,
            Rejection::ConstraintViolation(ConstraintViolation::Precondition(_))
        ));
        assert_eq!(battery(&world), 50.0);
    }

    #[test]
    fn low_battery_rejects_new_moves() {
        let (mut table, mut world) = setup(&rooms(Some(10.0), false));
        let err = run_at(&mut table, &mut world, "move r1 room1 room2", 0.0).expect_err("flat");
        assert!(matches!(
            err,
            Rejection::ConstraintViolation(ConstraintViolation::InsufficientResource { .. })
        ));
    }

    #[test]
    fn settle_lands_in_flight_robots() {
        let (mut table, mut world) = setup(&rooms(Some(50.0), false));
        run_at(&mut table, &mut world, "startmove r1 room1 room2", 0.0).expect("move");

        let changes = table.settle();
        assert_eq!(changes.len(), 1);
        assert_eq!(table.robot_phase(&id("r1")), Some(RobotPhase::Arrived));
        assert!(table.settle().is_empty());
    }

    #[test]
    fn gripper_is_required_and_restored() {
        let (mut table, mut world) = setup(&rooms(None, true));
        run_at(&mut table, &mut world, "pick ball1 room1 r1", 0.0).expect("pick");
        let free = Fact::new(FREE, &[&id("r1")]);
        assert!(!world.has_fact(&free));

        run_at(&mut table, &mut world, "move r1 room1 room2", 1.0).expect("move");
        let drop = run_at(&mut table, &mut world, "drop ball1 room2 r1", 2.0).expect("drop");
        assert_eq!(drop.transition.kind, TransitionKind::Detach);
        assert!(world.has_fact(&free));
        assert_eq!(world.query_relation(RelationKind::At, &id("ball1")), Some(&id("room2")));
    }

    #[test]
    fn pick_needs_free_gripper() {
        let mut problem = rooms(None, true);
        problem.add_object("ball2", "ball");
        problem.add_predicate("at", &["ball2", "room1"]);
        let (mut table, mut world) = setup(&problem);
        run_at(&mut table, &mut world, "pick ball1 room1 r1", 0.0).expect("first pick");

        let err = run_at(&mut table, &mut world, "pick ball2 room1 r1", 1.0).expect_err("busy");
        assert!(matches!(
            err,
            Rejection::ConstraintViolation(ConstraintViolation::MissingFact(_))
        ));
        assert_eq!(world.query_relation(RelationKind::At, &id("ball2")), Some(&id("room1")));
    }

    #[test]
    fn moves_follow_connections() {
        let mut problem = rooms(None, false);
        problem.add_object("room3", "room");
        let (mut table, mut world) = setup(&problem);
        assert!(run_at(&mut table, &mut world, "move r1 room1 room3", 0.0).is_err());
        run_at(&mut table, &mut world, "move r1 room1 room2", 0.0).expect("connected");
        run_at(&mut table, &mut world, "move r1 room2 room1", 1.0).expect("either direction");
    }
}
