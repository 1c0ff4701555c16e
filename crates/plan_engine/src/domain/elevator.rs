use std::collections::BTreeMap;

use crate::config::ElevatorParams;
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    fn step(self) -> i64 {
        match self {
            Self::Up => 1,
            Self::Down => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElevatorAction {
    /// `move-up e from to` or the numeric form `move-up e`.
    Move {
        direction: Direction,
        elevator: EntityId,
        floors: Option<(EntityId, EntityId)>,
    },
    Load {
        person: EntityId,
        elevator: EntityId,
        floor: Option<EntityId>,
    },
    Unload {
        person: EntityId,
        elevator: EntityId,
        floor: Option<EntityId>,
    },
    Reached {
        person: EntityId,
        floor: EntityId,
    },
}

#[derive(Debug, Clone)]
pub struct ElevatorHandler {
    params: ElevatorParams,
    default_duration: f64,
    /// Floors ordered bottom to top along the `above` relation.
    floor_order: Vec<EntityId>,
}

impl ElevatorHandler {
    pub fn new(ctx: &RunContext) -> Self {
        Self {
            params: ctx.config.elevator.clone(),
            default_duration: ctx.config.default_action_duration,
            floor_order: Vec::new(),
        }
    }

    pub fn floor_order(&self) -> &[EntityId] {
        &self.floor_order
    }

    pub(crate) fn prepare(&mut self, world: &WorldModel) -> Vec<Effect> {
        self.floor_order = order_floors(world);

        let mut effects = Vec::new();
        for elevator in world.entities_of_kind(&EntityKind::Elevator) {
            if world.resource(elevator, &ResourceKey::Capacity).is_some()
                && world.resource(elevator, &ResourceKey::Passengers).is_none()
            {
                effects.push(Effect::SetResource {
                    entity: elevator.clone(),
                    key: ResourceKey::Passengers,
                    value: 0.0,
                });
            }
            if world.resource(elevator, &ResourceKey::MaxLoad).is_some()
                && world.resource(elevator, &ResourceKey::Load).is_none()
            {
                effects.push(Effect::SetResource {
                    entity: elevator.clone(),
                    key: ResourceKey::Load,
                    value: 0.0,
                });
            }
        }
        effects
    }

    fn floor_index(&self, floor: &EntityId) -> Option<usize> {
        self.floor_order.iter().position(|candidate| candidate == floor)
    }

    /// Floor the elevator is at, from its `at` relation or its numeric floor index.
    fn elevator_floor(&self, world: &WorldModel, elevator: &EntityId) -> Option<EntityId> {
        if let Some(floor) = world.query_relation(RelationKind::At, elevator) {
            return Some(floor.clone());
        }
        let index = world.resource(elevator, &ResourceKey::FloorIndex)?;
        if index < 0.0 {
            return None;
        }
        self.floor_order.get(index as usize).cloned()
    }

    fn current_index(&self, world: &WorldModel, elevator: &EntityId) -> Option<i64> {
        if let Some(index) = world.resource(elevator, &ResourceKey::FloorIndex) {
            return Some(index.round() as i64);
        }
        let floor = world.query_relation(RelationKind::At, elevator)?;
        self.floor_index(floor).map(|index| index as i64)
    }

    /// Travel speed under the current load.
    fn effective_speed(&self, world: &WorldModel, elevator: &EntityId) -> f64 {
        let load = world.resource(elevator, &ResourceKey::Load).unwrap_or(0.0);
        let ratio = match world.resource(elevator, &ResourceKey::MaxLoad) {
            Some(max_load) if max_load > 0.0 => (load / max_load).clamp(0.0, 1.0),
            _ => 0.0,
        };
        self.params.base_speed * (1.0 - self.params.load_slowdown * ratio)
    }

    fn floors_crossed(&self, from: &EntityId, to: &EntityId) -> f64 {
        match (self.floor_index(from), self.floor_index(to)) {
            (Some(a), Some(b)) if a != b => a.abs_diff(b) as f64,
            _ => 1.0,
        }
    }

    fn validate_move(
        &self,
        direction: Direction,
        elevator: &EntityId,
        floors: Option<&(EntityId, EntityId)>,
        world: &WorldModel,
    ) -> Result<Vec<Effect>, ConstraintViolation> {
        let mut effects = Vec::new();
        let target_index = match floors {
            Some((from, to)) => {
                if let Some(current) = world.query_relation(RelationKind::At, elevator) {
                    if current != from {
                        return Err(ConstraintViolation::Precondition(format!(
                            "{elevator} is at {current}, not {from}"
                        )));
                    }
                }
                let (upper, lower) = match direction {
                    Direction::Up => (to, from),
                    Direction::Down => (from, to),
                };
                let is_above = match (self.floor_index(upper), self.floor_index(lower)) {
                    (Some(upper_index), Some(lower_index)) => upper_index > lower_index,
                    _ => world.holds(&Relation::new(RelationKind::Above, upper, lower)),
                };
                if world.has_relations(RelationKind::Above) && !is_above {
                    return Err(ConstraintViolation::Precondition(format!(
                        "{upper} is not above {lower}"
                    )));
                }
                effects.push(Effect::Relate(Relation::new(RelationKind::At, elevator, to)));
                self.floor_index(to).map(|index| index as i64)
            }
            None => {
                let current = self.current_index(world, elevator).ok_or_else(|| {
                    ConstraintViolation::Precondition(format!(
                        "cannot tell which floor {elevator} is on"
                    ))
                })?;
                let target = current + direction.step();
                let floor_count = world
                    .fluent(&ResourceKey::Other("floors".to_string()), &[])
                    .map(|count| count as i64)
                    .or_else(|| {
                        (!self.floor_order.is_empty()).then_some(self.floor_order.len() as i64)
                    });
                if target < 0 || floor_count.is_some_and(|count| target >= count) {
                    return Err(ConstraintViolation::Precondition(format!(
                        "{elevator} cannot move {direction:?} from floor index {current}"
                    )));
                }
                if world.query_relation(RelationKind::At, elevator).is_some() {
                    if let Some(floor) = self.floor_order.get(target as usize) {
                        effects.push(Effect::Relate(Relation::new(
                            RelationKind::At,
                            elevator,
                            floor,
                        )));
                    }
                }
                Some(target)
            }
        };

        if world.resource(elevator, &ResourceKey::FloorIndex).is_some() {
            if let Some(target) = target_index {
                effects.push(Effect::SetResource {
                    entity: elevator.clone(),
                    key: ResourceKey::FloorIndex,
                    value: target as f64,
                });
            }
        }
        Ok(effects)
    }

    fn validate_load(
        &self,
        person: &EntityId,
        elevator: &EntityId,
        floor: Option<&EntityId>,
        world: &WorldModel,
    ) -> Result<Vec<Effect>, ConstraintViolation> {
        let person_floor = world.query_relation(RelationKind::At, person).ok_or_else(|| {
            ConstraintViolation::Precondition(format!("{person} is not waiting at any floor"))
        })?;
        if let Some(floor) = floor {
            if person_floor != floor {
                return Err(ConstraintViolation::Precondition(format!(
                    "{person} is at {person_floor}, not {floor}"
                )));
            }
        }
        if let Some(elevator_floor) = self.elevator_floor(world, elevator) {
            if &elevator_floor != person_floor {
                return Err(ConstraintViolation::Precondition(format!(
                    "{elevator} is at {elevator_floor} but {person} waits at {person_floor}"
                )));
            }
        }

        let mut effects = vec![
            Effect::Unrelate(Relation::new(RelationKind::At, person, person_floor)),
            Effect::Relate(Relation::new(RelationKind::In, person, elevator)),
        ];

        if let Some(capacity) = world.resource(elevator, &ResourceKey::Capacity) {
            let passengers = world
                .resource(elevator, &ResourceKey::Passengers)
                .unwrap_or(0.0);
            if passengers + 1.0 > capacity {
                return Err(ConstraintViolation::ResourceExceeded {
                    entity: elevator.clone(),
                    key: ResourceKey::Passengers,
                    value: passengers + 1.0,
                    limit_key: ResourceKey::Capacity,
                    limit: capacity,
                });
            }
        }
        if world.resource(elevator, &ResourceKey::Passengers).is_some() {
            effects.push(Effect::AdjustResource {
                entity: elevator.clone(),
                key: ResourceKey::Passengers,
                delta: 1.0,
            });
        }

        if let Some(weight) = world.resource(person, &ResourceKey::Weight) {
            let load = world.resource(elevator, &ResourceKey::Load).unwrap_or(0.0);
            if let Some(max_load) = world.resource(elevator, &ResourceKey::MaxLoad) {
                if load + weight > max_load {
                    return Err(ConstraintViolation::ResourceExceeded {
                        entity: elevator.clone(),
                        key: ResourceKey::Load,
                        value: load + weight,
                        limit_key: ResourceKey::MaxLoad,
                        limit: max_load,
                    });
                }
            }
            if world.resource(elevator, &ResourceKey::Load).is_some() {
                effects.push(Effect::AdjustResource {
                    entity: elevator.clone(),
                    key: ResourceKey::Load,
                    delta: weight,
                });
            }
        }
        Ok(effects)
    }

    fn validate_unload(
        &self,
        person: &EntityId,
        elevator: &EntityId,
        floor: Option<&EntityId>,
        world: &WorldModel,
    ) -> Result<Vec<Effect>, ConstraintViolation> {
        let inside = Relation::new(RelationKind::In, person, elevator);
        if !world.holds(&inside) {
            return Err(ConstraintViolation::MissingRelation(inside));
        }
        let elevator_floor = self.elevator_floor(world, elevator);
        let drop_floor = match (floor, elevator_floor) {
            (Some(floor), Some(current)) if &current != floor => {
                return Err(ConstraintViolation::Precondition(format!(
                    "{elevator} is at {current}, not {floor}"
                )));
            }
            (Some(floor), _) => floor.clone(),
            (None, Some(current)) => current,
            (None, None) => {
                return Err(ConstraintViolation::Precondition(format!(
                    "cannot tell which floor {elevator} is on"
                )));
            }
        };

        let mut effects = vec![
            Effect::Unrelate(inside),
            Effect::Relate(Relation::new(RelationKind::At, person, &drop_floor)),
        ];
        if world.resource(elevator, &ResourceKey::Passengers).is_some() {
            effects.push(Effect::AdjustResource {
                entity: elevator.clone(),
                key: ResourceKey::Passengers,
                delta: -1.0,
            });
        }
        if let (Some(weight), Some(_)) = (
            world.resource(person, &ResourceKey::Weight),
            world.resource(elevator, &ResourceKey::Load),
        ) {
            effects.push(Effect::AdjustResource {
                entity: elevator.clone(),
                key: ResourceKey::Load,
                delta: -weight,
            });
        }
        Ok(effects)
    }
}

impl DomainHandler for ElevatorHandler {
    type Action = ElevatorAction;

    fn decode(&self, action: &TimedAction) -> Result<ElevatorAction, DecodeError> {
        let args = &action.args;
        match action.name.as_str() {
            "move-up" | "move-down" | "up" | "down" => {
                expect_arity(action, &[1, 3], "1 or 3")?;
                let direction = if action.name.ends_with("up") {
                    Direction::Up
                } else {
                    Direction::Down
                };
                let floors = (args.len() == 3).then(|| (args[1].clone(), args[2].clone()));
                Ok(ElevatorAction::Move {
                    direction,
                    elevator: args[0].clone(),
                    floors,
                })
            }
            "load" | "board" => {
                expect_arity(action, &[2, 3], "2 or 3")?;
                Ok(ElevatorAction::Load {
                    person: args[0].clone(),
                    elevator: args[1].clone(),
                    floor: args.get(2).cloned(),
                })
            }
            "unload" | "depart" => {
                expect_arity(action, &[2, 3], "2 or 3")?;
                Ok(ElevatorAction::Unload {
                    person: args[0].clone(),
                    elevator: args[1].clone(),
                    floor: args.get(2).cloned(),
                })
            }
            "reached" => {
                expect_arity(action, &[2], "2")?;
                Ok(ElevatorAction::Reached {
                    person: args[0].clone(),
                    floor: args[1].clone(),
                })
            }
            other => Err(DecodeError::UnknownVerb {
                domain: DomainKind::Elevator,
                verb: other.to_string(),
            }),
        }
    }

    fn referenced<'a>(&self, action: &'a ElevatorAction) -> Vec<&'a EntityId> {
        match action {
            ElevatorAction::Move {
                elevator, floors, ..
            } => {
                let mut ids = vec![elevator];
                if let Some((from, to)) = floors {
                    ids.push(from);
                    ids.push(to);
                }
                ids
            }
            ElevatorAction::Load {
                person,
                elevator,
                floor,
            }
            | ElevatorAction::Unload {
                person,
                elevator,
                floor,
            } => {
                let mut ids = vec![person, elevator];
                ids.extend(floor.iter());
                ids
            }
            ElevatorAction::Reached { person, floor } => vec![person, floor],
        }
    }

    fn validate(
        &self,
        action: &ElevatorAction,
        _dispatch: &Dispatch<'_>,
        world: &WorldModel,
    ) -> Result<Vec<Effect>, ConstraintViolation> {
        match action {
            ElevatorAction::Move {
                direction,
                elevator,
                floors,
            } => self.validate_move(*direction, elevator, floors.as_ref(), world),
            ElevatorAction::Load {
                person,
                elevator,
                floor,
            } => self.validate_load(person, elevator, floor.as_ref(), world),
            ElevatorAction::Unload {
                person,
                elevator,
                floor,
            } => self.validate_unload(person, elevator, floor.as_ref(), world),
            ElevatorAction::Reached { person, floor } => {
                let at_floor = Relation::new(RelationKind::At, person, floor);
                if !world.holds(&at_floor) {
                    return Err(ConstraintViolation::MissingRelation(at_floor));
                }
                let reached = Fact::new("reached", &[person, floor]);
                if world.has_fact(&reached) {
                    return Ok(Vec::new());
                }
                Ok(vec![Effect::AssertFact(reached)])
            }
        }
    }

    fn describe_transition(
        &self,
        action: &ElevatorAction,
        dispatch: &Dispatch<'_>,
        world: &WorldModel,
    ) -> Transition {
        let verb = dispatch.timed.name.as_str();
        match action {
            ElevatorAction::Move {
                direction,
                elevator,
                floors,
            } => {
                let (from_state, to_state, crossed) = match floors {
                    Some((from, to)) => (
                        Endpoint::Entity(from.clone()),
                        Endpoint::Entity(to.clone()),
                        self.floors_crossed(from, to),
                    ),
                    None => {
                        let current = self.current_index(world, elevator).unwrap_or(0);
                        let target = current + direction.step();
                        (
                            Endpoint::Level(current as f64),
                            Endpoint::Level(target as f64),
                            1.0,
                        )
                    }
                };
                let completion = if dispatch.timed.duration > 0.0 {
                    Completion::Elapsed {
                        duration: dispatch.timed.duration,
                    }
                } else {
                    Completion::Distance {
                        threshold: crossed * self.params.distance_per_floor,
                        speed: self.effective_speed(world, elevator),
                    }
                };
                Transition::new(
                    verb,
                    Some(elevator),
                    TransitionKind::Move,
                    from_state,
                    to_state,
                    completion,
                )
            }
            ElevatorAction::Load {
                person, elevator, ..
            } => {
                let from = world
                    .query_relation(RelationKind::At, person)
                    .cloned()
                    .map(Endpoint::Entity)
                    .unwrap_or(Endpoint::Nowhere);
                Transition::new(
                    verb,
                    Some(person),
                    TransitionKind::Attach,
                    from,
                    Endpoint::Entity(elevator.clone()),
                    Completion::Elapsed {
                        duration: dispatch.duration_or(self.default_duration),
                    },
                )
            }
            ElevatorAction::Unload {
                person,
                elevator,
                floor,
            } => {
                let to = floor
                    .clone()
                    .or_else(|| self.elevator_floor(world, elevator))
                    .map(Endpoint::Entity)
                    .unwrap_or(Endpoint::Nowhere);
                Transition::new(
                    verb,
                    Some(person),
                    TransitionKind::Detach,
                    Endpoint::Entity(elevator.clone()),
                    to,
                    Completion::Elapsed {
                        duration: dispatch.duration_or(self.default_duration),
                    },
                )
            }
            ElevatorAction::Reached { person, floor } => Transition::new(
                verb,
                Some(person),
                TransitionKind::Marker,
                Endpoint::Entity(floor.clone()),
                Endpoint::Entity(floor.clone()),
                Completion::Elapsed {
                    duration: dispatch.timed.duration,
                },
            ),
        }
    }
}

/// Orders floors bottom to top by how many floors lie below each along `above`.
fn order_floors(world: &WorldModel) -> Vec<EntityId> {
    let mut below: BTreeMap<EntityId, Vec<EntityId>> = BTreeMap::new();
    for floor in world.entities_of_kind(&EntityKind::Floor) {
        below.entry(floor.clone()).or_default();
    }
    for relation in world.relations() {
        if relation.kind == RelationKind::Above {
            below
                .entry(relation.subject.clone())
                .or_default()
                .push(relation.object.clone());
            below.entry(relation.object.clone()).or_default();
        }
    }

    let mut heights = BTreeMap::new();
    for floor in below.keys() {
        height_of(floor, &below, &mut heights, 0);
    }
    let mut order = below.keys().cloned().collect::<Vec<_>>();
    order.sort_by(|a, b| {
        let height_a = heights.get(a).copied().unwrap_or(0);
        let height_b = heights.get(b).copied().unwrap_or(0);
        height_a.cmp(&height_b).then_with(|| a.cmp(b))
    });
    order
}

fn height_of(
    floor: &EntityId,
    below: &BTreeMap<EntityId, Vec<EntityId>>,
    heights: &mut BTreeMap<EntityId, usize>,
    depth: usize,
) -> usize {
    if let Some(height) = heights.get(floor) {
        return *height;
    }
    // A cyclic `above` chain cannot be ordered; cap the walk at the floor count.
    if depth > below.len() {
        return 0;
    }
    let height = below
        .get(floor)
        .map(|lower| {
            lower
                .iter()
                .map(|next| height_of(next, below, heights, depth + 1) + 1)
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);
    heights.insert(floor.clone(), height);
    height
}
