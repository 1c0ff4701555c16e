use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use crate::problem::ProblemModel;

use super::entity::{Entity, EntityId, EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RelationKind {
    At,
    In,
    Carries,
    Above,
    Connected,
    Target,
}

impl RelationKind {
    /// Maps a binary PDDL predicate onto a tracked relation. Predicates that do not
    /// map are kept as plain facts.
    pub fn from_predicate(name: &str) -> Option<Self> {
        match name {
            "at" | "at-person" | "at-elevator" | "at-robby" | "lift-at" => Some(Self::At),
            "in" => Some(Self::In),
            "carry" | "carries" => Some(Self::Carries),
            "above" => Some(Self::Above),
            "connected" | "link" => Some(Self::Connected),
            "target" | "destin" => Some(Self::Target),
            _ => None,
        }
    }

    /// Functional kinds relate a subject to at most one object.
    pub fn is_functional(self) -> bool {
        matches!(self, Self::At | Self::In | Self::Target)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::At => "at",
            Self::In => "in",
            Self::Carries => "carries",
            Self::Above => "above",
            Self::Connected => "connected",
            Self::Target => "target",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Relation {
    pub kind: RelationKind,
    pub subject: EntityId,
    pub object: EntityId,
}

impl Relation {
    pub fn new(kind: RelationKind, subject: &EntityId, object: &EntityId) -> Self {
        Self {
            kind,
            subject: subject.clone(),
            object: object.clone(),
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {})", self.kind, self.subject, self.object)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKey {
    Capacity,
    MaxLoad,
    Load,
    Passengers,
    Weight,
    Fuel,
    Battery,
    FloorIndex,
    Distance,
    Other(String),
}

impl ResourceKey {
    pub fn from_function_name(name: &str) -> Self {
        let lowered = name.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "capacity" => Self::Capacity,
            "max-load" | "max_load" => Self::MaxLoad,
            "load" | "current-load" => Self::Load,
            "passengers" => Self::Passengers,
            "weight" => Self::Weight,
            "fuel" | "fuel-level" => Self::Fuel,
            "battery" | "battery-level" => Self::Battery,
            "floor-index" | "floor" => Self::FloorIndex,
            "distance" => Self::Distance,
            _ => Self::Other(lowered),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Capacity => "capacity",
            Self::MaxLoad => "max-load",
            Self::Load => "load",
            Self::Passengers => "passengers",
            Self::Weight => "weight",
            Self::Fuel => "fuel",
            Self::Battery => "battery",
            Self::FloorIndex => "floor-index",
            Self::Distance => "distance",
            Self::Other(name) => name,
        }
    }

    fn must_be_non_negative(&self) -> bool {
        matches!(
            self,
            Self::Fuel | Self::Battery | Self::Load | Self::Passengers
        )
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A ground predicate with no relation mapping, e.g. `(free r1)` or `(in-city l1 c1)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fact {
    pub name: String,
    pub args: Vec<EntityId>,
}

impl Fact {
    pub fn new(name: &str, args: &[&EntityId]) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            args: args.iter().map(|id| (*id).clone()).collect(),
        }
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.name)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        f.write_str(")")
    }
}

/// Where an entity currently is, derived from the placing relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    At(EntityId),
    In(EntityId),
    CarriedBy(EntityId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Adds a relation. For functional kinds any previous object of the subject is replaced.
    Relate(Relation),
    /// Removes a relation that must currently hold.
    Unrelate(Relation),
    SetResource {
        entity: EntityId,
        key: ResourceKey,
        value: f64,
    },
    AdjustResource {
        entity: EntityId,
        key: ResourceKey,
        delta: f64,
    },
    SetFluent {
        key: ResourceKey,
        args: Vec<EntityId>,
        value: f64,
    },
    AssertFact(Fact),
    RetractFact(Fact),
}

impl Effect {
    fn touched(&self) -> Vec<&EntityId> {
        match self {
            Self::Relate(relation) | Self::Unrelate(relation) => {
                vec![&relation.subject, &relation.object]
            }
            Self::SetResource { entity, .. } | Self::AdjustResource { entity, .. } => {
                vec![entity]
            }
            Self::SetFluent { args, .. } => args.iter().collect(),
            Self::AssertFact(fact) | Self::RetractFact(fact) => fact.args.iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstraintViolation {
    #[error("unknown entity '{0}'")]
    UnknownEntity(EntityId),
    #[error("relation {0} does not hold")]
    MissingRelation(Relation),
    #[error("fact {0} does not hold")]
    MissingFact(Fact),
    #[error("{entity} would be placed {count} times at once")]
    MultiplePlacements { entity: EntityId, count: usize },
    #[error("{entity} would have {count} '{kind}' objects (expected at most one)")]
    FunctionalRelation {
        entity: EntityId,
        kind: RelationKind,
        count: usize,
    },
    #[error("{key} of {entity} would be {value}, above {limit_key} {limit}")]
    ResourceExceeded {
        entity: EntityId,
        key: ResourceKey,
        value: f64,
        limit_key: ResourceKey,
        limit: f64,
    },
    #[error("{key} of {entity} would be negative ({value})")]
    NegativeResource {
        entity: EntityId,
        key: ResourceKey,
        value: f64,
    },
    #[error("{entity} needs {key} {required}, has {available}")]
    InsufficientResource {
        entity: EntityId,
        key: ResourceKey,
        required: f64,
        available: f64,
    },
    #[error("{key} of {entity} is not set")]
    MissingResource { entity: EntityId, key: ResourceKey },
    #[error("{key} {args:?} would not be a finite number")]
    NonFinite {
        key: ResourceKey,
        args: Vec<EntityId>,
    },
    #[error("{0}")]
    Precondition(String),
}

#[derive(Debug, Error)]
pub enum WorldInitError {
    #[error("initial state is inconsistent: {0}")]
    Inconsistent(#[source] ConstraintViolation),
    #[error("function assignment '{name}' for {args:?} is not a finite number")]
    NonFiniteAssignment { name: String, args: Vec<String> },
}

#[derive(Debug, Clone, Default)]
struct WorldState {
    relations: BTreeSet<Relation>,
    facts: BTreeSet<Fact>,
    fluents: BTreeMap<(ResourceKey, Vec<EntityId>), f64>,
}

impl WorldState {
    fn apply(&mut self, effect: &Effect) -> Result<(), ConstraintViolation> {
        match effect {
            Effect::Relate(relation) => {
                if relation.kind.is_functional() {
                    self.relations.retain(|existing| {
                        !(existing.kind == relation.kind && existing.subject == relation.subject)
                    });
                }
                self.relations.insert(relation.clone());
            }
            Effect::Unrelate(relation) => {
                if !self.relations.remove(relation) {
                    return Err(ConstraintViolation::MissingRelation(relation.clone()));
                }
            }
            Effect::SetResource { entity, key, value } => {
                self.fluents
                    .insert((key.clone(), vec![entity.clone()]), *value);
            }
            Effect::AdjustResource { entity, key, delta } => {
                let slot = (key.clone(), vec![entity.clone()]);
                let current = self.fluents.get(&slot).copied().ok_or_else(|| {
                    ConstraintViolation::MissingResource {
                        entity: entity.clone(),
                        key: key.clone(),
                    }
                })?;
                self.fluents.insert(slot, current + delta);
            }
            Effect::SetFluent { key, args, value } => {
                self.fluents.insert((key.clone(), args.clone()), *value);
            }
            Effect::AssertFact(fact) => {
                self.facts.insert(fact.clone());
            }
            Effect::RetractFact(fact) => {
                if !self.facts.remove(fact) {
                    return Err(ConstraintViolation::MissingFact(fact.clone()));
                }
            }
        }
        Ok(())
    }

    fn resource(&self, entity: &EntityId, key: &ResourceKey) -> Option<f64> {
        self.fluents
            .get(&(key.clone(), vec![entity.clone()]))
            .copied()
    }
}

/// Entities, relations, facts and numeric fluents of one run.
///
/// Every mutation goes through [`WorldModel::apply_effects`]: the batch is staged on a
/// copy, invariants are checked on the entities it touched, and only then is it
/// committed. A rejected batch leaves the model unchanged.
#[derive(Debug, Clone, Default)]
pub struct WorldModel {
    entities: BTreeMap<EntityId, EntityKind>,
    state: WorldState,
}

impl WorldModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the initial world from a composed problem. Declared objects exist even
    /// when no predicate mentions them.
    pub fn from_problem(problem: &ProblemModel) -> Result<Self, WorldInitError> {
        let mut world = Self::new();
        for object in problem.objects() {
            let kind = EntityKind::from_type_name(&object.type_name);
            world.declare(EntityId::new(&object.name), kind);
        }

        let mut effects = Vec::new();
        for predicate in problem.predicates() {
            let args = predicate
                .args
                .iter()
                .map(|arg| world.ensure_declared(arg))
                .collect::<Vec<_>>();
            let name = predicate.name.to_ascii_lowercase();
            match (RelationKind::from_predicate(&name), args.as_slice()) {
                (Some(kind), [subject, object]) => {
                    effects.push(Effect::Relate(Relation::new(kind, subject, object)));
                }
                _ => effects.push(Effect::AssertFact(Fact { name, args })),
            }
        }

        for function in problem.functions() {
            if !function.value.is_finite() {
                return Err(WorldInitError::NonFiniteAssignment {
                    name: function.name.clone(),
                    args: function.args.clone(),
                });
            }
            let args = function
                .args
                .iter()
                .map(|arg| world.ensure_declared(arg))
                .collect::<Vec<_>>();
            effects.push(Effect::SetFluent {
                key: ResourceKey::from_function_name(&function.name),
                args,
                value: function.value,
            });
        }

        world
            .apply_effects(&effects)
            .map_err(WorldInitError::Inconsistent)?;
        debug!(
            entity_count = world.entities.len(),
            relation_count = world.state.relations.len(),
            fact_count = world.state.facts.len(),
            fluent_count = world.state.fluents.len(),
            "world_initialized"
        );
        Ok(world)
    }

    pub fn declare(&mut self, id: EntityId, kind: EntityKind) {
        self.entities.insert(id, kind);
    }

    fn ensure_declared(&mut self, raw: &str) -> EntityId {
        let id = EntityId::new(raw);
        if !self.entities.contains_key(&id) {
            warn!(entity = %id, "undeclared_entity_registered");
            self.entities
                .insert(id.clone(), EntityKind::Other("object".to_string()));
        }
        id
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn kind_of(&self, id: &EntityId) -> Option<&EntityKind> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter().map(|(id, kind)| Entity {
            id: id.clone(),
            kind: kind.clone(),
        })
    }

    pub fn entities_of_kind<'a>(
        &'a self,
        kind: &'a EntityKind,
    ) -> impl Iterator<Item = &'a EntityId> + 'a {
        self.entities
            .iter()
            .filter(move |(_, entity_kind)| *entity_kind == kind)
            .map(|(id, _)| id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// First object related to `subject` by `kind`.
    pub fn query_relation<'a>(&'a self, kind: RelationKind, subject: &'a EntityId) -> Option<&'a EntityId> {
        self.related(kind, subject).next()
    }

    pub fn related<'a>(
        &'a self,
        kind: RelationKind,
        subject: &'a EntityId,
    ) -> impl Iterator<Item = &'a EntityId> + 'a {
        self.state
            .relations
            .iter()
            .filter(move |relation| relation.kind == kind && relation.subject == *subject)
            .map(|relation| &relation.object)
    }

    /// Subjects related to `object` by `kind`, e.g. everything `in` a truck.
    pub fn subjects_of<'a>(
        &'a self,
        kind: RelationKind,
        object: &'a EntityId,
    ) -> impl Iterator<Item = &'a EntityId> + 'a {
        self.state
            .relations
            .iter()
            .filter(move |relation| relation.kind == kind && relation.object == *object)
            .map(|relation| &relation.subject)
    }

    pub fn holds(&self, relation: &Relation) -> bool {
        self.state.relations.contains(relation)
    }

    pub fn has_relations(&self, kind: RelationKind) -> bool {
        self.state.relations.iter().any(|relation| relation.kind == kind)
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.state.relations.iter()
    }

    pub fn placement(&self, entity: &EntityId) -> Option<Placement> {
        if let Some(place) = self.query_relation(RelationKind::At, entity) {
            return Some(Placement::At(place.clone()));
        }
        if let Some(container) = self.query_relation(RelationKind::In, entity) {
            return Some(Placement::In(container.clone()));
        }
        self.subjects_of(RelationKind::Carries, entity)
            .next()
            .map(|carrier| Placement::CarriedBy(carrier.clone()))
    }

    pub fn has_fact(&self, fact: &Fact) -> bool {
        self.state.facts.contains(fact)
    }

    pub fn has_facts_named(&self, name: &str) -> bool {
        self.state.facts.iter().any(|fact| fact.name == name)
    }

    pub fn facts(&self) -> impl Iterator<Item = &Fact> {
        self.state.facts.iter()
    }

    pub fn resource(&self, entity: &EntityId, key: &ResourceKey) -> Option<f64> {
        self.state.resource(entity, key)
    }

    pub fn fluent(&self, key: &ResourceKey, args: &[EntityId]) -> Option<f64> {
        self.state.fluents.get(&(key.clone(), args.to_vec())).copied()
    }

    pub fn set_resource(
        &mut self,
        entity: &EntityId,
        key: ResourceKey,
        value: f64,
    ) -> Result<(), ConstraintViolation> {
        self.apply_effect(Effect::SetResource {
            entity: entity.clone(),
            key,
            value,
        })
    }

    pub fn apply_effect(&mut self, effect: Effect) -> Result<(), ConstraintViolation> {
        self.apply_effects(std::slice::from_ref(&effect))
    }

    /// Applies a batch atomically: either every effect commits or none does.
    pub fn apply_effects(&mut self, effects: &[Effect]) -> Result<(), ConstraintViolation> {
        let mut touched = BTreeSet::new();
        for effect in effects {
            for id in effect.touched() {
                if !self.entities.contains_key(id) {
                    return Err(ConstraintViolation::UnknownEntity(id.clone()));
                }
                touched.insert(id.clone());
            }
        }

        let mut staged = self.state.clone();
        for effect in effects {
            staged.apply(effect)?;
        }
        check_invariants(&staged, &touched)?;
        self.state = staged;
        Ok(())
    }
}

fn check_invariants(
    state: &WorldState,
    touched: &BTreeSet<EntityId>,
) -> Result<(), ConstraintViolation> {
    for entity in touched {
        let mut placements = 0usize;
        for kind in [RelationKind::At, RelationKind::In, RelationKind::Target] {
            let count = state
                .relations
                .iter()
                .filter(|relation| relation.kind == kind && relation.subject == *entity)
                .count();
            if count > 1 {
                return Err(ConstraintViolation::FunctionalRelation {
                    entity: entity.clone(),
                    kind,
                    count,
                });
            }
            if kind != RelationKind::Target {
                placements += count;
            }
        }
        placements += state
            .relations
            .iter()
            .filter(|relation| {
                relation.kind == RelationKind::Carries && relation.object == *entity
            })
            .count();
        if placements > 1 {
            return Err(ConstraintViolation::MultiplePlacements {
                entity: entity.clone(),
                count: placements,
            });
        }

        check_limit(state, entity, ResourceKey::Load, ResourceKey::MaxLoad)?;
        check_limit(state, entity, ResourceKey::Passengers, ResourceKey::Capacity)?;
    }

    for ((key, args), value) in &state.fluents {
        if !args.iter().any(|arg| touched.contains(arg)) && !args.is_empty() {
            continue;
        }
        if !value.is_finite() {
            return Err(ConstraintViolation::NonFinite {
                key: key.clone(),
                args: args.clone(),
            });
        }
        if key.must_be_non_negative() && *value < 0.0 {
            if let [entity] = args.as_slice() {
                return Err(ConstraintViolation::NegativeResource {
                    entity: entity.clone(),
                    key: key.clone(),
                    value: *value,
                });
            }
        }
    }
    Ok(())
}

fn check_limit(
    state: &WorldState,
    entity: &EntityId,
    key: ResourceKey,
    limit_key: ResourceKey,
) -> Result<(), ConstraintViolation> {
    let value = state.resource(entity, &key);
    let limit = state.resource(entity, &limit_key);
    let (Some(value), Some(limit)) = (value, limit) else {
        return Ok(());
    };
    if value > limit {
        return Err(ConstraintViolation::ResourceExceeded {
            entity: entity.clone(),
            key,
            value,
            limit_key,
            limit,
        });
    }
    Ok(())
}
