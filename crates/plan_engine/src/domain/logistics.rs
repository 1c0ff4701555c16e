use crate::config::LogisticsParams;
use crate::context::{DomainKind, DomainVariant, RunContext};
use crate::plan::TimedAction;
use crate::world::{
    ConstraintViolation, Effect, EntityId, EntityKind, Relation, RelationKind, ResourceKey,
    WorldModel,
};

use super::{
    expect_arity, Completion, DecodeError, Dispatch, DomainHandler, Endpoint, Transition,
    TransitionKind,
};

const IN_CITY: &str = "in-city";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Drive,
    Fly,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogisticsAction {
    Load {
        package: EntityId,
        vehicle: EntityId,
        location: EntityId,
    },
    Unload {
        package: EntityId,
        vehicle: EntityId,
        location: EntityId,
    },
    Travel {
        mode: Mode,
        vehicle: EntityId,
        from: EntityId,
        to: EntityId,
        /// Trailing argument some domain variants pass, e.g. the city of a drive.
        extra: Option<EntityId>,
        /// `drive-between-cities` may leave the city of `from`.
        crosses_cities: bool,
    },
    Refuel {
        vehicle: EntityId,
        location: Option<EntityId>,
    },
}

#[derive(Debug, Clone)]
pub struct LogisticsHandler {
    params: LogisticsParams,
    variant: DomainVariant,
    default_duration: f64,
}

impl LogisticsHandler {
    pub fn new(ctx: &RunContext) -> Self {
        Self {
            params: ctx.config.logistics.clone(),
            variant: ctx.domain.variant(),
            default_duration: ctx.config.default_action_duration,
        }
    }

    /// Gives fuel to vehicles that have none yet. The event variant starts every vehicle
    /// on a full tank; other variants only when an initial level is configured.
    pub(crate) fn prepare(&mut self, world: &WorldModel) -> Vec<Effect> {
        let seed = match (self.params.initial_fuel, self.variant) {
            (Some(level), _) => level,
            (None, DomainVariant::Event) => self.params.fuel_capacity,
            (None, _) => return Vec::new(),
        };
        world
            .entities()
            .filter(|entity| entity.kind.is_vehicle())
            .filter(|entity| world.resource(&entity.id, &ResourceKey::Fuel).is_none())
            .map(|entity| Effect::SetResource {
                entity: entity.id,
                key: ResourceKey::Fuel,
                value: seed,
            })
            .collect()
    }

    fn fuel_cost(&self, mode: Mode) -> f64 {
        match mode {
            Mode::Drive => self.params.drive_fuel_cost,
            Mode::Fly => self.params.fly_fuel_cost,
        }
    }

    fn validate_travel(
        &self,
        mode: Mode,
        vehicle: &EntityId,
        from: &EntityId,
        to: &EntityId,
        crosses_cities: bool,
        world: &WorldModel,
    ) -> Result<Vec<Effect>, ConstraintViolation> {
        let at_from = Relation::new(RelationKind::At, vehicle, from);
        if !world.holds(&at_from) {
            return Err(ConstraintViolation::MissingRelation(at_from));
        }
        if mode == Mode::Drive && !crosses_cities && world.has_facts_named(IN_CITY) {
            if let (Some(from_city), Some(to_city)) = (city_of(world, from), city_of(world, to)) {
                if from_city != to_city {
                    return Err(ConstraintViolation::Precondition(format!(
                        "{vehicle} cannot drive from {from} in {from_city} to {to} in {to_city}"
                    )));
                }
            }
        }

        let mut effects = vec![Effect::Relate(Relation::new(RelationKind::At, vehicle, to))];
        if let Some(fuel) = world.resource(vehicle, &ResourceKey::Fuel) {
            let cost = self.fuel_cost(mode);
            if fuel < cost {
                return Err(ConstraintViolation::InsufficientResource {
                    entity: vehicle.clone(),
                    key: ResourceKey::Fuel,
                    required: cost,
                    available: fuel,
                });
            }
            effects.push(Effect::AdjustResource {
                entity: vehicle.clone(),
                key: ResourceKey::Fuel,
                delta: -cost,
            });
        }
        Ok(effects)
    }

    fn validate_load(
        &self,
        package: &EntityId,
        vehicle: &EntityId,
        location: &EntityId,
        world: &WorldModel,
    ) -> Result<Vec<Effect>, ConstraintViolation> {
        let package_at = Relation::new(RelationKind::At, package, location);
        if !world.holds(&package_at) {
            return Err(ConstraintViolation::MissingRelation(package_at));
        }
        let vehicle_at = Relation::new(RelationKind::At, vehicle, location);
        if !world.holds(&vehicle_at) {
            return Err(ConstraintViolation::MissingRelation(vehicle_at));
        }
        Ok(vec![
            Effect::Unrelate(package_at),
            Effect::Relate(Relation::new(RelationKind::In, package, vehicle)),
        ])
    }

    fn validate_unload(
        &self,
        package: &EntityId,
        vehicle: &EntityId,
        location: &EntityId,
        world: &WorldModel,
    ) -> Result<Vec<Effect>, ConstraintViolation> {
        let inside = Relation::new(RelationKind::In, package, vehicle);
        if !world.holds(&inside) {
            return Err(ConstraintViolation::MissingRelation(inside));
        }
        let vehicle_at = Relation::new(RelationKind::At, vehicle, location);
        if !world.holds(&vehicle_at) {
            return Err(ConstraintViolation::MissingRelation(vehicle_at));
        }
        Ok(vec![
            Effect::Unrelate(inside),
            Effect::Relate(Relation::new(RelationKind::At, package, location)),
        ])
    }
}

impl DomainHandler for LogisticsHandler {
    type Action = LogisticsAction;

    fn decode(&self, action: &TimedAction) -> Result<LogisticsAction, DecodeError> {
        let args = &action.args;
        match action.name.as_str() {
            "load-truck" | "load-airplane" => {
                expect_arity(action, &[3], "3")?;
                Ok(LogisticsAction::Load {
                    package: args[0].clone(),
                    vehicle: args[1].clone(),
                    location: args[2].clone(),
                })
            }
            "unload-truck" | "unload-airplane" => {
                expect_arity(action, &[3], "3")?;
                Ok(LogisticsAction::Unload {
                    package: args[0].clone(),
                    vehicle: args[1].clone(),
                    location: args[2].clone(),
                })
            }
            verb @ ("drive" | "drive-truck" | "drive-between-cities" | "start-drive" | "fly"
            | "fly-airplane" | "start-fly") => {
                expect_arity(action, &[3, 4], "3 or 4")?;
                let mode = if verb.contains("fly") {
                    Mode::Fly
                } else {
                    Mode::Drive
                };
                Ok(LogisticsAction::Travel {
                    mode,
                    vehicle: args[0].clone(),
                    from: args[1].clone(),
                    to: args[2].clone(),
                    extra: args.get(3).cloned(),
                    crosses_cities: verb == "drive-between-cities",
                })
            }
            "refuel" | "refuel-truck" | "refuel-airplane" => {
                expect_arity(action, &[1, 2], "1 or 2")?;
                Ok(LogisticsAction::Refuel {
                    vehicle: args[0].clone(),
                    location: args.get(1).cloned(),
                })
            }
            other => Err(DecodeError::UnknownVerb {
                domain: DomainKind::Logistics,
                verb: other.to_string(),
            }),
        }
    }

    fn referenced<'a>(&self, action: &'a LogisticsAction) -> Vec<&'a EntityId> {
        match action {
            LogisticsAction::Load {
                package,
                vehicle,
                location,
            }
            | LogisticsAction::Unload {
                package,
                vehicle,
                location,
            } => vec![package, vehicle, location],
            LogisticsAction::Travel {
                vehicle,
                from,
                to,
                extra,
                ..
            } => {
                let mut ids = vec![vehicle, from, to];
                ids.extend(extra.iter());
                ids
            }
            LogisticsAction::Refuel { vehicle, location } => {
                let mut ids = vec![vehicle];
                ids.extend(location.iter());
                ids
            }
        }
    }

    fn validate(
        &self,
        action: &LogisticsAction,
        _dispatch: &Dispatch<'_>,
        world: &WorldModel,
    ) -> Result<Vec<Effect>, ConstraintViolation> {
        match action {
            LogisticsAction::Load {
                package,
                vehicle,
                location,
            } => self.validate_load(package, vehicle, location, world),
            LogisticsAction::Unload {
                package,
                vehicle,
                location,
            } => self.validate_unload(package, vehicle, location, world),
            LogisticsAction::Travel {
                mode,
                vehicle,
                from,
                to,
                crosses_cities,
                ..
            } => self.validate_travel(*mode, vehicle, from, to, *crosses_cities, world),
            LogisticsAction::Refuel { vehicle, location } => {
                if let Some(location) = location {
                    let vehicle_at = Relation::new(RelationKind::At, vehicle, location);
                    if !world.holds(&vehicle_at) {
                        return Err(ConstraintViolation::MissingRelation(vehicle_at));
                    }
                }
                Ok(vec![Effect::SetResource {
                    entity: vehicle.clone(),
                    key: ResourceKey::Fuel,
                    value: self.params.fuel_capacity,
                }])
            }
        }
    }

    fn describe_transition(
        &self,
        action: &LogisticsAction,
        dispatch: &Dispatch<'_>,
        world: &WorldModel,
    ) -> Transition {
        let verb = dispatch.timed.name.as_str();
        let duration = dispatch.duration_or(self.default_duration);
        match action {
            LogisticsAction::Load {
                package, vehicle, ..
            } => Transition::new(
                verb,
                Some(package),
                TransitionKind::Attach,
                world
                    .query_relation(RelationKind::At, package)
                    .cloned()
                    .map(Endpoint::Entity)
                    .unwrap_or(Endpoint::Nowhere),
                Endpoint::Entity(vehicle.clone()),
                Completion::Elapsed { duration },
            ),
            LogisticsAction::Unload {
                package,
                vehicle,
                location,
            } => Transition::new(
                verb,
                Some(package),
                TransitionKind::Detach,
                Endpoint::Entity(vehicle.clone()),
                Endpoint::Entity(location.clone()),
                Completion::Elapsed { duration },
            ),
            LogisticsAction::Travel {
                vehicle, from, to, ..
            } => Transition::new(
                verb,
                Some(vehicle),
                TransitionKind::Move,
                Endpoint::Entity(from.clone()),
                Endpoint::Entity(to.clone()),
                Completion::Elapsed { duration },
            ),
            LogisticsAction::Refuel { vehicle, .. } => {
                let before = world.resource(vehicle, &ResourceKey::Fuel).unwrap_or(0.0);
                Transition::new(
                    verb,
                    Some(vehicle),
                    TransitionKind::ConsumeResource,
                    Endpoint::Level(before),
                    Endpoint::Level(self.params.fuel_capacity),
                    Completion::Elapsed {
                        duration: dispatch.timed.duration,
                    },
                )
            }
        }
    }
}

/// City of a location or airport, from `(in-city ?place ?city)`.
fn city_of<'a>(world: &'a WorldModel, place: &EntityId) -> Option<&'a EntityId> {
    world
        .facts()
        .filter(|fact| fact.name == IN_CITY)
        .find_map(|fact| match fact.args.as_slice() {
            [subject, city] if subject == place => Some(city),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::context::DomainSelection;
    use crate::domain::{DomainActionTable, Rejection};
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

    fn two_cities() -> ProblemModel {
        let mut problem = ProblemModel::new("delivery", "logistics");
        problem.add_object("t1", "truck");
        problem.add_object("a1", "airplane");
        problem.add_object("pkg1", "package");
        for place in ["l1", "l2", "l3"] {
            problem.add_object(place, "location");
        }
        problem.add_object("c1", "city");
        problem.add_object("c2", "city");
        problem.add_predicate("in-city", &["l1", "c1"]);
        problem.add_predicate("in-city", &["l2", "c1"]);
        problem.add_predicate("in-city", &["l3", "c2"]);
        problem.add_predicate("at", &["t1", "l1"]);
        problem.add_predicate("at", &["a1", "l1"]);
        problem.add_predicate("at", &["pkg1", "l1"]);
        problem
    }

    fn setup(problem: &ProblemModel, variant: DomainVariant) -> (DomainActionTable, WorldModel) {
        let ctx = RunContext::new(
            "test",
            DomainSelection::new(DomainKind::Logistics, variant).expect("selection"),
            RunConfig::default(),
        );
        let mut world = WorldModel::from_problem(problem).expect("world");
        let mut table = DomainActionTable::new(&ctx);
        table.prepare(&mut world).expect("prepare");
        (table, world)
    }

    fn run(
        table: &mut DomainActionTable,
        world: &mut WorldModel,
        line: &str,
    ) -> Result<Transition, Rejection> {
        let action = timed(line);
        let decoded = table.decode(&action)?;
        table
            .dispatch(&decoded, &action, world, 0.0)
            .map(|applied| applied.transition)
    }

    fn fuel(world: &WorldModel, vehicle: &str) -> Option<f64> {
        world.resource(&id(vehicle), &ResourceKey::Fuel)
    }

    #[test]
    fn event_variant_seeds_full_tanks() {
        let (_, world) = setup(&two_cities(), DomainVariant::Event);
        assert_eq!(fuel(&world, "t1"), Some(100.0));
        assert_eq!(fuel(&world, "a1"), Some(100.0));
        assert_eq!(fuel(&world, "pkg1"), None);
    }

    #[test]
    fn classical_variant_leaves_fuel_unset() {
        let (mut table, mut world) = setup(&two_cities(), DomainVariant::Classical);
        assert_eq!(fuel(&world, "t1"), None);
        run(&mut table, &mut world, "drive-truck t1 l1 l2 c1").expect("drive without fuel");
        assert_eq!(fuel(&world, "t1"), None);
    }

    #[test]
    fn each_drive_and_flight_consumes_exact_cost() {
        let (mut table, mut world) = setup(&two_cities(), DomainVariant::Event);
        run(&mut table, &mut world, "start-drive t1 l1 l2").expect("drive");
        run(&mut table, &mut world, "start-drive t1 l2 l1").expect("drive back");
        run(&mut table, &mut world, "start-fly a1 l1 l3").expect("fly");

        assert_eq!(fuel(&world, "t1"), Some(80.0));
        assert_eq!(fuel(&world, "a1"), Some(80.0));
        assert_eq!(world.query_relation(RelationKind::At, &id("a1")), Some(&id("l3")));
    }

    #[test]
    fn travel_without_enough_fuel_is_rejected_unchanged() {
        let mut problem = two_cities();
        problem.add_function("fuel", &["a1"], 15.0);
        let (mut table, mut world) = setup(&problem, DomainVariant::Event);

        let err = run(&mut table, &mut world, "fly-airplane a1 l1 l3").expect_err("low fuel");
        assert_eq!(
            err,
            Rejection::ConstraintViolation(ConstraintViolation::InsufficientResource {
                entity: id("a1"),
                key: ResourceKey::Fuel,
                required: 20.0,
                available: 15.0,
            })
        );
        assert_eq!(fuel(&world, "a1"), Some(15.0));
        assert_eq!(world.query_relation(RelationKind::At, &id("a1")), Some(&id("l1")));

        let refuel = run(&mut table, &mut world, "refuel-airplane a1 l1").expect("refuel");
        assert_eq!(refuel.kind, TransitionKind::ConsumeResource);
        assert_eq!(refuel.from_state, Endpoint::Level(15.0));
        assert_eq!(fuel(&world, "a1"), Some(100.0));
        run(&mut table, &mut world, "fly-airplane a1 l1 l3").expect("fly after refuel");
    }

    #[test]
    fn fuel_never_goes_negative_over_a_long_route() {
        let (mut table, mut world) = setup(&two_cities(), DomainVariant::Event);
        let mut accepted = 0;
        for step in 0..15 {
            let line = if step % 2 == 0 {
                "drive t1 l1 l2"
            } else {
                "drive t1 l2 l1"
            };
            if run(&mut table, &mut world, line).is_ok() {
                accepted += 1;
            }
            let level = fuel(&world, "t1").expect("fuel");
            assert!(level >= 0.0);
        }
        assert_eq!(accepted, 10);
        assert_eq!(fuel(&world, "t1"), Some(0.0));
    }

    #[test]
    fn trucks_stay_inside_their_city() {
        let (mut table, mut world) = setup(&two_cities(), DomainVariant::Event);
        let err = run(&mut table, &mut world, "drive-truck t1 l1 l3 c1").expect_err("other city");
        assert!(matches!(
            err,
            Rejection::ConstraintViolation(ConstraintViolation::Precondition(_))
        ));

        run(&mut table, &mut world, "drive-between-cities t1 l1 l3").expect("intercity drive");
        assert_eq!(world.query_relation(RelationKind::At, &id("t1")), Some(&id("l3")));
    }

    #[test]
    fn loaded_packages_travel_with_the_vehicle() {
        let (mut table, mut world) = setup(&two_cities(), DomainVariant::Classical);
        let load = run(&mut table, &mut world, "load-truck pkg1 t1 l1").expect("load");
        assert_eq!(load.from_state, Endpoint::Entity(id("l1")));
        run(&mut table, &mut world, "drive-truck t1 l1 l2 c1").expect("drive");
        let unload = run(&mut table, &mut world, "unload-truck pkg1 t1 l2").expect("unload");

        assert_eq!(unload.kind, TransitionKind::Detach);
        assert_eq!(world.query_relation(RelationKind::At, &id("pkg1")), Some(&id("l2")));
        assert_eq!(world.query_relation(RelationKind::In, &id("pkg1")), None);
    }

    #[test]
    fn load_requires_vehicle_and_package_colocated() {
        let (mut table, mut world) = setup(&two_cities(), DomainVariant::Classical);
        run(&mut table, &mut world, "drive-truck t1 l1 l2 c1").expect("drive");

        let err = run(&mut table, &mut world, "load-truck pkg1 t1 l1").expect_err("truck gone");
        assert!(matches!(
            err,
            Rejection::ConstraintViolation(ConstraintViolation::MissingRelation(_))
        ));
        assert_eq!(world.query_relation(RelationKind::At, &id("pkg1")), Some(&id("l1")));
    }

    #[test]
    fn travel_uses_declared_or_fallback_duration() {
        let (mut table, mut world) = setup(&two_cities(), DomainVariant::Classical);
        let mut action = timed("drive-truck t1 l1 l2 c1");
        action.duration = 3.5;
        let decoded = table.decode(&action).expect("decode");
        let applied = table
            .dispatch(&decoded, &action, &mut world, 0.0)
            .expect("drive");
        assert_eq!(applied.transition.nominal_duration, 3.5);

        let fallback = run(&mut table, &mut world, "drive-truck t1 l2 l1 c1").expect("drive");
        assert_eq!(fallback.nominal_duration, 1.0);
    }

    #[test]
    fn wrong_arity_is_a_decode_error() {
        let (table, _) = setup(&two_cities(), DomainVariant::Classical);
        assert!(matches!(
            table.decode(&timed("drive t1 l1")),
            Err(DecodeError::Arity { actual: 2, .. })
        ));
    }

    #[test]
    fn vehicle_kinds_are_recognised() {
        assert!(EntityKind::Truck.is_vehicle());
        assert!(EntityKind::Airplane.is_vehicle());
        assert!(!EntityKind::Package.is_vehicle());
    }
}
