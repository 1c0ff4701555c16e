mod elevator;
mod logistics;
mod robot;
mod transition;

use thiserror::Error;
use tracing::debug;

use crate::context::{DomainKind, RunContext};
use crate::plan::TimedAction;
use crate::world::{ConstraintViolation, Effect, EntityId, WorldModel};

pub use elevator::{ElevatorAction, ElevatorHandler};
pub use logistics::{LogisticsAction, LogisticsHandler};
pub use robot::{PhaseChange, RobotAction, RobotHandler, RobotPhase};
pub use transition::{Completion, Endpoint, Transition, TransitionKind, TransitionProgress};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown {domain} action '{verb}'")]
    UnknownVerb { domain: DomainKind, verb: String },
    #[error("'{verb}' expects {expected} arguments, got {actual}")]
    Arity {
        verb: String,
        expected: &'static str,
        actual: usize,
    },
    #[error("'{verb}' was decoded for the {decoded} domain but the run uses {active}")]
    WrongDomain {
        verb: String,
        decoded: DomainKind,
        active: DomainKind,
    },
}

/// Why an action was not applied. Rejections are reported and the timeline moves on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("unknown entity '{0}'")]
    UnknownEntity(EntityId),
    #[error("constraint violated: {0}")]
    ConstraintViolation(ConstraintViolation),
    #[error("cannot decode action: {0}")]
    Decode(#[from] DecodeError),
}

impl From<ConstraintViolation> for Rejection {
    fn from(violation: ConstraintViolation) -> Self {
        match violation {
            ConstraintViolation::UnknownEntity(id) => Self::UnknownEntity(id),
            other => Self::ConstraintViolation(other),
        }
    }
}

/// A plan action decoded into its domain's typed form.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainAction {
    Elevator(ElevatorAction),
    Logistics(LogisticsAction),
    Robot(RobotAction),
    Wait,
}

/// Result of a successful dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub transition: Transition,
    pub phase_changes: Vec<PhaseChange>,
}

/// Per-dispatch inputs besides the world.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Dispatch<'a> {
    pub timed: &'a TimedAction,
    pub clock: f64,
}

impl Dispatch<'_> {
    /// Declared duration when the plan gives one, otherwise `fallback`.
    pub fn duration_or(&self, fallback: f64) -> f64 {
        if self.timed.duration > 0.0 {
            self.timed.duration
        } else {
            fallback
        }
    }
}

pub(crate) trait DomainHandler {
    type Action;

    fn decode(&self, action: &TimedAction) -> Result<Self::Action, DecodeError>;

    /// Entities that must exist before the action is considered.
    fn referenced<'a>(&self, action: &'a Self::Action) -> Vec<&'a EntityId>;

    /// Checks preconditions against the current world and returns the effects to commit.
    fn validate(
        &self,
        action: &Self::Action,
        dispatch: &Dispatch<'_>,
        world: &WorldModel,
    ) -> Result<Vec<Effect>, ConstraintViolation>;

    /// Describes the action for the scene layer, against the pre-action world.
    fn describe_transition(
        &self,
        action: &Self::Action,
        dispatch: &Dispatch<'_>,
        world: &WorldModel,
    ) -> Transition;

    /// Runs after the effects of `action` are committed, with the updated world.
    fn on_committed(
        &mut self,
        _action: &Self::Action,
        _dispatch: &Dispatch<'_>,
        _world: &WorldModel,
    ) -> Vec<PhaseChange> {
        Vec::new()
    }

    fn on_finished(&mut self, _action: &Self::Action) -> Vec<PhaseChange> {
        Vec::new()
    }

    /// Brings in-flight state to its committed end state.
    fn settle(&mut self) -> Vec<PhaseChange> {
        Vec::new()
    }
}

fn run_handler<H: DomainHandler>(
    handler: &mut H,
    action: &H::Action,
    dispatch: &Dispatch<'_>,
    world: &mut WorldModel,
) -> Result<Applied, Rejection> {
    if let Some(missing) = handler
        .referenced(action)
        .into_iter()
        .find(|id| !world.contains(id))
    {
        return Err(Rejection::UnknownEntity(missing.clone()));
    }
    let effects = handler.validate(action, dispatch, world)?;
    let transition = handler.describe_transition(action, dispatch, world);
    world.apply_effects(&effects)?;
    let phase_changes = handler.on_committed(action, dispatch, world);
    Ok(Applied {
        transition,
        phase_changes,
    })
}

pub(crate) fn expect_arity(
    action: &TimedAction,
    allowed: &[usize],
    expected: &'static str,
) -> Result<(), DecodeError> {
    if allowed.contains(&action.args.len()) {
        Ok(())
    } else {
        Err(DecodeError::Arity {
            verb: action.name.clone(),
            expected,
            actual: action.args.len(),
        })
    }
}

/// The action vocabulary of the active domain.
#[derive(Debug, Clone)]
pub enum DomainActionTable {
    Elevator(ElevatorHandler),
    Logistics(LogisticsHandler),
    Robot(RobotHandler),
}

impl DomainActionTable {
    pub fn new(ctx: &RunContext) -> Self {
        match ctx.domain.kind() {
            DomainKind::Elevator => Self::Elevator(ElevatorHandler::new(ctx)),
            DomainKind::Logistics => Self::Logistics(LogisticsHandler::new(ctx)),
            DomainKind::Robot => Self::Robot(RobotHandler::new(ctx)),
        }
    }

    pub fn domain(&self) -> DomainKind {
        match self {
            Self::Elevator(_) => DomainKind::Elevator,
            Self::Logistics(_) => DomainKind::Logistics,
            Self::Robot(_) => DomainKind::Robot,
        }
    }

    /// Seeds default resource levels and caches world layout before the first action.
    pub fn prepare(&mut self, world: &mut WorldModel) -> Result<(), ConstraintViolation> {
        let effects = match self {
            Self::Elevator(handler) => handler.prepare(world),
            Self::Logistics(handler) => handler.prepare(world),
            Self::Robot(handler) => handler.prepare(world),
        };
        debug!(
            domain = %self.domain(),
            seeded_effects = effects.len(),
            "domain_prepared"
        );
        world.apply_effects(&effects)
    }

    pub fn decode(&self, action: &TimedAction) -> Result<DomainAction, DecodeError> {
        if action.is_wait() {
            return Ok(DomainAction::Wait);
        }
        match self {
            Self::Elevator(handler) => handler.decode(action).map(DomainAction::Elevator),
            Self::Logistics(handler) => handler.decode(action).map(DomainAction::Logistics),
            Self::Robot(handler) => handler.decode(action).map(DomainAction::Robot),
        }
    }

    pub fn dispatch(
        &mut self,
        action: &DomainAction,
        timed: &TimedAction,
        world: &mut WorldModel,
        clock: f64,
    ) -> Result<Applied, Rejection> {
        let dispatch = Dispatch { timed, clock };
        match (self, action) {
            (_, DomainAction::Wait) => Ok(Applied {
                transition: Transition::new(
                    &timed.name,
                    None,
                    TransitionKind::Wait,
                    Endpoint::Nowhere,
                    Endpoint::Nowhere,
                    Completion::Elapsed {
                        duration: timed.duration,
                    },
                ),
                phase_changes: Vec::new(),
            }),
            (Self::Elevator(handler), DomainAction::Elevator(action)) => {
                run_handler(handler, action, &dispatch, world)
            }
            (Self::Logistics(handler), DomainAction::Logistics(action)) => {
                run_handler(handler, action, &dispatch, world)
            }
            (Self::Robot(handler), DomainAction::Robot(action)) => {
                run_handler(handler, action, &dispatch, world)
            }
            (table, other) => Err(Rejection::Decode(DecodeError::WrongDomain {
                verb: timed.name.clone(),
                decoded: match other {
                    DomainAction::Elevator(_) => DomainKind::Elevator,
                    DomainAction::Logistics(_) => DomainKind::Logistics,
                    _ => DomainKind::Robot,
                },
                active: table.domain(),
            })),
        }
    }

    /// Called once the transition of `action` has completed.
    pub fn finish(&mut self, action: &DomainAction) -> Vec<PhaseChange> {
        match (self, action) {
            (Self::Robot(handler), DomainAction::Robot(action)) => handler.on_finished(action),
            _ => Vec::new(),
        }
    }

    pub fn settle(&mut self) -> Vec<PhaseChange> {
        match self {
            Self::Robot(handler) => handler.settle(),
            _ => Vec::new(),
        }
    }

    pub fn robot_phase(&self, robot: &EntityId) -> Option<RobotPhase> {
        match self {
            Self::Robot(handler) => Some(handler.phase(robot)),
            _ => None,
        }
    }
}
