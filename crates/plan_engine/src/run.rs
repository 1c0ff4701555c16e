use thiserror::Error;
use tracing::info;

use crate::context::RunContext;
use crate::domain::DomainActionTable;
use crate::plan::{NormalizedPlan, PlanTextNormalizer};
use crate::problem::{ProblemError, ProblemModel};
use crate::scheduler::{PlanScheduler, RunStats, SchedulerEvent, SchedulerState};
use crate::world::{ConstraintViolation, WorldInitError, WorldModel};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("problem is invalid: {0}")]
    Problem(#[from] ProblemError),
    #[error("cannot build world: {0}")]
    World(#[from] WorldInitError),
    #[error("cannot prepare {domain} domain state: {source}")]
    Prepare {
        domain: String,
        #[source]
        source: ConstraintViolation,
    },
}

/// One execution of a plan against a problem: the world, the domain table and the
/// scheduler that drives them.
#[derive(Debug)]
pub struct PlanRun {
    ctx: RunContext,
    world: WorldModel,
    scheduler: PlanScheduler,
    pending: Vec<SchedulerEvent>,
}

impl PlanRun {
    /// Builds the initial world from `problem` and queues `plan` for execution.
    /// An empty plan yields a run that is already `Aborted`.
    pub fn initialize(
        ctx: RunContext,
        problem: &ProblemModel,
        plan: &NormalizedPlan,
    ) -> Result<Self, RunError> {
        problem.validate()?;
        let mut world = WorldModel::from_problem(problem)?;
        let mut table = DomainActionTable::new(&ctx);
        table.prepare(&mut world).map_err(|source| RunError::Prepare {
            domain: ctx.domain.kind().to_string(),
            source,
        })?;

        let mut scheduler = PlanScheduler::new(&ctx, plan, table);
        let pending = scheduler.start();
        info!(
            run = %ctx.label,
            domain = %ctx.domain.kind(),
            variant = ?ctx.domain.variant(),
            entities = world.entity_count(),
            actions = plan.len(),
            makespan = plan.makespan(),
            diagnostics = plan.diagnostics.len(),
            "run_initialized"
        );
        Ok(Self {
            ctx,
            world,
            scheduler,
            pending,
        })
    }

    /// Same as [`PlanRun::initialize`] with raw planner text.
    pub fn from_plan_text(
        ctx: RunContext,
        problem: &ProblemModel,
        plan_text: &str,
    ) -> Result<Self, RunError> {
        let plan = PlanTextNormalizer::new(&ctx).parse_text(plan_text);
        Self::initialize(ctx, problem, &plan)
    }

    /// Advances the run by `host_dt` seconds of host time.
    pub fn step(&mut self, host_dt: f64) -> Vec<SchedulerEvent> {
        let mut events = std::mem::take(&mut self.pending);
        events.extend(self.scheduler.step(host_dt, &mut self.world));
        events
    }

    pub fn cancel(&mut self) -> Vec<SchedulerEvent> {
        let mut events = std::mem::take(&mut self.pending);
        events.extend(self.scheduler.cancel());
        events
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.scheduler.is_complete()
    }

    pub fn state(&self) -> &SchedulerState {
        self.scheduler.state()
    }

    pub fn clock(&self) -> f64 {
        self.scheduler.clock()
    }

    pub fn stats(&self) -> RunStats {
        self.scheduler.stats()
    }

    pub fn world(&self) -> &WorldModel {
        &self.world
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn scheduler(&self) -> &PlanScheduler {
        &self.scheduler
    }
}
