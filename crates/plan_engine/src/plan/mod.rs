mod normalizer;
mod types;

pub use normalizer::PlanTextNormalizer;
pub use types::{
    NormalizedPlan, PlanDiagnostic, PlanDialect, PlanErrorCode, TimedAction, WAIT_ACTION,
};
