use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::plan::{NormalizedPlan, PlanTextNormalizer};

const UNSOLVABLE_MARKERS: [&str; 2] = ["no solution", "unsolvable"];

/// Body sent to a planning service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerRequest {
    pub domain_pddl: String,
    pub problem_pddl: String,
}

/// What a planner run produced. Services that report `resultText`/`statusCode` are
/// accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerResponse {
    #[serde(alias = "resultText", default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(alias = "statusCode")]
    pub returncode: i32,
}

impl PlannerResponse {
    fn mentions_unsolvable(&self) -> bool {
        let stdout = self.stdout.to_ascii_lowercase();
        UNSOLVABLE_MARKERS
            .iter()
            .any(|marker| stdout.contains(marker))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutcome {
    Plan(NormalizedPlan),
    /// The planner proved there is no plan. Runs with an empty plan.
    Unsatisfiable,
}

impl PlannerOutcome {
    pub fn into_plan(self) -> NormalizedPlan {
        match self {
            Self::Plan(plan) => plan,
            Self::Unsatisfiable => NormalizedPlan::empty(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PlannerFailure {
    #[error("planner exited with status {returncode}: {detail}")]
    Exit { returncode: i32, detail: String },
    #[error("parse planner response json at {path}: {source}")]
    ResponseJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("planner backend unavailable: {0}")]
    Backend(String),
}

pub fn parse_planner_response_json(raw: &str) -> Result<PlannerResponse, PlannerFailure> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize(&mut deserializer).map_err(|error| {
        let path = error.path().to_string();
        PlannerFailure::ResponseJson {
            path,
            source: error.into_inner(),
        }
    })
}

/// Turns a planner response into a plan, an unsatisfiable verdict or a failure.
///
/// A zero exit status without plan lines counts as unsatisfiable. A non-zero status is
/// still a plan when stdout carries plan lines, and unsatisfiable when stdout says so.
pub fn classify_response(
    response: &PlannerResponse,
    normalizer: &PlanTextNormalizer,
) -> Result<PlannerOutcome, PlannerFailure> {
    let plan = normalizer.parse_text(&response.stdout);
    let outcome = match (response.returncode, plan.is_empty()) {
        (0, true) => PlannerOutcome::Unsatisfiable,
        (0, false) => PlannerOutcome::Plan(plan),
        (_, _) if response.mentions_unsolvable() => PlannerOutcome::Unsatisfiable,
        (_, false) => PlannerOutcome::Plan(plan),
        (returncode, true) => {
            let detail = first_line(&response.stderr)
                .or_else(|| first_line(&response.stdout))
                .unwrap_or("no output")
                .to_string();
            warn!(returncode, detail = %detail, "planner_failed");
            return Err(PlannerFailure::Exit { returncode, detail });
        }
    };

    match &outcome {
        PlannerOutcome::Plan(plan) => info!(
            returncode = response.returncode,
            action_count = plan.len(),
            "planner_plan_received"
        ),
        PlannerOutcome::Unsatisfiable => {
            info!(returncode = response.returncode, "planner_reported_unsatisfiable")
        }
    }
    Ok(outcome)
}

fn first_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|line| !line.is_empty())
}
