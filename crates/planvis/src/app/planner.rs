use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

use plan_engine::{parse_planner_response_json, PlannerFailure, PlannerRequest, PlannerResponse};
use reqwest::blocking::Client as BlockingHttpClient;
use reqwest::StatusCode;
use tracing::{info, warn};

pub(crate) const DEFAULT_PLANNER_URL: &str = "http://localhost:5000/plan";
pub(crate) const DEFAULT_PLANNER_TIMEOUT: Duration = Duration::from_secs(180);
pub(crate) const DEFAULT_SOLVER_JAR: &str = "enhsp-20.jar";
const DOMAIN_PLACEHOLDER: &str = "{domain}";
const PROBLEM_PLACEHOLDER: &str = "{problem}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BackendKind {
    Http,
    Process,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlannerSettings {
    pub(crate) backend: BackendKind,
    pub(crate) url: String,
    pub(crate) timeout: Duration,
    pub(crate) solver_jar: String,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Http,
            url: DEFAULT_PLANNER_URL.to_string(),
            timeout: DEFAULT_PLANNER_TIMEOUT,
            solver_jar: DEFAULT_SOLVER_JAR.to_string(),
        }
    }
}

/// Domain and problem handed to a planner, as text and as files on disk.
pub(crate) struct PlannerInputs<'a> {
    pub(crate) request: &'a PlannerRequest,
    pub(crate) domain_path: &'a Path,
    pub(crate) problem_path: &'a Path,
}

pub(crate) trait PlannerBackend {
    fn name(&self) -> &'static str;

    fn solve(&self, inputs: &PlannerInputs<'_>) -> Result<PlannerResponse, PlannerFailure>;
}

pub(crate) fn build_backend(settings: &PlannerSettings) -> Box<dyn PlannerBackend> {
    match settings.backend {
        BackendKind::Http => Box::new(HttpPlanner {
            url: settings.url.clone(),
            timeout: settings.timeout,
        }),
        BackendKind::Process => Box::new(ProcessPlanner::enhsp(&settings.solver_jar)),
    }
}

/// Runs a local solver. Arguments may reference the domain and problem files through
/// `{domain}` and `{problem}`.
#[derive(Debug, Clone)]
pub(crate) struct ProcessPlanner {
    program: String,
    args: Vec<String>,
}

impl ProcessPlanner {
    pub(crate) fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    pub(crate) fn enhsp(jar: &str) -> Self {
        Self::new(
            "java",
            &["-jar", jar, "-domain", DOMAIN_PLACEHOLDER, "-problem", PROBLEM_PLACEHOLDER],
        )
    }

    fn resolved_args(&self, domain: &Path, problem: &Path) -> Vec<String> {
        let domain = domain.display().to_string();
        let problem = problem.display().to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(DOMAIN_PLACEHOLDER, &domain)
                    .replace(PROBLEM_PLACEHOLDER, &problem)
            })
            .collect()
    }
}

impl PlannerBackend for ProcessPlanner {
    fn name(&self) -> &'static str {
        "process"
    }

    fn solve(&self, inputs: &PlannerInputs<'_>) -> Result<PlannerResponse, PlannerFailure> {
        let args = self.resolved_args(inputs.domain_path, inputs.problem_path);
        let started = Instant::now();
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|err| {
                PlannerFailure::Backend(format!("failed to start '{}': {err}", self.program))
            })?;

        let response = PlannerResponse {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            returncode: output.status.code().unwrap_or(-1),
        };
        info!(
            program = %self.program,
            returncode = response.returncode,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "planner_process_finished"
        );
        Ok(response)
    }
}

/// Posts `{domain_pddl, problem_pddl}` to a planning service.
#[derive(Debug, Clone)]
pub(crate) struct HttpPlanner {
    url: String,
    timeout: Duration,
}

impl PlannerBackend for HttpPlanner {
    fn name(&self) -> &'static str {
        "http"
    }

    fn solve(&self, inputs: &PlannerInputs<'_>) -> Result<PlannerResponse, PlannerFailure> {
        let client = BlockingHttpClient::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| PlannerFailure::Backend(err.to_string()))?;

        let started = Instant::now();
        let response = client
            .post(&self.url)
            .json(inputs.request)
            .send()
            .map_err(|err| {
                PlannerFailure::Backend(format!("request to {} failed: {err}", self.url))
            })?;
        let status = response.status();
        let body = response.text().map_err(|err| {
            PlannerFailure::Backend(format!("reading response body failed: {err}"))
        })?;
        info!(
            url = %self.url,
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "planner_service_responded"
        );

        service_reply(status, &body)
    }
}

/// A failed reply that still parses as a planner response reports the planner's first
/// stderr line; anything else reports the HTTP status.
fn service_reply(status: StatusCode, body: &str) -> Result<PlannerResponse, PlannerFailure> {
    if status.is_success() {
        return parse_planner_response_json(body);
    }
    match parse_planner_response_json(body) {
        Ok(reply) => {
            let detail = reply
                .stderr
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("planning service returned HTTP {status}"));
            warn!(status = status.as_u16(), detail = %detail, "planner_service_failed");
            Err(PlannerFailure::Exit {
                returncode: reply.returncode,
                detail,
            })
        }
        Err(_) => Err(PlannerFailure::Backend(format!(
            "planning service returned HTTP {status}"
        ))),
    }
}
