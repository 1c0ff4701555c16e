use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use plan_engine::{
    classify_response, load_run_config, parse_planner_response_json, parse_problem_json,
    plan_cache_key, resolve_run_paths, ArtifactStore, CacheReadState, DomainKind,
    DomainSelection, DomainSelectionError, NormalizedPlan, PddlSerializer, PlanRun,
    PlanTextNormalizer, PlannerOutcome, PlannerRequest, PlannerResponse, ProblemModel,
    RunConfig, RunContext, RunPaths,
};
use tracing::{info, warn};

use super::bootstrap;
use super::cli::{Command, RunOptions};
use super::loop_runner::{self, LoopConfig};
use super::planner::{build_backend, PlannerBackend, PlannerInputs};
use super::AppError;

pub(crate) fn execute<W: Write>(command: Command, out: &mut W) -> Result<(), AppError> {
    match command {
        Command::Help => Ok(()),
        Command::Pddl { problem, variant } => {
            let problem = load_problem(&problem)?;
            let text = PddlSerializer::for_variant(variant).serialize(&problem);
            out.write_all(text.as_bytes()).map_err(AppError::Output)
        }
        Command::CheckResponse { response } => check_response(&response, out),
        Command::Run(options) => {
            let backend = build_backend(&options.planner);
            run_session(&options, backend.as_ref(), out)
        }
    }
}

fn check_response<W: Write>(path: &Path, out: &mut W) -> Result<(), AppError> {
    let raw = read_text(path)?;
    let response = parse_planner_response_json(&raw)?;
    let normalizer =
        PlanTextNormalizer::with_fallback_duration(RunConfig::default().default_action_duration);
    let written = match classify_response(&response, &normalizer)? {
        PlannerOutcome::Plan(plan) => {
            write!(out, "plan: {} actions\n{}", plan.len(), plan.render())
        }
        PlannerOutcome::Unsatisfiable => writeln!(out, "unsatisfiable"),
    };
    written.map_err(AppError::Output)
}

pub(crate) fn run_session<W: Write>(
    options: &RunOptions,
    backend: &dyn PlannerBackend,
    out: &mut W,
) -> Result<(), AppError> {
    let paths = resolve_run_paths(options.home.as_deref())?;
    let problem = load_problem(&options.problem)?;
    let kind = match options.kind {
        Some(kind) => kind,
        None => kind_from_domain_name(&problem.domain_name)?,
    };
    let selection = DomainSelection::new(kind, options.variant)?;

    let mut config = match &options.config {
        Some(path) => load_run_config(path)?,
        None => RunConfig::default(),
    };
    if let Some(speed) = options.speed.or_else(bootstrap::speed_from_env) {
        config.speed_multiplier = speed;
    }
    let loop_config = LoopConfig {
        progress_log_interval: Duration::from_secs_f64(config.progress_log_interval_secs),
        realtime: options.realtime,
        ..LoopConfig::default()
    };
    let ctx = RunContext::new(problem.problem_name.clone(), selection, config);
    info!(
        run = %ctx.label,
        domain = %selection,
        home = %paths.home.display(),
        speed = ctx.config.speed_multiplier,
        "session_started"
    );

    let store = paths.artifact_store();
    let problem_pddl = PddlSerializer::for_variant(options.variant).serialize(&problem);
    let problem_path = store.write_problem(&problem_pddl)?;
    let normalizer = PlanTextNormalizer::new(&ctx);

    let plan = match &options.plan {
        Some(plan_path) => {
            let text = read_text(plan_path)?;
            store.write_plan_text(&text)?;
            normalizer.parse_text(&text)
        }
        None => {
            let domain_path = domain_path(options, &paths, selection);
            let request = PlannerRequest {
                domain_pddl: read_text(&domain_path)?,
                problem_pddl,
            };
            let inputs = PlannerInputs {
                request: &request,
                domain_path: &domain_path,
                problem_path: &problem_path,
            };
            obtain_plan(&store, backend, &inputs, &normalizer, options.use_cache)?
        }
    };

    let mut run = PlanRun::initialize(ctx, &problem, &plan)?;
    let stats = loop_runner::run_to_completion(&mut run, &loop_config, out)
        .map_err(AppError::Output)?;
    writeln!(
        out,
        "summary: state={} virtual_time={:.3} applied={} rejected={}",
        run.state(),
        run.clock(),
        stats.applied,
        stats.rejected
    )
    .map_err(AppError::Output)?;
    info!(state = %run.state(), clock = run.clock(), "session_finished");
    Ok(())
}

/// Asks the cache, then the planner, for a plan. Only responses that classify
/// cleanly are cached.
fn obtain_plan(
    store: &ArtifactStore,
    backend: &dyn PlannerBackend,
    inputs: &PlannerInputs<'_>,
    normalizer: &PlanTextNormalizer,
    use_cache: bool,
) -> Result<NormalizedPlan, AppError> {
    let key = plan_cache_key(&inputs.request.domain_pddl, &inputs.request.problem_pddl);
    let cached = if use_cache {
        cached_response(store, &key)?
    } else {
        None
    };

    let (response, from_cache) = match cached {
        Some(response) => (response, true),
        None => {
            info!(backend = backend.name(), "planner_requested");
            (backend.solve(inputs)?, false)
        }
    };

    store.write_plan_text(&response.stdout)?;
    let outcome = classify_response(&response, normalizer)?;
    if use_cache && !from_cache {
        store.store_response(&key, &response)?;
    }
    Ok(outcome.into_plan())
}

fn cached_response(store: &ArtifactStore, key: &str) -> Result<Option<PlannerResponse>, AppError> {
    match store.cached_response(key)? {
        CacheReadState::Present(response) => {
            info!(key, "plan_cache_hit");
            Ok(Some(response))
        }
        CacheReadState::Missing => {
            info!(key, "plan_cache_miss");
            Ok(None)
        }
        CacheReadState::Unreadable => {
            warn!(key, "plan cache entry unreadable; asking planner");
            Ok(None)
        }
    }
}

fn domain_path(options: &RunOptions, paths: &RunPaths, selection: DomainSelection) -> PathBuf {
    options
        .domain
        .clone()
        .unwrap_or_else(|| paths.domain_file(selection))
}

/// Accepts `elevator`, and also qualified names such as `elevator-numeric`.
fn kind_from_domain_name(domain_name: &str) -> Result<DomainKind, DomainSelectionError> {
    domain_name.parse::<DomainKind>().or_else(|err| {
        domain_name
            .split(['-', '_'])
            .next()
            .and_then(|head| head.parse::<DomainKind>().ok())
            .ok_or(err)
    })
}

fn load_problem(path: &Path) -> Result<ProblemModel, AppError> {
    let raw = read_text(path)?;
    Ok(parse_problem_json(&raw)?)
}

fn read_text(path: &Path) -> Result<String, AppError> {
    fs::read_to_string(path).map_err(|source| AppError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use plan_engine::{DomainVariant, PlannerFailure};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::app::planner::PlannerSettings;

    struct StubPlanner {
        response: PlannerResponse,
        calls: Cell<u32>,
    }

    impl StubPlanner {
        fn answering(stdout: &str, returncode: i32) -> Self {
            Self {
                response: PlannerResponse {
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                    returncode,
                },
                calls: Cell::new(0),
            }
        }
    }

    impl PlannerBackend for StubPlanner {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn solve(&self, inputs: &PlannerInputs<'_>) -> Result<PlannerResponse, PlannerFailure> {
            assert!(inputs.problem_path.is_file());
            assert!(inputs.request.problem_pddl.contains("(define (problem"));
            self.calls.set(self.calls.get() + 1);
            Ok(self.response.clone())
        }
    }

    struct Fixture {
        temp: TempDir,
        problem: PathBuf,
        domain: PathBuf,
    }

    impl Fixture {
        fn logistics() -> Self {
            let temp = TempDir::new().expect("tempdir");
            let problem = temp.path().join("problem.json");
            let raw = json!({
                "problem_name": "deliver",
                "domain_name": "logistics",
                "objects": [
                    { "name": "t1", "type": "truck" },
                    { "name": "l1", "type": "location" },
                    { "name": "l2", "type": "location" },
                    { "name": "pkg1", "type": "package" }
                ],
                "predicates": [
                    { "name": "at", "args": ["t1", "l1"] },
                    { "name": "at", "args": ["pkg1", "l1"] }
                ],
                "goals": [{ "name": "at", "args": ["pkg1", "l2"] }]
            });
            fs::write(&problem, raw.to_string()).expect("write problem");
            let domain = temp.path().join("domain.pddl");
            fs::write(&domain, "(define (domain logistics))\n").expect("write domain");
            Self {
                temp,
                problem,
                domain,
            }
        }

        fn home(&self) -> PathBuf {
            self.temp.path().join("home")
        }

        fn options(&self) -> RunOptions {
            RunOptions {
                problem: self.problem.clone(),
                plan: None,
                domain: Some(self.domain.clone()),
                kind: None,
                variant: DomainVariant::Classical,
                config: None,
                speed: Some(50.0),
                realtime: false,
                use_cache: true,
                home: Some(self.home()),
                planner: PlannerSettings::default(),
            }
        }
    }

    const DELIVERY_PLAN: &str = "0: (load-truck pkg1 t1 l1)\n\
1: (drive-truck t1 l1 l2)\n\
2: (unload-truck pkg1 t1 l2)\n";

    #[test]
    fn planner_plan_runs_and_is_cached() {
        let fixture = Fixture::logistics();
        let planner = StubPlanner::answering(DELIVERY_PLAN, 0);
        let mut out = Vec::new();

        run_session(&fixture.options(), &planner, &mut out).expect("first run");
        run_session(&fixture.options(), &planner, &mut out).expect("second run");

        assert_eq!(planner.calls.get(), 1);
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text.matches("summary: state=completed").count(), 2, "{text}");
        assert!(text.contains("#2 unload-truck"), "{text}");

        let generated = fixture.home().join("generated");
        assert_eq!(
            fs::read_to_string(generated.join("output_plan.txt")).expect("plan file"),
            DELIVERY_PLAN
        );
        assert!(generated.join("problem.pddl").is_file());
    }

    #[test]
    fn no_cache_asks_planner_every_time() {
        let fixture = Fixture::logistics();
        let planner = StubPlanner::answering(DELIVERY_PLAN, 0);
        let mut options = fixture.options();
        options.use_cache = false;

        run_session(&options, &planner, &mut Vec::new()).expect("first run");
        run_session(&options, &planner, &mut Vec::new()).expect("second run");

        assert_eq!(planner.calls.get(), 2);
        assert!(!fixture.home().join("cache").join("plans").exists());
    }

    #[test]
    fn unsatisfiable_problem_aborts_with_no_plan() {
        let fixture = Fixture::logistics();
        let planner = StubPlanner::answering("No solution found", 7);
        let mut out = Vec::new();

        run_session(&fixture.options(), &planner, &mut out).expect("run");

        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("aborted: no plan\n"), "{text}");
        assert!(text.contains("state=aborted (no plan)"), "{text}");
    }

    #[test]
    fn planner_failure_is_fatal() {
        let fixture = Fixture::logistics();
        let planner = StubPlanner::answering("", 1);

        let err = run_session(&fixture.options(), &planner, &mut Vec::new()).expect_err("fail");
        assert!(matches!(err, AppError::Planner(_)), "{err}");
    }

    #[test]
    fn plan_file_skips_the_planner() {
        let fixture = Fixture::logistics();
        let plan_path = fixture.temp.path().join("plan.txt");
        fs::write(&plan_path, DELIVERY_PLAN).expect("write plan");
        let planner = StubPlanner::answering("", 1);
        let mut options = fixture.options();
        options.domain = None;
        options.plan = Some(plan_path);
        let mut out = Vec::new();

        run_session(&options, &planner, &mut out).expect("run");

        assert_eq!(planner.calls.get(), 0);
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("applied=3 rejected=0"), "{text}");
    }

    #[test]
    fn missing_shipped_domain_is_reported() {
        let fixture = Fixture::logistics();
        let mut options = fixture.options();
        options.domain = None;

        let err = run_session(&options, &StubPlanner::answering("", 0), &mut Vec::new())
            .expect_err("no domain file");
        assert!(
            err.to_string().contains("domain-logistic-normal.pddl"),
            "{err}"
        );
    }

    #[test]
    fn qualified_domain_names_select_kind() {
        assert_eq!(
            kind_from_domain_name("elevator-numeric").expect("kind"),
            DomainKind::Elevator
        );
        assert_eq!(kind_from_domain_name("robot").expect("kind"), DomainKind::Robot);
        assert!(kind_from_domain_name("blocksworld").is_err());
    }

    #[test]
    fn check_response_prints_plan() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("response.json");
        let raw = json!({ "stdout": "0.0: (drive t1 l1 l2)", "stderr": "", "returncode": 0 });
        fs::write(&path, raw.to_string()).expect("write");
        let mut out = Vec::new();

        check_response(&path, &mut out).expect("check");

        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "plan: 1 actions\n0.000: (drive t1 l1 l2)\n"
        );
    }
}
