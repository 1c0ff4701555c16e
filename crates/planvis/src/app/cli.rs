use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use plan_engine::{DomainKind, DomainVariant};

use super::planner::{BackendKind, PlannerSettings};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Help,
    Pddl {
        problem: PathBuf,
        variant: DomainVariant,
    },
    Run(RunOptions),
    CheckResponse {
        response: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RunOptions {
    pub(crate) problem: PathBuf,
    pub(crate) plan: Option<PathBuf>,
    pub(crate) domain: Option<PathBuf>,
    pub(crate) kind: Option<DomainKind>,
    pub(crate) variant: DomainVariant,
    pub(crate) config: Option<PathBuf>,
    pub(crate) speed: Option<f64>,
    pub(crate) realtime: bool,
    pub(crate) use_cache: bool,
    pub(crate) home: Option<PathBuf>,
    pub(crate) planner: PlannerSettings,
}

impl RunOptions {
    fn new(problem: PathBuf) -> Self {
        Self {
            problem,
            plan: None,
            domain: None,
            kind: None,
            variant: DomainVariant::Classical,
            config: None,
            speed: None,
            realtime: false,
            use_cache: true,
            home: None,
            planner: PlannerSettings::default(),
        }
    }
}

pub(crate) fn parse_args(args: &[String]) -> Result<Command, String> {
    let Some(command) = args.first() else {
        return Err(usage_text());
    };
    let rest = &args[1..];
    match command.as_str() {
        "-h" | "--help" | "help" => Ok(Command::Help),
        "pddl" => parse_pddl(rest),
        "run" => parse_run(rest),
        "check-response" => parse_check_response(rest),
        other => Err(format!("unknown subcommand '{other}'")),
    }
}

fn parse_pddl(args: &[String]) -> Result<Command, String> {
    let mut problem = None;
    let mut variant = DomainVariant::Classical;
    let mut index = 0usize;
    while index < args.len() {
        match args[index].as_str() {
            "--problem" => problem = Some(PathBuf::from(value_of(args, index, "--problem")?)),
            "--variant" => {
                variant = parse_value(args, index, "--variant", "classical|numeric|temporal|event")?
            }
            other => return Err(format!("unknown pddl argument '{other}'")),
        }
        index += 2;
    }
    let problem = problem.ok_or_else(|| "pddl requires --problem <file>".to_string())?;
    Ok(Command::Pddl { problem, variant })
}

fn parse_run(args: &[String]) -> Result<Command, String> {
    let mut problem = None;
    let mut options = RunOptions::new(PathBuf::new());
    let mut index = 0usize;
    while index < args.len() {
        let flag = args[index].as_str();
        let mut consumed = 2;
        match flag {
            "--problem" => problem = Some(PathBuf::from(value_of(args, index, flag)?)),
            "--plan" => options.plan = Some(PathBuf::from(value_of(args, index, flag)?)),
            "--domain" => options.domain = Some(PathBuf::from(value_of(args, index, flag)?)),
            "--kind" => {
                options.kind = Some(parse_value(args, index, flag, "elevator|logistics|robot")?)
            }
            "--variant" => {
                options.variant =
                    parse_value(args, index, flag, "classical|numeric|temporal|event")?
            }
            "--config" => options.config = Some(PathBuf::from(value_of(args, index, flag)?)),
            "--speed" => {
                let speed: f64 = parse_value(args, index, flag, "positive number")?;
                if !(speed.is_finite() && speed > 0.0) {
                    return Err(format!(
                        "invalid --speed value '{speed}' (expected positive number)"
                    ));
                }
                options.speed = Some(speed);
            }
            "--home" => options.home = Some(PathBuf::from(value_of(args, index, flag)?)),
            "--planner" => {
                options.planner.backend = parse_value(args, index, flag, "http|process")?
            }
            "--planner-url" => options.planner.url = value_of(args, index, flag)?.to_string(),
            "--planner-timeout-secs" => {
                let secs: u64 = parse_value(args, index, flag, "u64")?;
                options.planner.timeout = Duration::from_secs(secs);
            }
            "--solver-jar" => options.planner.solver_jar = value_of(args, index, flag)?.to_string(),
            "--realtime" => {
                options.realtime = true;
                consumed = 1;
            }
            "--no-cache" => {
                options.use_cache = false;
                consumed = 1;
            }
            other => return Err(format!("unknown run argument '{other}'")),
        }
        index += consumed;
    }

    options.problem = problem.ok_or_else(|| "run requires --problem <file>".to_string())?;
    if options.plan.is_some() && options.domain.is_some() {
        return Err("run accepts either --plan or --domain, not both".to_string());
    }
    Ok(Command::Run(options))
}

fn parse_check_response(args: &[String]) -> Result<Command, String> {
    match args {
        [flag, value] if flag == "--response" => Ok(Command::CheckResponse {
            response: PathBuf::from(value),
        }),
        [flag] if flag == "--response" => Err("missing value for --response".to_string()),
        _ => Err("check-response requires --response <file>".to_string()),
    }
}

fn value_of<'a>(args: &'a [String], index: usize, flag: &str) -> Result<&'a str, String> {
    args.get(index + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("missing value for {flag}"))
}

fn parse_value<T: FromStr>(
    args: &[String],
    index: usize,
    flag: &str,
    expected: &str,
) -> Result<T, String> {
    let value = value_of(args, index, flag)?;
    value
        .parse::<T>()
        .map_err(|_| format!("invalid {flag} value '{value}' (expected {expected})"))
}

impl FromStr for BackendKind {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "http" => Ok(Self::Http),
            "process" => Ok(Self::Process),
            _ => Err(()),
        }
    }
}

pub(crate) fn usage_text() -> String {
    [
        "planvis - PDDL plan execution engine",
        "",
        "Usage:",
        "  planvis pddl --problem <problem.json> [--variant <v>]",
        "  planvis run --problem <problem.json> [--plan <plan.txt> | --domain <domain.pddl>]",
        "              [--kind <k>] [--variant <v>] [--config <run.json>] [--speed <x>]",
        "              [--realtime] [--no-cache] [--home <dir>]",
        "              [--planner http|process] [--planner-url <url>]",
        "              [--planner-timeout-secs <u64>] [--solver-jar <path>]",
        "  planvis check-response --response <response.json>",
        "",
        "Defaults:",
        "  --variant classical",
        "  --kind    problem domain name",
        "  --planner http (http://localhost:5000/plan, 180 s)",
        "  --home    $PLANVIS_HOME or ./.planvis",
    ]
    .join("\n")
}
