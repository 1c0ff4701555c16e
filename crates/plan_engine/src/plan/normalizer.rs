use tracing::{debug, warn};

use crate::context::RunContext;
use crate::world::EntityId;

use super::types::{NormalizedPlan, PlanDiagnostic, PlanDialect, PlanErrorCode, TimedAction};

const WAITING_MARKER: &str = "-----waiting----";

/// Turns raw planner output into a time-ordered list of [`TimedAction`]s.
///
/// Four line shapes are understood: bare `(verb args)` lines, `T: (verb args)` lines,
/// the same with a trailing `[D]` duration, and `-----waiting---- [T]` markers. Any
/// other line is skipped without a diagnostic.
#[derive(Debug, Clone, Copy)]
pub struct PlanTextNormalizer {
    fallback_duration: f64,
}

#[derive(Debug)]
enum LineTime {
    Positional,
    Explicit(f64),
}

#[derive(Debug)]
struct ParsedAction {
    prefixed: bool,
    time: LineTime,
    declared_duration: Option<f64>,
    name: String,
    args: Vec<EntityId>,
}

#[derive(Debug)]
enum ParsedLine {
    Skip,
    Action(ParsedAction),
    Waiting(f64),
}

impl PlanTextNormalizer {
    pub fn new(ctx: &RunContext) -> Self {
        Self::with_fallback_duration(ctx.config.default_action_duration)
    }

    pub fn with_fallback_duration(fallback_duration: f64) -> Self {
        Self { fallback_duration }
    }

    pub fn parse_text(&self, text: &str) -> NormalizedPlan {
        self.parse(text.lines())
    }

    pub fn parse<I, S>(&self, lines: I) -> NormalizedPlan
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut diagnostics = Vec::new();
        let mut entries: Vec<(TimedAction, bool)> = Vec::new();
        let mut position = 0usize;
        let mut cursor = 0.0f64;
        let mut last_time = 0.0f64;
        let mut saw_prefix = false;
        let mut saw_bracket = false;
        let mut saw_waiting = false;

        for (index, raw) in lines.into_iter().enumerate() {
            let line_no = index + 1;
            let text = raw.as_ref().trim();
            let parsed = match parse_line(text) {
                Ok(parsed) => parsed,
                Err((code, message)) => {
                    let diagnostic = PlanDiagnostic {
                        code,
                        line: line_no,
                        text: text.to_string(),
                        message,
                    };
                    warn!(line = line_no, diagnostic = %diagnostic, "plan_line_dropped");
                    diagnostics.push(diagnostic);
                    continue;
                }
            };

            match parsed {
                ParsedLine::Skip => {}
                ParsedLine::Waiting(target) => {
                    saw_waiting = true;
                    let gap = target - last_time;
                    if gap > 0.0 {
                        entries.push((TimedAction::wait(last_time, gap, line_no), false));
                    }
                    cursor = target;
                    last_time = last_time.max(target);
                }
                ParsedLine::Action(action) => {
                    saw_prefix |= action.prefixed;
                    let start_time = match action.time {
                        LineTime::Explicit(offset) => cursor + offset,
                        LineTime::Positional => position as f64,
                    };
                    position += 1;
                    last_time = last_time.max(start_time);
                    let has_bracket = action.declared_duration.is_some();
                    saw_bracket |= has_bracket;
                    entries.push((
                        TimedAction {
                            start_time,
                            duration: action.declared_duration.unwrap_or(0.0),
                            name: action.name,
                            args: action.args,
                            line: line_no,
                        },
                        !has_bracket,
                    ));
                }
            }
        }

        let dialect = if saw_waiting {
            PlanDialect::Event
        } else if saw_bracket {
            PlanDialect::Temporal
        } else if saw_prefix {
            PlanDialect::Classical
        } else if !entries.is_empty() {
            PlanDialect::UnorderedList
        } else {
            PlanDialect::Empty
        };

        let mut actions = entries
            .into_iter()
            .map(|(mut action, needs_fallback)| {
                if needs_fallback && dialect == PlanDialect::Temporal {
                    action.duration = self.fallback_duration;
                }
                action
            })
            .collect::<Vec<_>>();
        // sort_by is stable, so equal start times keep their source order.
        actions.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

        debug!(
            dialect = ?dialect,
            action_count = actions.len(),
            dropped_lines = diagnostics.len(),
            "plan_normalized"
        );
        NormalizedPlan {
            dialect,
            actions,
            diagnostics,
        }
    }
}

fn parse_line(text: &str) -> Result<ParsedLine, (PlanErrorCode, String)> {
    if let Some(marker_at) = text.find(WAITING_MARKER) {
        let rest = &text[marker_at + WAITING_MARKER.len()..];
        let target = bracket_value(rest)
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .ok_or_else(|| {
                (
                    PlanErrorCode::MalformedWaitTarget,
                    format!("waiting marker has no usable [time] bracket: '{}'", rest.trim()),
                )
            })?;
        return Ok(ParsedLine::Waiting(target));
    }

    let (prefix, body) = if text.starts_with('(') {
        (None, text)
    } else if let Some(split) = text.find(": (") {
        (Some(text[..split].trim()), &text[split + 2..])
    } else {
        return Ok(ParsedLine::Skip);
    };

    let Some(close) = body.find(')') else {
        return Ok(ParsedLine::Skip);
    };
    let mut words = body[1..close].split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(ParsedLine::Skip);
    };
    let name = verb.to_ascii_lowercase();
    let args = words.map(EntityId::new).collect::<Vec<_>>();

    let trailing = body[close + 1..].trim();
    let declared_duration = if trailing.is_empty() {
        None
    } else if trailing.starts_with('[') {
        let value = bracket_value(trailing)
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|value| value.is_finite() && *value >= 0.0)
            .ok_or_else(|| {
                (
                    PlanErrorCode::MalformedDuration,
                    format!("duration bracket is not a non-negative number: '{trailing}'"),
                )
            })?;
        Some(value)
    } else {
        return Ok(ParsedLine::Skip);
    };

    let time = match prefix {
        None => LineTime::Positional,
        Some(prefix) => parse_prefix_time(prefix)?,
    };

    Ok(ParsedLine::Action(ParsedAction {
        prefixed: prefix.is_some(),
        time,
        declared_duration,
        name,
        args,
    }))
}

fn parse_prefix_time(prefix: &str) -> Result<LineTime, (PlanErrorCode, String)> {
    if prefix.is_empty() {
        return Ok(LineTime::Positional);
    }
    match prefix.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(LineTime::Explicit(value)),
        Ok(value) => Err((
            PlanErrorCode::NonFiniteTime,
            format!("start time {value} is not finite"),
        )),
        Err(_) if looks_numeric(prefix) => Err((
            PlanErrorCode::MalformedTime,
            format!("start time '{prefix}' is not a number"),
        )),
        Err(_) => Ok(LineTime::Positional),
    }
}

fn looks_numeric(prefix: &str) -> bool {
    prefix
        .chars()
        .next()
        .is_some_and(|ch| ch.is_ascii_digit() || matches!(ch, '.' | '-' | '+'))
}

fn bracket_value(text: &str) -> Option<&str> {
    let open = text.find('[')?;
    let close = open + text[open..].find(']')?;
    Some(text[open + 1..close].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> PlanTextNormalizer {
        PlanTextNormalizer::with_fallback_duration(1.0)
    }

    #[test]
    fn makespan_is_latest_end_time() {
        let plan = normalizer().parse([
            "0.0: (drive t1 l1 l2) [2.0]",
            "1.0: (fly a1 c1 c2) [5.0]",
            "3.5: (load-truck p1 t1 l2)",
        ]);

        assert!((plan.makespan() - 6.0).abs() < 1e-9);
        assert_eq!(NormalizedPlan::empty().makespan(), 0.0);
    }

    fn names(plan: &NormalizedPlan) -> Vec<String> {
        plan.actions
            .iter()
            .map(|action| {
                if action.args.is_empty() {
                    action.name.clone()
                } else {
                    let args = action
                        .args
                        .iter()
                        .map(EntityId::as_str)
                        .collect::<Vec<_>>()
                        .join(" ");
                    format!("{} {args}", action.name)
                }
            })
            .collect()
    }

    #[test]
    fn classical_lines_use_position_when_prefix_is_not_a_time() {
        let plan = normalizer().parse([
            "Found Plan:",
            "step 0: (move-up e1 f1 f2)",
            "step 1: (load p1 e1 f2)",
            "Plan-Length:2",
            "Planning Time: 12ms",
        ]);

        assert_eq!(plan.dialect, PlanDialect::Classical);
        assert_eq!(names(&plan), vec!["move-up e1 f1 f2", "load p1 e1 f2"]);
        assert_eq!(plan.actions[0].start_time, 0.0);
        assert_eq!(plan.actions[1].start_time, 1.0);
        assert!(plan.actions.iter().all(|action| action.duration == 0.0));
        assert!(plan.diagnostics.is_empty());
    }

    #[test]
    fn classical_lines_with_explicit_times() {
        let plan = normalizer().parse(["0.0: (LOAD P1 E1 F1)", "1.0: (move-up e1 f1 f2)"]);

        assert_eq!(plan.dialect, PlanDialect::Classical);
        assert_eq!(names(&plan), vec!["load p1 e1 f1", "move-up e1 f1 f2"]);
        assert_eq!(plan.actions[1].start_time, 1.0);
        assert_eq!(plan.actions[1].line, 2);
    }

    #[test]
    fn bare_action_lines_form_an_unordered_list() {
        let plan = normalizer().parse([
            "(pick ball1 room1 r1)",
            "; cost = 2",
            "(drop ball1 room2 r1)",
        ]);

        assert_eq!(plan.dialect, PlanDialect::UnorderedList);
        assert_eq!(plan.actions[1].start_time, 1.0);
        assert_eq!(plan.actions[1].line, 3);
    }

    #[test]
    fn temporal_lines_keep_declared_duration_and_use_fallback_otherwise() {
        let plan = normalizer().parse([
            "2.0: (move r1 room1 room2) [3.000]",
            "6.0: (pick ball1 room2 r1)",
        ]);

        assert_eq!(plan.dialect, PlanDialect::Temporal);
        assert_eq!(plan.actions[0].duration, 3.0);
        assert_eq!(plan.actions[1].duration, 1.0);
    }

    #[test]
    fn output_is_sorted_stably_by_start_time() {
        let plan = normalizer().parse([
            "3.0: (drive t1 l1 l2)",
            "1.0: (load-truck p1 t1 l1)",
            "1.0: (load-truck p2 t1 l1)",
            "0.5: (load-truck p3 t1 l1)",
            "1.0: (load-truck p4 t1 l1)",
        ]);

        assert_eq!(
            names(&plan),
            vec![
                "load-truck p3 t1 l1",
                "load-truck p1 t1 l1",
                "load-truck p2 t1 l1",
                "load-truck p4 t1 l1",
                "drive t1 l1 l2",
            ]
        );
        assert!(plan
            .actions
            .windows(2)
            .all(|pair| pair[0].start_time <= pair[1].start_time));
    }

    #[test]
    fn malformed_numbers_drop_only_their_line() {
        let plan = normalizer().parse([
            "0.0: (load p1 e1 f1)",
            "1.x: (move-up e1 f1 f2)",
            "2.0: (move r1 a b) [oops]",
            "-----waiting---- [soon]",
            "3.0: (unload p1 e1 f2)",
        ]);

        assert_eq!(names(&plan), vec!["load p1 e1 f1", "unload p1 e1 f2"]);
        let codes = plan
            .diagnostics
            .iter()
            .map(|diagnostic| (diagnostic.code, diagnostic.line))
            .collect::<Vec<_>>();
        assert_eq!(
            codes,
            vec![
                (PlanErrorCode::MalformedTime, 2),
                (PlanErrorCode::MalformedDuration, 3),
                (PlanErrorCode::MalformedWaitTarget, 4),
            ]
        );
    }

    #[test]
    fn waiting_marker_synthesizes_wait_and_offsets_following_actions() {
        let plan = normalizer().parse([
            "5.0: (start-drive t1 l1 l2)",
            "-----waiting---- [12]",
            "0.5: (load-truck p1 t1 l2)",
        ]);

        assert_eq!(plan.dialect, PlanDialect::Event);
        assert_eq!(names(&plan), vec!["start-drive t1 l1 l2", "wait", "load-truck p1 t1 l2"]);
        let wait = &plan.actions[1];
        assert!(wait.is_wait());
        assert_eq!(wait.start_time, 5.0);
        assert_eq!(wait.duration, 7.0);
        assert_eq!(plan.actions[2].start_time, 12.5);
    }

    #[test]
    fn waiting_marker_in_the_past_adds_no_wait() {
        let plan = normalizer().parse([
            "5.0: (startcharge r1)",
            "-----waiting---- [4.0]",
            "1.0: (stopcharge r1)",
        ]);

        assert_eq!(names(&plan), vec!["startcharge r1", "stopcharge r1"]);
        assert_eq!(plan.actions[1].start_time, 5.0);
    }

    #[test]
    fn empty_and_header_only_text_yields_empty_plan() {
        let plan = normalizer().parse_text("No solution found\nPlanning Time: 1ms\n");
        assert!(plan.is_empty());
        assert_eq!(plan.dialect, PlanDialect::Empty);
        assert!(plan.diagnostics.is_empty());
    }
}
