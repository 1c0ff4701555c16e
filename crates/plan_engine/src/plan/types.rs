use std::fmt;

use crate::world::EntityId;

pub const WAIT_ACTION: &str = "wait";

/// One action of a normalized plan. `duration == 0` marks an instantaneous action.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedAction {
    pub start_time: f64,
    pub duration: f64,
    pub name: String,
    pub args: Vec<EntityId>,
    /// 1-based source line, or 0 for synthesized actions.
    pub line: usize,
}

impl TimedAction {
    pub fn wait(start_time: f64, duration: f64, line: usize) -> Self {
        Self {
            start_time,
            duration,
            name: WAIT_ACTION.to_string(),
            args: Vec::new(),
            line,
        }
    }

    pub fn is_wait(&self) -> bool {
        self.name == WAIT_ACTION
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

impl fmt::Display for TimedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wait() {
            return write!(f, "{:.3}: wait {:.3}", self.start_time, self.duration);
        }
        write!(f, "{:.3}: ({}", self.start_time, self.name)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        if self.duration > 0.0 {
            write!(f, ") [{:.3}]", self.duration)
        } else {
            f.write_str(")")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanDialect {
    Empty,
    UnorderedList,
    Classical,
    Temporal,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanErrorCode {
    MalformedTime,
    NonFiniteTime,
    MalformedDuration,
    MalformedWaitTarget,
}

/// A plan line that looked like an action or a wait marker but could not be used.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDiagnostic {
    pub code: PlanErrorCode,
    pub line: usize,
    pub text: String,
    pub message: String,
}

impl fmt::Display for PlanDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: {} (line={}, text='{}')",
            self.code, self.message, self.line, self.text
        )
    }
}

impl std::error::Error for PlanDiagnostic {}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPlan {
    pub dialect: PlanDialect,
    pub actions: Vec<TimedAction>,
    pub diagnostics: Vec<PlanDiagnostic>,
}

impl NormalizedPlan {
    pub fn empty() -> Self {
        Self {
            dialect: PlanDialect::Empty,
            actions: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Latest end time over all actions.
    pub fn makespan(&self) -> f64 {
        self.actions
            .iter()
            .map(TimedAction::end_time)
            .fold(0.0, f64::max)
    }

    /// Plan text in the timed dialect, one action per line.
    pub fn render(&self) -> String {
        let mut output = String::new();
        for action in &self.actions {
            output.push_str(&action.to_string());
            output.push('\n');
        }
        output
    }
}
