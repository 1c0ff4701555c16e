use std::collections::HashSet;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemObject {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicateInstance {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl PredicateInstance {
    pub fn new(name: &str, args: &[&str]) -> Self {
        Self {
            name: name.trim().to_string(),
            args: args.iter().map(|arg| arg.trim().to_string()).collect(),
        }
    }

    fn same_instance(&self, name: &str, args: &[&str]) -> bool {
        self.name == name.trim()
            && self.args.len() == args.len()
            && self
                .args
                .iter()
                .zip(args)
                .all(|(own, other)| own == other.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionAssignment {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub value: f64,
}

#[derive(Debug, Error)]
pub enum ProblemError {
    #[error("parse problem json: {0}")]
    Parse(String),
    #[error("validation failed at {path}: {message}")]
    Validation { path: String, message: String },
}

impl ProblemError {
    fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    fn expected_actual(
        path: impl Into<String>,
        expected: impl Display,
        actual: impl Display,
    ) -> Self {
        Self::validation(path, format!("expected {expected}, got {actual}"))
    }
}

/// A problem as composed incrementally by a user. Duplicates are tolerated here and
/// suppressed when the problem is serialized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProblemModel {
    pub problem_name: String,
    pub domain_name: String,
    objects: Vec<ProblemObject>,
    predicates: Vec<PredicateInstance>,
    functions: Vec<FunctionAssignment>,
    goals: Vec<PredicateInstance>,
}

impl ProblemModel {
    pub fn new(problem_name: &str, domain_name: &str) -> Self {
        Self {
            problem_name: problem_name.trim().to_string(),
            domain_name: domain_name.trim().to_string(),
            ..Self::default()
        }
    }

    pub fn objects(&self) -> &[ProblemObject] {
        &self.objects
    }

    pub fn predicates(&self) -> &[PredicateInstance] {
        &self.predicates
    }

    pub fn functions(&self) -> &[FunctionAssignment] {
        &self.functions
    }

    pub fn goals(&self) -> &[PredicateInstance] {
        &self.goals
    }

    pub fn add_object(&mut self, name: &str, type_name: &str) {
        self.objects.push(ProblemObject {
            name: name.trim().to_string(),
            type_name: type_name.trim().to_string(),
        });
    }

    /// Adds `label1..=labelN` objects of `type_name`, skipping names already declared.
    /// Returns the names that were added.
    pub fn add_numbered_objects(
        &mut self,
        label: &str,
        type_name: &str,
        count: u32,
    ) -> Vec<String> {
        let prefix = label.trim().to_ascii_lowercase();
        let mut added = Vec::new();
        for index in 1..=count {
            let name = format!("{prefix}{index}");
            if self.objects.iter().any(|object| object.name == name) {
                continue;
            }
            self.add_object(&name, type_name);
            added.push(name);
        }
        added
    }

    pub fn remove_object(&mut self, name: &str) -> bool {
        let before = self.objects.len();
        self.objects.retain(|object| object.name != name.trim());
        before != self.objects.len()
    }

    /// Adds an init predicate. The assignment forms `("=", [fn, args.., value])` and
    /// `("assign", ..)` are routed into a function assignment when the value parses.
    pub fn add_predicate(&mut self, name: &str, args: &[&str]) {
        if let Some((function, function_args, value)) = split_assignment(name, args) {
            self.add_function(function, function_args, value);
            return;
        }
        self.predicates.push(PredicateInstance::new(name, args));
    }

    /// Removes every instance equal to `(name, args)`. Returns how many were removed.
    pub fn remove_predicate(&mut self, name: &str, args: &[&str]) -> usize {
        let before = self.predicates.len();
        self.predicates
            .retain(|predicate| !predicate.same_instance(name, args));
        before - self.predicates.len()
    }

    pub fn add_function(&mut self, name: &str, args: &[&str], value: f64) {
        self.functions.push(FunctionAssignment {
            name: name.trim().to_string(),
            args: args.iter().map(|arg| arg.trim().to_string()).collect(),
            value,
        });
    }

    pub fn add_goal(&mut self, name: &str, args: &[&str]) {
        self.goals.push(PredicateInstance::new(name, args));
    }

    pub fn remove_goal(&mut self, name: &str, args: &[&str]) -> usize {
        let before = self.goals.len();
        self.goals.retain(|goal| !goal.same_instance(name, args));
        before - self.goals.len()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        self.predicates.clear();
        self.functions.clear();
        self.goals.clear();
    }

    /// Checks that every name is a usable PDDL symbol and every value is finite.
    pub fn validate(&self) -> Result<(), ProblemError> {
        check_symbol("problem_name", &self.problem_name)?;
        check_symbol("domain_name", &self.domain_name)?;
        for (index, object) in self.objects.iter().enumerate() {
            check_symbol(&format!("objects[{index}].name"), &object.name)?;
            check_symbol(&format!("objects[{index}].type"), &object.type_name)?;
        }
        for (index, predicate) in self.predicates.iter().enumerate() {
            check_atom(&format!("predicates[{index}]"), predicate)?;
        }
        for (index, goal) in self.goals.iter().enumerate() {
            check_atom(&format!("goals[{index}]"), goal)?;
        }
        for (index, function) in self.functions.iter().enumerate() {
            let path = format!("functions[{index}]");
            check_symbol(&format!("{path}.name"), &function.name)?;
            for (arg_index, arg) in function.args.iter().enumerate() {
                check_symbol(&format!("{path}.args[{arg_index}]"), arg)?;
            }
            if !function.value.is_finite() {
                return Err(ProblemError::expected_actual(
                    format!("{path}.value"),
                    "finite number",
                    function.value,
                ));
            }
        }
        Ok(())
    }
}

fn split_assignment<'a>(name: &str, args: &'a [&'a str]) -> Option<(&'a str, &'a [&'a str], f64)> {
    let name = name.trim();
    if name != "=" && !name.eq_ignore_ascii_case("assign") {
        return None;
    }
    let (value, rest) = args.split_last()?;
    let (function, function_args) = rest.split_first()?;
    let value = value.trim().parse::<f64>().ok()?;
    Some((function, function_args, value))
}

fn check_atom(path: &str, atom: &PredicateInstance) -> Result<(), ProblemError> {
    check_symbol(&format!("{path}.name"), &atom.name)?;
    for (index, arg) in atom.args.iter().enumerate() {
        check_symbol(&format!("{path}.args[{index}]"), arg)?;
    }
    Ok(())
}

fn check_symbol(path: &str, value: &str) -> Result<(), ProblemError> {
    if value.is_empty() {
        return Err(ProblemError::expected_actual(path, "non-empty name", "''"));
    }
    if let Some(bad) = value
        .chars()
        .find(|ch| ch.is_whitespace() || matches!(ch, '(' | ')' | ';'))
    {
        return Err(ProblemError::validation(
            path,
            format!("'{value}' contains invalid character {bad:?}"),
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProblemFile {
    problem_name: String,
    domain_name: String,
    #[serde(default)]
    objects: Vec<ProblemObject>,
    #[serde(default)]
    predicates: Vec<PredicateInstance>,
    #[serde(default)]
    functions: Vec<FunctionAssignment>,
    #[serde(default)]
    goals: Vec<PredicateInstance>,
}

/// Parses a composed problem from JSON and validates it.
pub fn parse_problem_json(raw: &str) -> Result<ProblemModel, ProblemError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    let file = match serde_path_to_error::deserialize::<_, ProblemFile>(&mut deserializer) {
        Ok(file) => file,
        Err(error) => {
            let path = error.path().to_string();
            let source = error.into_inner();
            return if path.is_empty() || path == "." {
                Err(ProblemError::Parse(source.to_string()))
            } else {
                Err(ProblemError::Parse(format!("at {path}: {source}")))
            };
        }
    };

    let mut problem = ProblemModel::new(&file.problem_name, &file.domain_name);
    for object in &file.objects {
        problem.add_object(&object.name, &object.type_name);
    }
    for predicate in &file.predicates {
        let args = predicate.args.iter().map(String::as_str).collect::<Vec<_>>();
        problem.add_predicate(&predicate.name, &args);
    }
    for function in &file.functions {
        let args = function.args.iter().map(String::as_str).collect::<Vec<_>>();
        problem.add_function(&function.name, &args, function.value);
    }
    for goal in &file.goals {
        let args = goal.args.iter().map(String::as_str).collect::<Vec<_>>();
        problem.add_goal(&goal.name, &args);
    }
    problem.validate()?;
    Ok(problem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_predicates_become_functions() {
        let mut problem = ProblemModel::new("p", "d");
        problem.add_predicate("=", &["floors", "3"]);
        problem.add_predicate("assign", &["capacity", "e1", "2"]);

        assert!(problem.predicates().is_empty());
        assert_eq!(problem.functions().len(), 2);
        assert_eq!(problem.functions()[0].name, "floors");
        assert!(problem.functions()[0].args.is_empty());
        assert_eq!(problem.functions()[1].args, vec!["e1".to_string()]);
        assert_eq!(problem.functions()[1].value, 2.0);
    }

    #[test]
    fn malformed_assignment_stays_a_predicate() {
        let mut problem = ProblemModel::new("p", "d");
        problem.add_predicate("=", &["floors", "many"]);

        assert!(problem.functions().is_empty());
        assert_eq!(problem.predicates().len(), 1);
    }

    #[test]
    fn remove_predicate_drops_every_duplicate() {
        let mut problem = ProblemModel::new("p", "d");
        problem.add_predicate("at", &["p1", "loc1"]);
        problem.add_predicate("at", &["p1", "loc1"]);
        problem.add_predicate("at", &["p2", "loc1"]);

        assert_eq!(problem.remove_predicate("at", &["p1", "loc1"]), 2);
        assert_eq!(problem.remove_predicate("at", &["p1", "loc1"]), 0);
        assert_eq!(problem.predicates().len(), 1);
    }

    #[test]
    fn numbered_objects_use_lowercase_label_and_skip_existing() {
        let mut problem = ProblemModel::new("p", "d");
        problem.add_object("truck1", "truck");

        let added = problem.add_numbered_objects("Truck", "truck", 3);

        assert_eq!(added, vec!["truck2".to_string(), "truck3".to_string()]);
        assert_eq!(problem.objects().len(), 3);
    }

    #[test]
    fn validate_reports_path_of_bad_symbol() {
        let mut problem = ProblemModel::new("p", "d");
        problem.add_object("ok", "ball");
        problem.add_object("bad name", "ball");

        let err = problem.validate().expect_err("whitespace in name");
        assert!(err.to_string().contains("objects[1].name"), "{err}");
    }

    #[test]
    fn parse_problem_json_reports_field_path() {
        let raw = r#"{"problem_name":"p","domain_name":"d","objects":[{"name":"a","type":7}]}"#;
        let err = parse_problem_json(raw).expect_err("type must be a string");

        assert!(err.to_string().contains("objects[0].type"), "{err}");
    }

    #[test]
    fn parse_problem_json_routes_assignments() {
        let raw = r#"{
            "problem_name": "lift",
            "domain_name": "elevator",
            "objects": [{"name": "e1", "type": "elevator"}],
            "predicates": [{"name": "=", "args": ["capacity", "e1", "4"]}],
            "goals": [{"name": "reached", "args": ["p1", "f2"]}]
        }"#;
        let problem = parse_problem_json(raw).expect("parse");

        assert_eq!(problem.functions().len(), 1);
        assert_eq!(problem.functions()[0].value, 4.0);
        assert_eq!(problem.goals().len(), 1);
    }
}
