use std::collections::{HashMap, HashSet};

use crate::context::DomainVariant;

use super::model::{PredicateInstance, ProblemModel};

/// Renders a [`ProblemModel`] as PDDL problem text.
///
/// Objects are grouped by type in first-appearance order. Predicates and goals are
/// deduplicated by name and argument tuple. Function assignments are only emitted for
/// variants that use numeric fluents; a repeated assignment keeps its first position and
/// takes the last value.
#[derive(Debug, Clone, Copy)]
pub struct PddlSerializer {
    emit_functions: bool,
}

impl PddlSerializer {
    pub fn for_variant(variant: DomainVariant) -> Self {
        Self {
            emit_functions: variant.uses_functions(),
        }
    }

    pub fn serialize(&self, problem: &ProblemModel) -> String {
        let mut out = format!(
            "(define (problem {})\n\t(:domain {})\n",
            problem.problem_name, problem.domain_name
        );

        out.push_str("\t(:objects\n");
        for (type_name, names) in group_objects(problem) {
            out.push_str(&format!("\t\t{} - {}\n", names.join(" "), type_name));
        }
        out.push_str("\t)\n");

        out.push_str("\t(:init\n");
        for predicate in dedup_atoms(problem.predicates()) {
            out.push_str(&format!("\t\t{}\n", format_atom(&predicate.name, &predicate.args)));
        }
        if self.emit_functions {
            for (name, args, value) in dedup_functions(problem) {
                out.push_str(&format!("\t\t(= {} {})\n", format_atom(name, args), value));
            }
        }
        out.push_str("\t)\n");

        out.push_str("\t(:goal\n\t\t(and\n");
        for goal in dedup_atoms(problem.goals()) {
            out.push_str(&format!("\t\t\t{}\n", format_atom(&goal.name, &goal.args)));
        }
        out.push_str("\t\t)\n\t)\n)\n");
        out
    }
}

/// Names compare the way `EntityId` does, ignoring ASCII case. Output keeps the
/// first spelling seen.
fn identity_key(name: &str, args: &[String]) -> (String, Vec<String>) {
    (
        name.to_ascii_lowercase(),
        args.iter().map(|arg| arg.to_ascii_lowercase()).collect(),
    )
}

fn group_objects(problem: &ProblemModel) -> Vec<(&str, Vec<&str>)> {
    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    let mut seen_names = HashSet::new();
    for object in problem.objects() {
        if !seen_names.insert(object.name.to_ascii_lowercase()) {
            continue;
        }
        match groups
            .iter_mut()
            .find(|(type_name, _)| *type_name == object.type_name)
        {
            Some((_, names)) => names.push(object.name.as_str()),
            None => groups.push((object.type_name.as_str(), vec![object.name.as_str()])),
        }
    }
    groups
}

fn dedup_atoms(atoms: &[PredicateInstance]) -> Vec<&PredicateInstance> {
    let mut seen = HashSet::new();
    atoms
        .iter()
        .filter(|atom| seen.insert(identity_key(&atom.name, &atom.args)))
        .collect()
}

fn dedup_functions(problem: &ProblemModel) -> Vec<(&str, &[String], f64)> {
    let mut order: Vec<(&str, &[String], f64)> = Vec::new();
    let mut slots: HashMap<(String, Vec<String>), usize> = HashMap::new();
    for function in problem.functions() {
        let key = identity_key(&function.name, &function.args);
        match slots.get(&key).copied() {
            Some(index) => order[index].2 = function.value,
            None => {
                slots.insert(key, order.len());
                order.push((function.name.as_str(), function.args.as_slice(), function.value));
            }
        }
    }
    order
}

fn format_atom(name: &str, args: &[String]) -> String {
    if args.is_empty() {
        format!("({name})")
    } else {
        format!("({name} {})", args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logistics_problem() -> ProblemModel {
        let mut problem = ProblemModel::new("deliver", "logistics");
        problem.add_object("truck1", "truck");
        problem.add_object("loc1", "location");
        problem.add_object("p1", "package");
        problem.add_object("truck2", "truck");
        problem.add_object("loc2", "location");
        problem.add_predicate("at", &["truck1", "loc1"]);
        problem.add_predicate("at", &["p1", "loc1"]);
        problem.add_predicate("at", &["p1", "loc1"]);
        problem.add_function("fuel", &["truck1"], 30.0);
        problem.add_goal("at", &["p1", "loc2"]);
        problem.add_goal("at", &["p1", "loc2"]);
        problem
    }

    #[test]
    fn layout_matches_expected_text() {
        let text =
            PddlSerializer::for_variant(DomainVariant::Numeric).serialize(&logistics_problem());
        let expected = "(define (problem deliver)\n\
\t(:domain logistics)\n\
\t(:objects\n\
\t\ttruck1 truck2 - truck\n\
\t\tloc1 loc2 - location\n\
\t\tp1 - package\n\
\t)\n\
\t(:init\n\
\t\t(at truck1 loc1)\n\
\t\t(at p1 loc1)\n\
\t\t(= (fuel truck1) 30)\n\
\t)\n\
\t(:goal\n\
\t\t(and\n\
\t\t\t(at p1 loc2)\n\
\t\t)\n\
\t)\n\
)\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn duplicate_predicate_is_emitted_once() {
        let text =
            PddlSerializer::for_variant(DomainVariant::Classical).serialize(&logistics_problem());
        assert_eq!(text.matches("(at p1 loc1)").count(), 1);
        assert_eq!(text.matches("(at p1 loc2)").count(), 1);
    }

    #[test]
    fn names_differing_only_in_case_are_one_entity() {
        let mut problem = ProblemModel::new("deliver", "logistics");
        problem.add_object("P1", "package");
        problem.add_object("p1", "package");
        problem.add_object("loc1", "location");
        problem.add_predicate("at", &["P1", "loc1"]);
        problem.add_predicate("at", &["p1", "LOC1"]);
        problem.add_function("weight", &["P1"], 2.0);
        problem.add_function("weight", &["p1"], 3.0);
        problem.add_goal("at", &["p1", "loc1"]);
        problem.add_goal("AT", &["P1", "loc1"]);

        let text = PddlSerializer::for_variant(DomainVariant::Numeric).serialize(&problem);

        assert!(text.contains("\t\tP1 - package\n"), "{text}");
        assert!(!text.contains("p1 - package"), "{text}");
        assert_eq!(text.to_ascii_lowercase().matches("(at p1 loc1)").count(), 2);
        assert_eq!(text.matches("(at P1 loc1)").count(), 1);
        assert_eq!(text.matches("(at p1 loc1)").count(), 1);
        assert_eq!(text.matches("(= (weight P1) 3)").count(), 1);
        assert!(!text.contains("(weight p1)"), "{text}");
    }

    #[test]
    fn classical_variant_omits_functions() {
        let text =
            PddlSerializer::for_variant(DomainVariant::Classical).serialize(&logistics_problem());
        assert!(!text.contains("(= "));
    }

    #[test]
    fn zero_argument_function_uses_bare_form_and_last_value_wins() {
        let mut problem = ProblemModel::new("lift", "elevator");
        problem.add_predicate("=", &["floors", "3"]);
        problem.add_function("capacity", &["e1"], 2.0);
        problem.add_function("floors", &[], 4.0);

        let text = PddlSerializer::for_variant(DomainVariant::Event).serialize(&problem);
        let floors = text.find("(= (floors) 4)").expect("floors assignment");
        let capacity = text.find("(= (capacity e1) 2)").expect("capacity assignment");
        assert!(floors < capacity);
        assert!(!text.contains("(= (floors) 3)"));
    }

    #[test]
    fn reserializing_a_deduplicated_model_is_identical() {
        let serializer = PddlSerializer::for_variant(DomainVariant::Numeric);
        let first = serializer.serialize(&logistics_problem());

        let mut clean = ProblemModel::new("deliver", "logistics");
        for (name, type_name) in [
            ("truck1", "truck"),
            ("loc1", "location"),
            ("p1", "package"),
            ("truck2", "truck"),
            ("loc2", "location"),
        ] {
            clean.add_object(name, type_name);
        }
        clean.add_predicate("at", &["truck1", "loc1"]);
        clean.add_predicate("at", &["p1", "loc1"]);
        clean.add_function("fuel", &["truck1"], 30.0);
        clean.add_goal("at", &["p1", "loc2"]);

        assert_eq!(serializer.serialize(&clean), first);
        assert_eq!(serializer.serialize(&clean), serializer.serialize(&clean));
    }

    #[test]
    fn sections_are_balanced_for_empty_problem() {
        let text = PddlSerializer::for_variant(DomainVariant::Classical)
            .serialize(&ProblemModel::new("empty", "robot"));
        let opens = text.matches('(').count();
        let closes = text.matches(')').count();
        assert_eq!(opens, closes);
        assert_eq!(text.matches("(:objects").count(), 1);
        assert_eq!(text.matches("(:init").count(), 1);
        assert_eq!(text.matches("(:goal").count(), 1);
    }
}
