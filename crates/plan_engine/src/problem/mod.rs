mod model;
mod serializer;

pub use model::{
    parse_problem_json, FunctionAssignment, PredicateInstance, ProblemError, ProblemModel,
    ProblemObject,
};
pub use serializer::PddlSerializer;
