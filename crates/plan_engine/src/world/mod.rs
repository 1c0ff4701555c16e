mod entity;
mod model;

pub use entity::{Entity, EntityId, EntityKind};
pub use model::{
    ConstraintViolation, Effect, Fact, Placement, Relation, RelationKind, ResourceKey,
    WorldInitError, WorldModel,
};
