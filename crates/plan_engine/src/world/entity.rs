use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a declared problem object. Stored lower-cased so lookups are
/// case-insensitive the way planner output treats object names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<EntityId> for String {
    fn from(value: EntityId) -> Self {
        value.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    Truck,
    Airplane,
    Package,
    Location,
    Airport,
    City,
    Person,
    Elevator,
    Floor,
    Robot,
    Room,
    Ball,
    Other(String),
}

impl EntityKind {
    pub fn from_type_name(type_name: &str) -> Self {
        let lowered = type_name.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "truck" => Self::Truck,
            "airplane" | "plane" => Self::Airplane,
            "package" | "obj" => Self::Package,
            "location" | "place" => Self::Location,
            "airport" => Self::Airport,
            "city" => Self::City,
            "person" | "passenger" => Self::Person,
            "elevator" | "lift" => Self::Elevator,
            "floor" => Self::Floor,
            "robot" | "robby" => Self::Robot,
            "room" => Self::Room,
            "ball" => Self::Ball,
            _ => Self::Other(lowered),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Truck => "truck",
            Self::Airplane => "airplane",
            Self::Package => "package",
            Self::Location => "location",
            Self::Airport => "airport",
            Self::City => "city",
            Self::Person => "person",
            Self::Elevator => "elevator",
            Self::Floor => "floor",
            Self::Robot => "robot",
            Self::Room => "room",
            Self::Ball => "ball",
            Self::Other(name) => name,
        }
    }

    /// Vehicles that burn fuel when moving.
    pub fn is_vehicle(&self) -> bool {
        matches!(self, Self::Truck | Self::Airplane)
    }

    /// Places a vehicle or package can stand at.
    pub fn is_place(&self) -> bool {
        matches!(self, Self::Location | Self::Airport)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_compare_case_insensitively() {
        assert_eq!(EntityId::new("Truck1"), EntityId::new("truck1"));
        assert_eq!(EntityId::new(" E1 ").as_str(), "e1");
    }

    #[test]
    fn unknown_type_names_are_kept_lowercased() {
        assert_eq!(EntityKind::from_type_name("Airport"), EntityKind::Airport);
        assert_eq!(
            EntityKind::from_type_name("Gripper"),
            EntityKind::Other("gripper".to_string())
        );
        assert_eq!(EntityKind::from_type_name("Gripper").type_name(), "gripper");
    }
}
