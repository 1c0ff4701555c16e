use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RunConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainKind {
    Elevator,
    Logistics,
    Robot,
}

impl DomainKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Elevator => "elevator",
            Self::Logistics => "logistics",
            Self::Robot => "robot",
        }
    }
}

impl fmt::Display for DomainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DomainKind {
    type Err = DomainSelectionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "elevator" | "lift" => Ok(Self::Elevator),
            "logistics" | "logistic" => Ok(Self::Logistics),
            "robot" | "robots" => Ok(Self::Robot),
            _ => Err(DomainSelectionError::UnknownKind(raw.to_string())),
        }
    }
}

/// Flavour of the domain file: which plan dialect the planner answers with and
/// whether numeric fluents are part of the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainVariant {
    Classical,
    Numeric,
    Temporal,
    Event,
}

impl DomainVariant {
    pub fn name(self) -> &'static str {
        match self {
            Self::Classical => "classical",
            Self::Numeric => "numeric",
            Self::Temporal => "temporal",
            Self::Event => "event",
        }
    }

    pub fn uses_functions(self) -> bool {
        !matches!(self, Self::Classical)
    }
}

impl fmt::Display for DomainVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DomainVariant {
    type Err = DomainSelectionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "classical" | "normal" => Ok(Self::Classical),
            "numeric" | "2-1" => Ok(Self::Numeric),
            "temporal" => Ok(Self::Temporal),
            "event" | "plus" => Ok(Self::Event),
            _ => Err(DomainSelectionError::UnknownVariant(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainSelectionError {
    #[error("unknown domain '{0}' (expected elevator, logistics or robot)")]
    UnknownKind(String),
    #[error("unknown domain variant '{0}' (expected classical, numeric, temporal or event)")]
    UnknownVariant(String),
    #[error("the {kind} domain has no {variant} variant")]
    Unsupported {
        kind: DomainKind,
        variant: DomainVariant,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainSelection {
    kind: DomainKind,
    variant: DomainVariant,
}

impl DomainSelection {
    pub fn new(kind: DomainKind, variant: DomainVariant) -> Result<Self, DomainSelectionError> {
        let selection = Self { kind, variant };
        if selection.lookup_file_name().is_none() {
            return Err(DomainSelectionError::Unsupported { kind, variant });
        }
        Ok(selection)
    }

    pub fn kind(self) -> DomainKind {
        self.kind
    }

    pub fn variant(self) -> DomainVariant {
        self.variant
    }

    /// File name of the shipped domain definition for this selection.
    pub fn domain_file_name(self) -> &'static str {
        self.lookup_file_name().unwrap_or("domain.pddl")
    }

    fn lookup_file_name(self) -> Option<&'static str> {
        use DomainKind::*;
        use DomainVariant::*;
        match (self.kind, self.variant) {
            (Elevator, Classical) => Some("domain-elevator-normal-capacity-infinity.pddl"),
            (Elevator, Numeric) => Some("domain-elevator-numeric.pddl"),
            (Elevator, Event) => Some("domain-elevator-event.pddl"),
            (Logistics, Classical) => Some("domain-logistic-normal.pddl"),
            (Logistics, Numeric) => Some("domain-logistic-2-1.pddl"),
            (Logistics, Event) => Some("domain-logistic-plus.pddl"),
            (Robot, Classical) => Some("domain-robot-normal.pddl"),
            (Robot, Temporal) => Some("domain-robot-temporal.pddl"),
            (Robot, Event) => Some("domain-robot-event.pddl"),
            _ => None,
        }
    }
}

impl fmt::Display for DomainSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.variant)
    }
}

/// Everything one run needs, created per run and dropped with it.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub label: String,
    pub domain: DomainSelection,
    pub config: RunConfig,
}

impl RunContext {
    pub fn new(label: impl Into<String>, domain: DomainSelection, config: RunConfig) -> Self {
        Self {
            label: label.into(),
            domain,
            config,
        }
    }
}
