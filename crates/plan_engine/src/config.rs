use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Distance model for elevator cars. A car covers `distance_per_floor` per floor at
/// `base_speed × (1 − load_slowdown × load / max_load)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ElevatorParams {
    pub distance_per_floor: f64,
    pub base_speed: f64,
    pub load_slowdown: f64,
}

impl Default for ElevatorParams {
    fn default() -> Self {
        Self {
            distance_per_floor: 100.0,
            base_speed: 50.0,
            load_slowdown: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogisticsParams {
    pub drive_fuel_cost: f64,
    pub fly_fuel_cost: f64,
    pub fuel_capacity: f64,
    /// Fuel given to vehicles the problem leaves without a fuel level.
    pub initial_fuel: Option<f64>,
}

impl Default for LogisticsParams {
    fn default() -> Self {
        Self {
            drive_fuel_cost: 10.0,
            fly_fuel_cost: 20.0,
            fuel_capacity: 100.0,
            initial_fuel: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RobotParams {
    /// Distance units between two connected rooms.
    pub route_length: f64,
    pub move_speed: f64,
    /// Battery drained per time unit while moving.
    pub battery_drain_rate: f64,
    /// At or below this level a moving robot stops dead.
    pub depletion_threshold: f64,
    /// Fraction of the missing charge restored per time unit.
    pub charge_rate: f64,
    pub battery_capacity: f64,
}

impl Default for RobotParams {
    fn default() -> Self {
        Self {
            route_length: 5.0,
            move_speed: 1.0,
            battery_drain_rate: 2.0,
            depletion_threshold: 10.0,
            charge_rate: 0.2,
            battery_capacity: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub speed_multiplier: f64,
    /// Duration used for actions that declare none.
    pub default_action_duration: f64,
    pub progress_log_interval_secs: f64,
    pub elevator: ElevatorParams,
    pub logistics: LogisticsParams,
    pub robot: RobotParams,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            speed_multiplier: 1.0,
            default_action_duration: 1.0,
            progress_log_interval_secs: 1.0,
            elevator: ElevatorParams::default(),
            logistics: LogisticsParams::default(),
            robot: RobotParams::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse run config json: {0}")]
    Parse(String),
    #[error("validation failed at {path}: {message}")]
    Validation { path: String, message: String },
}

fn expected_actual(path: &str, expected: impl Display, actual: impl Display) -> ConfigError {
    ConfigError::Validation {
        path: path.to_string(),
        message: format!("expected {expected}, got {actual}"),
    }
}

fn require_positive(path: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(expected_actual(path, "positive finite number", value))
    }
}

fn require_non_negative(path: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(expected_actual(path, "non-negative finite number", value))
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("speed_multiplier", self.speed_multiplier)?;
        require_non_negative("default_action_duration", self.default_action_duration)?;
        require_positive("progress_log_interval_secs", self.progress_log_interval_secs)?;

        require_positive("elevator.distance_per_floor", self.elevator.distance_per_floor)?;
        require_positive("elevator.base_speed", self.elevator.base_speed)?;
        let slowdown = self.elevator.load_slowdown;
        if !(slowdown.is_finite() && (0.0..1.0).contains(&slowdown)) {
            return Err(expected_actual(
                "elevator.load_slowdown",
                "number in [0, 1)",
                slowdown,
            ));
        }

        require_non_negative("logistics.drive_fuel_cost", self.logistics.drive_fuel_cost)?;
        require_non_negative("logistics.fly_fuel_cost", self.logistics.fly_fuel_cost)?;
        require_positive("logistics.fuel_capacity", self.logistics.fuel_capacity)?;
        if let Some(initial) = self.logistics.initial_fuel {
            require_non_negative("logistics.initial_fuel", initial)?;
            if initial > self.logistics.fuel_capacity {
                return Err(expected_actual(
                    "logistics.initial_fuel",
                    format!("at most fuel_capacity {}", self.logistics.fuel_capacity),
                    initial,
                ));
            }
        }

        require_positive("robot.route_length", self.robot.route_length)?;
        require_positive("robot.move_speed", self.robot.move_speed)?;
        require_non_negative("robot.battery_drain_rate", self.robot.battery_drain_rate)?;
        require_positive("robot.charge_rate", self.robot.charge_rate)?;
        require_positive("robot.battery_capacity", self.robot.battery_capacity)?;
        require_non_negative("robot.depletion_threshold", self.robot.depletion_threshold)?;
        if self.robot.depletion_threshold >= self.robot.battery_capacity {
            return Err(expected_actual(
                "robot.depletion_threshold",
                format!("below battery_capacity {}", self.robot.battery_capacity),
                self.robot.depletion_threshold,
            ));
        }
        Ok(())
    }
}

pub fn parse_run_config_json(raw: &str) -> Result<RunConfig, ConfigError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    let config = match serde_path_to_error::deserialize::<_, RunConfig>(&mut deserializer) {
        Ok(config) => config,
        Err(error) => {
            let path = error.path().to_string();
            let source = error.into_inner();
            return if path.is_empty() || path == "." {
                Err(ConfigError::Parse(source.to_string()))
            } else {
                Err(ConfigError::Parse(format!("at {path}: {source}")))
            };
        }
    };
    config.validate()?;
    Ok(config)
}

pub fn load_run_config(path: &Path) -> Result<RunConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_run_config_json(&raw)
}
