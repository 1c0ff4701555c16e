use std::env;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub(crate) const SPEED_ENV_VAR: &str = "PLANVIS_SPEED";

pub(crate) fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
    info!(version = env!("CARGO_PKG_VERSION"), "planvis_startup");
}

/// Speed multiplier from `PLANVIS_SPEED`, or `None` when unset or unusable.
pub(crate) fn speed_from_env() -> Option<f64> {
    match env::var(SPEED_ENV_VAR) {
        Ok(value) => {
            let parsed = parse_speed(&value);
            if parsed.is_none() {
                warn!(
                    env_var = SPEED_ENV_VAR,
                    value = value.as_str(),
                    "invalid speed env var value; falling back to config"
                );
            }
            parsed
        }
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            warn!(
                env_var = SPEED_ENV_VAR,
                error = %err,
                "unable to read speed env var; falling back to config"
            );
            None
        }
    }
}

pub(crate) fn parse_speed(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|speed| speed.is_finite() && *speed > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_accepts_positive_numbers_only() {
        assert_eq!(parse_speed(" 2.5 "), Some(2.5));
        assert_eq!(parse_speed("0"), None);
        assert_eq!(parse_speed("-1"), None);
        assert_eq!(parse_speed("fast"), None);
        assert_eq!(parse_speed("inf"), None);
    }
}
