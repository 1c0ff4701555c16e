use std::fmt;

use crate::world::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Move,
    Attach,
    Detach,
    ConsumeResource,
    Wait,
    Marker,
}

/// A state a transition starts from or ends in, as a renderer would place it.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    Entity(EntityId),
    Level(f64),
    /// Part of the way along a route, `fraction` in `[0, 1]`.
    Between {
        from: EntityId,
        to: EntityId,
        fraction: f64,
    },
    Nowhere,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(id) => write!(f, "{id}"),
            Self::Level(value) => write!(f, "{value:.2}"),
            Self::Between { from, to, fraction } => {
                write!(f, "{from}->{to}@{:.0}%", fraction * 100.0)
            }
            Self::Nowhere => f.write_str("-"),
        }
    }
}

/// When a transition counts as finished.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Completion {
    Elapsed { duration: f64 },
    Distance { threshold: f64, speed: f64 },
}

impl Completion {
    pub fn nominal_duration(&self) -> f64 {
        match *self {
            Self::Elapsed { duration } => duration.max(0.0),
            Self::Distance { threshold, speed } => {
                if speed > 0.0 {
                    (threshold / speed).max(0.0)
                } else {
                    0.0
                }
            }
        }
    }
}

/// Descriptor of one applied action for the scene layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub action: String,
    pub subject: Option<EntityId>,
    pub kind: TransitionKind,
    pub from_state: Endpoint,
    pub to_state: Endpoint,
    pub nominal_duration: f64,
    pub completion: Completion,
}

impl Transition {
    pub fn new(
        action: &str,
        subject: Option<&EntityId>,
        kind: TransitionKind,
        from_state: Endpoint,
        to_state: Endpoint,
        completion: Completion,
    ) -> Self {
        Self {
            action: action.to_string(),
            subject: subject.cloned(),
            kind,
            from_state,
            to_state,
            nominal_duration: completion.nominal_duration(),
            completion,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subject = self
            .subject
            .as_ref()
            .map(EntityId::as_str)
            .unwrap_or("-");
        write!(
            f,
            "{} {:?} {subject}: {} -> {} ({:.3})",
            self.action, self.kind, self.from_state, self.to_state, self.nominal_duration
        )
    }
}

/// Tracks how far a transition has advanced on the virtual clock.
#[derive(Debug, Clone)]
pub struct TransitionProgress {
    completion: Completion,
    elapsed: f64,
    distance: f64,
}

impl TransitionProgress {
    pub fn new(completion: Completion) -> Self {
        Self {
            completion,
            elapsed: 0.0,
            distance: 0.0,
        }
    }

    /// Advances by `dt` and returns the part of `dt` left over after completion.
    pub fn advance(&mut self, dt: f64) -> f64 {
        let dt = dt.max(0.0);
        let needed = self.remaining_time();
        if dt >= needed {
            self.elapsed += needed;
            if let Completion::Distance { threshold, .. } = self.completion {
                self.distance = threshold;
            }
            return dt - needed;
        }
        self.elapsed += dt;
        if let Completion::Distance { speed, .. } = self.completion {
            self.distance += speed * dt;
        }
        0.0
    }

    pub fn is_complete(&self) -> bool {
        match self.completion {
            Completion::Elapsed { duration } => self.elapsed >= duration,
            Completion::Distance { threshold, speed } => {
                speed <= 0.0 || self.distance >= threshold
            }
        }
    }

    pub fn remaining_time(&self) -> f64 {
        match self.completion {
            Completion::Elapsed { duration } => (duration - self.elapsed).max(0.0),
            Completion::Distance { threshold, speed } => {
                if speed <= 0.0 {
                    0.0
                } else {
                    ((threshold - self.distance) / speed).max(0.0)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_progress_returns_leftover_time() {
        let mut progress = TransitionProgress::new(Completion::Elapsed { duration: 1.0 });

        assert_eq!(progress.advance(0.25), 0.0);
        assert!(!progress.is_complete());
        assert!((progress.remaining_time() - 0.75).abs() < 1e-9);
        assert!((progress.advance(1.0) - 0.25).abs() < 1e-9);
        assert!(progress.is_complete());
    }

    #[test]
    fn distance_progress_completes_at_threshold() {
        let mut progress = TransitionProgress::new(Completion::Distance {
            threshold: 100.0,
            speed: 50.0,
        });

        assert_eq!(progress.advance(1.0), 0.0);
        assert!(!progress.is_complete());
        assert!((progress.remaining_time() - 1.0).abs() < 1e-9);
        assert!((progress.advance(1.5) - 0.5).abs() < 1e-9);
        assert!(progress.is_complete());
    }

    #[test]
    fn zero_duration_completes_immediately() {
        let mut progress = TransitionProgress::new(Completion::Elapsed { duration: 0.0 });
        assert!(progress.is_complete());
        assert_eq!(progress.advance(0.5), 0.5);
    }

    #[test]
    fn nominal_duration_of_distance_model() {
        let completion = Completion::Distance {
            threshold: 200.0,
            speed: 40.0,
        };
        assert_eq!(completion.nominal_duration(), 5.0);
    }
}
