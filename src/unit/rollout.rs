//! Rolling-update policy and the circuit breaker that watches a rollout.

use serde::Serialize;

use crate::error::CompositionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    /// Revert to the last good revision when the breaker trips.
    pub rollback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeploymentPolicy {
    pub desired_count: u32,
    pub min_healthy_percent: u32,
    pub max_healthy_percent: u32,
    pub circuit_breaker: CircuitBreakerSettings,
}

impl Default for DeploymentPolicy {
    fn default() -> Self {
        Self {
            desired_count: 1,
            min_healthy_percent: 50,
            max_healthy_percent: 200,
            circuit_breaker: CircuitBreakerSettings {
                enabled: true,
                rollback: false,
            },
        }
    }
}

/// How many tasks may run while a rollout is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RolloutBounds {
    pub min_running: u32,
    pub max_running: u32,
}

impl DeploymentPolicy {
    pub fn validate(&self, unit: &str) -> Result<(), CompositionError> {
        let invalid = |reason: String| CompositionError::InvalidSpec {
            unit: unit.to_owned(),
            reason,
        };
        if self.desired_count == 0 {
            return Err(invalid("desired count must be at least 1".into()));
        }
        if self.min_healthy_percent > 100 {
            return Err(invalid(format!(
                "minimum healthy percent {} exceeds 100",
                self.min_healthy_percent
            )));
        }
        if self.max_healthy_percent < 100 {
            return Err(invalid(format!(
                "maximum healthy percent {} is below 100",
                self.max_healthy_percent
            )));
        }
        let bounds = self.bounds();
        if bounds.max_running <= bounds.min_running && bounds.min_running == self.desired_count {
            return Err(invalid(
                "rollout can neither stop an old task nor start a new one".into(),
            ));
        }
        Ok(())
    }

    pub fn bounds(&self) -> RolloutBounds {
        let desired = u64::from(self.desired_count);
        let min = (desired * u64::from(self.min_healthy_percent)).div_ceil(100);
        let max = desired * u64::from(self.max_healthy_percent) / 100;
        RolloutBounds {
            min_running: u32::try_from(min).unwrap_or(u32::MAX),
            max_running: u32::try_from(max).unwrap_or(u32::MAX),
        }
    }
}

/// Opaque signal from the provisioning backend about the new revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutSignal {
    TaskFailedToStart,
    HealthCheckFailed,
    SteadyState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutDecision {
    Continue,
    /// The new revision reached steady state.
    Deployed,
    /// Revert to the last good revision; the old revision wins.
    RollBack,
    /// Stop the rollout and leave the failed revision in place.
    MarkFailed,
}

impl RolloutDecision {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Continue)
    }
}

/// Counts failures of one rollout. Once it reaches a terminal decision it
/// keeps returning that decision.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    rollback: bool,
    failures: u32,
    outcome: Option<RolloutDecision>,
}

impl CircuitBreaker {
    /// `None` when the policy disables the breaker.
    pub fn for_policy(policy: &DeploymentPolicy) -> Option<Self> {
        policy.circuit_breaker.enabled.then(|| Self {
            threshold: Self::threshold(policy.desired_count),
            rollback: policy.circuit_breaker.rollback,
            failures: 0,
            outcome: None,
        })
    }

    /// Half the desired count, rounded up, kept within 3..=200.
    pub fn threshold(desired_count: u32) -> u32 {
        desired_count.div_ceil(2).clamp(3, 200)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record(&mut self, signal: RolloutSignal) -> RolloutDecision {
        if let Some(outcome) = self.outcome {
            return outcome;
        }
        let decision = match signal {
            RolloutSignal::SteadyState => RolloutDecision::Deployed,
            RolloutSignal::TaskFailedToStart | RolloutSignal::HealthCheckFailed => {
                self.failures += 1;
                if self.failures < self.threshold {
                    RolloutDecision::Continue
                } else if self.rollback {
                    RolloutDecision::RollBack
                } else {
                    RolloutDecision::MarkFailed
                }
            }
        };
        if decision.is_terminal() {
            tracing::info!(
                failures = self.failures,
                threshold = self.threshold,
                ?decision,
                "rollout settled"
            );
            self.outcome = Some(decision);
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn policy(desired: u32, min: u32, max: u32, rollback: bool) -> DeploymentPolicy {
        DeploymentPolicy {
            desired_count: desired,
            min_healthy_percent: min,
            max_healthy_percent: max,
            circuit_breaker: CircuitBreakerSettings {
                enabled: true,
                rollback,
            },
        }
    }

    #[test]
    fn default_policy_bounds() {
        let p = DeploymentPolicy::default();
        assert!(p.validate("U").is_ok());
        assert_eq!(
            p.bounds(),
            RolloutBounds {
                min_running: 1,
                max_running: 2
            }
        );
    }

    #[rstest]
    #[case(0, 50, 200)]
    #[case(1, 101, 200)]
    #[case(1, 50, 99)]
    #[case(1, 100, 100)]
    fn invalid_policies(#[case] desired: u32, #[case] min: u32, #[case] max: u32) {
        assert!(matches!(
            policy(desired, min, max, false).validate("U"),
            Err(CompositionError::InvalidSpec { .. })
        ));
    }

    #[rstest]
    #[case(1, 3)]
    #[case(6, 3)]
    #[case(7, 4)]
    #[case(1000, 200)]
    fn threshold_clamped(#[case] desired: u32, #[case] expected: u32) {
        assert_eq!(CircuitBreaker::threshold(desired), expected);
    }

    #[test]
    fn trips_to_mark_failed_without_rollback() {
        let mut cb = CircuitBreaker::for_policy(&policy(1, 50, 200, false)).unwrap();
        assert_eq!(cb.record(RolloutSignal::TaskFailedToStart), RolloutDecision::Continue);
        assert_eq!(cb.record(RolloutSignal::HealthCheckFailed), RolloutDecision::Continue);
        assert_eq!(cb.record(RolloutSignal::TaskFailedToStart), RolloutDecision::MarkFailed);
        assert_eq!(cb.record(RolloutSignal::SteadyState), RolloutDecision::MarkFailed);
    }

    #[test]
    fn old_revision_wins_with_rollback() {
        let mut cb = CircuitBreaker::for_policy(&policy(2, 50, 200, true)).unwrap();
        for _ in 0..2 {
            cb.record(RolloutSignal::HealthCheckFailed);
        }
        assert_eq!(cb.record(RolloutSignal::HealthCheckFailed), RolloutDecision::RollBack);
        assert_eq!(cb.failures(), 3);
    }

    #[test]
    fn steady_state_before_threshold_deploys() {
        let mut cb = CircuitBreaker::for_policy(&DeploymentPolicy::default()).unwrap();
        cb.record(RolloutSignal::TaskFailedToStart);
        assert_eq!(cb.record(RolloutSignal::SteadyState), RolloutDecision::Deployed);
    }

    #[test]
    fn disabled_breaker() {
        let mut p = DeploymentPolicy::default();
        p.circuit_breaker.enabled = false;
        assert!(CircuitBreaker::for_policy(&p).is_none());
    }

    proptest! {
        #[test]
        fn bounds_bracket_desired(desired in 1u32..500, min in 0u32..=100, max in 100u32..=400) {
            let b = policy(desired, min, max, false).bounds();
            prop_assert!(b.min_running <= desired);
            prop_assert!(b.max_running >= desired);
        }
    }
}
