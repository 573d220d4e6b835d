mod helpers;

use std::collections::HashMap;

use helpers::{active, pending, unit};
use oncall_stack::unit::rollout::{RolloutDecision, RolloutSignal};
use oncall_stack::unit::startup::{ContainerOutcome, ContainerState, UnitHealth, evaluate};
use oncall_stack::unit::{CircuitBreaker, DependencyCondition};

// ---------------------------------------------------------------------------
// Migration gates the OnCall containers
// ---------------------------------------------------------------------------

#[test]
fn failed_oncall_migration_blocks_engine_and_celery() {
    let result = active();
    let def = unit(&result, "OncallService/Service");

    let outcomes = HashMap::from([("DBMigration", ContainerOutcome::Exits(1))]);
    let report = evaluate(def, &outcomes);

    assert_eq!(report.state("DBMigration"), Some(&ContainerState::Exited { code: 1 }));
    for name in ["Engine", "Celery"] {
        assert_eq!(
            report.state(name),
            Some(&ContainerState::Blocked {
                on: "DBMigration".into(),
                condition: DependencyCondition::Success,
            })
        );
    }
    // The migration is non-essential: its exit alone never stops the unit.
    assert!(matches!(report.health, UnitHealth::Blocked { .. }));
    assert!(!report.health.is_fatal());
}

#[test]
fn successful_oncall_migration_starts_everything() {
    let result = active();
    let def = unit(&result, "OncallService/Service");

    let outcomes = HashMap::from([("DBMigration", ContainerOutcome::Exits(0))]);
    let report = evaluate(def, &outcomes);

    assert_eq!(report.health, UnitHealth::Healthy);
    assert_eq!(report.containers[0].0, "DBMigration");
    for name in ["Engine", "Celery"] {
        assert_eq!(report.state(name), Some(&ContainerState::Running { healthy: true }));
    }
}

#[test]
fn unhealthy_engine_marks_unit_unhealthy() {
    let result = active();
    let def = unit(&result, "OncallService/Service");

    let outcomes = HashMap::from([
        ("DBMigration", ContainerOutcome::Exits(0)),
        ("Engine", ContainerOutcome::Runs { healthy: false }),
    ]);
    let report = evaluate(def, &outcomes);

    assert_eq!(
        report.health,
        UnitHealth::Unhealthy {
            container: "Engine".into()
        }
    );
}

#[test]
fn ingester_starts_after_any_migration_exit() {
    let result = pending();
    let def = unit(&result, "IotDataIngester/Service");

    let outcomes = HashMap::from([("DBMigration", ContainerOutcome::Exits(1))]);
    let report = evaluate(def, &outcomes);

    assert_eq!(
        report.state("IotDataIngester"),
        Some(&ContainerState::Running { healthy: true })
    );
    assert_eq!(report.health, UnitHealth::Healthy);
}

#[test]
fn exiting_essential_container_stops_the_unit() {
    let result = pending();
    let def = unit(&result, "GrafanaPdcAgent/Service");

    let outcomes = HashMap::from([("PdcAgent", ContainerOutcome::Exits(2))]);
    let report = evaluate(def, &outcomes);

    assert!(report.health.is_fatal());
}

// ---------------------------------------------------------------------------
// Rollout with the emitted policy
// ---------------------------------------------------------------------------

#[test]
fn emitted_policy_marks_failed_rollout_without_rollback() {
    let result = active();
    let def = unit(&result, "GrafanaService/Service");
    let mut breaker = CircuitBreaker::for_policy(&def.deployment).expect("breaker enabled");

    assert_eq!(breaker.record(RolloutSignal::TaskFailedToStart), RolloutDecision::Continue);
    assert_eq!(breaker.record(RolloutSignal::HealthCheckFailed), RolloutDecision::Continue);
    assert_eq!(breaker.record(RolloutSignal::TaskFailedToStart), RolloutDecision::MarkFailed);
    assert_eq!(breaker.record(RolloutSignal::SteadyState), RolloutDecision::MarkFailed);
    assert_eq!(breaker.failures(), 3);

    let bounds = def.deployment.bounds();
    assert_eq!(bounds.min_running, 1);
    assert_eq!(bounds.max_running, 2);
}
