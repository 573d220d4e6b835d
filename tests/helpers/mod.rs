#![allow(dead_code)]

use std::collections::BTreeSet;

use oncall_stack::graph::ResourceId;
use oncall_stack::graph::ResourceSpec;
use oncall_stack::unit::UnitDefinition;
use oncall_stack::{CompositionResult, PhaseGate, StackConfig, compose};

pub const ROOT: &str = "GrafanaSelfHosting";

pub fn id(path: &str) -> ResourceId {
    ResourceId::new(format!("{ROOT}/{path}"))
}

pub fn pending() -> CompositionResult {
    compose(PhaseGate::Pending, &StackConfig::default()).expect("pending composition")
}

pub fn active() -> CompositionResult {
    compose(PhaseGate::Active, &StackConfig::default()).expect("active composition")
}

/// `(source, target, port)` with the root prefix stripped.
pub fn grant_set(result: &CompositionResult) -> BTreeSet<(String, String, u16)> {
    let strip = |id: &ResourceId| {
        id.as_str()
            .strip_prefix(&format!("{ROOT}/"))
            .unwrap_or(id.as_str())
            .to_owned()
    };
    result
        .grants
        .iter()
        .map(|g| (strip(&g.source), strip(&g.target), g.port))
        .collect()
}

pub fn grant(source: &str, target: &str, port: u16) -> (String, String, u16) {
    (source.to_owned(), target.to_owned(), port)
}

pub fn kinds(result: &CompositionResult) -> BTreeSet<&'static str> {
    result.resources.iter().map(|r| r.kind()).collect()
}

pub fn unit<'a>(result: &'a CompositionResult, path: &str) -> &'a UnitDefinition {
    match &result.resource(&id(path)).expect("unit present").spec {
        ResourceSpec::Service(def) => def,
        other => panic!("{path} is a {}", other.kind()),
    }
}

pub fn env<'a>(def: &'a UnitDefinition, container: &str, key: &str) -> Option<&'a str> {
    def.containers
        .iter()
        .find(|c| c.name == container)
        .and_then(|c| c.environment.get(key))
        .map(String::as_str)
}
