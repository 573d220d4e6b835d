//! Startup-dependency checks and start order for the containers of one unit.

use std::collections::{HashMap, HashSet};

use super::ContainerSpec;
use crate::error::CompositionError;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Reject duplicate names, dependencies on undeclared containers and
/// dependency cycles (self-dependencies included).
pub fn validate_dependencies(
    unit: &str,
    containers: &[ContainerSpec],
) -> Result<(), CompositionError> {
    let mut names = HashSet::new();
    for c in containers {
        if !names.insert(c.name.as_str()) {
            return Err(CompositionError::InvalidSpec {
                unit: unit.to_owned(),
                reason: format!("container '{}' is declared twice", c.name),
            });
        }
    }

    for c in containers {
        for dep in &c.depends_on {
            if !names.contains(dep.container.as_str()) {
                return Err(CompositionError::UnknownContainer {
                    unit: unit.to_owned(),
                    container: c.name.clone(),
                    dependency: dep.container.clone(),
                });
            }
        }
    }

    if let Some(cycle) = find_cycle(containers) {
        return Err(CompositionError::CyclicDependency {
            unit: unit.to_owned(),
            containers: cycle,
        });
    }
    Ok(())
}

/// Members of the first cycle found, in edge order starting from the
/// container reached first in declaration order.
fn find_cycle(containers: &[ContainerSpec]) -> Option<Vec<String>> {
    let edges: HashMap<&str, Vec<&str>> = containers
        .iter()
        .map(|c| {
            (
                c.name.as_str(),
                c.depends_on.iter().map(|d| d.container.as_str()).collect(),
            )
        })
        .collect();

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut path: Vec<&str> = Vec::new();
    for c in containers {
        if !marks.contains_key(c.name.as_str()) {
            if let Some(cycle) = visit(c.name.as_str(), &edges, &mut marks, &mut path) {
                return Some(cycle.into_iter().map(str::to_owned).collect());
            }
        }
    }
    None
}

fn visit<'a>(
    node: &'a str,
    edges: &HashMap<&'a str, Vec<&'a str>>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<&'a str>> {
    marks.insert(node, Mark::Visiting);
    path.push(node);

    for &next in edges.get(node).map(Vec::as_slice).unwrap_or_default() {
        match marks.get(next) {
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == next).unwrap_or(0);
                return Some(path[start..].to_vec());
            }
            Some(Mark::Done) => {}
            None => {
                if let Some(cycle) = visit(next, edges, marks, path) {
                    return Some(cycle);
                }
            }
        }
    }

    path.pop();
    marks.insert(node, Mark::Done);
    None
}

/// A start order in which every prerequisite precedes its dependents.
/// Ties keep declaration order, so the result is deterministic.
pub fn start_order(
    unit: &str,
    containers: &[ContainerSpec],
) -> Result<Vec<String>, CompositionError> {
    validate_dependencies(unit, containers)?;

    let position: HashMap<&str, usize> = containers
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name.as_str(), i))
        .collect();

    // in_degree[i] = unmet prerequisites of container i.
    let mut in_degree: Vec<usize> = containers
        .iter()
        .map(|c| {
            c.depends_on
                .iter()
                .map(|d| d.container.as_str())
                .collect::<HashSet<_>>()
                .len()
        })
        .collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); containers.len()];
    for (i, c) in containers.iter().enumerate() {
        let prereqs: HashSet<&str> = c.depends_on.iter().map(|d| d.container.as_str()).collect();
        for p in prereqs {
            if let Some(&j) = position.get(p) {
                dependents[j].push(i);
            }
        }
    }

    let mut order = Vec::with_capacity(containers.len());
    let mut started = vec![false; containers.len()];
    while order.len() < containers.len() {
        // Lowest declared index among ready containers.
        let Some(next) = (0..containers.len()).find(|&i| !started[i] && in_degree[i] == 0) else {
            // Unreachable after validation; report it as a cycle regardless.
            return Err(CompositionError::CyclicDependency {
                unit: unit.to_owned(),
                containers: containers
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !started[*i])
                    .map(|(_, c)| c.name.clone())
                    .collect(),
            });
        };
        started[next] = true;
        order.push(containers[next].name.clone());
        for &d in &dependents[next] {
            in_degree[d] -= 1;
        }
    }
    Ok(order)
}

/// Containers with no startup dependencies; these start immediately.
pub fn immediately_startable(containers: &[ContainerSpec]) -> Vec<&str> {
    containers
        .iter()
        .filter(|c| c.depends_on.is_empty())
        .map(|c| c.name.as_str())
        .collect()
}
