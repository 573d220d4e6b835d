//! Plain-text plan summary.

use serde::Serialize;

use crate::compose::CompositionResult;
use crate::graph::{Phase, ResourceSpec};
use crate::infra::entry_point::RouteCondition;

const SUMMARY_TEMPLATE: &str = r"phase gate: {{ gate }}
{% for phase in phases %}
{{ phase.name }} ({{ phase.resources | length }} resources)
{%- for r in phase.resources %}
  {{ r.kind }}  {{ r.id }}
{%- endfor %}
{% endfor %}
access grants ({{ grants | length }})
{%- for g in grants %}
  {{ g.source }} -> {{ g.target }}:{{ g.port }}
{%- else %}
  none
{%- endfor %}

egress rules: {{ egress }}
{%- if routes %}

routes
{%- for r in routes %}
  {{ r.rule }} -> {{ r.target }}
{%- endfor %}
{%- endif %}
";

#[derive(Serialize)]
struct ResourceRow<'a> {
    id: &'a str,
    kind: &'static str,
}

#[derive(Serialize)]
struct PhaseRow<'a> {
    name: &'static str,
    resources: Vec<ResourceRow<'a>>,
}

#[derive(Serialize)]
struct GrantRow<'a> {
    source: &'a str,
    target: &'a str,
    port: u16,
}

#[derive(Serialize)]
struct RouteRow<'a> {
    rule: String,
    target: &'a str,
}

fn route_rows(result: &CompositionResult) -> Vec<RouteRow<'_>> {
    let mut rows: Vec<(u32, RouteRow<'_>)> = result
        .resources
        .iter()
        .filter_map(|r| match &r.spec {
            ResourceSpec::ListenerRoute(props) => Some(props),
            _ => None,
        })
        .map(|props| {
            let rule = match (&props.condition, props.priority) {
                (Some(RouteCondition::PathPatterns { patterns }), Some(p)) => {
                    format!("[{p}] {}", patterns.join(" "))
                }
                _ => "default".to_owned(),
            };
            (
                props.priority.unwrap_or(u32::MAX),
                RouteRow {
                    rule,
                    target: props.target_group.as_str(),
                },
            )
        })
        .collect();
    // Evaluation order: by priority, default last.
    rows.sort_by_key(|(priority, _)| *priority);
    rows.into_iter().map(|(_, row)| row).collect()
}

/// Render `result` as a human-readable summary.
pub fn render_summary(result: &CompositionResult) -> Result<String, minijinja::Error> {
    let mut env = minijinja::Environment::new();
    env.add_template("summary", SUMMARY_TEMPLATE)?;
    let tmpl = env.get_template("summary")?;

    let phases: Vec<PhaseRow<'_>> = [Phase::Foundation, Phase::Activation]
        .into_iter()
        .map(|phase| PhaseRow {
            name: phase.as_str(),
            resources: result
                .in_phase(phase)
                .map(|r| ResourceRow {
                    id: r.id.as_str(),
                    kind: r.kind(),
                })
                .collect(),
        })
        .filter(|p| !p.resources.is_empty())
        .collect();
    let grants: Vec<GrantRow<'_>> = result
        .grants
        .iter()
        .map(|g| GrantRow {
            source: g.source.as_str(),
            target: g.target.as_str(),
            port: g.port,
        })
        .collect();

    tmpl.render(minijinja::context! {
        gate => result.gate.as_str(),
        phases => phases,
        grants => grants,
        egress => result.egress.len(),
        routes => route_rows(result),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::compose;
    use crate::config::StackConfig;
    use crate::phase::PhaseGate;

    #[test]
    fn pending_summary_lists_foundation_only() {
        let result = compose(PhaseGate::Pending, &StackConfig::default()).unwrap();
        let text = render_summary(&result).unwrap();
        assert!(text.starts_with("phase gate: pending"));
        assert!(text.contains("foundation ("));
        assert!(!text.contains("activation ("));
        assert!(text.contains("GrafanaSelfHosting/GrafanaPdcAgent/Service -> GrafanaSelfHosting/Aurora/Cluster:3306"));
        assert!(!text.contains("routes"));
    }

    #[test]
    fn active_summary_lists_routes_in_priority_order() {
        let result = compose(PhaseGate::Active, &StackConfig::default()).unwrap();
        let text = render_summary(&result).unwrap();
        let grafana = text.find("[1] /grafana/*").unwrap();
        let default = text.find("default ->").unwrap();
        assert!(grafana < default);
        assert!(text.contains("activation ("));
    }
}
