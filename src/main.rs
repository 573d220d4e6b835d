use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use oncall_stack::{CompositionResult, PhaseGate, StackConfig, compose, report};

#[derive(Parser, Debug)]
#[command(name = "oncall-stack")]
#[command(about = "Compose the self-hosted Grafana OnCall resource graph")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compose the stack and write the resource graph
    Synth {
        #[command(flatten)]
        gate: GateArgs,

        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compose the stack and print the access grants in creation order
    Grants {
        #[command(flatten)]
        gate: GateArgs,
    },
}

#[derive(clap::Args, Debug)]
struct GateArgs {
    /// Set once the Grafana and OnCall databases and users exist
    #[arg(long, env = "GRAFANA_DB_CREATED")]
    grafana_db_created: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Json,
    Yaml,
    Summary,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("ONCALL_STACK_LOG").unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(io::stderr)).init();
    }
}

fn render(result: &CompositionResult, format: Format) -> anyhow::Result<String> {
    Ok(match format {
        Format::Json => result.to_json().context("serializing graph as JSON")?,
        Format::Yaml => result.to_yaml().context("serializing graph as YAML")?,
        Format::Summary => report::render_summary(result).context("rendering summary")?,
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = StackConfig::load()?;

    match cli.command {
        Command::Synth {
            gate,
            format,
            output,
        } => {
            let gate = PhaseGate::from(gate.grafana_db_created);
            let result = compose(gate, &config)?;
            let rendered = render(&result, format)?;
            match output {
                Some(path) => {
                    fs::write(&path, rendered)
                        .with_context(|| format!("writing {}", path.display()))?;
                    tracing::info!(path = %path.display(), resources = result.resources.len(), "graph written");
                }
                None => io::stdout()
                    .write_all(rendered.as_bytes())
                    .context("writing graph to stdout")?,
            }
        }
        Command::Grants { gate } => {
            let result = compose(PhaseGate::from(gate.grafana_db_created), &config)?;
            let mut out = io::stdout().lock();
            for g in &result.grants {
                writeln!(out, "{} -> {} port {}", g.source, g.target, g.port)
                    .context("writing grants")?;
            }
            for e in &result.egress {
                writeln!(out, "{} -> {} (egress)", e.source, e.destination)
                    .context("writing egress rules")?;
            }
        }
    }
    Ok(())
}
