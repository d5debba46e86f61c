//! CLI entrypoint for the mbam reduction engine.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mbam_core::settings::IntegratorCommand;
use mbam_core::symbolic::{PlainSymbols, Symbol};
use mbam_core::template::stock_templates;
use mbam_core::{
    Algebra, Engine, LimitMap, MemoryStore, ModelDocument, ReductionSettings, RunSummary, Store,
    Symbolic,
};

/// Model reduction by the Manifold Boundary Approximation Method.
#[derive(Debug, Parser)]
#[command(name = "mbam")]
#[command(about = "Limit detection and reparameterization for model reduction")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write the default key legend and the stock templates to a store file.
    Seed {
        #[arg(long)]
        store: PathBuf,
    },
    /// Apply a JSON list of limit maps to a model, one reduction step each.
    Reduce {
        /// Store snapshot, created when missing.
        #[arg(long)]
        store: PathBuf,
        /// Model document (JSON).
        #[arg(long)]
        model: PathBuf,
        /// JSON array of limit maps, e.g. `[{"p1": "zero"}]`.
        #[arg(long)]
        limits: PathBuf,
        /// Settings file (JSON).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Reduce along geodesics computed by an external integrator.
    Run {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Maximum number of steps (defaults to the number of free parameters).
        #[arg(long)]
        steps: Option<usize>,
        /// Integrator program and arguments; overrides the config file.
        #[arg(last = true)]
        integrator: Vec<String>,
    },
    /// Print the simplified form of an expression.
    Simplify { expr: String },
    /// Print the limit of an expression as a symbol goes to zero.
    Limit {
        expr: String,
        #[arg(long, default_value = "epsilon")]
        symbol: String,
    },
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn load_settings(config: Option<&Path>) -> Result<ReductionSettings> {
    match config {
        Some(path) => read_json(path),
        None => Ok(ReductionSettings::default()),
    }
}

/// Opens a store snapshot, seeding an empty one with the stock templates.
fn open_store(path: &Path) -> Result<Arc<MemoryStore>> {
    let store = MemoryStore::open(path)
        .with_context(|| format!("opening store {}", path.display()))?;
    if store.template_count() == 0 {
        let seeded = store.save_templates(stock_templates())?;
        info!(seeded, "seeded empty template library");
    }
    Ok(Arc::new(store))
}

fn print_summary(summary: &RunSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let algebra: Arc<dyn Algebra> = Arc::new(Symbolic);

    match cli.command {
        Command::Seed { store } => {
            let seeded = MemoryStore::with_stock_templates();
            seeded.save(&store)?;
            println!("seeded {} templates into {}", seeded.template_count(), store.display());
        }
        Command::Reduce {
            store: store_path,
            model,
            limits,
            config,
        } => {
            let settings = load_settings(config.as_deref())?;
            let document: ModelDocument = read_json(&model)?;
            let sequence: Vec<LimitMap> = read_json(&limits)?;
            let store = open_store(&store_path)?;
            let mut engine = Engine::new(&document, store.clone(), algebra, settings)?;
            let summary = engine.apply_limit_sequence(&sequence);
            store.save(&store_path)?;
            print_summary(&summary)?;
        }
        Command::Run {
            store: store_path,
            model,
            config,
            steps,
            integrator,
        } => {
            let mut settings = load_settings(config.as_deref())?;
            if let Some((program, args)) = integrator.split_first() {
                settings.integrator = Some(IntegratorCommand {
                    program: program.clone(),
                    args: args.to_vec(),
                });
            }
            if settings.integrator.is_none() {
                anyhow::bail!("no integrator given: pass one after `--` or set it in --config");
            }
            let document: ModelDocument = read_json(&model)?;
            let store = open_store(&store_path)?;
            let mut engine = Engine::new(&document, store.clone(), algebra, settings)?;
            let summary = engine.run(steps);
            store.save(&store_path)?;
            print_summary(&summary)?;
        }
        Command::Simplify { expr } => {
            let parsed = algebra.parse(&expr, &PlainSymbols)?;
            println!("{}", algebra.simplify(&parsed));
        }
        Command::Limit { expr, symbol } => {
            let parsed = algebra.parse(&expr, &PlainSymbols)?;
            println!("{}", algebra.limit(&parsed, &Symbol::named(symbol))?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_store_is_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir.path().join("store.json")).unwrap();
        assert_eq!(store.template_count(), stock_templates().len());
    }

    #[test]
    fn limits_file_parses_as_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limits.json");
        fs::write(&path, r#"[{"p1": "zero"}, {"k1": "inf", "k2": "infinity"}]"#).unwrap();
        let sequence: Vec<LimitMap> = read_json(&path).unwrap();
        assert_eq!(sequence.len(), 2);
        assert_eq!(sequence[1].len(), 2);
    }

    #[test]
    fn integrator_follows_double_dash() {
        let cli = Cli::parse_from(["mbam", "run", "--store", "s.json", "--model", "m.json", "--", "julia", "geo.jl"]);
        let Command::Run { integrator, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(integrator, vec!["julia", "geo.jl"]);
    }
}
