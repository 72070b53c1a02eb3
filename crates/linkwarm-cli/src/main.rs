//! linkwarm route inspector
//!
//! Loads a prefetch configuration offline and answers the questions that
//! come up when wiring links: which route does a target warm, and in what
//! order does a strategy dispatch.
//!
//! ## Usage
//!
//! ```bash
//! # Which route key does each target resolve to?
//! linkwarm --config linkwarm.json resolve /es/dashboard/acme/projects /en/travel
//!
//! # Dispatch order of the immediate strategy
//! linkwarm --config linkwarm.json plan immediate
//!
//! # Policies pointing at unknown routes, duplicate hints
//! linkwarm --config linkwarm.json check
//! ```

use std::collections::HashSet;
use std::path::Path;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use linkwarm::{
    loader_fn, EngineConfig, NavTarget, PreloadEngine, PrefetchError, RouteKey, RouteModules,
    Trigger,
};

#[derive(Parser, Debug)]
#[command(name = "linkwarm")]
#[command(version)]
#[command(about = "Inspect linkwarm prefetch configurations", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve navigation targets to route keys
    Resolve {
        /// Paths as a link would receive them
        #[arg(required = true)]
        targets: Vec<String>,
    },

    /// Show the dispatch order of a strategy
    Plan {
        /// hover, focus, visible, idle or immediate
        trigger: Trigger,
    },

    /// Report policies and hints that can never take effect
    Check,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Prefetch(#[from] PrefetchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} problem(s) found")]
    CheckFailed(usize),
}

type Result<T> = std::result::Result<T, CliError>;

/// Engine configuration plus the route keys the application registers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CliConfig {
    #[serde(flatten)]
    engine: EngineConfig,

    #[serde(default)]
    routes: Vec<RouteKey>,
}

impl CliConfig {
    fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Build an engine whose loaders do nothing
    fn engine(&self) -> Result<PreloadEngine> {
        let engine = PreloadEngine::new(self.engine.clone())?;
        let routes: RouteModules = self
            .routes
            .iter()
            .map(|key| (key.clone(), loader_fn(|| async { Ok(()) })))
            .collect();
        engine.register_routes(routes);
        Ok(engine)
    }
}

#[derive(Debug, Serialize)]
struct Resolution {
    target: String,
    normalized: String,
    route: Option<RouteKey>,
}

fn resolve(engine: &PreloadEngine, targets: &[String]) -> Vec<Resolution> {
    targets
        .iter()
        .map(|target| {
            let normalized = engine.resolver().normalize(target);
            let route = engine.resolve(&NavTarget::path(target.as_str()));
            debug!("{} -> {:?}", target, route);
            Resolution {
                target: target.clone(),
                normalized,
                route,
            }
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct PlanEntry {
    route: RouteKey,
    priority: linkwarm::Priority,
    registered: bool,
}

fn plan(engine: &PreloadEngine, trigger: Trigger) -> Vec<PlanEntry> {
    let routes = engine.scheduler().routes();
    engine
        .plan(trigger)
        .into_iter()
        .map(|policy| PlanEntry {
            registered: routes.contains(policy.route.as_str()),
            route: policy.route,
            priority: policy.priority,
        })
        .collect()
}

fn check(engine: &PreloadEngine) -> Vec<String> {
    let routes = engine.scheduler().routes();
    let mut problems = Vec::new();

    for policy in engine.scheduler().policies().iter() {
        if !routes.contains(policy.route.as_str()) {
            problems.push(format!(
                "{} policy for '{}' has no registered route",
                policy.trigger, policy.route
            ));
        }
    }

    let mut seen = HashSet::new();
    for hint in &engine.config().resource_hints {
        if !seen.insert((hint.rel, hint.href.as_str())) {
            problems.push(format!("duplicate {} hint for {}", hint.rel, hint.href));
        }
    }

    problems
}

fn init_logging(log_level: &str) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path);
            CliConfig::from_file(path)?
        }
        None => CliConfig::default(),
    };
    let engine = config.engine()?;

    match args.command {
        Command::Resolve { targets } => {
            let resolutions = resolve(&engine, &targets);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&resolutions)?);
            } else {
                for r in &resolutions {
                    match &r.route {
                        Some(route) => println!("{}\t{}", r.target, route),
                        None => println!("{}\t- (normalized: {})", r.target, r.normalized),
                    }
                }
            }
        }
        Command::Plan { trigger } => {
            let entries = plan(&engine, trigger);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for (i, entry) in entries.iter().enumerate() {
                    let marker = if entry.registered { "" } else { " (unregistered)" };
                    println!(
                        "{:>3}. {:<6} {}{}",
                        i + 1,
                        format!("{:?}", entry.priority).to_lowercase(),
                        entry.route,
                        marker
                    );
                }
            }
        }
        Command::Check => {
            let problems = check(&engine);
            for problem in &problems {
                warn!("{}", problem);
                println!("{}", problem);
            }
            if !problems.is_empty() {
                return Err(CliError::CheckFailed(problems.len()));
            }
            println!("ok");
        }
    }

    Ok(())
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args.log_level)?;
    run(args)?;
    Ok(())
}
