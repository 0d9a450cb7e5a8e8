mod sim;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use wm_config::{EngineConfig, load_or_default, resolve_config_path};
use wm_core::{
    GateStatus, HarnessConfig, OptimizerMode, ValidationHarness, export_json, generate_pattern,
};

use crate::sim::SimOptions;

#[derive(Parser)]
#[command(name = "wm", about = "Wave-matrix positioning engine: headless host and validation gate")]
struct Cli {
    /// Config file (default: $WM_CONFIG, then $WM_DATA_DIR/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine headless with synthetic confidence traffic
    Simulate {
        /// Number of ticks to run
        #[arg(long, default_value_t = 720)]
        ticks: usize,

        /// Live element count (default: from config)
        #[arg(long)]
        elements: Option<usize>,

        /// Use the parallel optimizer with bias blending
        #[arg(long, conflicts_with = "baseline")]
        advanced: bool,

        /// Use the synchronous optimizer
        #[arg(long)]
        baseline: bool,

        /// Pace ticks at the frame rate instead of running flat out
        #[arg(long)]
        realtime: bool,

        /// Attach the synthetic bias predictor
        #[arg(long)]
        bias: bool,

        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the validation harness; exits non-zero if any gate fails
    Validate {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Skip timing gates (unoptimized builds)
        #[arg(long)]
        skip_timing: bool,
    },

    /// Print a breathing pattern, one `x y z` line per point
    Pattern {
        #[arg(long, default_value_t = 12)]
        count: usize,

        /// Circle radius (default: layout radius from config)
        #[arg(long)]
        radius: Option<f32>,

        /// Engine time in seconds
        #[arg(long, default_value_t = 0.0)]
        time: f32,
    },

    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective config as TOML
    Show,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

/// Load and repair the effective config. Corrections are logged by the validator.
fn load_config(cli: &Cli) -> Result<(PathBuf, EngineConfig)> {
    let path = resolve_config_path(cli.config.as_deref());
    let config = load_or_default(&path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    let (config, _) = config.validated();
    Ok((path, config))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Simulate {
            ticks,
            elements,
            advanced,
            baseline,
            realtime,
            bias,
            json,
        } => {
            let (_, config) = load_config(&cli)?;
            let mode = if *advanced {
                OptimizerMode::Advanced
            } else if *baseline {
                OptimizerMode::Baseline
            } else {
                config.engine.mode
            };
            let options = SimOptions {
                ticks: *ticks,
                elements: elements.unwrap_or(config.engine.target_count),
                mode,
                realtime: *realtime,
                bias: *bias,
            };
            cmd_simulate(&config, &options, *json).await
        }
        Commands::Validate { json, skip_timing } => cmd_validate(&cli, *json, *skip_timing),
        Commands::Pattern {
            count,
            radius,
            time,
        } => cmd_pattern(&cli, *count, *radius, *time),
        Commands::Config { action } => match action {
            ConfigAction::Show => cmd_config_show(&cli),
            ConfigAction::Init { force } => cmd_config_init(&cli, *force),
        },
    }
}

async fn cmd_simulate(config: &EngineConfig, options: &SimOptions, json: bool) -> Result<()> {
    let outcome = sim::run(config, options).await?;

    if json {
        let out = export_json("simulation", &outcome).context("failed to serialize reports")?;
        println!("{out}");
        return Ok(());
    }

    let perf = &outcome.performance;
    let sync = &outcome.sync;
    let tally = &outcome.tally;
    println!("optimizer:    {}", perf.optimizer);
    println!("ticks:        {}", tally.ticks);
    println!("elements:     {}", perf.active_count);
    println!(
        "tick time:    avg {:.1}µs, peak {:.1}µs, budget {}µs",
        perf.avg_update_time_micros, perf.peak_update_time_micros, perf.frame_budget_micros
    );
    println!("over budget:  {}", perf.over_budget_ticks);
    println!("pool eff.:    {:.2}", perf.pool_efficiency);
    println!(
        "messages:     {} applied, {} dropped",
        tally.messages_applied, tally.dropped_messages
    );
    println!("fallbacks:    {}", tally.fallbacks);
    println!("bias fields:  {}", tally.bias_adopted);
    println!(
        "in sync:      {} (max deviation {:.4}, accuracy {:.1}%)",
        sync.is_in_sync,
        sync.max_deviation,
        sync.sync_accuracy * 100.0
    );
    Ok(())
}

fn cmd_validate(cli: &Cli, json: bool, skip_timing: bool) -> Result<()> {
    let (_, config) = load_config(cli)?;
    let harness = ValidationHarness::new(
        config.settings(),
        HarnessConfig {
            skip_timing,
            seed: config.engine.seed,
            ..HarnessConfig::default()
        },
    );
    let report = harness.run();

    if json {
        let out = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        println!("{out}");
    } else {
        for gate in &report.gates {
            let status = match gate.status {
                GateStatus::Pass => "PASS",
                GateStatus::Fail => "FAIL",
                GateStatus::Skip => "SKIP",
            };
            println!("{status}  {:<24} {}", gate.name, gate.detail);
        }
        for t in &report.timings {
            match t.advanced_micros {
                Some(adv) => println!(
                    "timing {:>4} elements: baseline {:.1}µs, advanced {:.1}µs, budget {}µs",
                    t.count, t.baseline_micros, adv, t.budget_micros
                ),
                None => println!(
                    "timing {:>4} elements: baseline {:.1}µs, budget {}µs",
                    t.count, t.baseline_micros, t.budget_micros
                ),
            }
        }
        println!("overall: {}", if report.passed { "PASS" } else { "FAIL" });
    }

    if !report.passed {
        let failed: Vec<&str> = report.failed_gates().map(|g| g.name.as_str()).collect();
        anyhow::bail!("validation failed: {}", failed.join(", "));
    }
    Ok(())
}

fn cmd_pattern(cli: &Cli, count: usize, radius: Option<f32>, time: f32) -> Result<()> {
    let (_, config) = load_config(cli)?;
    let radius = radius.unwrap_or(config.matrix.radius);
    if !radius.is_finite() || radius <= 0.0 {
        anyhow::bail!("radius must be positive, got {radius}");
    }
    for p in generate_pattern(count, radius, &config.wave, time) {
        println!("{:.6} {:.6} {:.6}", p.x, p.y, p.z);
    }
    Ok(())
}

fn cmd_config_show(cli: &Cli) -> Result<()> {
    let (path, config) = load_config(cli)?;
    let source = if path.exists() { "" } else { " (not found, defaults)" };
    println!("# {}{source}", path.display());
    print!("{}", config.to_toml().context("failed to render config")?);
    Ok(())
}

fn cmd_config_init(cli: &Cli, force: bool) -> Result<()> {
    let path = resolve_config_path(cli.config.as_deref());
    write_default_config(&path, force)?;
    println!("wrote {}", path.display());
    Ok(())
}

fn write_default_config(path: &Path, force: bool) -> Result<()> {
    wm_config::save(&EngineConfig::default(), path, force)
        .with_context(|| format!("failed to write config {}", path.display()))
}
