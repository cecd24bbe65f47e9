//! `gridfuse-cli` – command line front end for the costmap pipeline.
//!
//! This binary:
//!
//! 1. Loads `~/.gridfuse/config.toml` (or the file given with `--config`),
//!    applies `GRIDFUSE_*` overrides and validates the grid settings.
//! 2. Registers the configured static transforms and the road-area file.
//! 3. Feeds newline-delimited JSON events through the pipeline and writes
//!    every emitted costmap to stdout, one JSON event per line.
//!
//! Human-facing status goes to stderr so stdout stays machine-readable.

mod areas;
mod config;
mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use gridfuse_middleware::SensorBridge;
use gridfuse_perception::TfBuffer;
use gridfuse_runtime::{AreaLoader, CostmapPipeline, DriverStats, NoAreas, PipelineDriver};
use gridfuse_types::GridConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::areas::FileAreaLoader;
use crate::config::Config;
use crate::output::NdjsonPublisher;

/// Events parsed from stdin but not yet handled; reading pauses when full.
const STREAM_QUEUE_CAPACITY: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Command line
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Command {
    /// Stream events from stdin through the async driver.
    Run,
    /// Process a recorded file synchronously.
    Replay(PathBuf),
    /// Print the JSON schema of the grid configuration.
    Schema,
    /// Print the effective configuration as TOML.
    ShowConfig,
    /// Write a default config file.
    Init,
    Help,
}

#[derive(Debug, Clone, PartialEq)]
struct Cli {
    command: Command,
    config_path: Option<PathBuf>,
}

fn parse_args<I>(args: I) -> Result<Cli, String>
where
    I: IntoIterator<Item = String>,
{
    let mut command = None;
    let mut config_path = None;
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| format!("{arg} expects a file path"))?;
                config_path = Some(PathBuf::from(path));
            }
            "-h" | "--help" | "help" => command = Some(Command::Help),
            other if command.is_some() => {
                return Err(format!("unexpected argument `{other}`"));
            }
            "run" => command = Some(Command::Run),
            "schema" => command = Some(Command::Schema),
            "config" => command = Some(Command::ShowConfig),
            "init" => command = Some(Command::Init),
            "replay" => {
                let file = args.next().ok_or("replay expects an input file")?;
                command = Some(Command::Replay(PathBuf::from(file)));
            }
            other => return Err(format!("unknown command `{other}`")),
        }
    }

    Ok(Cli {
        command: command.unwrap_or(Command::Run),
        config_path,
    })
}

fn main() -> ExitCode {
    let cli = match parse_args(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{}: {}", "Argument error".red(), e);
            print_help();
            return ExitCode::from(2);
        }
    };

    let result = match &cli.command {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Schema => print_schema(),
        Command::Init => init_config(),
        Command::ShowConfig => {
            load_config(cli.config_path.as_deref()).and_then(|(cfg, _)| show_config(&cfg))
        }
        Command::Run | Command::Replay(_) => {
            // Hold the guard for the whole run so spans are flushed on exit.
            let _guard = gridfuse_runtime::init_tracing("gridfuse");
            load_config(cli.config_path.as_deref()).and_then(|(cfg, source)| {
                print_banner(source.as_deref());
                let stats = match &cli.command {
                    Command::Replay(file) => replay(&cfg, file)?,
                    _ => stream(cfg)?,
                };
                print_summary(&stats);
                Ok(())
            })
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve, load and validate the configuration.
///
/// An explicit `path` must exist; the default location may be absent, in
/// which case built-in defaults (plus env overrides) are used.
fn load_config(path: Option<&Path>) -> Result<(Config, Option<PathBuf>), String> {
    let (cfg, source) = match path {
        Some(path) => {
            let cfg = config::load_from(path)?
                .ok_or_else(|| format!("config file {} not found", path.display()))?;
            (cfg, Some(path.to_path_buf()))
        }
        None => match config::load()? {
            Some(cfg) => (cfg, Some(config::config_path())),
            None => {
                let mut cfg = Config::default();
                config::apply_env_overrides(&mut cfg);
                (cfg, None)
            }
        },
    };
    cfg.grid.validate().map_err(|e| e.to_string())?;
    Ok((cfg, source))
}

fn show_config(cfg: &Config) -> Result<(), String> {
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    print!("{raw}");
    Ok(())
}

fn init_config() -> Result<(), String> {
    let path = config::config_path();
    if path.exists() {
        eprintln!(
            "  Config already present at {}; leaving it unchanged.",
            path.display().to_string().bold()
        );
        return Ok(());
    }
    config::save(&Config::default())?;
    eprintln!(
        "  {} Config saved to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    Ok(())
}

fn print_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(GridConfig);
    let raw = serde_json::to_string_pretty(&schema)
        .map_err(|e| format!("Failed to serialize schema: {}", e))?;
    println!("{raw}");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline wiring
// ─────────────────────────────────────────────────────────────────────────────

fn build_pipeline(cfg: &Config) -> Result<CostmapPipeline, String> {
    let tf = TfBuffer::new();
    for st in &cfg.static_transforms {
        tf.set_static_transform(&st.parent_frame, &st.child_frame, st.transform());
    }
    let loader: Box<dyn AreaLoader> = match &cfg.static_area_file {
        Some(path) => Box::new(FileAreaLoader::new(path)),
        None => Box::new(NoAreas),
    };
    CostmapPipeline::new(cfg.grid.clone(), Arc::new(tf), loader).map_err(|e| e.to_string())
}

/// Live mode: stdin → driver queue → stdout, until EOF or Ctrl-C.
fn stream(cfg: Config) -> Result<DriverStats, String> {
    let pipeline = build_pipeline(&cfg)?;
    let runtime =
        tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start runtime: {e}"))?;

    runtime.block_on(async move {
        let publisher = NdjsonPublisher::new(std::io::stdout());
        let handle = PipelineDriver::new(pipeline, Box::new(publisher))
            .with_queue_capacity(STREAM_QUEUE_CAPACITY)
            .spawn();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut rejected = 0;

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let event = match SensorBridge::parse_line(&line) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!(error = %e, "skipping input line");
                                rejected += 1;
                                continue;
                            }
                        };
                        if let Err(e) = handle.submit(event).await {
                            warn!(error = %e, "pipeline stopped accepting events");
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "stdin read failed");
                        break;
                    }
                },
                _ = &mut ctrl_c => {
                    eprintln!();
                    eprintln!("{}", "⚠  Ctrl-C received – draining queued events …".yellow().bold());
                    break;
                }
            }
        }

        let mut stats = handle.shutdown().await.map_err(|e| e.to_string())?;
        stats.failed += rejected;
        Ok(stats)
    })
}

/// Batch mode: every line of `file` is handled in order on this thread.
fn replay(cfg: &Config, file: &Path) -> Result<DriverStats, String> {
    use gridfuse_runtime::GridPublisher;

    let mut pipeline = build_pipeline(cfg)?;
    let raw = std::fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;
    let mut publisher = NdjsonPublisher::new(std::io::stdout());
    let mut stats = DriverStats::default();

    for (number, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event = match SensorBridge::parse_line(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = number + 1, error = %e, "skipping replay line");
                stats.failed += 1;
                continue;
            }
        };
        stats.handled += 1;
        match pipeline.handle(&event.payload) {
            Ok(Some(snapshot)) => {
                publisher.publish(&snapshot).map_err(|e| e.to_string())?;
                stats.emitted += 1;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(line = number + 1, error = %e, "event handling failed");
                stats.failed += 1;
            }
        }
    }
    Ok(stats)
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner & help
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner(source: Option<&Path>) {
    eprintln!();
    eprintln!(
        "  {} {}",
        "gridfuse".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    match source {
        Some(path) => eprintln!("  Config loaded from {}", path.display().to_string().bold()),
        None => eprintln!("  {}", "No config file found; using defaults.".dimmed()),
    }
    eprintln!();
}

fn print_summary(stats: &DriverStats) {
    let failed = if stats.failed == 0 {
        stats.failed.to_string().green()
    } else {
        stats.failed.to_string().red()
    };
    eprintln!(
        "  {} handled {}, emitted {}, failed {}",
        "✓".green().bold(),
        stats.handled.to_string().bold(),
        stats.emitted.to_string().bold(),
        failed
    );
}

fn print_help() {
    eprintln!("{}", "Usage: gridfuse [--config FILE] [COMMAND]".bold());
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  run            stream NDJSON events from stdin (default)");
    eprintln!("  replay FILE    process a recorded NDJSON file");
    eprintln!("  config         print the effective configuration");
    eprintln!("  init           write ~/.gridfuse/config.toml with defaults");
    eprintln!("  schema         print the JSON schema of the [grid] section");
    eprintln!("  help           show this message");
}
