//! sdbench command-line interface.
#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use sdbench::config::{ByteOffset, CliOverrides, Direction, EnvSettings, PAD_FILE_SIZE};
use sdbench::report::{ConsoleSink, JsonSink, RowSink};
use sdbench::session::{Action, ActionOutcome, Session};
use sdbench::storage::{FileStorage, MemoryStorage, StorageBackend};
use sdbench::timer::{CascadedTimer, SimulatedTimer, TimerSource};
use sdbench::{BenchError, CancelToken, LogConfig, init_logging};
use sdbench_common::EnvParser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Simulated cost of one KiB on the in-memory backend.
const SIMULATED_TICKS_PER_KIB: u32 = 16;

#[derive(Parser)]
#[command(
    name = "sdbench",
    version,
    about = "Block-storage throughput and integrity benchmark"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    options: BenchOptions,
}

#[derive(Args)]
struct BenchOptions {
    /// Output format for benchmark rows
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Storage backend under test
    #[arg(long, global = true, value_enum, default_value = "file")]
    backend: BackendKind,

    /// Pad file path (overrides SDBENCH_PAD_PATH)
    #[arg(long, global = true)]
    pad: Option<PathBuf>,

    /// Byte offset added to every address: 0, 1, 2, 4, ..., 256
    #[arg(long, global = true)]
    offset: Option<u32>,

    /// Largest block size in bytes (power of two, 512 to 2097152)
    #[arg(long, global = true)]
    ceiling: Option<usize>,

    /// Use sequential instead of random addresses for read and write
    #[arg(long, global = true)]
    sequential: bool,

    /// Ask the driver to build a seek lookup cache before each sweep
    #[arg(long, global = true)]
    seek_cache: bool,

    /// Grant the storage bus to the coprocessor (advisory)
    #[arg(long, global = true)]
    coprocessor_priority: bool,

    /// Pause between rows, e.g. "500ms" or "2s"
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    row_pause: Option<Duration>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one benchmark sweep
    Run {
        #[arg(value_enum)]
        direction: DirectionArg,
    },
    /// Run every mode in one session
    All,
    /// Create the pad file if it does not exist
    Pad,
    /// Dispatch a comma-separated list of actions in order
    Script {
        /// e.g. "pad,read,cycle-offset,read,toggle-sequential,write"
        actions: String,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(ValueEnum, Clone, Copy)]
enum BackendKind {
    File,
    Memory,
}

#[derive(ValueEnum, Clone, Copy)]
enum DirectionArg {
    Read,
    Write,
    Readback,
}

impl From<DirectionArg> for Direction {
    fn from(value: DirectionArg) -> Self {
        match value {
            DirectionArg::Read => Direction::Read,
            DirectionArg::Write => Direction::Write,
            DirectionArg::Readback => Direction::Readback,
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut parser = EnvParser::new();
    let mut log_config = LogConfig::from_env(&mut parser, "info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let settings = EnvSettings::load(&mut parser);
    if parser.has_errors() {
        for error in parser.errors() {
            eprintln!("sdbench: {error}");
        }
        bail!("{} invalid SDBENCH_* setting(s)", parser.errors().len());
    }
    let _logging_guards = init_logging(&log_config)?;

    let settings = settings.with_overrides(overrides(&cli.options)?);
    debug!(
        pad = %settings.pad_path.value.display(),
        pad_source = %settings.pad_path.source,
        offset = %settings.byte_offset,
        ceiling = %settings.ceiling,
        sequential = %settings.sequential,
        seek_cache = %settings.seek_cache,
        coprocessor_priority = %settings.bus_priority_coprocessor,
        "Effective settings"
    );
    let config = settings.to_config();
    config
        .validate(PAD_FILE_SIZE)
        .context("Invalid benchmark configuration")?;

    let (backend, timer) = build_backend(cli.options.backend);
    let cancel = CancelToken::new();
    if let Err(e) = spawn_interrupt_listener(cancel.clone()) {
        warn!(error = %e, "Ctrl-C listener unavailable; sweeps cannot be interrupted");
    }

    let mut session = Session::new(backend, timer, config)
        .context("Failed to start benchmark session")?
        .with_cancel(cancel);

    let mut sink: Box<dyn RowSink> = match cli.options.format {
        OutputFormat::Text => Box::new(ConsoleSink::stdout()),
        OutputFormat::Json => Box::new(JsonSink::new(std::io::stdout())),
    };

    let actions = match cli.command {
        Commands::Run { direction } => vec![Action::Benchmark(direction.into())],
        Commands::All => vec![Action::RunAll],
        Commands::Pad => vec![Action::EnsurePad],
        Commands::Script { actions } => {
            Action::parse_list(&actions).context("Invalid action list")?
        }
    };

    // A single command aborts on its own failure; scripts carry on like the menu.
    let outcomes = if actions.len() == 1 {
        match session.dispatch(actions[0], sink.as_mut()) {
            Ok(outcome) => vec![outcome],
            Err(BenchError::Cancelled) => return Ok(ExitCode::from(130)),
            Err(e) => return Err(e).context(format!("{} failed", actions[0])),
        }
    } else {
        match session.run_script(&actions, sink.as_mut()) {
            Ok(outcomes) => outcomes,
            Err(BenchError::Cancelled) => return Ok(ExitCode::from(130)),
            Err(e) => return Err(e).context("Script aborted"),
        }
    };

    Ok(exit_code(&outcomes, sink.as_mut()))
}

fn overrides(options: &BenchOptions) -> Result<CliOverrides> {
    let byte_offset = options
        .offset
        .map(|offset| {
            ByteOffset::new(offset)
                .with_context(|| format!("--offset {offset} must be 0 or a power of two up to 256"))
        })
        .transpose()?;
    Ok(CliOverrides {
        pad_path: options.pad.clone(),
        byte_offset,
        ceiling: options.ceiling,
        sequential: options.sequential,
        seek_cache: options.seek_cache,
        coprocessor_priority: options.coprocessor_priority,
        row_pause: options.row_pause,
    })
}

fn build_backend(kind: BackendKind) -> (Box<dyn StorageBackend>, Box<dyn TimerSource>) {
    match kind {
        BackendKind::File => (Box::new(FileStorage::new()), Box::new(CascadedTimer::new())),
        BackendKind::Memory => {
            let timer = SimulatedTimer::default();
            let storage = MemoryStorage::new().with_clock(timer.clone(), SIMULATED_TICKS_PER_KIB);
            (Box::new(storage), Box::new(timer))
        }
    }
}

/// Raise `cancel` on the first Ctrl-C; exit on the second.
fn spawn_interrupt_listener(cancel: CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;

    std::thread::Builder::new()
        .name("sdbench-signal".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                info!("Interrupt received; stopping after the current row");
                cancel.cancel();
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            });
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

fn exit_code(outcomes: &[ActionOutcome], sink: &mut dyn RowSink) -> ExitCode {
    let mut failed = false;
    for outcome in outcomes {
        match outcome {
            ActionOutcome::Sweeps(sweeps) => {
                failed |= sweeps.iter().any(|(_, summary)| !summary.is_clean());
            }
            ActionOutcome::Failed(message) => {
                sink.notice(message);
                failed = true;
            }
            ActionOutcome::Pad(_) | ActionOutcome::Setting { .. } => {}
        }
    }
    if failed {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}
