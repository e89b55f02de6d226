use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use salvage_copy::options::default_config_path;
use salvage_copy::procedure::{spawn_detached, Joined};
use salvage_copy::surface::{ReadTest, ZeroFill};
use salvage_copy::ui::{format_duration, human_bytes, ProgressRenderer, RenderMode};
use salvage_copy::*;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "salvage")]
#[command(about = "Defect-aware imaging and surface testing of failing drives")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Do not print a line per block
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Show a progress bar instead of per-block lines
    #[arg(long, global = true, conflicts_with = "quiet")]
    bar: bool,

    /// Print the final summary as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a failing device into an image file
    Copy {
        /// Source device or image (e.g., /dev/sdb)
        device: PathBuf,

        /// Destination image file
        #[arg(long)]
        dst: PathBuf,

        /// Access path (ata, posix); suggested from the device when omitted
        #[arg(long)]
        api: Option<String>,

        /// Read strategy (plain, smart, smart_noreverse, skipfail, skipfail_noreverse)
        #[arg(short, long)]
        strategy: Option<String>,

        /// Do not keep a sector journal
        #[arg(long)]
        no_journal: bool,

        /// Journal file (default: <device name>.journal)
        #[arg(long, conflicts_with = "no_journal")]
        journal: Option<PathBuf>,

        /// Blocks to jump over after a failure (skipfail strategies)
        #[arg(long)]
        skip_blocks: Option<u64>,

        /// First sector to copy
        #[arg(long)]
        start_lba: Option<u64>,

        /// Configuration file (default: salvage.toml in the user config dir)
        #[arg(long, env = "SALVAGE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Scan the device surface with reads
    ReadTest {
        /// Device path
        device: PathBuf,

        /// Access path (ata, posix); suggested from the device when omitted
        #[arg(long)]
        api: Option<String>,

        /// First sector to test
        #[arg(long, default_value = "0")]
        start_lba: u64,
    },

    /// Overwrite the whole device with zeros (DESTRUCTIVE)
    ZeroFill {
        /// Device path
        device: PathBuf,

        /// Confirm that the device contents may be destroyed
        #[arg(long)]
        yes: bool,
    },

    /// List available procedures
    Procedures,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.debug, cli.log_file.as_deref())?;

    let mode = if cli.quiet {
        RenderMode::Quiet
    } else if cli.bar {
        RenderMode::Bar
    } else {
        RenderMode::Lines
    };

    let token = CancellationToken::new();
    let outcome = match cli.command {
        Commands::Procedures => {
            list_procedures(cli.json)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Copy {
            device,
            dst,
            api,
            strategy,
            no_journal,
            journal,
            skip_blocks,
            start_lba,
            config,
        } => {
            let mut overrides = vec![("dst_file", dst.display().to_string())];
            if let Some(api) = &api {
                overrides.push(("api", api.clone()));
            }
            if let Some(strategy) = strategy {
                overrides.push(("read_strategy", strategy));
            }
            if no_journal {
                overrides.push(("use_journal", "no".to_string()));
            }
            if let Some(journal) = journal {
                overrides.push(("journal_file", journal.display().to_string()));
            }
            if let Some(skip_blocks) = skip_blocks {
                overrides.push(("skip_blocks", skip_blocks.to_string()));
            }
            if let Some(start_lba) = start_lba {
                overrides.push(("start_lba", start_lba.to_string()));
            }

            let ctx = probe(&device, &token)?;
            let (mut options, api_configured) =
                CopyOptions::load_with_api_source(config.as_deref(), &overrides)
                    .context("Failed to load copy options")?;
            if !api_configured {
                options.api = Api::suggested(ctx.ata_capable());
            }
            run_copy(&ctx, options, mode, cli.json)?
        }
        Commands::ReadTest {
            device,
            api,
            start_lba,
        } => {
            let ctx = probe(&device, &token)?;
            let api = match api {
                Some(api) => api.parse()?,
                None => Api::suggested(ctx.ata_capable()),
            };
            let procedure = ReadTest::open(&ctx, ReadTestOptions { api, start_lba })
                .with_context(|| format!("Failed to open {}", device.display()))?;
            run_surface(&ctx, ProcedureKind::ReadTest, procedure, mode, cli.json)?
        }
        Commands::ZeroFill { device, yes } => {
            if !yes {
                bail!(
                    "zero-fill destroys everything on {}; pass --yes to confirm",
                    device.display()
                );
            }
            let ctx = probe(&device, &token)?;
            let procedure = ZeroFill::open(&ctx)
                .with_context(|| format!("Failed to open {} for writing", device.display()))?;
            run_surface(&ctx, ProcedureKind::ZeroFill, procedure, mode, cli.json)?
        }
    };

    // Returning lets the log guard flush before the process exits
    Ok(ExitCode::from(outcome.exit_code()))
}

fn init_logging(debug: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .context("Log file path has no file name")?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

// SIGINT stops the worker between blocks
fn setup_signal_handler(token: &CancellationToken) -> Result<()> {
    use signal_hook::{consts::SIGINT, iterator::Signals};

    let mut signals = Signals::new([SIGINT])?;
    let token = token.clone();

    std::thread::Builder::new()
        .name("salvage-signals".into())
        .spawn(move || {
            for _ in signals.forever() {
                if token.is_cancelled() {
                    continue;
                }
                eprintln!("\nInterrupt received, stopping after the current block...");
                token.cancel();
            }
        })?;

    Ok(())
}

fn probe(device: &Path, token: &CancellationToken) -> Result<ProcedureContext> {
    let ctx = ProcedureContext::probe(device)
        .with_context(|| format!("Failed to probe {}", device.display()))?
        .with_token(token.clone());
    if let Some(info) = &ctx.info {
        tracing::info!(
            device = %device.display(),
            capacity = %human_bytes(info.capacity_bytes as f64),
            block_device = info.is_block_device,
            ata = info.ata_capable,
            model = info.model.as_deref().unwrap_or("unknown"),
            "Device probed"
        );
    }
    Ok(ctx)
}

/// Run on a worker thread while rendering its reports here
fn run_detached<P>(
    procedure: P,
    token: &CancellationToken,
    mode: RenderMode,
) -> Result<(P, RunOutcome, u64)>
where
    P: Procedure + 'static,
{
    setup_signal_handler(token)?;
    let mut renderer = ProgressRenderer::new(mode, procedure.progress());
    let run = spawn_detached(procedure, token.clone(), true)?;

    renderer.drain(&run);
    renderer.finish();

    let Joined {
        mut procedure,
        outcome,
    } = run.join()?;
    match outcome {
        Ok(outcome) => Ok((procedure, outcome, renderer.failed_blocks())),
        Err(e) => {
            if let Err(close_err) = procedure.close() {
                tracing::warn!(error = %close_err, "Close after failure also failed");
            }
            Err(e).context("Procedure failed")
        }
    }
}

fn run_copy(
    ctx: &ProcedureContext,
    options: CopyOptions,
    mode: RenderMode,
    json: bool,
) -> Result<RunOutcome> {
    let dst = options.dst_file.clone();
    let procedure = CopyProcedure::open(ctx, options)
        .with_context(|| format!("Failed to start copy of {}", ctx.device.display()))?;
    let (mut procedure, outcome, _) = run_detached(procedure, &ctx.token, mode)?;

    let summary = procedure.summary();
    procedure.close().context("Failed to close copy")?;

    if json {
        let report = serde_json::json!({
            "procedure": ProcedureKind::Copy.name(),
            "device": ctx.device,
            "destination": dst,
            "outcome": outcome,
            "finished_at": chrono::Utc::now().to_rfc3339(),
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!("Copy {:?} ({})", outcome, summary.strategy);
        println!(
            "  read ok:     {} sectors ({})",
            summary.read_ok_sectors,
            human_bytes((summary.read_ok_sectors * SECTOR_SIZE) as f64)
        );
        println!("  failed:      {} sectors", summary.failed_sectors);
        println!(
            "  unread:      {} sectors in {} zones",
            summary.unresolved_sectors, summary.zones_remaining
        );
        if summary.write_failures > 0 {
            println!("  write errors: {}", summary.write_failures);
        }
        println!(
            "  elapsed:     {}",
            humantime::format_duration(std::time::Duration::from_secs(summary.elapsed_secs as u64))
        );
    }
    Ok(outcome)
}

fn run_surface<P>(
    ctx: &ProcedureContext,
    kind: ProcedureKind,
    procedure: P,
    mode: RenderMode,
    json: bool,
) -> Result<RunOutcome>
where
    P: Procedure + 'static,
{
    let started = Instant::now();
    let (mut procedure, outcome, failed_blocks) = run_detached(procedure, &ctx.token, mode)?;
    let progress = procedure.progress();
    procedure
        .close()
        .with_context(|| format!("Failed to close {}", kind.name()))?;

    if json {
        let report = serde_json::json!({
            "procedure": kind.name(),
            "device": ctx.device,
            "outcome": outcome,
            "progress": progress,
            "failed_blocks": failed_blocks,
            "finished_at": chrono::Utc::now().to_rfc3339(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!("{} {:?}", kind.long_name(), outcome);
        println!("  sectors:       {}/{}", progress.done, progress.total);
        println!("  failed blocks: {}", failed_blocks);
        println!("  elapsed:       {}", format_duration(started.elapsed()));
    }
    Ok(outcome)
}

fn list_procedures(json: bool) -> Result<()> {
    if json {
        let list: Vec<_> = ProcedureKind::ALL
            .iter()
            .map(|kind| {
                serde_json::json!({
                    "name": kind.name(),
                    "description": kind.long_name(),
                    "destructive": kind.is_destructive(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    for kind in ProcedureKind::ALL {
        let marker = if kind.is_destructive() { " (destructive)" } else { "" };
        println!("{:<10} {}{}", kind.name(), kind.long_name(), marker);
    }
    if let Some(path) = default_config_path() {
        println!("\nCopy defaults are read from {}", path.display());
    }
    Ok(())
}
