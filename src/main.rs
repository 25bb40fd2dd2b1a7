//! flowslice CLI
//!
//! Packet capture to NetFlow conversion and time-sliced nfdump queries.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use flowslice::{
    activity::ActivityLog,
    capture::{CaptureJob, CaptureOrchestrator, CaptureOutcome, CaptureTools, InputOrder},
    config::Config,
    core::FlowStore,
    export::{export_stream, extraction_spec, CsvLayout, FlowTableWriter},
    process::{CancelToken, ProcessRunner, RunOptions, SystemRunner},
    query::{QuerySpec, Unit},
    Error, VERSION,
};

#[derive(Parser)]
#[command(name = "flowslice")]
#[command(version = VERSION)]
#[command(about = "Packet captures to time-sliced NetFlow queries", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the per-user config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert packet captures into an nfdump flow store
    Capture {
        /// Capture file or directory of captures
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Directory nfcapd writes into
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Canonical name of the finished flow file
        #[arg(long)]
        name: Option<String>,

        /// Replay a directory in lexicographic order
        #[arg(long)]
        sorted: bool,
    },

    /// Show the time window of a flow store and its slices
    Window {
        #[command(flatten)]
        slicing: SliceArgs,

        /// Number of slices to list
        #[arg(long, default_value = "10")]
        show: usize,
    },

    /// Print the nfdump command for a query
    Query {
        /// Flow store file or directory (defaults to the configured store)
        #[arg(long)]
        store: Option<PathBuf>,

        #[command(flatten)]
        query: QueryArgs,

        /// Time range in nfdump syntax (defaults to the full window)
        #[arg(long)]
        range: Option<String>,
    },

    /// Stream decoded rows slice by slice
    Stream {
        #[command(flatten)]
        query: QueryArgs,

        #[command(flatten)]
        slicing: SliceArgs,

        /// Stop after this many slices
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Write the raw extraction fields to CSV
    Extract {
        #[command(flatten)]
        slicing: SliceArgs,

        /// Output file (defaults to <csv_dir>/<store name>.csv)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Row layout
        #[arg(long, value_enum, default_value = "raw")]
        layout: LayoutArg,

        /// Write a header row first
        #[arg(long)]
        header: bool,

        /// Truncate the output instead of appending
        #[arg(long)]
        overwrite: bool,

        /// Stop after this many slices
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show total flows, bytes and packets of a flow store
    Volume {
        #[arg(long)]
        store: Option<PathBuf>,

        /// FLOWS, BYTES or PACKETS (all three when omitted)
        #[arg(long)]
        unit: Option<String>,
    },

    /// Show configuration, running tools and cumulative activity
    Status,

    /// Terminate every running capture daemon and export utility
    Kill,

    /// Show configuration
    Config,
}

#[derive(Args)]
struct SliceArgs {
    /// Flow store file or directory (defaults to the configured store)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Slice length in seconds
    #[arg(long)]
    length: Option<u64>,

    /// Seconds between slice starts
    #[arg(long)]
    stride: Option<u64>,
}

#[derive(Args)]
struct QueryArgs {
    /// Output variable, e.g. "SOURCE ADDRESS" (repeatable; all when omitted)
    #[arg(long = "var")]
    variables: Vec<String>,

    /// Aggregation key, e.g. PROTOCOL (repeatable)
    #[arg(long = "agg", short = 'A')]
    aggregators: Vec<String>,

    /// Sort unit: PACKETS, BYTES or FLOWS
    #[arg(long, short = 'u')]
    unit: Option<String>,

    /// Filter as NAME=VALUE, e.g. "DESTINATION PORT=53" (repeatable)
    #[arg(long = "filter", short = 'f')]
    filters: Vec<String>,
}

impl QueryArgs {
    fn spec(&self) -> Result<QuerySpec> {
        let filters: Vec<(String, Option<String>)> =
            self.filters.iter().map(|f| split_filter(f)).collect();
        QuerySpec::parse(
            &self.variables,
            &self.aggregators,
            self.unit.as_deref(),
            &filters,
        )
        .context("Invalid query")
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutArg {
    Raw,
    Indexed,
}

impl From<LayoutArg> for CsvLayout {
    fn from(layout: LayoutArg) -> Self {
        match layout {
            LayoutArg::Raw => CsvLayout::Raw,
            LayoutArg::Indexed => CsvLayout::Indexed,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;
    let runner = SystemRunner::new().with_sudo_kill(config.tools.kill_with_sudo);

    match cli.command {
        Commands::Capture {
            input,
            output_dir,
            name,
            sorted,
        } => cmd_capture(&config, runner, input, output_dir, name, sorted),
        Commands::Window { slicing, show } => cmd_window(&config, &runner, &slicing, show),
        Commands::Query {
            store,
            query,
            range,
        } => cmd_query(&config, &runner, store, &query, range),
        Commands::Stream {
            query,
            slicing,
            limit,
        } => cmd_stream(&config, &runner, &query, &slicing, limit),
        Commands::Extract {
            slicing,
            output,
            layout,
            header,
            overwrite,
            limit,
        } => cmd_extract(
            &config,
            &runner,
            &slicing,
            output,
            layout.into(),
            header,
            overwrite,
            limit,
        ),
        Commands::Volume { store, unit } => cmd_volume(&config, &runner, store, unit),
        Commands::Status => cmd_status(&config, &runner),
        Commands::Kill => cmd_kill(&config, &runner),
        Commands::Config => cmd_config(&config),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };
    Ok(config)
}

fn cmd_capture(
    config: &Config,
    runner: SystemRunner,
    input: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    name: Option<String>,
    sorted: bool,
) -> Result<()> {
    let mut job = CaptureJob::from_config(config);
    if let Some(input) = input {
        job = job.with_input(input);
    }
    if let Some(dir) = output_dir {
        job.output_dir = dir;
    }
    if let Some(name) = name {
        job.output_name = name;
    }
    if sorted {
        job = job.with_input_order(InputOrder::Sorted);
    }

    println!("flowslice v{VERSION}");
    println!();
    println!("Capture job {}", job.id);
    println!("  Input: {}", job.input.display());
    println!("  Collector: {}", job.endpoint());
    println!("  Output: {}", job.output_path().display());
    println!();
    println!("Press Ctrl+C to abort");
    println!();

    let cancel = ctrlc_handler()?;
    let orchestrator = CaptureOrchestrator::new(runner, CaptureTools::from(&config.tools))
        .with_settle_time(config.settle_time)
        .with_export_timeout(config.timeout())
        .with_cancel(cancel);
    let progress = orchestrator.progress();

    let worker = thread::spawn(move || orchestrator.run(&job));

    let mut last_line = String::new();
    while !worker.is_finished() {
        let line = progress.snapshot().to_string();
        if line != last_line {
            println!("{line}");
            last_line = line;
        }
        thread::sleep(Duration::from_millis(500));
    }

    let outcome = match worker.join() {
        Ok(result) => result?,
        Err(_) => bail!("Capture thread panicked"),
    };
    println!("{}", progress.snapshot());
    println!();

    let activity = ActivityLog::in_data_dir(&config.data_path);
    match &outcome {
        CaptureOutcome::Completed { store, processed } => {
            activity.record_capture_completed();
            activity.record_pcaps_processed(*processed as u64);
            println!("Flow store written to {}", store.display());
        }
        CaptureOutcome::NoInput { path } => {
            println!("No capture found at {}, nothing to do.", path.display());
        }
    }
    save_activity(&activity);
    Ok(())
}

fn open_store(config: &Config, runner: &SystemRunner, store: Option<&Path>) -> Result<FlowStore> {
    let path = store.map_or_else(|| config.store_path(), Path::to_path_buf);
    FlowStore::open(runner, &config.tools.engine, &path, &query_options(config, None))
        .with_context(|| format!("Failed to open flow store {}", path.display()))
}

fn query_options(config: &Config, cancel: Option<CancelToken>) -> RunOptions {
    let options = RunOptions::default().with_timeout(config.timeout());
    match cancel {
        Some(token) => options.with_cancel(token),
        None => options,
    }
}

fn slicing(config: &Config, args: &SliceArgs) -> (Duration, Duration) {
    (
        args.length.map_or(config.window_length, Duration::from_secs),
        args.stride.map_or(config.stride, Duration::from_secs),
    )
}

fn cmd_window(config: &Config, runner: &SystemRunner, args: &SliceArgs, show: usize) -> Result<()> {
    let store = open_store(config, runner, args.store.as_deref())?;
    let (length, stride) = slicing(config, args);
    let slicer = store.slicer(length, stride)?;

    println!("Flow store: {}", store.path().display());
    println!("  Window start: {}", store.window_start());
    println!("  Window end:   {}", store.window_end());
    println!(
        "  Slices: {} ({}s every {}s)",
        slicer.count(),
        length.as_secs(),
        stride.as_secs()
    );
    println!();

    for slice in slicer.iter().take(show) {
        println!("  {}", slice.time_range());
    }
    if slicer.count() > show {
        println!("  ... {} more", slicer.count() - show);
    }
    Ok(())
}

fn cmd_query(
    config: &Config,
    runner: &SystemRunner,
    store: Option<PathBuf>,
    args: &QueryArgs,
    range: Option<String>,
) -> Result<()> {
    let spec = args.spec()?;
    let store = open_store(config, runner, store.as_deref())?;
    let range = range.unwrap_or_else(|| store.full_range());

    match store.builder().command(&spec, &range) {
        Some(command) => println!("{command}"),
        None => bail!("Flow store {} disappeared", store.path().display()),
    }
    Ok(())
}

fn cmd_stream(
    config: &Config,
    runner: &SystemRunner,
    args: &QueryArgs,
    slicing_args: &SliceArgs,
    limit: Option<usize>,
) -> Result<()> {
    let spec = args.spec()?;
    let store = open_store(config, runner, slicing_args.store.as_deref())?;
    let (length, stride) = slicing(config, slicing_args);

    let cancel = ctrlc_handler()?;
    let stream = store.stream(runner, &spec, length, stride, query_options(config, Some(cancel)))?;
    println!(
        "Streaming {} slice(s) from {}",
        stream.total_slices(),
        store.path().display()
    );

    let activity = ActivityLog::in_data_dir(&config.data_path);
    let mut result = Ok(());

    for batch in stream.take(limit.unwrap_or(usize::MAX)) {
        let batch = match batch {
            Ok(batch) => batch,
            Err(Error::Cancelled { .. }) => {
                println!("Interrupted.");
                break;
            }
            Err(e) => {
                result = Err(e).context("Query failed");
                break;
            }
        };

        let rows = batch.decode();
        println!();
        println!("# {} ({} rows)", batch.start(), rows.len());
        for row in &rows {
            println!("{}", row.fields.join(" | "));
        }
        activity.record_slice_streamed();
    }

    save_activity(&activity);
    result
}

#[allow(clippy::too_many_arguments)]
fn cmd_extract(
    config: &Config,
    runner: &SystemRunner,
    args: &SliceArgs,
    output: Option<PathBuf>,
    layout: CsvLayout,
    header: bool,
    overwrite: bool,
    limit: Option<usize>,
) -> Result<()> {
    let store = open_store(config, runner, args.store.as_deref())?;
    let (length, stride) = slicing(config, args);
    let spec = extraction_spec();

    let output = output.unwrap_or_else(|| {
        let name = store
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| config.store_name.clone());
        config.csv_dir.join(format!("{name}.csv"))
    });

    let cancel = ctrlc_handler()?;
    let stream = store.stream(runner, &spec, length, stride, query_options(config, Some(cancel)))?;
    let total = stream.total_slices();

    let mut writer = FlowTableWriter::create(&output, layout, !overwrite)
        .with_context(|| format!("Failed to open {}", output.display()))?;
    if header {
        writer.write_header(&spec.effective_variables())?;
    }

    println!("Extracting {total} slice(s) to {}", output.display());
    let summary = export_stream(stream, &mut writer, limit);
    let rows = writer.rows_written();
    writer.finish().context("Failed to flush CSV output")?;

    let activity = ActivityLog::in_data_dir(&config.data_path);
    activity.record_rows_exported(rows);

    let result = match summary {
        Ok(summary) => {
            activity.record_slices_streamed(summary.slices as u64);
            println!("Wrote {} rows from {} slice(s)", summary.rows, summary.slices);
            Ok(())
        }
        Err(Error::Cancelled { .. }) => {
            println!("Interrupted after {rows} rows.");
            Ok(())
        }
        Err(e) => Err(e).context("Extraction failed"),
    };

    save_activity(&activity);
    result
}

fn cmd_volume(
    config: &Config,
    runner: &SystemRunner,
    store: Option<PathBuf>,
    unit: Option<String>,
) -> Result<()> {
    let store = open_store(config, runner, store.as_deref())?;
    let options = query_options(config, None);

    println!("Flow store: {}", store.path().display());
    println!("  Window: {}", store.full_range());

    match unit {
        Some(unit) => {
            let unit: Unit = unit.parse().context("Invalid unit")?;
            let total = store.volume(runner, unit, &options)?;
            println!("  {}: {total}", unit.name());
        }
        None => {
            let volumes = store.volumes(runner, &options)?;
            for unit in [Unit::Flows, Unit::Bytes, Unit::Packets] {
                println!("  {}: {}", unit.name(), volumes.get(unit));
            }
        }
    }
    Ok(())
}

fn cmd_status(config: &Config, runner: &SystemRunner) -> Result<()> {
    println!("flowslice Status");
    println!("================");
    println!();

    println!("Configuration:");
    println!("  Capture input: {}", config.pcap_path.display());
    println!("  Flow store: {}", config.store_path().display());
    println!("  Collector: {}", config.collector.endpoint());
    println!(
        "  Slicing: {}s every {}s",
        config.window_length.as_secs(),
        config.stride.as_secs()
    );
    println!();

    println!("Running tools:");
    for name in [&config.tools.daemon, &config.tools.exporter] {
        match runner.count_by_name(name) {
            Ok(count) => println!("  {name}: {count} instance(s)"),
            Err(e) => println!("  {name}: unknown ({e})"),
        }
    }
    println!();

    let activity = ActivityLog::in_data_dir(&config.data_path);
    println!("{}", activity.summary());
    Ok(())
}

fn cmd_kill(config: &Config, runner: &SystemRunner) -> Result<()> {
    for name in [&config.tools.daemon, &config.tools.exporter] {
        let killed = runner
            .kill_by_name(name)
            .with_context(|| format!("Failed to terminate {name}"))?;
        if killed {
            println!("Terminated {name}");
        } else {
            println!("No {name} running");
        }
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {}", Config::config_path().display());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(config).context("Failed to serialize config")?
    );
    Ok(())
}

/// `"NAME=VALUE"` or a bare `"NAME"` with no value.
fn split_filter(arg: &str) -> (String, Option<String>) {
    match arg.split_once('=') {
        Some((name, value)) => (name.trim().to_string(), Some(value.trim().to_string())),
        None => (arg.trim().to_string(), None),
    }
}

fn save_activity(activity: &ActivityLog) {
    if let Err(e) = activity.save() {
        warn!(error = %e, "could not save activity counters");
    }
}

/// Set up a Ctrl+C handler that cancels in-flight calls.
fn ctrlc_handler() -> Result<CancelToken> {
    let token = CancelToken::new();
    let handle = token.clone();
    ctrlc::set_handler(move || handle.cancel()).context("Error setting Ctrl+C handler")?;
    Ok(token)
}
