//! Command implementations and argument parsing for the vigseg CLI.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;
use tracing::{info, instrument};

use vigseg_core::{
    AmbiguousPolicy, ClauseThreshold, Cnf, CnfError, ComponentSummary, GraphSegmenter,
    SegmentError, SegmenterConfig, Vig, VigBuildError, VigBuilder, component_sizes, modularity,
    summarize_components,
};

use crate::csv::{CsvWriter, float_cell};

const DEFAULT_MAX_BUFFER: usize = 50_000_000;

/// Top-level CLI options parsed by [`clap`].
#[derive(Debug, Parser, Clone)]
#[command(name = "vigseg", about = "Analyze CNF variable interaction graphs.")]
pub struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported CLI commands.
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Build the variable interaction graph and report its statistics.
    VigInfo(VigInfoCommand),
    /// Build the graph, segment it, and summarise the components.
    Segment(SegmentCommand),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::VigInfo(_) => "vig-info",
            Command::Segment(_) => "segment",
        }
    }
}

/// Input and builder options shared by every command.
#[derive(Debug, Args, Clone)]
pub struct BuildArgs {
    /// Path to a DIMACS CNF file, or `-` for stdin.
    pub input: PathBuf,

    /// Clause size threshold; clauses with more literals are ignored.
    #[arg(long, default_value = "inf")]
    pub tau: ClauseThreshold,

    /// Use the naive single-threaded builder instead of the optimized one.
    #[arg(long)]
    pub naive: bool,

    /// Worker threads for the optimized builder; 0 selects the available
    /// parallelism.
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// Pair-write slots shared by the optimized builder's buffers.
    #[arg(long = "max-buffer", default_value_t = DEFAULT_MAX_BUFFER)]
    pub max_buffer: usize,

    /// Keep the original variable numbering instead of compacting the used
    /// variables to a dense range.
    #[arg(long = "no-compact")]
    pub no_compact: bool,
}

/// Options accepted by the `vig-info` command.
#[derive(Debug, Args, Clone)]
pub struct VigInfoCommand {
    /// Input and builder configuration.
    #[command(flatten)]
    pub build: BuildArgs,
}

/// Options accepted by the `segment` command.
#[derive(Debug, Args, Clone)]
pub struct SegmentCommand {
    /// Input and builder configuration.
    #[command(flatten)]
    pub build: BuildArgs,

    /// Segmentation parameter k.
    #[arg(long, default_value_t = 50.0)]
    pub k: f64,

    /// Size exponent in the gate denominator.
    #[arg(long = "size-exp", default_value_t = 1.2)]
    pub size_exponent: f64,

    /// Disable median distance normalization.
    #[arg(long = "no-normalize")]
    pub no_normalize: bool,

    /// How many of the strongest edges to sample for the median.
    #[arg(long = "norm-sample", default_value_t = 1000)]
    pub norm_sample: usize,

    /// Disable the modularity guard.
    #[arg(long = "no-guard")]
    pub no_guard: bool,

    /// Modularity resolution for the guard.
    #[arg(long, default_value_t = 1.0)]
    pub gamma: f64,

    /// Disable annealing of the guard tolerance.
    #[arg(long = "no-anneal")]
    pub no_anneal: bool,

    /// Initial guard tolerance.
    #[arg(long = "dq-tol0", default_value_t = 5e-4)]
    pub dq_tol0: f64,

    /// Guard annealing volume scale; 0 auto-selects.
    #[arg(long = "dq-vscale", default_value_t = 0.0)]
    pub dq_vscale: f64,

    /// Policy for merges the guard bounds cannot decide.
    #[arg(long, value_enum, default_value = "margin")]
    pub ambiguous: AmbiguousArg,

    /// Gate headroom ratio required by the margin policy.
    #[arg(long = "margin-ratio", default_value_t = 0.05)]
    pub margin_ratio: f64,

    /// Write per-component rows to a CSV file.
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

/// Ambiguous-merge policies selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AmbiguousArg {
    /// Merge anyway.
    Accept,
    /// Refuse the merge.
    Reject,
    /// Merge only with gate headroom to spare.
    Margin,
}

impl From<AmbiguousArg> for AmbiguousPolicy {
    fn from(arg: AmbiguousArg) -> Self {
        match arg {
            AmbiguousArg::Accept => AmbiguousPolicy::Accept,
            AmbiguousArg::Reject => AmbiguousPolicy::Reject,
            AmbiguousArg::Margin => AmbiguousPolicy::GateMargin,
        }
    }
}

/// Errors surfaced while executing CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// File I/O failed while loading the input formula.
    #[error("failed to open `{path}`: {source}")]
    Io {
        /// Path that triggered the failure.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// DIMACS parsing failed.
    #[error(transparent)]
    Parse(#[from] CnfError),
    /// VIG construction failed.
    #[error(transparent)]
    Build(#[from] VigBuildError),
    /// Segmenter configuration was invalid.
    #[error(transparent)]
    Segment(#[from] SegmentError),
    /// Writing the CSV report failed.
    #[error("failed to write CSV `{path}`: {source}")]
    Csv {
        /// Path that triggered the failure.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
}

/// Graph statistics reported by every command.
#[derive(Debug, Clone)]
pub struct VigInfoSummary {
    /// Label of the input source.
    pub input: String,
    /// Number of variables in the graph.
    pub variables: u32,
    /// Number of aggregated edges.
    pub edges: usize,
    /// Sum of all edge weights.
    pub total_weight: f64,
    /// Peak aggregation working set in bytes (0 for the naive builder).
    pub aggregation_memory: usize,
    /// Whether the builder had to raise its buffer capacity.
    pub bumped_to_fit: bool,
    /// Seconds spent parsing the input.
    pub parse_seconds: f64,
    /// Seconds spent building the graph.
    pub build_seconds: f64,
}

/// Segmentation outcome reported by the `segment` command.
#[derive(Debug, Clone)]
pub struct SegmentSummary {
    /// Graph statistics of the underlying VIG.
    pub info: VigInfoSummary,
    /// Number of components after segmentation.
    pub components: u32,
    /// Component-size distribution metrics.
    pub component_summary: ComponentSummary,
    /// Modularity of the final labelling.
    pub modularity: f64,
    /// Merges accepted outright by the guard's lower bound.
    pub lb_accepts: u64,
    /// Merges rejected outright by the guard's upper bound.
    pub ub_rejects: u64,
    /// Merges the guard bounds could not decide.
    pub ambiguous: u64,
    /// Distance normalization scale used during the run.
    pub d_scale: f64,
    /// Number of strongest inter-component edges.
    pub cross_edges: usize,
    /// Seconds spent segmenting.
    pub segment_seconds: f64,
}

/// Summarises the outcome of executing a CLI command.
#[derive(Debug, Clone)]
pub enum ExecutionSummary {
    /// Output of `vig-info`.
    VigInfo(VigInfoSummary),
    /// Output of `segment`.
    Segment(SegmentSummary),
}

/// Executes the CLI command represented by `cli`.
///
/// # Errors
/// Returns [`CliError`] when loading, building, or segmenting fails.
#[instrument(name = "cli.run", err, skip(cli), fields(command = %cli.command.name()))]
pub fn run_cli(cli: Cli) -> Result<ExecutionSummary, CliError> {
    match cli.command {
        Command::VigInfo(command) => run_vig_info(command).map(ExecutionSummary::VigInfo),
        Command::Segment(command) => run_segment(command).map(ExecutionSummary::Segment),
    }
}

#[instrument(
    name = "cli.vig_info",
    err,
    skip(command),
    fields(input = %input_label(&command.build.input))
)]
pub(super) fn run_vig_info(command: VigInfoCommand) -> Result<VigInfoSummary, CliError> {
    let (_, info) = build_graph(&command.build)?;
    info!(
        variables = info.variables,
        edges = info.edges,
        memory = %format_bytes(info.aggregation_memory as u64),
        "graph built"
    );
    Ok(info)
}

#[instrument(
    name = "cli.segment",
    err,
    skip(command),
    fields(input = %input_label(&command.build.input), k = command.k)
)]
pub(super) fn run_segment(command: SegmentCommand) -> Result<SegmentSummary, CliError> {
    let (vig, info) = build_graph(&command.build)?;
    let scoring_edges = vig.edges().to_vec();

    let config = SegmenterConfig {
        normalize_distances: !command.no_normalize,
        norm_sample_edges: command.norm_sample,
        size_exponent: command.size_exponent,
        use_modularity_guard: !command.no_guard,
        gamma: command.gamma,
        anneal: !command.no_anneal,
        dq_tol0: command.dq_tol0,
        dq_vscale: command.dq_vscale,
        ambiguous_policy: command.ambiguous.into(),
        gate_margin_ratio: command.margin_ratio,
    };

    let started = Instant::now();
    let mut segmenter = GraphSegmenter::with_config(vig.variable_count(), command.k, config)?;
    let mut edges = vig.into_edges();
    segmenter.reserve_candidates(edges.len() / 4);
    segmenter.run(&mut edges);
    let segment_seconds = started.elapsed().as_secs_f64();

    let sizes = component_sizes(segmenter.node_count(), |node| segmenter.component_of(node));
    let component_summary = summarize_components(&sizes);
    let score = modularity(
        segmenter.node_count(),
        &scoring_edges,
        |node| segmenter.component_of(node),
        command.gamma,
    );
    let cross_edges = segmenter.strongest_inter_component_edges();

    if let Some(path) = &command.csv {
        write_component_csv(path, &segmenter)?;
    }

    info!(
        components = segmenter.num_components(),
        modularity = score,
        "segmentation complete"
    );

    Ok(SegmentSummary {
        info,
        components: segmenter.num_components(),
        component_summary,
        modularity: score,
        lb_accepts: segmenter.lb_accepts(),
        ub_rejects: segmenter.ub_rejects(),
        ambiguous: segmenter.ambiguous_count(),
        d_scale: segmenter.d_scale(),
        cross_edges: cross_edges.len(),
        segment_seconds,
    })
}

fn build_graph(args: &BuildArgs) -> Result<(Vig, VigInfoSummary), CliError> {
    let parse_started = Instant::now();
    let cnf = load_cnf(&args.input, !args.no_compact)?;
    let parse_seconds = parse_started.elapsed().as_secs_f64();

    let builder = select_builder(args);
    let build_started = Instant::now();
    let vig = builder.build(&cnf, args.tau)?;
    let build_seconds = build_started.elapsed().as_secs_f64();

    let info = VigInfoSummary {
        input: input_label(&args.input),
        variables: vig.variable_count(),
        edges: vig.edges().len(),
        total_weight: vig.total_weight(),
        aggregation_memory: vig.aggregation_memory(),
        bumped_to_fit: vig.bumped_to_fit(),
        parse_seconds,
        build_seconds,
    };
    Ok((vig, info))
}

fn select_builder(args: &BuildArgs) -> VigBuilder {
    if args.naive {
        return VigBuilder::Naive;
    }
    let threads = if args.threads == 0 {
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    } else {
        args.threads
    };
    VigBuilder::Optimized {
        threads,
        max_buffer: args.max_buffer,
    }
}

fn load_cnf(input: &Path, compaction: bool) -> Result<Cnf, CliError> {
    if input == Path::new("-") {
        let stdin = io::stdin();
        return Ok(Cnf::from_reader(stdin.lock(), compaction)?);
    }
    let file = File::open(input).map_err(|source| CliError::Io {
        path: input.to_path_buf(),
        source,
    })?;
    Ok(Cnf::from_reader(BufReader::new(file), compaction)?)
}

fn write_component_csv(path: &Path, segmenter: &GraphSegmenter) -> Result<(), CliError> {
    let mut sizes: BTreeMap<u32, u32> = BTreeMap::new();
    for node in 0..segmenter.node_count() {
        *sizes.entry(segmenter.component_of(node)).or_insert(0) += 1;
    }

    let file = File::create(path).map_err(|source| csv_error(path, source))?;
    let mut writer = CsvWriter::new(io::BufWriter::new(file));
    writer
        .header(&["component", "size", "share"])
        .map_err(|source| csv_error(path, source))?;
    let total = segmenter.node_count().max(1) as f64;
    for (root, size) in sizes {
        writer
            .row(&[
                root.to_string(),
                size.to_string(),
                float_cell(f64::from(size) / total),
            ])
            .map_err(|source| csv_error(path, source))?;
    }
    writer.into_inner().map_err(|source| csv_error(path, source))?;
    Ok(())
}

fn csv_error(path: &Path, source: io::Error) -> CliError {
    CliError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

/// Renders a byte gauge with binary units for log lines.
pub(super) fn format_bytes(bytes: u64) -> String {
    const UNITS: [(&str, u64); 4] = [
        ("TiB", 1 << 40),
        ("GiB", 1 << 30),
        ("MiB", 1 << 20),
        ("KiB", 1 << 10),
    ];
    for (label, divisor) in UNITS {
        if bytes >= divisor {
            return format!("{:.1} {label}", bytes as f64 / divisor as f64);
        }
    }
    format!("{bytes} B")
}

fn input_label(path: &Path) -> String {
    if path == Path::new("-") {
        return "<stdin>".to_owned();
    }
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "<unknown>".to_owned())
}

/// Renders `summary` to `writer` as `key=value` pairs, one line per record.
///
/// # Errors
/// Returns [`io::Error`] if writing to the supplied writer fails.
pub fn render_summary(summary: &ExecutionSummary, mut writer: impl Write) -> io::Result<()> {
    match summary {
        ExecutionSummary::VigInfo(info) => render_vig_info(info, &mut writer),
        ExecutionSummary::Segment(segment) => render_segment(segment, &mut writer),
    }
}

fn render_vig_info(info: &VigInfoSummary, writer: &mut impl Write) -> io::Result<()> {
    writeln!(
        writer,
        "input={} vars={} edges={} total_weight={} agg_memory={} bumped={} parse_sec={:.6} build_sec={:.6}",
        info.input,
        info.variables,
        info.edges,
        info.total_weight,
        info.aggregation_memory,
        info.bumped_to_fit,
        info.parse_seconds,
        info.build_seconds,
    )
}

fn render_segment(segment: &SegmentSummary, writer: &mut impl Write) -> io::Result<()> {
    render_vig_info(&segment.info, writer)?;
    writeln!(
        writer,
        "comps={} keff={:.4} gini={:.4} pmax={:.4} evenness={:.4} modularity={:.6}",
        segment.components,
        segment.component_summary.effective_count,
        segment.component_summary.gini,
        segment.component_summary.max_share,
        segment.component_summary.entropy_evenness,
        segment.modularity,
    )?;
    writeln!(
        writer,
        "lb_accepts={} ub_rejects={} ambiguous={} d_scale={} cross_edges={} seg_sec={:.6}",
        segment.lb_accepts,
        segment.ub_rejects,
        segment.ambiguous,
        segment.d_scale,
        segment.cross_edges,
        segment.segment_seconds,
    )
}
