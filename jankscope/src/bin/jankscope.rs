use analyzer::{Analyzer, Capability, CapabilitySet};
use chrome_trace_format::TraceData;
use clap::Parser;
use eyre::{Context, Result};
use jankscope::config::Config;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::OnceLock;

static LONG_VERSION: OnceLock<String> = OnceLock::new();

fn get_long_version() -> &'static str {
    LONG_VERSION.get_or_init(|| {
        format!(
            "{} (commit: {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_REVISION", "unknown"),
        )
    })
}

#[derive(Parser)]
#[command(name = "jankscope")]
#[command(about = "find the rendering work behind janky frames in a chrome trace")]
#[command(version = None, long_version = get_long_version())]
struct Args {
    #[arg(help = "trace file in chrome trace event format (json)")]
    trace: PathBuf,

    #[arg(short, long, help = "configuration file path (toml format)")]
    config: Option<PathBuf>,

    #[arg(long, help = "target frame rate, overrides the config file")]
    fps: Option<f64>,

    #[arg(
        long,
        value_parser = parse_capabilities,
        help = "comma separated capabilities of the trace source (e.g. GPU_EVENTS,PAINT_EVENTS)"
    )]
    capabilities: Option<CapabilitySet>,

    #[arg(short, long, help = "output file for the analysis, stdout when omitted")]
    output: Option<PathBuf>,

    #[arg(long, help = "order detections by impact score")]
    ranked: bool,

    #[arg(long, help = "run detectors on parallel threads")]
    parallel: bool,

    #[arg(long, help = "pretty-print the json output")]
    pretty: bool,
}

fn parse_capabilities(list: &str) -> Result<CapabilitySet, String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| Capability::parse(name).ok_or_else(|| format!("unknown capability {name}")))
        .collect()
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config path={}", path.display()))?,
        None => Config::default(),
    };

    let mut options = config.analyze_options();
    if let Some(fps) = args.fps {
        options.fps_target = fps;
    }
    if let Some(capabilities) = args.capabilities {
        options.capabilities = Some(capabilities);
    }
    options.parallel |= args.parallel;

    let trace = TraceData::from_path(&args.trace)
        .with_context(|| format!("failed to load trace path={}", args.trace.display()))?;
    tracing::info!(path = %args.trace.display(), events = trace.len(), "loaded trace");

    let analyzer = Analyzer::with_default_detectors(&config.thresholds);
    let mut result = analyzer
        .analyze(&trace, &options)
        .context("failed to analyze trace")?;
    if args.ranked {
        result.detections = result.ranked().into_iter().cloned().collect();
    }
    for warning in &result.warnings {
        tracing::warn!(code = ?warning.code, "{}", warning.message);
    }

    let writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("failed to create output path={}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = BufWriter::new(writer);
    if args.pretty {
        serde_json::to_writer_pretty(&mut writer, &result)?;
    } else {
        serde_json::to_writer(&mut writer, &result)?;
    }
    writeln!(writer)?;
    writer.flush()?;

    tracing::info!(
        detections = result.summary.total_detections,
        critical = result.summary.by_severity.critical,
        high = result.summary.by_severity.high,
        "analysis written"
    );
    Ok(())
}
