//! CLI for the cadenza metrics ingestion engine.
//!
//! Provides commands for checking payload files, replaying them into a
//! block, and benchmarking the ingest path.

use std::path::{Path, PathBuf};
use std::time::Instant;

use cadenza::reader::parse_selector;
use cadenza::{Block, LineReader, MetricFamiliesTimeGroup, Reader};
use clap::{Parser, Subcommand, ValueEnum};

/// cadenza — Metrics payload parser and in-memory series store CLI.
#[derive(Parser)]
#[command(name = "cadenza", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Parse a payload file and print the resulting batch.
    Parse {
        /// Path to the payload file.
        payload: PathBuf,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Ingest payload files in order into a fresh block and report the result.
    Ingest {
        /// Payload files, ingested in the order given.
        #[arg(required = true)]
        payloads: Vec<PathBuf>,

        /// Print the series matching this selector (e.g. `up{job="api"}`).
        #[arg(long)]
        lookup: Option<String>,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run a read + ingest microbenchmark.
    Bench {
        /// Number of batches to ingest.
        #[arg(long, default_value = "1000")]
        batches: u32,

        /// Number of series per batch.
        #[arg(long, default_value = "100")]
        series: u32,
    },
}

/// Output format for command results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable text.
    Text,
    /// JSON document.
    Json,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Parse { payload, format } => cmd_parse(&payload, &format),
        Commands::Ingest {
            payloads,
            lookup,
            format,
        } => cmd_ingest(&payloads, lookup.as_deref(), &format),
        Commands::Bench { batches, series } => cmd_bench(batches, series),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `cadenza parse <payload>`.
fn cmd_parse(path: &Path, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let group = read_file(path)?;

    match format {
        OutputFormat::Text => print_group(path, &group),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&group)?),
    }

    Ok(())
}

/// Implements `cadenza ingest <payloads...>`.
fn cmd_ingest(
    paths: &[PathBuf],
    lookup: Option<&str>,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let block = Block::new();

    for path in paths {
        let summary = block.ingest(read_file(path)?);
        if let OutputFormat::Text = format {
            println!(
                "{}: {} families, {} points, {} new series",
                path.display(),
                summary.families,
                summary.points,
                summary.created_series
            );
        }
    }

    let stats = block.stats();
    let series = lookup
        .map(|selector| -> Result<_, Box<dyn std::error::Error>> {
            let (name, labels) = parse_selector(selector)?;
            Ok(block.lookup(&name, &labels)?)
        })
        .transpose()?;

    match format {
        OutputFormat::Text => {
            println!();
            println!("Buckets: {}", stats.buckets);
            println!("Series: {}", stats.series);
            println!("Points: {}", stats.points);

            if let Some(series) = series {
                println!();
                println!(
                    "# series={}{}, points={}",
                    series.name(),
                    series.labels(),
                    series.points().len()
                );
                println!("timestamp,value");
                for point in series.points() {
                    println!("{},{}", point.timestamp(), point.value());
                }
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "stats": stats,
                "series": series,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `cadenza bench`.
#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn cmd_bench(batches: u32, series: u32) -> Result<(), Box<dyn std::error::Error>> {
    println!("cadenza read + ingest benchmark");
    println!("  Batches: {batches}");
    println!("  Series per batch: {series}");
    println!();

    let reader = LineReader::new();
    let block = Block::new();
    let base_time = 1_700_000_000i64;

    let payloads: Vec<String> = (0..batches)
        .map(|i| build_payload(base_time + i64::from(i), series))
        .collect();
    let total_bytes: usize = payloads.iter().map(String::len).sum();

    let start = Instant::now();
    for payload in &payloads {
        block.ingest(reader.read(payload.as_bytes())?);
    }
    let elapsed = start.elapsed();

    let total_points = u64::from(batches) * u64::from(series);
    let ns_per_point = elapsed.as_nanos() as f64 / total_points.max(1) as f64;
    let points_per_sec = total_points as f64 / elapsed.as_secs_f64();
    let stats = block.stats();

    println!("Results:");
    println!("  Total points: {total_points}");
    println!("  Payload bytes: {}", format_bytes(total_bytes as u64));
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_point:.1} ns/point");
    println!("  Throughput: {points_per_sec:.0} points/sec");
    println!("  Series stored: {}", stats.series);
    println!();

    Ok(())
}

/// Reads and parses one payload file.
fn read_file(path: &Path) -> Result<MetricFamiliesTimeGroup, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)
        .map_err(|e| format!("failed to read '{}': {e}", path.display()))?;
    LineReader::new()
        .read(&bytes)
        .map_err(|e| format!("{}: {e}", path.display()).into())
}

/// Prints a batch in the text format used by `parse`.
fn print_group(path: &Path, group: &MetricFamiliesTimeGroup) {
    println!("Payload: {}", path.display());
    println!("Timestamp: {}", group.timestamp());
    println!("Families: {}", group.len());
    println!();

    for family in group.families() {
        let def = family.definition();
        let type_str = def.metric_type.map_or("untyped", |t| t.as_str());
        println!("  {} ({type_str})", family.name());
        if let Some(help) = def.help.as_deref().filter(|h| !h.is_empty()) {
            println!("    Help: {help}");
        }
        println!("    Points: {} in {} bucket(s)", family.len(), family.bucket_count());
        for point in family.points() {
            println!(
                "      {}{} {} (fingerprint {:016x})",
                point.name(),
                point.labels(),
                point.value(),
                point.fingerprint()
            );
        }
    }
}

/// Builds a synthetic payload with `series` label sets of one family.
fn build_payload(timestamp: i64, series: u32) -> String {
    let mut payload = format!(
        "{timestamp}\n\
         # HELP bench_requests Synthetic benchmark gauge.\n\
         # TYPE bench_requests gauge\n"
    );
    for i in 0..series {
        payload.push_str(&format!("bench_requests{{id=\"{i}\"}} {i}\n"));
    }
    payload
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
