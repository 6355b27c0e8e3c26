//! PDF Page Diff CLI tool
//!
//! A command-line front end for comparing two groups of documents page by page.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use glob::glob;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use pdf_pagediff::config::{load_configuration, EngineConfig};
use pdf_pagediff::engine::format_percentage;
use pdf_pagediff::extract::{detect_format, DocumentFormat};
use pdf_pagediff::{logging, pdf, raster};
use pdf_pagediff::{CheckPagesRequest, CheckPagesResponse, ComparisonEngine, ComparisonResult, Status, Upload};

/// PDF Page Diff - Compare documents page by page
#[derive(Parser)]
#[command(name = "pdf-pagediff")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Compare two revisions of a PDF
    pdf-pagediff compare -a old.pdf -b new.pdf -o diff-out

    # Compare two folders of page images, matched by filename
    pdf-pagediff compare -a \"v1/*.png\" -b \"v2/*.png\" -o diff-out

    # Print the results as JSON
    pdf-pagediff compare -a old.pdf -b new.pdf --json

    # Show page count and format of a document
    pdf-pagediff info report.pdf")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare group A against group B
    Compare {
        /// Group A files. Supports glob patterns like "*.png"
        #[arg(short = 'a', long = "group-a", required = true, num_args = 1..)]
        group_a: Vec<String>,

        /// Group B files. Supports glob patterns like "*.png"
        #[arg(short = 'b', long = "group-b", required = true, num_args = 1..)]
        group_b: Vec<String>,

        /// Directory to write diff overlays and originals into
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Print results as JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Per-channel tolerance (0-255)
        #[arg(long)]
        tolerance: Option<u8>,

        /// PDF rasterization resolution
        #[arg(long)]
        dpi: Option<u32>,

        /// Diff worker threads (0 = one per CPU)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Show information about a document
    Info {
        /// PDF or image file to inspect
        input: PathBuf,
    },
}

fn main() {
    let _guard = logging::init_logger();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compare {
            group_a,
            group_b,
            out,
            json,
            tolerance,
            dpi,
            workers,
        } => cmd_compare(group_a, group_b, out, json, tolerance, dpi, workers),
        Commands::Info { input } => cmd_info(input),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// Expand glob patterns in input paths
fn expand_globs(patterns: Vec<String>) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for pattern in patterns {
        if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
            let mut matched = false;
            for entry in glob(&pattern)? {
                match entry {
                    Ok(path) => {
                        paths.push(path);
                        matched = true;
                    }
                    Err(e) => eprintln!("Warning: glob error for {}: {}", pattern, e),
                }
            }
            if !matched {
                bail!("No files matched pattern: {}", pattern);
            }
        } else {
            paths.push(PathBuf::from(pattern));
        }
    }

    Ok(paths)
}

fn read_uploads(patterns: Vec<String>) -> anyhow::Result<Vec<Upload>> {
    expand_globs(patterns)?
        .into_iter()
        .map(|path| {
            let bytes = std::fs::read(&path).with_context(|| format!("Input file not found: {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(Upload::new(name, bytes))
        })
        .collect()
}

fn build_config(tolerance: Option<u8>, dpi: Option<u32>, workers: Option<usize>) -> anyhow::Result<EngineConfig> {
    let mut config = load_configuration().context("Failed to load configuration")?;
    if let Some(tolerance) = tolerance {
        config.tolerance = tolerance;
    }
    if let Some(dpi) = dpi {
        config.dpi = dpi;
    }
    if let Some(workers) = workers {
        config.worker_threads = workers;
    }
    Ok(config)
}

/// Result row without images, for `--json`
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryRow<'a> {
    filename: &'a str,
    status: Status,
    difference_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

#[derive(Serialize)]
struct Summary<'a> {
    check: &'a CheckPagesResponse,
    results: Vec<SummaryRow<'a>>,
}

/// Compare two groups and report the results
#[allow(clippy::too_many_arguments)]
fn cmd_compare(
    group_a: Vec<String>,
    group_b: Vec<String>,
    out: Option<PathBuf>,
    json: bool,
    tolerance: Option<u8>,
    dpi: Option<u32>,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    let config = build_config(tolerance, dpi, workers)?;
    let request = CheckPagesRequest {
        files_a: read_uploads(group_a)?,
        files_b: read_uploads(group_b)?,
    };

    let engine = ComparisonEngine::new(config)?;
    let checked = engine.check_pages(request)?;
    let id = checked.session_id.as_str().to_string();

    let outcome = engine.diff(&id).map_err(anyhow::Error::from).and_then(|report| {
        if let Some(dir) = &out {
            write_images(dir, &report.results)?;
        }
        if json {
            let summary = Summary {
                check: &checked,
                results: report
                    .results
                    .iter()
                    .map(|r| SummaryRow {
                        filename: &r.filename,
                        status: r.status,
                        difference_percentage: r.difference_percentage,
                        error: r.error.as_deref(),
                    })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print_table(&checked, &report.results);
        }
        Ok(())
    });

    engine.clear_session(&id)?;
    outcome
}

fn print_table(checked: &CheckPagesResponse, results: &[ComparisonResult]) {
    for issue in &checked.upload_issues {
        eprintln!("Warning: [{}] {}", issue.group, issue.message);
    }

    println!("{:<40} {:<14} {:>10}", "PAGE", "STATUS", "DIFF %");
    for r in results {
        let pct = r
            .difference_percentage
            .map(format_percentage)
            .unwrap_or_else(|| "-".to_string());
        println!("{:<40} {:<14} {:>10}", r.filename, status_label(r.status), pct);
        if let Some(err) = &r.error {
            println!("    {}", err);
        }
    }
}

fn status_label(status: Status) -> &'static str {
    match status {
        Status::Unchanged => "unchanged",
        Status::Changed => "changed",
        Status::AddedInB => "added in B",
        Status::RemovedFromA => "removed from A",
        Status::Error => "error",
    }
}

/// File-system safe stem for a result row
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

fn write_images(dir: &Path, results: &[ComparisonResult]) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    for (i, r) in results.iter().enumerate() {
        let stem = format!("{:04}-{}", i + 1, file_stem(&r.filename));
        let images: [(&str, &Option<Arc<image::RgbImage>>); 3] =
            [("diff", &r.diff_image), ("a", &r.original_a), ("b", &r.original_b)];
        for (suffix, img) in images {
            if let Some(img) = img {
                raster::save_png(img, &dir.join(format!("{}.{}.png", stem, suffix)))?;
            }
        }
    }

    eprintln!("Images written to: {}", dir.display());
    Ok(())
}

/// Show information about a document
fn cmd_info(input: PathBuf) -> anyhow::Result<()> {
    if !input.exists() {
        bail!("Input file not found: {}", input.display());
    }

    let bytes = std::fs::read(&input)?;
    let name = input.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let format = detect_format(&name, &bytes);

    println!("File: {}", input.display());
    println!("Format: {}", format);

    match format {
        DocumentFormat::Pdf => {
            let info = pdf::inspect(&bytes)?;
            println!("PDF version: {}", info.version);
            println!("Pages: {}", info.page_count);
            if let Some(title) = info.title {
                println!("Title: {}", title);
            }
        }
        DocumentFormat::Raster(_) => {
            let img = raster::decode(&bytes)?;
            println!("Pages: 1");
            println!("Size: {}x{}", img.width(), img.height());
        }
        DocumentFormat::Unknown => bail!("Unsupported format: {}", input.display()),
    }

    Ok(())
}
