//! epub-split - split large EPUB files into smaller ones

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use epub_splitter::{LinkPolicy, SizeLimit, SplitConfig, split};

#[derive(Parser)]
#[command(name = "epub-split")]
#[command(version, about = "Split an EPUB into smaller, independently readable EPUBs", long_about = None)]
#[command(after_help = "EXAMPLES:
    epub-split book.epub --splitsize 10            Ten chapters per file
    epub-split book.epub --splitsize 500KB         At most ~500 KB of chapter text per file
    epub-split book.epub --singlerange 3 7 --title \"Part Two\"")]
struct Cli {
    /// EPUB file to split
    #[arg(value_name = "EPUB")]
    input: PathBuf,

    /// Chapters per file (bare number) or byte limit per file (e.g. 500KB, 2MiB)
    #[arg(long, value_name = "N|SIZE", value_parser = parse_split_size, conflicts_with = "singlerange")]
    splitsize: Option<SizeLimit>,

    /// Extract one chapter range (1-based, inclusive)
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    singlerange: Option<Vec<usize>>,

    /// Title of the extracted range; also names the output file
    #[arg(long, requires = "singlerange")]
    title: Option<String>,

    /// Output directory (defaults to the input's directory)
    #[arg(short, long, value_name = "DIR")]
    outdir: Option<PathBuf>,

    /// Remove links into other parts instead of pointing them at "#"
    #[arg(long)]
    strip_links: bool,

    /// Add a reading stylesheet to every part
    #[arg(long)]
    styles: bool,

    /// Build parts on all cores
    #[arg(long)]
    parallel: bool,

    /// Print a JSON report of the files written
    #[arg(long)]
    json: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Serialize)]
struct Report {
    input: String,
    parts: Vec<ReportPart>,
}

#[derive(Serialize)]
struct ReportPart {
    path: String,
    title: String,
    first_chapter: usize,
    last_chapter: usize,
    bytes: usize,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = build_config(cli)?;

    let bytes = std::fs::read(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let parts = split(&bytes, &config)
        .with_context(|| format!("failed to split {}", cli.input.display()))?;

    let outdir = match &cli.outdir {
        Some(dir) => dir.clone(),
        None => cli
            .input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };
    if !outdir.as_os_str().is_empty() {
        std::fs::create_dir_all(&outdir)
            .with_context(|| format!("failed to create {}", outdir.display()))?;
    }

    let base = cli
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book".to_string());

    let mut report = Report {
        input: cli.input.display().to_string(),
        parts: Vec::with_capacity(parts.len()),
    };
    for part in &parts {
        let path = outdir.join(output_name(&base, &part.file_stem, config.title.is_some()));
        std::fs::write(&path, &part.data)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(
            path = %path.display(),
            title = %part.title,
            "wrote chapters {}-{}",
            part.first_chapter,
            part.last_chapter
        );
        report.parts.push(ReportPart {
            path: path.display().to_string(),
            title: part.title.clone(),
            first_chapter: part.first_chapter,
            last_chapter: part.last_chapter,
            bytes: part.data.len(),
        });
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<SplitConfig> {
    let single_range = match cli.singlerange.as_deref() {
        None => None,
        Some(&[start, end]) => Some((start, end)),
        Some(other) => bail!("--singlerange takes exactly two numbers, got {}", other.len()),
    };

    let config = SplitConfig {
        split_size: cli.splitsize,
        single_range,
        title: cli.title.clone(),
        link_policy: if cli.strip_links {
            LinkPolicy::Strip
        } else {
            LinkPolicy::Placeholder
        },
        inject_styles: cli.styles,
        parallel: cli.parallel,
    };
    config.validate()?;
    Ok(config)
}

/// A bare number is a chapter count; anything with a unit is a byte size.
fn parse_split_size(value: &str) -> std::result::Result<SizeLimit, String> {
    let value = value.trim();
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        return value
            .parse()
            .map(SizeLimit::Chapters)
            .map_err(|e| format!("invalid chapter count: {e}"));
    }
    parse_size::parse_size(value)
        .map(SizeLimit::Bytes)
        .map_err(|e| format!("invalid size `{value}`: {e}"))
}

fn output_name(base: &str, stem: &str, titled: bool) -> String {
    if titled {
        format!("{stem}.epub")
    } else {
        format!("{base}_{stem}.epub")
    }
}
