//! Command-line front end: list, test or extract each archive in turn.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use unzipconv::extract::{extract_archive, list_archive, test_archive};
use unzipconv::{Cli, ExtractOptions, LocalFileReader, NamedEntry};

/// Application entry point.
///
/// Parses the command line, installs the log subscriber and processes each
/// archive in order, stopping at the first one that fails.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the level implied by -q
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let opts = cli.options();
    for archive in &cli.archives {
        process_zip(archive, &cli, &opts)
            .await
            .with_context(|| format!("{}", archive.display()))?;
    }

    Ok(())
}

/// Process one archive based on CLI options.
///
/// - Test mode (`-t`): decode and verify every entry, write nothing
/// - Extract mode (`-x`): extract into the destination directory
/// - Otherwise: list decoded entry names
///
/// # Arguments
///
/// * `path` - Archive on the local filesystem
/// * `cli` - Parsed command-line arguments
/// * `opts` - Extraction options derived from `cli`
///
/// # Returns
///
/// Returns `Ok(())` on success, or the first fatal error for this archive.
async fn process_zip(path: &Path, cli: &Cli, opts: &ExtractOptions) -> Result<()> {
    let reader = Arc::new(LocalFileReader::new(path)?);

    // Test mode: read everything back, report the file count
    if cli.test {
        let checked = test_archive(reader, opts).await?;
        info!(archive = %path.display(), files = checked, "no errors detected");
        return Ok(());
    }

    // Extract mode: the archive's file name labels the staging directory
    if cli.extract {
        let label = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        let report = extract_archive(reader, &label, opts).await?;

        // Metadata failures do not fail the archive, but the user should know
        for warning in &report.warnings {
            warn!("{warning}");
        }
        info!(
            archive = %path.display(),
            files = report.files.len(),
            warnings = report.warnings.len(),
            "extracted"
        );
        return Ok(());
    }

    // List mode
    let entries = list_archive(reader, opts).await?;
    list_files(&entries, cli.verbose);
    Ok(())
}

/// Display archive contents.
///
/// # Arguments
///
/// * `entries` - Entries with their decoded names, in archive order
/// * `verbose` - If true, show sizes, ratio and modification time
fn list_files(entries: &[NamedEntry], verbose: bool) {
    if !verbose {
        for e in entries {
            println!("{}", e.name);
        }
        return;
    }

    println!(
        "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
        "Length", "Size", "Cmpr", "Date", "Time"
    );
    println!("{}", "-".repeat(70));

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    // Print one row per entry; directories are listed but not counted
    for e in entries {
        let entry = &e.entry;
        let (date, time) = match entry.modified() {
            Some(t) => (t.format("%Y-%m-%d").to_string(), t.format("%H:%M").to_string()),
            None => ("-".to_string(), "-".to_string()),
        };
        println!(
            "{:>10}  {:>10}  {}  {:>10}  {:>5}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            date,
            time,
            e.name
        );

        if !entry.is_directory() {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    // Summary line with totals
    println!("{}", "-".repeat(70));
    println!(
        "{:>10}  {:>10}  {}  {:>17}  {} files",
        total_uncompressed,
        total_compressed,
        ratio(total_compressed, total_uncompressed),
        "",
        file_count
    );
}

/// Space saved as a percentage; stored entries that grew show as 0%.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed == 0 || compressed >= uncompressed {
        return "   0%".to_string();
    }
    format!("{:>4}%", 100 - compressed * 100 / uncompressed)
}
