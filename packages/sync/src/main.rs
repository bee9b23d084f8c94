#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the Amplitude-to-S3 sync tool.

use std::path::PathBuf;
use std::time::Instant;

use amp_sync::config::SyncConfig;
use amp_sync::pipeline::{self, BackfillOptions};
use amp_sync::report::MissingReport;
use amp_sync_cli_utils::IndicatifProgress;
use amp_sync_export::{ExportClient, extract};
use amp_sync_s3::batch::upload_dir;
use amp_sync_s3::{S3Client, normalize_prefix};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "amp_sync", about = "Amplitude export to S3 sync tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one export archive
    Export {
        /// First hour, `YYYYMMDDTHH` (default: 00:00 three days ago)
        #[arg(long)]
        start: Option<String>,
        /// Last hour, inclusive (default: 23:00 three days ago)
        #[arg(long)]
        end: Option<String>,
        /// Where to save the zip (default: `<data dir>/data.zip`)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Extract the JSON files from a downloaded archive
    Unpack {
        /// Archive to read (default: `<data dir>/data.zip`)
        #[arg(long)]
        archive: Option<PathBuf>,
        /// Output directory (default: `<data dir>/amp_data`)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Upload every file in a directory, deleting local copies once confirmed
    Upload {
        /// Directory to upload (default: `<data dir>/amp_data`)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Destination key prefix (overrides `AMP_SYNC_PREFIX`)
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Upload a single file
    UploadFile {
        /// Local file
        path: PathBuf,
        /// Destination key
        key: String,
    },
    /// List keys under a prefix
    List {
        /// Key prefix (overrides `AMP_SYNC_PREFIX`)
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Delete one key
    Delete {
        /// Key to delete
        key: String,
    },
    /// Report hours missing from the bucket
    Missing {
        /// Key prefix (overrides `AMP_SYNC_PREFIX`)
        #[arg(long)]
        prefix: Option<String>,
        /// First required date, `YYYY-MM-DD` (default: earliest date in the bucket)
        #[arg(long)]
        start_date: Option<NaiveDate>,
        /// Last required date (default: yesterday)
        #[arg(long)]
        end_date: Option<NaiveDate>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Re-fetch and upload every missing range
    Backfill {
        /// Key prefix (overrides `AMP_SYNC_PREFIX`)
        #[arg(long)]
        prefix: Option<String>,
        /// First required date, `YYYY-MM-DD` (default: earliest date in the bucket)
        #[arg(long)]
        start_date: Option<NaiveDate>,
        /// Last required date (default: yesterday)
        #[arg(long)]
        end_date: Option<NaiveDate>,
        /// Only print the ranges that would be fetched
        #[arg(long)]
        dry_run: bool,
    },
}

#[allow(clippy::too_many_lines)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = amp_sync_cli_utils::init_logger();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();
    let today = chrono::Local::now().date_naive();

    match cli.command {
        Commands::Export { start, end, output } => {
            let settings = config.export()?;
            let client =
                ExportClient::new(&settings.base_url, &settings.api_key, &settings.secret_key)?;

            let (default_start, default_end) = pipeline::default_export_range(today).api_params();
            let start = start.unwrap_or(default_start);
            let end = end.unwrap_or(default_end);
            let output = output.unwrap_or_else(|| config.archive_path());

            let bytes = client.download_archive(&start, &end, &output).await?;
            log::info!("Wrote {bytes} bytes to {}", output.display());
        }
        Commands::Unpack { archive, out } => {
            let archive = archive.unwrap_or_else(|| config.archive_path());
            let out = out.unwrap_or_else(|| config.extract_dir());
            let count = extract::extract_to_dir(&archive, &out)?;
            log::info!("Unpacked {count} file(s) into {}", out.display());
        }
        Commands::Upload { dir, prefix } => {
            let client = S3Client::new(config.storage()?);
            let dir = dir.unwrap_or_else(|| config.extract_dir());
            let prefix = prefix.unwrap_or_else(|| config.prefix.clone());

            log::info!("Uploading {} to s3://{}/{prefix}", dir.display(), client.bucket());
            let bar = IndicatifProgress::files_bar(&multi, "Uploading");
            let outcome = upload_dir(&client, &dir, &prefix, Some(bar)).await?;

            if let Some(dest) = pipeline::settle_dir(&dir, &outcome)? {
                return Err(format!(
                    "Upload incomplete ({}), files kept in {}",
                    outcome.stats(),
                    dest.display()
                )
                .into());
            }
        }
        Commands::UploadFile { path, key } => {
            let client = S3Client::new(config.storage()?);
            let stats = client.upload(&key, &path).await?;
            if stats.not_found > 0 {
                return Err(format!("{} does not exist", path.display()).into());
            }
            log::info!("{key}: {stats}");
        }
        Commands::List { prefix } => {
            let client = S3Client::new(config.storage()?);
            let prefix = normalize_prefix(&prefix.unwrap_or_else(|| config.prefix.clone()));
            let keys = client.list_keys(&prefix).await?;
            for key in &keys {
                println!("{key}");
            }
            log::info!(
                "{} key(s) under s3://{}/{prefix}",
                keys.len(),
                client.bucket()
            );
        }
        Commands::Delete { key } => {
            let client = S3Client::new(config.storage()?);
            client.delete(&key).await?;
            log::info!("Deleted {key}");
        }
        Commands::Missing {
            prefix,
            start_date,
            end_date,
            json,
        } => {
            let client = S3Client::new(config.storage()?);
            let prefix = prefix.unwrap_or_else(|| config.prefix.clone());
            let result =
                pipeline::find_missing(&client, &prefix, start_date, end_date, today).await?;
            let report = MissingReport::from(&result);

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.to_table());
            }
        }
        Commands::Backfill {
            prefix,
            start_date,
            end_date,
            dry_run,
        } => {
            let store = S3Client::new(config.storage()?);
            let prefix = prefix.unwrap_or_else(|| config.prefix.clone());

            if dry_run {
                let result =
                    pipeline::find_missing(&store, &prefix, start_date, end_date, today).await?;
                print!("{}", MissingReport::from(&result).to_table());
                return Ok(());
            }

            let settings = config.export()?;
            let source =
                ExportClient::new(&settings.base_url, &settings.api_key, &settings.secret_key)?;
            let work_dir = config.work_dir();

            let started = Instant::now();
            let bar = IndicatifProgress::ranges_bar(&multi, "Backfilling");
            let report = pipeline::backfill(
                &source,
                &store,
                BackfillOptions {
                    prefix: &prefix,
                    work_dir: &work_dir,
                    start: start_date,
                    end: end_date,
                    today,
                },
                Some(bar),
            )
            .await?;

            log::info!(
                "Backfill finished in {:.1}s: {} range(s) uploaded, {} empty, {} failed",
                started.elapsed().as_secs_f64(),
                report.uploaded.len(),
                report.empty.len(),
                report.failed.len()
            );
            log::info!(
                "{} hour(s) still missing ({})",
                report.remaining_hours(),
                report.stats
            );

            if report.has_failures() {
                for failed in &report.failed {
                    let hint = if failed.transient { " (transient)" } else { "" };
                    log::error!("  {}: {}{hint}", failed.range, failed.reason);
                }
                return Err(format!("{} range(s) failed", report.failed.len()).into());
            }
        }
    }

    Ok(())
}
