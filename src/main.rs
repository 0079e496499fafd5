//! CLI entry point for the fetcher tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use fetcher_core::{
    Downloader, TransferOutcome, TransferRequest, TransferSettings, load_default_settings,
    load_settings,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

mod cli;

use cli::Args;

const EXIT_FAILED: u8 = 1;
const EXIT_CANCELLED: u8 = 130;
const FALLBACK_FILE_NAME: &str = "download";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");
    run(args).await
}

async fn run(args: Args) -> Result<ExitCode> {
    if args.urls.len() > 1 && args.has_single_file_options() {
        bail!("--output, --expected-size, --md5 and --md5-url apply to a single URL only");
    }

    let settings = resolve_settings(&args)?;
    debug!(?settings, "effective settings");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            signal.cancel();
        }
    });

    let downloader = Downloader::http(settings.clone(), shutdown)
        .context("Failed to build HTTP client")?;

    let expected_checksum = match (&args.md5, &args.md5_url) {
        (Some(md5), _) => Some(md5.clone()),
        (None, Some(raw)) => {
            let url = Url::parse(raw.trim())
                .with_context(|| format!("Invalid checksum URL '{raw}'"))?;
            let checksum = downloader
                .remote_checksum(&url)
                .await
                .with_context(|| format!("Could not read a checksum from '{raw}'"))?;
            info!(checksum = %checksum, "using remote checksum");
            Some(checksum)
        }
        (None, None) => None,
    };

    let bar = progress_bar(&args);
    let mut offset = 0u64;
    let mut failed = 0usize;

    for raw in &args.urls {
        let destination = args
            .output
            .clone()
            .unwrap_or_else(|| args.output_dir.join(file_name_for(raw)));

        let mut builder = TransferRequest::builder(raw.as_str(), destination.clone())
            .with_settings(&settings)
            .already_transferred(offset);
        if let Some(size) = args.expected_size {
            builder = builder.expected_size(size);
        }
        if let Some(checksum) = &expected_checksum {
            builder = builder.expected_checksum(checksum.clone());
        }

        let request = match builder.build() {
            Ok(request) => request,
            Err(e) => {
                error!(url = %raw, error = %e, "skipping invalid request");
                failed += 1;
                if args.json {
                    let message = e.to_string();
                    let outcome = TransferOutcome::Failed { attempts: 0 };
                    print_summary(raw, &destination, outcome, Some(&message))?;
                }
                continue;
            }
        };

        bar.set_message(display_name(&destination));
        let mut handle = downloader.start(request);
        while let Some(total) = handle.progress().recv().await {
            bar.set_position(total);
        }
        let outcome = handle.join().await;

        if args.json {
            print_summary(raw, &destination, outcome, None)?;
        }

        match outcome {
            TransferOutcome::Success => {
                offset += tokio::fs::metadata(&destination)
                    .await
                    .map(|m| m.len())
                    .unwrap_or(0);
                bar.set_position(offset);
                info!(url = %raw, destination = %destination.display(), "saved");
            }
            TransferOutcome::Failed { attempts } => {
                failed += 1;
                error!(url = %raw, attempts, "download failed");
            }
            TransferOutcome::Cancelled { reason } => {
                bar.abandon();
                warn!(url = %raw, ?reason, "download cancelled");
                return Ok(ExitCode::from(EXIT_CANCELLED));
            }
        }
    }

    bar.finish_and_clear();
    info!(
        total = args.urls.len(),
        failed,
        bytes = offset,
        "Download complete"
    );

    if failed == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_FAILED))
    }
}

/// Loads the config file and applies command-line overrides.
fn resolve_settings(args: &Args) -> Result<TransferSettings> {
    let mut settings = match &args.config {
        Some(path) => load_settings(path)?,
        None => load_default_settings()?,
    };

    if let Some(retries) = args.max_retries {
        settings.max_retries = retries;
    }
    if let Some(retries) = args.chunk_retries {
        settings.max_chunk_retries = retries;
    }
    if let Some(size) = args.buffer_size {
        settings.buffer_size = size;
    }
    if args.no_diminishing_buffer {
        settings.diminishing_buffer = false;
    }

    settings.validate().context("Invalid effective settings")?;
    Ok(settings)
}

fn progress_bar(args: &Args) -> ProgressBar {
    if args.quiet || args.json {
        return ProgressBar::hidden();
    }

    let total = if args.urls.len() == 1 {
        args.expected_size.filter(|size| *size > 0)
    } else {
        None
    };

    let bar = match total {
        Some(len) => {
            let bar = ProgressBar::new(len);
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner} [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner} {bytes} ({bytes_per_sec}) {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar
        }
    };
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Destination file name for a URL: its last path segment, percent-decoded.
fn file_name_for(raw: &str) -> String {
    Url::parse(raw.trim())
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .and_then(|segment| {
            urlencoding::decode(&segment)
                .ok()
                .map(|decoded| decoded.replace(['/', '\\'], "_"))
        })
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

#[derive(Serialize)]
struct Summary<'a> {
    url: &'a str,
    destination: PathBuf,
    #[serde(flatten)]
    outcome: TransferOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

fn print_summary(
    url: &str,
    destination: &Path,
    outcome: TransferOutcome,
    error: Option<&str>,
) -> Result<()> {
    let line = serde_json::to_string(&Summary {
        url,
        destination: destination.to_path_buf(),
        outcome,
        error,
    })
    .context("Failed to serialize summary")?;
    println!("{line}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_from_last_segment() {
        assert_eq!(file_name_for("https://example.com/files/report.pdf"), "report.pdf");
    }

    #[test]
    fn test_file_name_is_percent_decoded() {
        assert_eq!(
            file_name_for("https://example.com/My%20Report%20(final).pdf"),
            "My Report (final).pdf"
        );
    }

    #[test]
    fn test_file_name_ignores_query() {
        assert_eq!(file_name_for("https://example.com/a.zip?token=abc"), "a.zip");
    }

    #[test]
    fn test_file_name_falls_back_for_bare_host() {
        assert_eq!(file_name_for("https://example.com/"), "download");
        assert_eq!(file_name_for("https://example.com"), "download");
    }

    #[test]
    fn test_file_name_falls_back_for_unparsable_url() {
        assert_eq!(file_name_for("not a url"), "download");
    }

    #[test]
    fn test_file_name_never_contains_separator() {
        assert_eq!(file_name_for("https://example.com/a%2Fb.txt"), "a_b.txt");
    }
}
