//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Download files with retry, cancellation and integrity checks.
///
/// Each URL is streamed to a temporary file next to its destination,
/// verified, then moved into place. Several URLs are fetched one after
/// another and share a single progress bar.
#[derive(Parser, Debug)]
#[command(name = "fetcher")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to download
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Directory to save files into
    #[arg(short = 'o', long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Exact destination file (single URL only)
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Expected size in bytes (single URL only)
    #[arg(long, value_name = "BYTES")]
    pub expected_size: Option<u64>,

    /// Expected MD5 checksum in hex (single URL only)
    #[arg(long, value_name = "HEX", conflicts_with = "md5_url")]
    pub md5: Option<String>,

    /// URL of a file holding the expected MD5 checksum (single URL only)
    #[arg(long, value_name = "URL")]
    pub md5_url: Option<String>,

    /// Whole-transfer retries after the first attempt (0-100)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(0..=100))]
    pub max_retries: Option<u32>,

    /// Retries for a single failed read (0-100)
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=100))]
    pub chunk_retries: Option<u32>,

    /// Initial read-buffer size in bytes
    #[arg(short = 'b', long, value_name = "BYTES", value_parser = parse_buffer_size)]
    pub buffer_size: Option<usize>,

    /// Keep the read-buffer size constant across attempts
    #[arg(long)]
    pub no_diminishing_buffer: bool,

    /// Configuration file (defaults to $XDG_CONFIG_HOME/fetcher/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print one JSON summary line per file
    #[arg(long)]
    pub json: bool,
}

impl Args {
    /// True when a flag that only makes sense for one file was given.
    #[must_use]
    pub fn has_single_file_options(&self) -> bool {
        self.output.is_some()
            || self.expected_size.is_some()
            || self.md5.is_some()
            || self.md5_url.is_some()
    }
}

fn parse_buffer_size(raw: &str) -> Result<usize, String> {
    let size: usize = raw
        .parse()
        .map_err(|_| format!("`{raw}` is not a byte count"))?;
    if size == 0 {
        return Err("buffer size must be at least 1".to_string());
    }
    Ok(size)
}
