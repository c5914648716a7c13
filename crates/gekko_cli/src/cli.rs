use std::io::{self, BufRead};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Retrieve pages and check for images!
#[derive(Debug, Parser)]
#[command(name = "gekko", version, about)]
pub struct Cli {
    /// List of urls to retrieve. Read from stdin when omitted.
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,

    /// Where to save the pages
    #[arg(short, long, value_name = "PATH", default_value = "downloads")]
    pub output_path: PathBuf,

    /// Print extra metadata from the requested pages
    #[arg(short, long)]
    pub metadata: bool,

    /// Number of pages retrieved concurrently. Values below 1 mean one at a
    /// time; when omitted a default based on the CPU count is used.
    #[arg(short, long, value_name = "NUM", allow_negative_numbers = true)]
    pub threads: Option<i64>,

    /// Time allowed for the whole batch, in seconds
    #[arg(long, value_name = "SECS", default_value = "10", value_parser = parse_deadline)]
    pub deadline: Duration,

    /// Directory holding the fetch ledger and logs
    #[arg(long, value_name = "PATH", env = "GEKKO_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_deadline(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw
        .parse()
        .map_err(|_| format!("`{raw}` is not a number of seconds"))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err("deadline must be a positive number of seconds".to_string());
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Whitespace separated URLs, one or more per line.
pub fn urls_from_reader(reader: impl BufRead) -> io::Result<Vec<String>> {
    let mut urls = Vec::new();
    for line in reader.lines() {
        urls.extend(line?.split_whitespace().map(str::to_owned));
    }
    Ok(urls)
}
