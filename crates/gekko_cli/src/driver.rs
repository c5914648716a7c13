//! Batch driver: saves retrieved pages, updates the fetch ledger and reports
//! page metadata.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use gekko_engine::{page_location, AtomicFileWriter, FetchLedger, Orchestrator};
use gekko_logging::{gekko_info, gekko_warn};

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub output_root: PathBuf,
    pub report_metadata: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageReport {
    pub url: String,
    pub site: String,
    pub saved_to: PathBuf,
    pub links: usize,
    pub images: usize,
    /// Last fetch before this run.
    pub last_fetch: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub pages: Vec<PageReport>,
    pub failed_urls: Vec<String>,
}

pub fn run_batch(
    orchestrator: &Orchestrator,
    ledger: &mut FetchLedger,
    urls: Vec<String>,
    options: &DriverOptions,
) -> Result<BatchReport> {
    let batch = orchestrator
        .retrieve(urls)
        .context("page retrieval failed")?;

    let mut report = BatchReport {
        pages: Vec::with_capacity(batch.successes.len()),
        failed_urls: batch.failed_urls.into_iter().collect(),
    };

    for page in batch.successes {
        let location = match page_location(&options.output_root, &page.url) {
            Ok(location) => location,
            Err(err) => {
                gekko_warn!("Not saving {}: {}", page.url, err);
                report.failed_urls.push(page.url);
                continue;
            }
        };
        let saved_to = AtomicFileWriter
            .write(&location, &page.bytes)
            .with_context(|| format!("failed to save {}", page.url))?;
        let last_fetch = ledger
            .update_last_fetch(&page.url)
            .with_context(|| format!("failed to record fetch time of {}", page.url))?;

        let page_report = PageReport {
            url: page.url,
            site: location.site,
            saved_to,
            links: page.link_count,
            images: page.image_count,
            last_fetch,
        };
        if options.report_metadata {
            log_metadata(&page_report);
        }
        report.pages.push(page_report);
    }

    if !report.failed_urls.is_empty() {
        gekko_warn!(
            "The following urls failed: {}",
            report.failed_urls.join(", ")
        );
    }

    Ok(report)
}

fn log_metadata(page: &PageReport) {
    for line in metadata_lines(page) {
        gekko_info!("{}", line);
    }
}

fn metadata_lines(page: &PageReport) -> Vec<String> {
    let mut lines = vec![
        format!("Metadata for URL: {}", page.url),
        format!("\tSite: {}", page.site),
        format!("\tLinks: {}", page.links),
        format!("\tImages: {}", page.images),
    ];
    if let Some(last_fetch) = page.last_fetch {
        lines.push(format!(
            "\tLast fetch: {}",
            last_fetch.format("%A %Y-%m-%d %H:%M%Z")
        ));
    }
    lines
}
