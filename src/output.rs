//! Persistence of the sample series.

use crate::client::TestReport;
use crate::config::{Config, OutputFormat};
use crate::measurements::{MetricSample, CSV_HEADERS};
use crate::Result;
use log::{info, warn};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Writes one CSV row per sample under the `CSV_HEADERS` header row.
///
/// An empty series writes nothing and leaves any existing file untouched.
/// Returns whether a file was written.
pub fn write_csv(path: &Path, samples: &[MetricSample]) -> Result<bool> {
    if samples.is_empty() {
        warn!("No samples to write, skipping {}", path.display());
        return Ok(false);
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(CSV_HEADERS)?;
    for sample in samples {
        writer.write_record(sample.to_record())?;
    }
    writer.flush()?;

    info!("Wrote {} samples to {}", samples.len(), path.display());
    Ok(true)
}

/// Writes the whole report as pretty-printed JSON.
pub fn write_json(path: &Path, report: &TestReport) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(file, report)?;
    info!("Wrote report to {}", path.display());
    Ok(())
}

/// Persists a finished run to `config.output` in `config.output_format`.
pub fn persist(report: &TestReport, config: &Config) -> Result<()> {
    match config.output_format {
        OutputFormat::Csv => write_csv(&config.output, &report.samples).map(|_| ()),
        OutputFormat::Json => write_json(&config.output, report),
    }
}
