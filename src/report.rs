//! HTML report rendering from a persisted CSV series.
//!
//! The page is self-contained: every metric gets its own section with an
//! inline SVG line chart, drawn with plotters, against the `Time` column.

use crate::measurements::CSV_HEADERS;
use crate::{Error, Result};
use log::{info, warn};
use plotters::prelude::*;
use std::fmt::{self, Write as _};
use std::ops::Range;
use std::path::Path;

const TIME_COLUMN: &str = "Time";
const CHART_SIZE: (u32, u32) = (800, 300);

/// Sample series read back from CSV, one vector per column.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricTable {
    pub time: Vec<f64>,
    /// Metric columns in `CSV_HEADERS` order, skipping any that are absent
    pub metrics: Vec<(String, Vec<f64>)>,
}

/// Reads a CSV written by `output::write_csv`.
///
/// Columns are looked up by header name. Metric columns missing from the
/// file are skipped with a warning, as are rows with unparseable cells.
///
/// # Errors
///
/// `Error::Config` if the file has no `Time` column, `Error::Csv` if it
/// cannot be read.
pub fn read_metrics(path: &Path) -> Result<MetricTable> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let position = |name: &str| headers.iter().position(|h| h.trim() == name);

    let time_idx = position(TIME_COLUMN).ok_or_else(|| {
        Error::Config(format!("{} has no '{}' column", path.display(), TIME_COLUMN))
    })?;

    let mut columns = Vec::new();
    for name in CSV_HEADERS.iter().filter(|h| **h != TIME_COLUMN) {
        match position(*name) {
            Some(idx) => columns.push((name.to_string(), idx)),
            None => warn!("Column '{}' not found in {}, skipping", name, path.display()),
        }
    }

    let mut table = MetricTable {
        time: Vec::new(),
        metrics: columns
            .iter()
            .map(|(name, _)| (name.clone(), Vec::new()))
            .collect(),
    };

    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let parse = |idx: usize| record.get(idx).and_then(|v| v.trim().parse::<f64>().ok());

        let time = parse(time_idx);
        let values: Option<Vec<f64>> = columns.iter().map(|(_, idx)| parse(*idx)).collect();

        match (time, values) {
            (Some(time), Some(values)) => {
                table.time.push(time);
                for ((_, series), value) in table.metrics.iter_mut().zip(values) {
                    series.push(value);
                }
            }
            _ => warn!("Skipping unparseable row {} in {}", row + 1, path.display()),
        }
    }

    Ok(table)
}

/// Renders the whole report page.
///
/// # Errors
///
/// `Error::Chart` if a chart cannot be drawn.
pub fn render_html(table: &MetricTable) -> Result<String> {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<title>Network Metrics Report</title>\n");
    html.push_str(
        "<style>body{font-family:sans-serif;margin:2em;}section{margin-bottom:2em;}</style>\n",
    );
    html.push_str("</head>\n<body>\n<h1>Network Metrics Report</h1>\n");

    for (name, values) in &table.metrics {
        let title = format!("{} over Time", name);
        let _ = writeln!(html, "<section>\n<h2>{}</h2>", escape(&title));
        html.push_str(&render_chart(&title, &table.time, values)?);
        html.push_str("\n</section>\n");
    }

    html.push_str("</body>\n</html>\n");
    Ok(html)
}

/// Renders one metric against time as an SVG line chart.
pub fn render_chart(title: &str, xs: &[f64], ys: &[f64]) -> Result<String> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, CHART_SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(chart_error)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 20).into_font())
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(axis_range(xs), axis_range(ys))
            .map_err(chart_error)?;

        chart
            .configure_mesh()
            .x_desc("Time (s)")
            .draw()
            .map_err(chart_error)?;

        chart
            .draw_series(LineSeries::new(
                xs.iter().zip(ys).map(|(&x, &y)| (x, y)),
                &BLUE,
            ))
            .map_err(chart_error)?;

        root.present().map_err(chart_error)?;
    }
    Ok(svg)
}

/// Reads `input` and writes the HTML report to `output`.
pub fn generate_report(input: &Path, output: &Path) -> Result<()> {
    let table = read_metrics(input)?;
    if table.time.is_empty() {
        warn!("{} contains no samples", input.display());
    }
    std::fs::write(output, render_html(&table)?)?;
    info!(
        "Report with {} charts written to {}",
        table.metrics.len(),
        output.display()
    );
    Ok(())
}

/// Axis span covering `values`, widened when they are empty or all equal.
fn axis_range(values: &[f64]) -> Range<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() {
        0.0..1.0
    } else if max > min {
        min..max
    } else {
        let pad = if min == 0.0 { 1.0 } else { min.abs() * 0.1 };
        (min - pad)..(max + pad)
    }
}

fn chart_error(e: impl fmt::Display) -> Error {
    Error::Chart(e.to_string())
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
