//! This module is responsible for getting processed batches off the box

use std::{
    fmt::Write as _,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::{error::Result, pipeline::BatchRecord};

/// Somewhere to put a finished batch
pub trait ResultSink {
    fn persist(&mut self, record: &BatchRecord) -> Result<()>;
}

/// Both sinks see every record. The first failure is reported, after both have run.
impl<A: ResultSink, B: ResultSink> ResultSink for (A, B) {
    fn persist(&mut self, record: &BatchRecord) -> Result<()> {
        let first = self.0.persist(record);
        let second = self.1.persist(record);
        first.and(second)
    }
}

/// Writes each batch to `<dir>/all_data_<name>.txt`
#[derive(Debug, Clone)]
pub struct TextFileSink {
    dir: PathBuf,
}

impl TextFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("all_data_{name}.txt"))
    }
}

/// Timestamp for the file header
fn header_timestamp(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// `[1.000000, nan, ...]` or `N/A` when there's nothing to print
fn format_values(values: &[f64]) -> String {
    if values.is_empty() {
        return "N/A".to_owned();
    }
    let mut out = String::with_capacity(values.len() * 14 + 2);
    out.push('[');
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        if v.is_nan() {
            out.push_str("nan");
        } else {
            // Writing to a String can't fail
            let _ = write!(out, "{v:.6}");
        }
    }
    out.push(']');
    out
}

fn write_section<W: Write>(out: &mut W, title: &str, values: &[f64]) -> std::io::Result<()> {
    writeln!(out, "{title} (total {} samples):", values.len())?;
    writeln!(out, "{}", format_values(values))?;
    writeln!(out)
}

/// Render a whole record file
pub fn write_record<W: Write>(out: &mut W, record: &BatchRecord, time: &DateTime<Utc>) -> std::io::Result<()> {
    writeln!(out, "Processed {} at {}", record.name, header_timestamp(time))?;
    writeln!(out)?;
    write_section(out, "Raw Weights", &record.raw_weights)?;
    write_section(out, "Filtered Weights", &record.filtered_weights)?;
    write_section(out, "FIR Coefficients", &record.fir_coefficients)?;
    write_section(out, "FFT Frequencies (last computed window)", &record.fft_frequencies)?;
    write_section(out, "FFT Magnitudes (last computed window)", &record.fft_magnitudes)?;
    out.flush()
}

/// `1.2346` or `N/A`
fn format_amplitude(value: Option<f64>) -> String {
    match value {
        Some(v) if !v.is_nan() => format!("{v:.4}"),
        _ => "N/A".to_owned(),
    }
}

/// Render the peak-to-peak summary file
pub fn write_analysis<W: Write>(out: &mut W, record: &BatchRecord, time: &DateTime<Utc>) -> std::io::Result<()> {
    let amplitudes = &record.amplitudes;
    writeln!(out, "Analysis for file: {}", record.name)?;
    writeln!(out, "Analysis timestamp: {}", header_timestamp(time))?;
    writeln!(out, "{}", "-".repeat(30))?;
    writeln!(out, "DC Offset (raw counts): {}", format_amplitude(Some(amplitudes.dc_offset)))?;
    writeln!(
        out,
        "Raw Data Peak-to-Peak Amplitude: {}",
        format_amplitude(amplitudes.raw_peak_to_peak)
    )?;
    writeln!(
        out,
        "Filtered Data Peak-to-Peak Amplitude: {}",
        format_amplitude(amplitudes.filtered_peak_to_peak)
    )?;
    out.flush()
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        info!(dir = %dir.display(), "Created output folder");
    }
    Ok(())
}

impl ResultSink for TextFileSink {
    fn persist(&mut self, record: &BatchRecord) -> Result<()> {
        ensure_dir(&self.dir)?;
        let path = self.path_for(&record.name);
        let mut file = BufWriter::new(File::create(&path)?);
        write_record(&mut file, record, &Utc::now())?;
        info!(path = %path.display(), "Wrote batch record");
        Ok(())
    }
}

/// Writes each batch's amplitude summary to `<dir>/analysis_<name>`
#[derive(Debug, Clone)]
pub struct AnalysisFileSink {
    dir: PathBuf,
}

impl AnalysisFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("analysis_{name}"))
    }
}

impl ResultSink for AnalysisFileSink {
    fn persist(&mut self, record: &BatchRecord) -> Result<()> {
        ensure_dir(&self.dir)?;
        let path = self.path_for(&record.name);
        let mut file = BufWriter::new(File::create(&path)?);
        write_analysis(&mut file, record, &Utc::now())?;
        info!(path = %path.display(), "Wrote amplitude analysis");
        Ok(())
    }
}
