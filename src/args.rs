//! Argument parsing for running from the command line

use std::{net::IpAddr, path::PathBuf};

use clap::{Parser, Subcommand};

use crate::{producer::SendMode, DEFAULT_INTERVAL_MS, SERVER_PORT};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// TOML settings file (calibration, DSP sizes, queue and frame limits)
    #[clap(short, long)]
    pub config: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve ADC recordings to whoever connects
    Serve(ServeArgs),
    /// Connect to a server, process what it sends and write the results out
    Receive(ReceiveArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on
    #[clap(short, long, default_value = "0.0.0.0")]
    pub bind: IpAddr,
    /// Port to listen on
    #[clap(short, long, default_value_t = SERVER_PORT)]
    #[clap(value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,
    /// Folder of `.txt` recordings
    #[clap(short, long, default_value = "adc_data")]
    pub data_dir: PathBuf,
    /// Milliseconds between files, and between samples on the receiving end
    #[clap(short, long, default_value_t = DEFAULT_INTERVAL_MS)]
    pub interval: u64,
    /// Only send the first file whose name carries this frequency (`50` or `50hz`)
    #[clap(short, long, conflicts_with = "file")]
    pub frequency: Option<String>,
    /// Only send this file
    #[clap(long)]
    pub file: Option<PathBuf>,
}

impl ServeArgs {
    pub fn mode(&self) -> SendMode {
        match (&self.frequency, &self.file) {
            (Some(token), _) => SendMode::Frequency(token.clone()),
            (None, Some(path)) => SendMode::Selected(Some(path.clone())),
            (None, None) => SendMode::Interval,
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct ReceiveArgs {
    /// Server to connect to
    #[clap(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Server port
    #[clap(short, long, default_value_t = SERVER_PORT)]
    #[clap(value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,
    /// Where the processed batch files go
    #[clap(short, long, default_value = "output_data")]
    pub output_dir: PathBuf,
    /// Where the per-batch amplitude summaries go
    #[clap(long, default_value = "analysis_results")]
    pub analysis_dir: PathBuf,
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}
