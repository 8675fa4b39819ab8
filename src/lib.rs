pub mod args;
pub mod calibration;
pub mod capture;
pub mod circular;
pub mod config;
pub mod dsp;
pub mod error;
pub mod exfil;
pub mod monitoring;
pub mod pipeline;
pub mod producer;
pub mod queue;
pub mod reliable;
pub mod session;
pub mod wire;

pub use error::{Error, Result};

pub const SERVER_PORT: u16 = 9999;
// Pacing between files (producer) and between samples (consumer)
pub const DEFAULT_INTERVAL_MS: u64 = 20;
pub const DEFAULT_MODE: &str = "interval";
// Batches waiting between the network thread and the processing loop
pub const QUEUE_CAPACITY: usize = 10;
// Samples shown per plot
pub const PLOT_BUFFER_SIZE: usize = 500;
// Sliding window the filter and spectrum run over
pub const DSP_BUFFER_SIZE: usize = 500;
pub const FFT_WINDOW_SIZE: usize = 256;
pub const FIR_NUM_TAPS: usize = 51;
// Load cell calibration
pub const ZERO_CAL: f64 = 0.01823035255075;
pub const SCALE_CAL: f64 = 0.00000451794631;
// 2^31, raw counts are signed 32 bit
pub const ADC_FULL_SCALE: f64 = 2147483648.0;
