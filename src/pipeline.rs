//! The processing loop: drains queued batches one sample per tick, at the pace the producer recorded them.
//!
//! Every sample lands in the DSP window (raw counts) and the raw plot window
//! (as a weight). Once the DSP window holds `max(fir_taps, fft_window)`
//! samples, each tick also filters the window and pushes the newest filtered
//! value to the filtered plot window. Before that the filtered series gets NaN,
//! an explicit gap. A finished batch goes to the [`ResultSink`] and the rings
//! start over with the next one.

use std::{thread, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{
    calibration::Calibration,
    circular::{finite_range, CircularBuffer, PlotBuffers},
    dsp::{fir_filter, nan_mean, remove_dc, Spectrum, SpectrumEstimator},
    exfil::ResultSink,
    monitoring::{Monitor, StatusEvent},
    queue::{BatchReceiver, Dequeue, SampleBatch},
    session::StopToken,
    DSP_BUFFER_SIZE, FFT_WINDOW_SIZE, FIR_NUM_TAPS, PLOT_BUFFER_SIZE,
};

/// How often an idle pipeline looks at the queue
const IDLE_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DspSettings {
    pub fir_taps: usize,
    pub fft_window: usize,
    pub dsp_capacity: usize,
    pub plot_capacity: usize,
}

impl Default for DspSettings {
    fn default() -> Self {
        Self {
            fir_taps: FIR_NUM_TAPS,
            fft_window: FFT_WINDOW_SIZE,
            dsp_capacity: DSP_BUFFER_SIZE,
            plot_capacity: PLOT_BUFFER_SIZE,
        }
    }
}

impl DspSettings {
    /// Samples needed in the DSP window before filtering starts
    pub fn warm_up(&self) -> usize {
        self.fir_taps.max(self.fft_window)
    }
}

/// Whole-batch peak-to-peak figures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmplitudeSummary {
    /// Mean raw count over the whole batch, NaN for an empty one
    pub dc_offset: f64,
    pub raw_peak_to_peak: Option<f64>,
    /// From filtering the whole batch around `dc_offset` in one pass
    pub filtered_peak_to_peak: Option<f64>,
}

impl Default for AmplitudeSummary {
    fn default() -> Self {
        Self {
            dc_offset: f64::NAN,
            raw_peak_to_peak: None,
            filtered_peak_to_peak: None,
        }
    }
}

/// Spread of the non-NaN values
pub fn peak_to_peak(values: &[f64]) -> Option<f64> {
    finite_range(values).map(|(lo, hi)| hi - lo)
}

/// Everything kept about one processed batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchRecord {
    pub name: String,
    pub raw_weights: Vec<f64>,
    pub filtered_weights: Vec<f64>,
    /// Taps of the last filter run, empty if the window never warmed up
    pub fir_coefficients: Vec<f64>,
    pub fft_frequencies: Vec<f64>,
    pub fft_magnitudes: Vec<f64>,
    pub amplitudes: AmplitudeSummary,
}

struct Draining {
    batch: SampleBatch,
    cursor: usize,
    raw_weights: Vec<f64>,
    filtered_weights: Vec<f64>,
    fir_coefficients: Vec<f64>,
    spectrum: Spectrum,
}

enum PipelineState {
    Idle,
    Draining(Draining),
}

/// Outcome of a single [`Pipeline::tick`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// One sample processed, wait `interval_ms` before the next
    Processed { interval_ms: u64 },
    /// Nothing to do yet
    Waiting,
    /// Queue finished and nothing left to drain
    Complete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub batches: usize,
    pub samples: usize,
    pub persist_failures: usize,
}

pub struct Pipeline {
    settings: DspSettings,
    calibration: Calibration,
    state: PipelineState,
    dsp_window: CircularBuffer<f64>,
    plots: PlotBuffers,
    estimator: SpectrumEstimator,
    sink: Box<dyn ResultSink>,
    monitor: Monitor,
    summary: PipelineSummary,
}

impl Pipeline {
    pub fn new(settings: DspSettings, calibration: Calibration, sink: Box<dyn ResultSink>, monitor: Monitor) -> Self {
        Self {
            dsp_window: CircularBuffer::new(settings.dsp_capacity),
            plots: PlotBuffers::new(settings.plot_capacity),
            settings,
            calibration,
            state: PipelineState::Idle,
            estimator: SpectrumEstimator::new(),
            sink,
            monitor,
            summary: PipelineSummary::default(),
        }
    }

    /// Handle on the plot windows for whoever redraws
    pub fn plots(&self) -> PlotBuffers {
        self.plots.clone()
    }

    pub fn summary(&self) -> PipelineSummary {
        self.summary
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, PipelineState::Idle)
    }

    fn start(&mut self, batch: SampleBatch) {
        info!(name = %batch.name, samples = batch.len(), interval_ms = batch.interval_ms, "Processing batch");
        self.dsp_window.clear();
        self.plots.reset();
        let capacity = batch.len();
        self.state = PipelineState::Draining(Draining {
            batch,
            cursor: 0,
            raw_weights: Vec::with_capacity(capacity),
            filtered_weights: Vec::with_capacity(capacity),
            fir_coefficients: vec![],
            spectrum: Spectrum::default(),
        });
    }

    /// Advance by at most one sample
    pub fn tick(&mut self, queue: &mut BatchReceiver) -> Tick {
        if self.is_idle() {
            match queue.dequeue() {
                Dequeue::Batch(batch) => self.start(batch),
                Dequeue::Empty => return Tick::Waiting,
                Dequeue::Finished => return Tick::Complete,
            }
        }
        let PipelineState::Draining(draining) = &mut self.state else {
            return Tick::Waiting;
        };
        let interval_ms = draining.batch.interval_ms;

        if let Some(&raw) = draining.batch.samples.get(draining.cursor) {
            let raw = raw as f64;
            self.dsp_window.push(raw);
            let raw_weight = self.calibration.weight(raw);

            let filtered_weight = if self.dsp_window.len() >= self.settings.warm_up() {
                let window = self.dsp_window.snapshot();
                let mean = nan_mean(&window);
                let centred = remove_dc(&window);
                // 1000 / interval samples per second
                let sample_rate_hz = 1000.0 / interval_ms.max(1) as f64;
                let spectrum = self.estimator.estimate(&centred, sample_rate_hz);
                let fir = fir_filter(&centred, spectrum.dominant_hz, sample_rate_hz, self.settings.fir_taps);
                let last = fir.filtered.last().copied().unwrap_or(f64::NAN);
                draining.fir_coefficients = fir.coefficients;
                draining.spectrum = spectrum;
                self.calibration.weight(last + mean)
            } else {
                f64::NAN
            };

            self.plots.push(raw_weight, filtered_weight);
            draining.raw_weights.push(raw_weight);
            draining.filtered_weights.push(filtered_weight);
            draining.cursor += 1;
            self.summary.samples += 1;
            self.monitor.notify(StatusEvent::SampleProcessed {
                name: draining.batch.name.clone(),
                index: draining.cursor,
                total: draining.batch.len(),
            });
        }

        if draining.cursor >= draining.batch.len() {
            self.finish();
            // Go straight on to the next batch if there is one
            if let Dequeue::Batch(batch) = queue.dequeue() {
                self.start(batch);
            }
        }
        Tick::Processed { interval_ms }
    }

    fn finish(&mut self) {
        let state = std::mem::replace(&mut self.state, PipelineState::Idle);
        let PipelineState::Draining(draining) = state else {
            return;
        };
        let samples = draining.batch.len();
        let amplitudes = self.amplitudes(&draining.batch, &draining.raw_weights);
        let name = draining.batch.name;
        let record = BatchRecord {
            name: name.clone(),
            raw_weights: draining.raw_weights,
            filtered_weights: draining.filtered_weights,
            fir_coefficients: draining.fir_coefficients,
            fft_frequencies: draining.spectrum.frequencies,
            fft_magnitudes: draining.spectrum.magnitudes,
            amplitudes,
        };
        if let Err(e) = self.sink.persist(&record) {
            error!(name = %name, error = %e, "Failed to persist batch");
            self.summary.persist_failures += 1;
        }
        self.summary.batches += 1;
        info!(name = %name, samples, "Finished batch");
        self.monitor.notify(StatusEvent::BatchFinished { name, samples });
    }

    /// Filter the whole batch around its own mean and measure both series
    fn amplitudes(&mut self, batch: &SampleBatch, raw_weights: &[f64]) -> AmplitudeSummary {
        let signal: Vec<f64> = batch.samples.iter().map(|&s| s as f64).collect();
        let dc_offset = nan_mean(&signal);
        let sample_rate_hz = 1000.0 / batch.interval_ms.max(1) as f64;
        let centred = remove_dc(&signal);
        let spectrum = self.estimator.estimate(&centred, sample_rate_hz);
        let fir = fir_filter(&centred, spectrum.dominant_hz, sample_rate_hz, self.settings.fir_taps);
        let filtered: Vec<f64> = fir
            .filtered
            .iter()
            .map(|v| self.calibration.weight(v + dc_offset))
            .collect();
        let summary = AmplitudeSummary {
            dc_offset,
            raw_peak_to_peak: peak_to_peak(raw_weights),
            filtered_peak_to_peak: peak_to_peak(&filtered),
        };
        debug!(name = %batch.name, ?summary, "Batch amplitudes");
        summary
    }

    /// Tick until the queue is finished and drained, or a stop is requested
    pub fn run(&mut self, queue: &mut BatchReceiver, stop: &StopToken) -> PipelineSummary {
        loop {
            if stop.is_stopped() {
                info!("Stop requested, leaving processing loop");
                break;
            }
            match self.tick(queue) {
                Tick::Processed { interval_ms } => thread::sleep(Duration::from_millis(interval_ms)),
                Tick::Waiting => thread::sleep(IDLE_POLL),
                Tick::Complete => {
                    debug!("Queue finished");
                    break;
                }
            }
        }
        self.summary
    }
}
