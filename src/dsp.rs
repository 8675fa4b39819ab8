//! Window-level signal processing: DC removal, FIR low-pass, magnitude spectrum.
//!
//! Each function takes an ordered snapshot of the DSP window and returns
//! fixed-shape output: the FIR gives one filtered value per input sample plus
//! its taps, the spectrum gives `len / 2` frequency/magnitude bins plus the
//! dominant frequency.

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Subtract the mean of the non-NaN values. An all-NaN window stays all NaN.
pub fn remove_dc(window: &[f64]) -> Vec<f64> {
    let (sum, n) = window
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        return vec![f64::NAN; window.len()];
    }
    let mean = sum / n as f64;
    window.iter().map(|v| v - mean).collect()
}

/// NaN-excluding mean, NaN if there is nothing to average
pub fn nan_mean(window: &[f64]) -> f64 {
    let (sum, n) = window
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FirOutput {
    /// Same length as the input window
    pub filtered: Vec<f64>,
    pub coefficients: Vec<f64>,
}

/// Hamming-windowed sinc low-pass with unity DC gain.
///
/// The cutoff is normalised to Nyquist and clamped into `[0.01, 0.99]`.
pub fn lowpass_taps(taps: usize, cutoff_hz: f64, sample_rate_hz: f64) -> Vec<f64> {
    let taps = taps.max(1);
    let nyquist = sample_rate_hz / 2.0;
    let normalized = if nyquist > 0.0 && cutoff_hz.is_finite() {
        (cutoff_hz / nyquist).clamp(0.01, 0.99)
    } else {
        0.99
    };
    let centre = (taps - 1) as f64 / 2.0;
    let mut h: Vec<f64> = (0..taps)
        .map(|i| {
            let m = i as f64 - centre;
            let sinc = if m == 0.0 {
                normalized
            } else {
                (PI * normalized * m).sin() / (PI * m)
            };
            let window = if taps > 1 {
                0.54 - 0.46 * (2.0 * PI * i as f64 / (taps - 1) as f64).cos()
            } else {
                1.0
            };
            sinc * window
        })
        .collect();
    let gain: f64 = h.iter().sum();
    if gain != 0.0 {
        h.iter_mut().for_each(|c| *c /= gain);
    }
    h
}

/// Causal direct-form FIR over `window`, zero initial state
pub fn fir_filter(window: &[f64], cutoff_hz: f64, sample_rate_hz: f64, taps: usize) -> FirOutput {
    let coefficients = lowpass_taps(taps, cutoff_hz, sample_rate_hz);
    let filtered = (0..window.len())
        .map(|n| {
            coefficients
                .iter()
                .take(n + 1)
                .enumerate()
                .map(|(k, c)| c * window[n - k])
                .sum::<f64>()
        })
        .collect();
    FirOutput {
        filtered,
        coefficients,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spectrum {
    pub frequencies: Vec<f64>,
    pub magnitudes: Vec<f64>,
    /// Strongest bin above DC
    pub dominant_hz: f64,
}

/// Hann-windowed FFT magnitude spectrum. Keeps its plan between calls of the same length.
pub struct SpectrumEstimator {
    planner: FftPlanner<f64>,
    plan: Option<Arc<dyn Fft<f64>>>,
    hann: Vec<f64>,
    scratch: Vec<Complex<f64>>,
}

impl Default for SpectrumEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumEstimator {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            plan: None,
            hann: Vec::new(),
            scratch: Vec::new(),
        }
    }

    fn prepare(&mut self, n: usize) -> Arc<dyn Fft<f64>> {
        if let Some(plan) = &self.plan {
            if self.hann.len() == n {
                return plan.clone();
            }
        }
        let plan = self.planner.plan_fft_forward(n);
        self.hann = (0..n)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (n - 1) as f64).cos()))
            .collect();
        self.plan = Some(plan.clone());
        plan
    }

    pub fn estimate(&mut self, window: &[f64], sample_rate_hz: f64) -> Spectrum {
        let n = window.len();
        if n < 2 {
            return Spectrum::default();
        }
        let plan = self.prepare(n);
        self.scratch.clear();
        // NaN gaps contribute nothing
        self.scratch.extend(
            window
                .iter()
                .zip(&self.hann)
                .map(|(&v, &w)| Complex::new(if v.is_nan() { 0.0 } else { v * w }, 0.0)),
        );
        plan.process(&mut self.scratch);

        let bins = n / 2;
        let resolution = sample_rate_hz / n as f64;
        let frequencies: Vec<f64> = (0..bins).map(|k| k as f64 * resolution).collect();
        let magnitudes: Vec<f64> = self.scratch[..bins].iter().map(|c| c.norm()).collect();
        let dominant_hz = magnitudes
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, m)| !m.is_nan())
            .fold(None, |best: Option<(usize, f64)>, (k, &m)| match best {
                Some((_, bm)) if bm >= m => best,
                _ => Some((k, m)),
            })
            .map_or(frequencies[0], |(k, _)| frequencies[k]);
        Spectrum {
            frequencies,
            magnitudes,
            dominant_hz,
        }
    }
}

/// One-off spectrum, for callers that don't keep an estimator around
pub fn spectrum(window: &[f64], sample_rate_hz: f64) -> Spectrum {
    SpectrumEstimator::new().estimate(window, sample_rate_hz)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_dc_skips_nan() {
        let out = remove_dc(&[1.0, f64::NAN, 3.0]);
        assert_eq!(out[0], -1.0);
        assert!(out[1].is_nan());
        assert_eq!(out[2], 1.0);
        assert!(remove_dc(&[f64::NAN; 3]).iter().all(|v| v.is_nan()));
        assert_eq!(nan_mean(&[2.0, f64::NAN, 4.0]), 3.0);
        assert!(nan_mean(&[]).is_nan());
    }

    #[test]
    fn test_fir_shapes() {
        let window: Vec<f64> = (0..300).map(|i| (i as f64 * 0.3).sin()).collect();
        let out = fir_filter(&window, 5.0, 50.0, 51);
        assert_eq!(out.filtered.len(), 300);
        assert_eq!(out.coefficients.len(), 51);
        let gain: f64 = out.coefficients.iter().sum();
        assert!((gain - 1.0).abs() < 1e-9);
        // Symmetric (linear phase)
        for i in 0..25 {
            assert!((out.coefficients[i] - out.coefficients[50 - i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_fir_passes_dc() {
        let window = vec![2.0; 200];
        let out = fir_filter(&window, 3.0, 50.0, 51);
        assert!((out.filtered[199] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_fir_odd_cutoffs() {
        for cutoff in [0.0, -3.0, 1e9, f64::NAN] {
            let out = fir_filter(&[1.0; 60], cutoff, 50.0, 51);
            assert_eq!(out.coefficients.len(), 51);
            assert!(out.filtered.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_spectrum_finds_tone() {
        let fs = 50.0;
        let n = 256;
        // 5 Hz falls on bin 5 * 256 / 50 = 25.6, expect the nearest bin
        let window: Vec<f64> = (0..n).map(|i| (2.0 * PI * 5.0 * i as f64 / fs).sin()).collect();
        let mut est = SpectrumEstimator::new();
        let found = est.estimate(&window, fs);
        assert_eq!(found.frequencies.len(), n / 2);
        assert_eq!(found.magnitudes.len(), n / 2);
        assert!((found.dominant_hz - 5.0).abs() <= fs / n as f64, "{}", found.dominant_hz);

        // Plan reuse and re-plan on a different length
        let again = est.estimate(&window, fs);
        assert_eq!(again, found);
        assert_eq!(est.estimate(&window[..100], fs).magnitudes.len(), 50);
    }

    #[test]
    fn test_spectrum_too_short() {
        let found = spectrum(&[1.0], 50.0);
        assert!(found.frequencies.is_empty());
        assert_eq!(found.dominant_hz, 0.0);
    }
}
