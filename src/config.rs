//! Optional TOML settings file for the tunables that don't belong on the command line

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    calibration::Calibration,
    error::{Error, Result},
    pipeline::DspSettings,
    wire::{FrameLimits, MAX_CONTENT_LEN, MAX_NAME_LEN},
    QUEUE_CAPACITY,
};

/// Everything in the settings file. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub calibration: Calibration,
    pub dsp: DspSettings,
    pub queue_capacity: usize,
    pub max_content_len: u64,
    pub max_name_len: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            calibration: Calibration::default(),
            dsp: DspSettings::default(),
            queue_capacity: QUEUE_CAPACITY,
            max_content_len: MAX_CONTENT_LEN,
            max_name_len: MAX_NAME_LEN,
        }
    }
}

impl Settings {
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read and validate `path`
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading settings");
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Defaults when `path` is `None`
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn limits(&self) -> FrameLimits {
        FrameLimits {
            max_name_len: self.max_name_len,
            max_content_len: self.max_content_len,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let dsp = &self.dsp;
        if dsp.fir_taps == 0 {
            return Err(Error::Config("dsp.fir_taps must be at least 1".into()));
        }
        if dsp.fft_window < 2 {
            return Err(Error::Config("dsp.fft_window must be at least 2".into()));
        }
        if dsp.dsp_capacity < dsp.warm_up() {
            return Err(Error::Config(format!(
                "dsp.dsp_capacity ({}) is smaller than max(fir_taps, fft_window) ({}), filtering would never start",
                dsp.dsp_capacity,
                dsp.warm_up()
            )));
        }
        if dsp.plot_capacity == 0 {
            return Err(Error::Config("dsp.plot_capacity must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }
        if self.max_name_len == 0 {
            return Err(Error::Config("max_name_len must be at least 1".into()));
        }
        if !self.calibration.zero.is_finite() || !self.calibration.scale.is_finite() {
            return Err(Error::Config("calibration values must be finite".into()));
        }
        if self.calibration.scale == 0.0 {
            warn!("Calibration scale is zero, every weight will be NaN");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Settings::from_toml("").unwrap(), Settings::default());
    }

    #[test]
    fn test_partial_override() {
        let settings = Settings::from_toml(
            r#"
            queue_capacity = 4

            [calibration]
            scale = 0.5

            [dsp]
            fir_taps = 11
            "#,
        )
        .unwrap();
        assert_eq!(settings.queue_capacity, 4);
        assert_eq!(settings.calibration.scale, 0.5);
        assert_eq!(settings.calibration.zero, crate::ZERO_CAL);
        assert_eq!(settings.dsp.fir_taps, 11);
        assert_eq!(settings.dsp.fft_window, crate::FFT_WINDOW_SIZE);
        assert_eq!(settings.limits(), FrameLimits::default());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            Settings::from_toml("[dsp]\ndsp_capacity = 100\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(Settings::from_toml("queue_capacity = 0"), Err(Error::Config(_))));
        assert!(matches!(Settings::from_toml("queue_capacity = \"ten\""), Err(Error::Toml(_))));
        assert!(matches!(Settings::from_toml("port = 9999"), Err(Error::Toml(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adc_slurper.toml");
        fs::write(&path, "max_name_len = 128\n").unwrap();
        assert_eq!(Settings::load(&path).unwrap().max_name_len, 128);
        assert!(matches!(Settings::load(&dir.path().join("nope.toml")), Err(Error::Io(_))));
        assert_eq!(Settings::load_or_default(None).unwrap(), Settings::default());
    }
}
