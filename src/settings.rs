use std::fs;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::campaign::Campaign;
use crate::error::KiraError;

/// Tuning parameters handed to the analysis engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    /// Smoothness penalty for the baseline.
    pub baseline_smoothness: f64,
    /// Minimum absolute peak height, averaged over the selected wavelengths.
    pub min_prominence: f64,
    /// Minimum peak height relative to the tallest peak.
    pub min_rel_prominence: f64,
    /// Maximum fraction of the peak height that the border may cut off.
    pub border_max_peak_cutoff: f64,
    /// Maximum relative height of the minimum between two peaks to split them.
    pub split_threshold: f64,
    /// Minimum fraction of the data explained by fitted peaks.
    pub explained_threshold: f64,
    /// Maximum apex shift, relative to peak width, for one compound.
    pub max_peak_distance: f64,
    /// Minimum spectrum correlation for one compound.
    pub min_spectrum_correl: f64,
    pub min_elution_time: f64,
    pub max_elution_time: f64,
    pub min_wavelength: f64,
    pub max_wavelength: f64,
    /// Minimum peak area relative to the largest peak.
    pub min_rel_integral: f64,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            baseline_smoothness: 1.0,
            min_prominence: 0.001,
            min_rel_prominence: 0.01,
            border_max_peak_cutoff: 0.1,
            split_threshold: 0.05,
            explained_threshold: 0.995,
            max_peak_distance: 0.5,
            min_spectrum_correl: 0.99,
            min_elution_time: 0.0,
            max_elution_time: 1e6,
            min_wavelength: 220.0,
            max_wavelength: 600.0,
            min_rel_integral: 0.01,
        }
    }
}

impl ProcessingSettings {
    /// YAML mapping of every setting.
    pub fn to_text(&self) -> Result<String, KiraError> {
        serde_yaml::to_string(self).map_err(|err| KiraError::SettingsParse(err.to_string()))
    }

    /// Reads a YAML mapping; JSON objects are accepted too. Missing keys
    /// take their defaults.
    pub fn from_text(text: &str) -> Result<Self, KiraError> {
        let settings: Self =
            serde_yaml::from_str(text).map_err(|err| KiraError::SettingsParse(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Utf8Path) -> Result<Self, KiraError> {
        let text = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
        Self::from_text(&text)
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), KiraError> {
        let text = self.to_text()?;
        fs::write(path.as_std_path(), text)
            .map_err(|err| KiraError::Filesystem(format!("write {path}: {err}")))
    }

    pub fn validate(&self) -> Result<(), KiraError> {
        let values = [
            self.baseline_smoothness,
            self.min_prominence,
            self.min_rel_prominence,
            self.border_max_peak_cutoff,
            self.split_threshold,
            self.explained_threshold,
            self.max_peak_distance,
            self.min_spectrum_correl,
            self.min_elution_time,
            self.max_elution_time,
            self.min_wavelength,
            self.max_wavelength,
            self.min_rel_integral,
        ];
        if values.iter().any(|value| !value.is_finite()) {
            return Err(KiraError::SettingsParse(
                "all settings must be finite numbers".to_string(),
            ));
        }
        if self.min_wavelength > self.max_wavelength {
            return Err(KiraError::SettingsParse(
                "min_wavelength is larger than max_wavelength".to_string(),
            ));
        }
        if self.min_elution_time > self.max_elution_time {
            return Err(KiraError::SettingsParse(
                "min_elution_time is larger than max_elution_time".to_string(),
            ));
        }
        Ok(())
    }

    /// Clips wavelength and elution-time bounds to what the campaign covers.
    pub fn clamped_to(&self, campaign: &Campaign) -> Self {
        let mut settings = *self;
        if let Some((first, last)) = campaign.wavelength_range() {
            settings.min_wavelength = settings.min_wavelength.max(first.round());
            settings.max_wavelength = settings.max_wavelength.min(last.round());
        }
        if let Some((first, last)) = campaign.time_range() {
            settings.min_elution_time = settings.min_elution_time.max(round2(first));
            settings.max_elution_time = settings.max_elution_time.min(round2(last));
        }
        settings
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
