use crate::campaign::{Campaign, Chromatogram, Peak};
use crate::error::KiraError;
use crate::settings::ProcessingSettings;

/// The chromatographic analysis. Owns baseline correction, peak picking and
/// compound matching; the session only moves campaigns in and out of it.
pub trait AnalysisEngine: Send + Sync + 'static {
    fn process_all(
        &self,
        campaign: Campaign,
        settings: &ProcessingSettings,
    ) -> Result<Campaign, KiraError>;

    /// Processes a campaign holding a single chromatogram at index 0.
    fn process_single(
        &self,
        campaign: Campaign,
        settings: &ProcessingSettings,
    ) -> Result<Campaign, KiraError> {
        self.process_all(campaign, settings)
    }
}

/// Wavelength-averaged peak picking with reference-based compound naming.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeakPickingEngine;

impl AnalysisEngine for PeakPickingEngine {
    fn process_all(
        &self,
        mut campaign: Campaign,
        settings: &ProcessingSettings,
    ) -> Result<Campaign, KiraError> {
        settings.validate()?;
        if campaign.is_empty() {
            return Err(KiraError::Engine(
                "the campaign does not contain any chromatograms".to_string(),
            ));
        }

        for (idx, chromatogram) in campaign.chromatograms.iter_mut() {
            let signal = averaged_signal(chromatogram, settings).ok_or_else(|| {
                KiraError::Engine(format!(
                    "chromatogram {idx} has no wavelengths between {} and {} nm",
                    settings.min_wavelength, settings.max_wavelength
                ))
            })?;
            chromatogram.peaks = pick_peaks(&chromatogram.raw.time, &signal, settings);
        }

        assign_compounds(&mut campaign, settings);
        campaign.settings = Some(*settings);
        Ok(campaign)
    }
}

fn selected_wavelengths(chromatogram: &Chromatogram, settings: &ProcessingSettings) -> Vec<usize> {
    chromatogram
        .raw
        .wavelength
        .iter()
        .enumerate()
        .filter(|(_, wl)| (settings.min_wavelength..=settings.max_wavelength).contains(*wl))
        .map(|(i, _)| i)
        .collect()
}

fn averaged_signal(chromatogram: &Chromatogram, settings: &ProcessingSettings) -> Option<Vec<f64>> {
    let columns = selected_wavelengths(chromatogram, settings);
    if columns.is_empty() {
        return None;
    }
    let signal: Vec<f64> = chromatogram
        .raw
        .absorbance
        .iter()
        .map(|row| columns.iter().map(|&c| row[c]).sum::<f64>() / columns.len() as f64)
        .collect();
    let baseline = signal.iter().copied().fold(f64::INFINITY, f64::min);
    Some(signal.into_iter().map(|value| value - baseline).collect())
}

fn pick_peaks(time: &[f64], signal: &[f64], settings: &ProcessingSettings) -> Vec<Peak> {
    let tallest = signal.iter().copied().fold(0.0, f64::max);
    let min_height = settings
        .min_prominence
        .max(settings.min_rel_prominence * tallest);

    let mut peaks = Vec::new();
    for apex in 1..signal.len().saturating_sub(1) {
        let height = signal[apex];
        let is_maximum = height > signal[apex - 1] && height >= signal[apex + 1];
        let in_window = (settings.min_elution_time..=settings.max_elution_time).contains(&time[apex]);
        if !is_maximum || !in_window || height < min_height || height <= 0.0 {
            continue;
        }
        let cutoff = settings.border_max_peak_cutoff * height;
        let mut left = apex;
        while left > 0 && signal[left - 1] < signal[left] && signal[left] > cutoff {
            left -= 1;
        }
        let mut right = apex;
        while right + 1 < signal.len() && signal[right + 1] < signal[right] && signal[right] > cutoff
        {
            right += 1;
        }
        peaks.push(Peak {
            left,
            apex,
            right,
            height,
            integral: trapezoid(&time[left..=right], &signal[left..=right]),
            compound: None,
        });
    }

    let largest = peaks.iter().map(|peak| peak.integral).fold(0.0, f64::max);
    peaks.retain(|peak| peak.integral >= settings.min_rel_integral * largest);
    peaks
}

fn trapezoid(time: &[f64], values: &[f64]) -> f64 {
    time.windows(2)
        .zip(values.windows(2))
        .map(|(t, v)| (t[1] - t[0]) * (v[0] + v[1]) / 2.0)
        .sum()
}

fn apex_spectrum(chromatogram: &Chromatogram, peak: &Peak, columns: &[usize]) -> Vec<f64> {
    columns
        .iter()
        .map(|&c| chromatogram.raw.absorbance[peak.apex][c])
        .collect()
}

fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 1.0;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for i in 0..n {
        let (da, db) = (a[i] - mean_a, b[i] - mean_b);
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return if var_a == var_b { 1.0 } else { 0.0 };
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

struct CompoundTemplate {
    name: String,
    apex_time: f64,
    width: f64,
    spectrum: Vec<f64>,
}

fn assign_compounds(campaign: &mut Campaign, settings: &ProcessingSettings) {
    let mut templates = Vec::new();
    for (idx, reference) in &campaign.compound_references {
        let Some(chromatogram) = campaign.chromatograms.get(idx) else {
            continue;
        };
        let Some(peak) = chromatogram
            .peaks
            .iter()
            .max_by(|a, b| a.integral.total_cmp(&b.integral))
        else {
            continue;
        };
        let columns = selected_wavelengths(chromatogram, settings);
        let time = &chromatogram.raw.time;
        templates.push(CompoundTemplate {
            name: reference.compound.clone(),
            apex_time: time[peak.apex],
            width: time[peak.right] - time[peak.left],
            spectrum: apex_spectrum(chromatogram, peak, &columns),
        });
    }

    for chromatogram in campaign.chromatograms.values_mut() {
        let columns = selected_wavelengths(chromatogram, settings);
        let assignments: Vec<Option<String>> = chromatogram
            .peaks
            .iter()
            .map(|peak| {
                let apex_time = chromatogram.raw.time[peak.apex];
                let spectrum = apex_spectrum(chromatogram, peak, &columns);
                templates
                    .iter()
                    .filter(|template| {
                        (apex_time - template.apex_time).abs()
                            <= settings.max_peak_distance * template.width
                            && correlation(&spectrum, &template.spectrum)
                                >= settings.min_spectrum_correl
                    })
                    .min_by(|a, b| {
                        (apex_time - a.apex_time)
                            .abs()
                            .total_cmp(&(apex_time - b.apex_time).abs())
                    })
                    .map(|template| template.name.clone())
            })
            .collect();
        for (peak, compound) in chromatogram.peaks.iter_mut().zip(assignments) {
            peak.compound = compound;
        }
    }
}
