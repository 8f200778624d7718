use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{TableRow, UploadTable};
use crate::error::KiraError;
use crate::settings::ProcessingSettings;

const ALLCLOSE_RTOL: f64 = 1e-5;
const ALLCLOSE_ATOL: f64 = 1e-8;

/// 2-D absorbance data of one chromatogram, `absorbance[time][wavelength]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawData {
    pub time: Vec<f64>,
    pub wavelength: Vec<f64>,
    pub absorbance: Vec<Vec<f64>>,
}

impl RawData {
    pub fn new(
        time: Vec<f64>,
        wavelength: Vec<f64>,
        absorbance: Vec<Vec<f64>>,
    ) -> Result<Self, String> {
        let data = Self {
            time,
            wavelength,
            absorbance,
        };
        data.validate()?;
        Ok(data)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.time.is_empty() || self.wavelength.is_empty() {
            return Err("chromatogram has no data points".to_string());
        }
        if self.absorbance.len() != self.time.len() {
            return Err(format!(
                "expected {} time points, found {} rows",
                self.time.len(),
                self.absorbance.len()
            ));
        }
        if let Some(row) = self
            .absorbance
            .iter()
            .position(|row| row.len() != self.wavelength.len())
        {
            return Err(format!(
                "row {row} has {} values, expected {}",
                self.absorbance[row].len(),
                self.wavelength.len()
            ));
        }
        if self.time.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err("time axis is not strictly increasing".to_string());
        }
        Ok(())
    }

    /// Same shape and every sample equal within floating-point tolerance.
    pub fn has_time_axis(&self, time: &[f64]) -> bool {
        self.time.len() == time.len()
            && self
                .time
                .iter()
                .zip(time)
                .all(|(a, b)| (a - b).abs() <= ALLCLOSE_ATOL + ALLCLOSE_RTOL * b.abs())
    }

    /// Linear interpolation onto `time`; values outside the range are held
    /// at the nearest edge.
    pub fn interpolated_onto(&self, time: &[f64]) -> RawData {
        let absorbance = time
            .iter()
            .map(|&t| {
                (0..self.wavelength.len())
                    .map(|wl| interpolate(&self.time, t, |i| self.absorbance[i][wl]))
                    .collect()
            })
            .collect();
        RawData {
            time: time.to_vec(),
            wavelength: self.wavelength.clone(),
            absorbance,
        }
    }

    /// Subtracts `blank`, interpolated onto this time axis.
    pub fn subtract_blank(&mut self, blank: &RawData) -> Result<(), String> {
        if blank.wavelength.len() != self.wavelength.len()
            || blank
                .wavelength
                .iter()
                .zip(&self.wavelength)
                .any(|(a, b)| (a - b).abs() > ALLCLOSE_ATOL + ALLCLOSE_RTOL * b.abs())
        {
            return Err("blank wavelengths do not match the sample".to_string());
        }
        let blank = if blank.has_time_axis(&self.time) {
            blank.clone()
        } else {
            blank.interpolated_onto(&self.time)
        };
        for (row, blank_row) in self.absorbance.iter_mut().zip(&blank.absorbance) {
            for (value, blank_value) in row.iter_mut().zip(blank_row) {
                *value -= blank_value;
            }
        }
        Ok(())
    }
}

fn interpolate(xs: &[f64], x: f64, ys: impl Fn(usize) -> f64) -> f64 {
    let upper = xs.partition_point(|&value| value <= x);
    if upper == 0 {
        return ys(0);
    }
    if upper == xs.len() {
        return ys(xs.len() - 1);
    }
    let lower = upper - 1;
    let span = xs[upper] - xs[lower];
    let weight = (x - xs[lower]) / span;
    ys(lower) + (ys(upper) - ys(lower)) * weight
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub left: usize,
    pub apex: usize,
    pub right: usize,
    pub height: f64,
    pub integral: f64,
    #[serde(default)]
    pub compound: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chromatogram {
    pub name: String,
    /// Original upload name once loaded; only informative.
    pub sample_path: String,
    #[serde(default)]
    pub blank_path: Option<String>,
    pub raw: RawData,
    #[serde(default)]
    pub peaks: Vec<Peak>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundReference {
    pub compound: String,
    #[serde(default)]
    pub concentration: Option<f64>,
}

/// The analysis dataset. Replaced wholesale in the state store, never edited
/// in place once shared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub chromatograms: BTreeMap<usize, Chromatogram>,
    #[serde(default)]
    pub compound_references: BTreeMap<usize, CompoundReference>,
    #[serde(default)]
    pub istd_concentrations: BTreeMap<usize, f64>,
    #[serde(default)]
    pub istd_chromatogram: Option<usize>,
    #[serde(default)]
    pub settings: Option<ProcessingSettings>,
}

impl Campaign {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chromatograms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chromatograms.is_empty()
    }

    /// Index one past the largest in use.
    pub fn next_index(&self) -> usize {
        self.chromatograms
            .keys()
            .next_back()
            .map_or(0, |last| last + 1)
    }

    pub fn push(&mut self, chromatogram: Chromatogram) -> usize {
        let idx = self.next_index();
        self.chromatograms.insert(idx, chromatogram);
        idx
    }

    /// Time axis every chromatogram is aligned to.
    pub fn reference_time(&self) -> Option<&[f64]> {
        self.chromatograms
            .values()
            .next()
            .map(|chromatogram| chromatogram.raw.time.as_slice())
    }

    pub fn time_range(&self) -> Option<(f64, f64)> {
        let time = self.reference_time()?;
        Some((*time.first()?, *time.last()?))
    }

    /// Lowest and highest wavelength; the header may list them in any order.
    pub fn wavelength_range(&self) -> Option<(f64, f64)> {
        let wavelength = &self.chromatograms.values().next()?.raw.wavelength;
        let first = *wavelength.first()?;
        Some(
            wavelength
                .iter()
                .fold((first, first), |(low, high), &wl| (low.min(wl), high.max(wl))),
        )
    }

    pub fn istd_compound(&self) -> Option<&str> {
        let idx = self.istd_chromatogram?;
        self.compound_references
            .get(&idx)
            .map(|reference| reference.compound.as_str())
    }

    /// Copy of one chromatogram at index 0, sharing nothing with `self`.
    pub fn isolated(&self, idx: usize) -> Result<Campaign, KiraError> {
        let chromatogram = self
            .chromatograms
            .get(&idx)
            .ok_or(KiraError::ChromatogramNotFound(idx))?;
        let mut campaign = Campaign {
            settings: self.settings,
            ..Campaign::default()
        };
        campaign.chromatograms.insert(0, chromatogram.clone());
        Ok(campaign)
    }

    pub fn validate(&self) -> Result<(), String> {
        for idx in self
            .compound_references
            .keys()
            .chain(self.istd_concentrations.keys())
            .chain(self.istd_chromatogram.iter())
        {
            if !self.chromatograms.contains_key(idx) {
                return Err(format!("annotation refers to missing chromatogram {idx}"));
            }
        }
        if let Some(idx) = self.istd_chromatogram {
            if !self.compound_references.contains_key(&idx) {
                return Err(format!(
                    "internal standard chromatogram {idx} has no compound"
                ));
            }
        }
        let reference = self.reference_time();
        for (idx, chromatogram) in &self.chromatograms {
            chromatogram
                .raw
                .validate()
                .map_err(|err| format!("chromatogram {idx}: {err}"))?;
            if let Some(time) = reference {
                if chromatogram.raw.time.len() != time.len() {
                    return Err(format!("chromatogram {idx} has a different time axis"));
                }
            }
            for peak in &chromatogram.peaks {
                if !(peak.left <= peak.apex
                    && peak.apex <= peak.right
                    && peak.right < chromatogram.raw.time.len())
                {
                    return Err(format!("chromatogram {idx} has a peak out of range"));
                }
            }
        }
        Ok(())
    }

    /// Sample table describing this campaign; every row points at a loaded
    /// chromatogram.
    pub fn upload_table(&self) -> UploadTable {
        let rows = self
            .chromatograms
            .iter()
            .map(|(idx, chromatogram)| {
                let reference = self.compound_references.get(idx);
                TableRow {
                    chromatogram_id: Some(*idx),
                    sample_file_id: None,
                    blank_file_id: None,
                    name: chromatogram.name.clone(),
                    sample: chromatogram.sample_path.clone(),
                    blank: chromatogram.blank_path.clone(),
                    compound_name: reference.map(|reference| reference.compound.clone()),
                    compound_conc: reference
                        .and_then(|reference| reference.concentration)
                        .map(|value| value.to_string()),
                    istd_conc: self
                        .istd_concentrations
                        .get(idx)
                        .map(|value| value.to_string()),
                }
            })
            .collect();
        UploadTable {
            rows,
            istd: self.istd_compound().map(str::to_string),
        }
    }
}
