use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::FileCache;
use crate::campaign::{Campaign, Chromatogram, CompoundReference};
use crate::domain::{CachedFile, TableRow, non_empty};
use crate::error::KiraError;
use crate::parser::parse_chromatogram_bytes;
use crate::state::StateStore;

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub campaign: Arc<Campaign>,
    /// Non-fatal notices, e.g. samples moved onto the reference time axis.
    pub warnings: Vec<String>,
}

/// Parsed annotations of one table row.
#[derive(Debug, Clone, PartialEq)]
struct RowAnnotations {
    compound: Option<String>,
    compound_conc: Option<f64>,
    istd_conc: Option<f64>,
}

impl RowAnnotations {
    fn parse(row: &TableRow) -> Result<Self, KiraError> {
        let compound = row.compound_name().map(str::to_string);
        let compound_conc = row
            .compound_conc()
            .map(|value| parse_concentration(value, "Compound Concentration"))
            .transpose()?;
        let istd_conc = row
            .istd_conc()
            .map(|value| parse_concentration(value, "ISTD Concentration"))
            .transpose()?;
        if compound.is_none() && compound_conc.is_some() {
            return Err(KiraError::Validation(
                "Please specify Compound Name if you specify Concentration!".to_string(),
            ));
        }
        Ok(Self {
            compound,
            compound_conc,
            istd_conc,
        })
    }

    fn apply(&self, campaign: &mut Campaign, idx: usize, istd: Option<&str>) {
        if let Some(compound) = &self.compound {
            campaign.compound_references.insert(
                idx,
                CompoundReference {
                    compound: compound.clone(),
                    concentration: self.compound_conc,
                },
            );
            if istd == Some(compound.as_str()) {
                campaign.istd_chromatogram = Some(idx);
            }
        }
        if let Some(conc) = self.istd_conc {
            campaign.istd_concentrations.insert(idx, conc);
        }
    }
}

fn parse_concentration(value: &str, field: &str) -> Result<f64, KiraError> {
    match value.parse::<f64>() {
        Ok(conc) if conc.is_finite() => Ok(conc),
        _ => Err(KiraError::Validation(format!(
            "Cannot convert {field} `{value}` to a number!"
        ))),
    }
}

/// Turns the edited sample table into a new campaign.
#[derive(Debug, Clone)]
pub struct CampaignBuilder {
    state: Arc<StateStore>,
    cache: FileCache,
}

impl CampaignBuilder {
    pub fn new(state: Arc<StateStore>, cache: FileCache) -> Self {
        Self { state, cache }
    }

    /// Builds the campaign from `rows` against the current one and commits it.
    /// On error the stored campaign is left untouched. Fails with
    /// [`KiraError::Busy`] while a background run owns the campaign.
    pub fn build(&self, rows: &[TableRow], istd: Option<&str>) -> Result<BuildOutcome, KiraError> {
        let previous = self.state.campaign();
        let (campaign, warnings) = self.assemble(rows, istd, &previous)?;
        let campaign = self.state.set_campaign_unless_processing(campaign)?;
        info!(
            chromatograms = campaign.len(),
            warnings = warnings.len(),
            "campaign updated from sample table"
        );
        Ok(BuildOutcome { campaign, warnings })
    }

    /// Builds without committing.
    pub fn assemble(
        &self,
        rows: &[TableRow],
        istd: Option<&str>,
        previous: &Campaign,
    ) -> Result<(Campaign, Vec<String>), KiraError> {
        let istd = non_empty(istd);
        if let Some(istd) = istd {
            if !rows.iter().any(|row| row.compound_name() == Some(istd)) {
                return Err(KiraError::Validation(
                    "Cannot find reference chromatogram for internal standard!".to_string(),
                ));
            }
        }
        let annotations = rows
            .iter()
            .map(RowAnnotations::parse)
            .collect::<Result<Vec<_>, _>>()?;

        let mut campaign = Campaign {
            settings: previous.settings,
            ..Campaign::default()
        };
        let mut warnings = Vec::new();

        // Loaded chromatograms keep their data; only the annotations change.
        for (row, annotations) in rows.iter().zip(&annotations) {
            let Some(idx) = row.chromatogram_id else {
                continue;
            };
            let mut chromatogram = previous
                .chromatograms
                .get(&idx)
                .cloned()
                .ok_or(KiraError::ChromatogramNotFound(idx))?;
            chromatogram.name = row.name.clone();
            campaign.chromatograms.insert(idx, chromatogram);
            annotations.apply(&mut campaign, idx, istd);
        }

        for (row, annotations) in rows.iter().zip(&annotations) {
            if row.chromatogram_id.is_some() {
                continue;
            }
            let sample_id = row.sample_file_id.ok_or_else(|| {
                KiraError::Validation(format!("Sample `{}` has no uploaded file!", row.name))
            })?;
            let sample = self.cache.get(sample_id)?;
            let blank = row
                .blank_file_id
                .map(|id| self.cache.get(id))
                .transpose()?;

            let mut chromatogram = self.load(row, &sample, blank.as_ref())?;
            if let Some(reference) = campaign.reference_time() {
                if !chromatogram.raw.has_time_axis(reference) {
                    let message = format!(
                        "Chromatograms have different sampling rates! `{}` was interpolated onto the time axis of the first chromatogram.",
                        row.name
                    );
                    warn!(sample = %sample.original_name, "{message}");
                    chromatogram.raw = chromatogram.raw.interpolated_onto(reference);
                    warnings.push(message);
                }
            }
            let idx = campaign.push(chromatogram);
            annotations.apply(&mut campaign, idx, istd);
        }

        Ok((campaign, warnings))
    }

    fn load(
        &self,
        row: &TableRow,
        sample: &CachedFile,
        blank: Option<&CachedFile>,
    ) -> Result<Chromatogram, KiraError> {
        let mut raw =
            parse_chromatogram_bytes(&sample.original_name, &self.cache.read(sample.id)?)?;
        if let Some(blank) = blank {
            let blank_raw =
                parse_chromatogram_bytes(&blank.original_name, &self.cache.read(blank.id)?)?;
            raw.subtract_blank(&blank_raw)
                .map_err(|message| KiraError::DataFormat {
                    name: blank.original_name.clone(),
                    message,
                })?;
        }
        // Cache paths are only needed while loading; keep the upload names.
        Ok(Chromatogram {
            name: row.name.clone(),
            sample_path: sample.original_name.clone(),
            blank_path: blank.map(|blank| blank.original_name.clone()),
            raw,
            peaks: Vec::new(),
        })
    }
}
